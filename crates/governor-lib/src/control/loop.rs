//! Control loop driver
//!
//! Runs both lanes on one ticker. Cycles never overlap: the ticker delays
//! missed ticks instead of bursting, and shutdown is only observed between
//! cycles so an in-flight actuation always completes.

use super::{
    ControlConfig, CycleReport, FailoverLane, FailoverReply, FailoverTrigger, Promotion,
    ScalingLane, SharedClusterStatus,
};
use crate::actuator::{Actuation, ActuatorError};
use crate::health::{components, HealthRegistry};
use crate::journal::{DecisionJournal, DecisionRecord, Lane, Outcome, Topology};
use crate::models::{ClusterStatus, NodeEndpoint, NodeRole};
use crate::observability::{AuditLogger, GovernorMetrics};
use crate::source::MetricKind;
use anyhow::Result;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Operator requests waiting for the loop
const FAILOVER_REQUEST_QUEUE: usize = 4;

/// Bound an actuator call by `limit`
async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T, ActuatorError>>,
) -> Result<T, ActuatorError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ActuatorError::Timeout {
            operation,
            timeout_secs: limit.as_secs(),
        })?
}

pub struct ControlLoop {
    config: ControlConfig,
    scaling: Option<ScalingLane>,
    failover: Option<FailoverLane>,
    health: HealthRegistry,
    journal: DecisionJournal,
    cluster_status: SharedClusterStatus,
    metrics: GovernorMetrics,
    audit: AuditLogger,
    requests: Option<mpsc::Receiver<FailoverReply>>,
    cycles: u64,
}

impl ControlLoop {
    pub fn journal(&self) -> &DecisionJournal {
        &self.journal
    }

    pub fn scaling_lane(&self) -> Option<&ScalingLane> {
        self.scaling.as_ref()
    }

    /// Handle for operator-requested failovers, served by [`ControlLoop::run`]
    ///
    /// `None` when the failover lane is disabled.
    pub fn failover_trigger(&mut self) -> Option<FailoverTrigger> {
        self.failover.as_ref()?;
        let (sender, receiver) = mpsc::channel(FAILOVER_REQUEST_QUEUE);
        self.requests = Some(receiver);
        Some(FailoverTrigger::new(sender))
    }

    /// Run cycles until shutdown is signalled
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            scaling = self.scaling.is_some(),
            failover = self.failover.is_some(),
            "Starting control loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut requests = self.requests.take();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!(cycles = self.cycles, "Shutting down control loop");
                    break;
                }
                Some(reply) = next_request(&mut requests) => {
                    let record = self.manual_failover().await;
                    if reply.send(record).is_err() {
                        debug!("Failover requester went away before the reply");
                    }
                }
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
    }

    /// Run one cycle of both lanes
    pub async fn run_cycle(&mut self) -> CycleReport {
        let start = Instant::now();

        let scaling = self.scaling_cycle().await;
        let failover = self.failover_cycle().await;

        let mut report = CycleReport {
            scaling,
            failover,
            elapsed: start.elapsed(),
        };

        for record in report.scaling.iter_mut().chain(report.failover.iter_mut()) {
            self.commit(record).await;
        }

        self.cycles += 1;
        self.metrics.observe_cycle_latency(report.elapsed.as_secs_f64());
        self.health.set_ready(true).await;

        debug!(
            cycle = self.cycles,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Control cycle complete"
        );

        report
    }

    async fn scaling_cycle(&mut self) -> Option<DecisionRecord> {
        let lane = self.scaling.as_mut()?;
        let limit = self.config.actuator_timeout;

        let current = match bounded("replica_count", limit, lane.actuator.replica_count()).await {
            Ok(current) => current,
            Err(e) => {
                self.health
                    .set_degraded(components::SCALING_ACTUATOR, e.to_string())
                    .await;
                self.metrics.inc_actuation_failures(Lane::Scaling.as_str());
                return Some(DecisionRecord::skipped(Lane::Scaling, e));
            }
        };

        let collected = lane.collector.collect().await;
        match collected.failed.len() {
            0 => self.health.set_healthy(components::METRICS_SOURCE).await,
            n if n == MetricKind::ALL.len() => {
                self.health
                    .set_degraded(components::METRICS_SOURCE, "All metric queries failed")
                    .await
            }
            n => {
                self.health
                    .set_degraded(
                        components::METRICS_SOURCE,
                        format!("{} of {} metric queries failed", n, MetricKind::ALL.len()),
                    )
                    .await
            }
        }

        let sample = collected.sample;
        lane.window.push(sample.clone());
        let trend = lane.analyzer.analyze(lane.window.iter());
        let proposed = lane.engine.decide(&sample, current, &trend);
        let decision = lane.gate.permit(proposed.clone(), &lane.cooldown, Utc::now());

        self.metrics.set_replicas(current, decision.effective_target());

        if !decision.is_actionable() {
            if proposed.is_actionable() {
                self.metrics.inc_cooldown_vetoes(proposed.action.as_str());
                return Some(DecisionRecord::scaling(&decision, Outcome::Vetoed));
            }
            return Some(DecisionRecord::scaling(&decision, Outcome::NoAction));
        }

        let target = decision.target_replicas;
        let record = match bounded(
            "set_replica_count",
            limit,
            lane.actuator.set_replica_count(target),
        )
        .await
        {
            Ok(Actuation::Applied) => {
                lane.cooldown.record(decision.action, Utc::now());
                self.health.set_healthy(components::SCALING_ACTUATOR).await;
                DecisionRecord::scaling(&decision, Outcome::Executed)
            }
            Ok(Actuation::Simulated) => DecisionRecord::scaling(&decision, Outcome::DryRun),
            Err(e) => {
                self.health
                    .set_degraded(components::SCALING_ACTUATOR, e.to_string())
                    .await;
                self.metrics.inc_actuation_failures(Lane::Scaling.as_str());
                DecisionRecord::scaling(&decision, Outcome::Failed).with_error(e)
            }
        };
        Some(record)
    }

    async fn failover_cycle(&mut self) -> Option<DecisionRecord> {
        let auto_failover = self.failover.as_ref()?.auto_failover;

        let status = match self.poll_cluster().await {
            Ok(status) => status,
            Err(skipped) => return Some(skipped),
        };

        if !status.failover_needed {
            return Some(DecisionRecord::failover(&status, "none", Outcome::NoAction));
        }

        if !auto_failover {
            return Some(DecisionRecord::failover(&status, "failover", Outcome::ManualRequired));
        }

        Some(self.promote_best(&status).await)
    }

    /// Run the failover lane once on operator request
    ///
    /// Promotes the best replica whether or not a failover condition fired
    /// and regardless of `auto_failover`.
    pub async fn manual_failover(&mut self) -> DecisionRecord {
        if self.failover.is_none() {
            return DecisionRecord::skipped(Lane::Failover, "failover lane is disabled");
        }

        info!(event = "manual_failover", "Operator requested failover");
        let mut record = match self.poll_cluster().await {
            Ok(status) => self.promote_best(&status).await.requested_by_operator(),
            Err(skipped) => skipped,
        };
        self.commit(&mut record).await;
        record
    }

    /// Discover the topology and poll every node
    async fn poll_cluster(&mut self) -> Result<ClusterStatus, DecisionRecord> {
        let Some(lane) = self.failover.as_mut() else {
            return Err(DecisionRecord::skipped(Lane::Failover, "failover lane is disabled"));
        };

        let mut topology = match lane.discovery.discover().await {
            Ok(topology) => topology,
            Err(e) => {
                let message = format!("{} discovery failed: {:#}", lane.discovery.name(), e);
                self.health
                    .set_degraded(components::CLUSTER_MONITOR, message.clone())
                    .await;
                return Err(DecisionRecord::skipped(Lane::Failover, message));
            }
        };

        match lane.promoted.take() {
            Some(promotion) if topology.primary == promotion.old_primary => {
                debug!(
                    old_primary = %promotion.old_primary,
                    new_primary = %promotion.new_primary,
                    "Applying confirmed promotion to discovered topology"
                );
                topology.promote(&promotion.old_primary, &promotion.new_primary);
                lane.promoted = Some(promotion);
            }
            Some(promotion) => info!(
                new_primary = %promotion.new_primary,
                discovered = %topology.primary,
                "Discovery no longer reports the demoted primary"
            ),
            None => {}
        }

        let status = lane.monitor.poll(&topology.primary, &topology.replicas).await;
        self.metrics.set_cluster_state(&status);
        *self.cluster_status.write().await = Some(status.clone());

        let conflicting = status.replicas_reporting_primary();
        if !status.primary.connected {
            self.health
                .set_degraded(components::CLUSTER_MONITOR, "Primary unreachable")
                .await;
        } else if !conflicting.is_empty() {
            let nodes: Vec<String> = conflicting.iter().map(ToString::to_string).collect();
            self.health
                .set_degraded(
                    components::CLUSTER_MONITOR,
                    format!("Replicas report primary role: {}", nodes.join(", ")),
                )
                .await;
        } else {
            self.health.set_healthy(components::CLUSTER_MONITOR).await;
        }

        Ok(status)
    }

    /// Promote the best candidate of a polled cluster
    async fn promote_best(&mut self, status: &ClusterStatus) -> DecisionRecord {
        let Some(lane) = self.failover.as_mut() else {
            return DecisionRecord::skipped(Lane::Failover, "failover lane is disabled");
        };

        let candidates = status.candidates();
        let Some(selected) = lane.selector.select(&candidates) else {
            self.metrics.inc_escalations();
            self.audit
                .log_escalation(&status.primary_endpoint(), &status.failover_reasons);
            self.health
                .set_unhealthy(
                    components::CLUSTER_MONITOR,
                    "No safe failover candidate, manual intervention required",
                )
                .await;
            return DecisionRecord::failover(status, "failover", Outcome::Escalated);
        };

        let old_primary = status.primary_endpoint();
        let candidate = selected.endpoint();
        let promotion = Promotion {
            old_primary: old_primary.clone(),
            new_primary: candidate.clone(),
        };

        if selected.role == NodeRole::Primary {
            info!(
                candidate = %candidate,
                old_primary = %old_primary,
                "Candidate already reports primary role, adopting it"
            );
            lane.discovery
                .record_promotion(&old_primary, &candidate)
                .await;
            lane.promoted = Some(promotion);
            return DecisionRecord::failover(status, "adopt", Outcome::NoAction)
                .with_candidate(candidate.clone())
                .with_after(Topology::Primary { endpoint: candidate });
        }

        let mut peers: Vec<NodeEndpoint> = candidates
            .iter()
            .map(|c| c.endpoint())
            .filter(|ep| *ep != candidate)
            .collect();
        if status.primary.connected {
            peers.push(old_primary.clone());
        }

        let result = bounded(
            "promote_node",
            self.config.actuator_timeout,
            lane.actuator.promote_node(&candidate, &peers),
        )
        .await;

        let promote = |outcome| {
            DecisionRecord::failover(status, "promote", outcome).with_candidate(candidate.clone())
        };

        match result {
            Ok(Actuation::Applied) => {
                lane.discovery.record_promotion(&old_primary, &candidate).await;
                lane.promoted = Some(promotion);
                self.health.set_healthy(components::FAILOVER_ACTUATOR).await;
                promote(Outcome::Executed).with_after(Topology::Primary {
                    endpoint: candidate.clone(),
                })
            }
            Ok(Actuation::Simulated) => promote(Outcome::DryRun),
            Err(e) => {
                self.health
                    .set_degraded(components::FAILOVER_ACTUATOR, e.to_string())
                    .await;
                self.metrics.inc_actuation_failures(Lane::Failover.as_str());
                promote(Outcome::Failed).with_error(e)
            }
        }
    }

    /// Publish a record to metrics, the audit log and the journal
    async fn commit(&self, record: &mut DecisionRecord) {
        self.metrics.record_decision(record);
        self.audit.log_decision(record);
        record.id = self.journal.record(record.clone()).await;
    }
}

async fn next_request(requests: &mut Option<mpsc::Receiver<FailoverReply>>) -> Option<FailoverReply> {
    match requests {
        Some(requests) => requests.recv().await,
        None => std::future::pending().await,
    }
}

/// Builder for the control loop
pub struct ControlLoopBuilder {
    config: ControlConfig,
    scaling: Option<ScalingLane>,
    failover: Option<FailoverLane>,
    health: Option<HealthRegistry>,
    journal: Option<DecisionJournal>,
    cluster_status: Option<SharedClusterStatus>,
    audit: Option<AuditLogger>,
}

impl ControlLoopBuilder {
    pub fn new() -> Self {
        Self {
            config: ControlConfig::default(),
            scaling: None,
            failover: None,
            health: None,
            journal: None,
            cluster_status: None,
            audit: None,
        }
    }

    pub fn config(mut self, config: ControlConfig) -> Self {
        self.config = config;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn actuator_timeout(mut self, timeout: Duration) -> Self {
        self.config.actuator_timeout = timeout;
        self
    }

    pub fn scaling(mut self, lane: ScalingLane) -> Self {
        self.scaling = Some(lane);
        self
    }

    pub fn failover(mut self, lane: FailoverLane) -> Self {
        self.failover = Some(lane);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn journal(mut self, journal: DecisionJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn cluster_status(mut self, status: SharedClusterStatus) -> Self {
        self.cluster_status = Some(status);
        self
    }

    pub fn audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Build the loop; at least one lane is required
    pub fn build(self) -> Result<ControlLoop> {
        if self.scaling.is_none() && self.failover.is_none() {
            anyhow::bail!("At least one lane (scaling or failover) is required");
        }
        if self.config.interval.is_zero() {
            anyhow::bail!("Evaluation interval must be non-zero");
        }

        Ok(ControlLoop {
            config: self.config,
            scaling: self.scaling,
            failover: self.failover,
            health: self.health.unwrap_or_default(),
            journal: self.journal.unwrap_or_default(),
            cluster_status: self
                .cluster_status
                .unwrap_or_else(|| Arc::new(RwLock::new(None))),
            metrics: GovernorMetrics::new(),
            audit: self
                .audit
                .unwrap_or_else(|| AuditLogger::new("replica-governor")),
            requests: None,
            cycles: 0,
        })
    }
}

impl Default for ControlLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
