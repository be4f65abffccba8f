//! Observability for the replica governor
//!
//! Provides:
//! - Prometheus metrics (cycle latency, replica gauges, decision outcomes, cluster state)
//! - Structured audit events with tracing

use crate::journal::{DecisionRecord, Outcome};
use crate::models::{ClusterStatus, NodeEndpoint};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for cycle latency (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

static GLOBAL_METRICS: OnceLock<GovernorMetricsInner> = OnceLock::new();

struct GovernorMetricsInner {
    cycle_latency_seconds: Histogram,
    current_replicas: IntGauge,
    target_replicas: IntGauge,
    decisions: IntCounterVec,
    cooldown_vetoes: IntCounterVec,
    actuation_failures: IntCounterVec,
    metric_query_failures: IntCounterVec,
    cluster_healthy: IntGauge,
    failover_needed: IntGauge,
    connected_replicas: IntGauge,
    escalations: IntCounter,
}

impl GovernorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "replica_governor_cycle_latency_seconds",
                "Time spent running one control loop cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            current_replicas: register_int_gauge!(
                "replica_governor_current_replicas",
                "Replica count observed at the start of the last scaling decision"
            )
            .expect("Failed to register current_replicas"),

            target_replicas: register_int_gauge!(
                "replica_governor_target_replicas",
                "Replica count proposed by the last scaling decision"
            )
            .expect("Failed to register target_replicas"),

            decisions: register_int_counter_vec!(
                "replica_governor_decisions_total",
                "Decisions recorded, by lane, action and outcome",
                &["lane", "action", "outcome"]
            )
            .expect("Failed to register decisions_total"),

            cooldown_vetoes: register_int_counter_vec!(
                "replica_governor_cooldown_vetoes_total",
                "Scaling decisions suppressed by the cooldown gate",
                &["direction"]
            )
            .expect("Failed to register cooldown_vetoes_total"),

            actuation_failures: register_int_counter_vec!(
                "replica_governor_actuation_failures_total",
                "Actuator calls that returned an error",
                &["lane"]
            )
            .expect("Failed to register actuation_failures_total"),

            metric_query_failures: register_int_counter_vec!(
                "replica_governor_metric_query_failures_total",
                "Metric readings that degraded to zero, by metric and reason (error, absent)",
                &["metric", "reason"]
            )
            .expect("Failed to register metric_query_failures_total"),

            cluster_healthy: register_int_gauge!(
                "replica_governor_cluster_healthy",
                "1 when the last poll found the cluster healthy"
            )
            .expect("Failed to register cluster_healthy"),

            failover_needed: register_int_gauge!(
                "replica_governor_failover_needed",
                "1 when the last poll found a failover condition"
            )
            .expect("Failed to register failover_needed"),

            connected_replicas: register_int_gauge!(
                "replica_governor_connected_replicas",
                "Replicas that answered the last poll"
            )
            .expect("Failed to register connected_replicas"),

            escalations: register_int_counter!(
                "replica_governor_escalations_total",
                "Failovers needed with no safe promotion candidate"
            )
            .expect("Failed to register escalations_total"),
        }
    }
}

/// Handle to the process-wide governor metrics
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct GovernorMetrics {
    _private: (),
}

impl Default for GovernorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GovernorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(GovernorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &GovernorMetricsInner {
        GLOBAL_METRICS.get_or_init(GovernorMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn set_replicas(&self, current: u32, target: u32) {
        self.inner().current_replicas.set(i64::from(current));
        self.inner().target_replicas.set(i64::from(target));
    }

    pub fn record_decision(&self, record: &DecisionRecord) {
        self.inner()
            .decisions
            .with_label_values(&[record.lane.as_str(), record.action.as_str(), record.outcome.as_str()])
            .inc();
    }

    pub fn inc_cooldown_vetoes(&self, direction: &str) {
        self.inner().cooldown_vetoes.with_label_values(&[direction]).inc();
    }

    pub fn inc_actuation_failures(&self, lane: &str) {
        self.inner().actuation_failures.with_label_values(&[lane]).inc();
    }

    pub fn inc_metric_query_failures(&self, metric: &str, reason: &str) {
        self.inner()
            .metric_query_failures
            .with_label_values(&[metric, reason])
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn metric_query_failures(&self, metric: &str, reason: &str) -> u64 {
        self.inner()
            .metric_query_failures
            .with_label_values(&[metric, reason])
            .get()
    }

    pub fn set_cluster_state(&self, status: &ClusterStatus) {
        let inner = self.inner();
        inner.cluster_healthy.set(i64::from(status.is_healthy));
        inner.failover_needed.set(i64::from(status.failover_needed));
        inner.connected_replicas.set(status.healthy_replicas() as i64);
    }

    pub fn inc_escalations(&self) {
        self.inner().escalations.inc();
    }

    /// Render the default registry in the Prometheus text format
    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Structured audit events for the governor
///
/// One event per decision record plus lifecycle events, all tagged with the
/// governor instance name.
#[derive(Clone)]
pub struct AuditLogger {
    instance: String,
}

impl AuditLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log a decision record at a level matching its outcome
    pub fn log_decision(&self, record: &DecisionRecord) {
        let candidate = record.candidate.as_ref().map(ToString::to_string);

        match record.outcome {
            Outcome::Failed | Outcome::Escalated => {
                error!(
                    event = "decision",
                    instance = %self.instance,
                    lane = %record.lane,
                    action = %record.action,
                    outcome = %record.outcome,
                    reason = %record.reason,
                    candidate = ?candidate,
                    error = ?record.error,
                    "Decision could not be applied"
                );
            }
            Outcome::ManualRequired | Outcome::Skipped | Outcome::Vetoed => {
                warn!(
                    event = "decision",
                    instance = %self.instance,
                    lane = %record.lane,
                    action = %record.action,
                    outcome = %record.outcome,
                    confidence = record.confidence,
                    reason = %record.reason,
                    error = ?record.error,
                    "Decision not applied"
                );
            }
            Outcome::Executed | Outcome::DryRun | Outcome::NoAction => {
                info!(
                    event = "decision",
                    instance = %self.instance,
                    lane = %record.lane,
                    action = %record.action,
                    outcome = %record.outcome,
                    confidence = record.confidence,
                    reason = %record.reason,
                    metrics_used = ?record.metrics_used,
                    before = ?record.before,
                    after = ?record.after,
                    candidate = ?candidate,
                    "Decision recorded"
                );
            }
        }
    }

    /// Failover needed with no connected replica to promote
    pub fn log_escalation(&self, primary: &NodeEndpoint, reasons: &[String]) {
        error!(
            event = "failover_escalation",
            instance = %self.instance,
            primary = %primary,
            reasons = ?reasons,
            severity = "critical",
            "Failover required but no healthy replica is available, manual intervention needed"
        );
    }

    pub fn log_startup(&self, version: &str, dry_run: bool) {
        info!(
            event = "governor_started",
            instance = %self.instance,
            version = %version,
            dry_run = dry_run,
            "Replica governor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "governor_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Replica governor shutting down"
        );
    }
}
