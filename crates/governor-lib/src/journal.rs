//! In-memory decision journal
//!
//! Keeps the most recent decision records of both lanes in a bounded ring
//! with FIFO eviction. The journal is shared between the control loop
//! (writer) and the HTTP API (reader).

use crate::models::{ClusterStatus, NodeEndpoint, ScalingDecision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default number of records kept
pub const DEFAULT_JOURNAL_CAPACITY: usize = 500;

/// Control loop lane that produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Scaling,
    Failover,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Scaling => "scaling",
            Lane::Failover => "failover",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scaling" => Ok(Lane::Scaling),
            "failover" => Ok(Lane::Failover),
            other => Err(format!("unknown lane '{}'", other)),
        }
    }
}

/// What happened to a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The actuator confirmed the change
    Executed,
    /// Nothing to do
    NoAction,
    /// Suppressed by the cooldown gate
    Vetoed,
    /// Logged only
    DryRun,
    /// The actuator reported an error
    Failed,
    /// No safe failover target
    Escalated,
    /// Failover needed but automatic failover is disabled
    ManualRequired,
    /// The lane could not run this cycle
    Skipped,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Executed => "executed",
            Outcome::NoAction => "no_action",
            Outcome::Vetoed => "vetoed",
            Outcome::DryRun => "dry_run",
            Outcome::Failed => "failed",
            Outcome::Escalated => "escalated",
            Outcome::ManualRequired => "manual_required",
            Outcome::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topology before or after a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    Replicas { count: u32 },
    Primary { endpoint: NodeEndpoint },
}

/// Audit record of one lane's decision in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Assigned by the journal, increasing
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub lane: Lane,
    pub action: String,
    pub reason: String,
    pub confidence: f64,
    pub metrics_used: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Topology>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Topology>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<NodeEndpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DecisionRecord {
    /// Record a scaling decision. The topology only moves when executed.
    pub fn scaling(decision: &ScalingDecision, outcome: Outcome) -> Self {
        let after = if outcome == Outcome::Executed {
            decision.target_replicas
        } else {
            decision.current_replicas
        };

        Self {
            id: 0,
            timestamp: Utc::now(),
            lane: Lane::Scaling,
            action: decision.action.as_str().to_string(),
            reason: decision.reason.clone(),
            confidence: decision.confidence,
            metrics_used: decision.metrics_used.clone(),
            before: Some(Topology::Replicas {
                count: decision.current_replicas,
            }),
            after: Some(Topology::Replicas { count: after }),
            outcome,
            candidate: None,
            error: None,
        }
    }

    /// Record a failover verdict for a polled cluster
    pub fn failover(status: &ClusterStatus, action: &str, outcome: Outcome) -> Self {
        let reason = if status.failover_reasons.is_empty() {
            "Cluster healthy".to_string()
        } else {
            status.failover_reasons.join("; ")
        };
        let primary = Topology::Primary {
            endpoint: status.primary_endpoint(),
        };

        Self {
            id: 0,
            timestamp: Utc::now(),
            lane: Lane::Failover,
            action: action.to_string(),
            reason,
            confidence: 1.0,
            metrics_used: Vec::new(),
            before: Some(primary.clone()),
            after: Some(primary),
            outcome,
            candidate: None,
            error: None,
        }
    }

    /// Record a lane that could not run
    pub fn skipped(lane: Lane, error: impl fmt::Display) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            lane,
            action: "none".to_string(),
            reason: format!("{} lane skipped", lane),
            confidence: 0.0,
            metrics_used: Vec::new(),
            before: None,
            after: None,
            outcome: Outcome::Skipped,
            candidate: None,
            error: Some(error.to_string()),
        }
    }

    pub fn with_candidate(mut self, candidate: NodeEndpoint) -> Self {
        self.candidate = Some(candidate);
        self
    }

    pub fn with_after(mut self, after: Topology) -> Self {
        self.after = Some(after);
        self
    }

    pub fn requested_by_operator(mut self) -> Self {
        self.reason = format!("Operator requested failover; {}", self.reason);
        self
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

struct JournalInner {
    records: VecDeque<DecisionRecord>,
    capacity: usize,
    next_id: u64,
}

/// Bounded, shared log of decision records
#[derive(Clone)]
pub struct DecisionJournal {
    inner: Arc<RwLock<JournalInner>>,
}

impl Default for DecisionJournal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl DecisionJournal {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(RwLock::new(JournalInner {
                records: VecDeque::with_capacity(capacity.min(1_000)),
                capacity,
                next_id: 1,
            })),
        }
    }

    /// Append a record, evicting the oldest at capacity; returns the assigned id
    pub async fn record(&self, mut record: DecisionRecord) -> u64 {
        let mut inner = self.inner.write().await;
        while inner.records.len() >= inner.capacity {
            inner.records.pop_front();
        }

        let id = inner.next_id;
        inner.next_id += 1;
        record.id = id;
        inner.records.push_back(record);
        id
    }

    /// Most recent records first, optionally filtered by lane
    pub async fn recent(&self, lane: Option<Lane>, limit: usize) -> Vec<DecisionRecord> {
        let inner = self.inner.read().await;
        inner
            .records
            .iter()
            .rev()
            .filter(|r| lane.map_or(true, |l| r.lane == l))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScalingAction;

    fn decision(action: ScalingAction, current: u32, target: u32) -> ScalingDecision {
        ScalingDecision {
            action,
            reason: "High CPU utilization: 85.0%".to_string(),
            confidence: 0.8,
            target_replicas: target,
            current_replicas: current,
            metrics_used: vec!["cpu_utilization".to_string()],
        }
    }

    #[test]
    fn test_scaling_record_topology() {
        let d = decision(ScalingAction::ScaleUp, 5, 7);

        let executed = DecisionRecord::scaling(&d, Outcome::Executed);
        assert_eq!(executed.before, Some(Topology::Replicas { count: 5 }));
        assert_eq!(executed.after, Some(Topology::Replicas { count: 7 }));

        let failed = DecisionRecord::scaling(&d, Outcome::Failed).with_error("patch rejected");
        assert_eq!(failed.after, Some(Topology::Replicas { count: 5 }));
        assert_eq!(failed.error.as_deref(), Some("patch rejected"));
    }

    #[tokio::test]
    async fn test_journal_assigns_ids_and_evicts() {
        let journal = DecisionJournal::new(3);
        for _ in 0..5 {
            journal
                .record(DecisionRecord::scaling(
                    &decision(ScalingAction::NoAction, 3, 3),
                    Outcome::NoAction,
                ))
                .await;
        }

        assert_eq!(journal.len().await, 3);
        let ids: Vec<u64> = journal.recent(None, 10).await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn test_recent_filters_by_lane() {
        let journal = DecisionJournal::default();
        journal
            .record(DecisionRecord::scaling(
                &decision(ScalingAction::NoAction, 3, 3),
                Outcome::NoAction,
            ))
            .await;
        journal
            .record(DecisionRecord::skipped(Lane::Failover, "discovery failed"))
            .await;

        let failover = journal.recent(Some(Lane::Failover), 10).await;
        assert_eq!(failover.len(), 1);
        assert_eq!(failover[0].outcome, Outcome::Skipped);

        assert_eq!(journal.recent(None, 1).await.len(), 1);
        assert!(journal.recent(Some(Lane::Scaling), 0).await.is_empty());
    }

    #[test]
    fn test_record_serialization() {
        let record = DecisionRecord::scaling(&decision(ScalingAction::ScaleUp, 5, 7), Outcome::DryRun);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["lane"], "scaling");
        assert_eq!(json["outcome"], "dry_run");
        assert_eq!(json["before"]["kind"], "replicas");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_lane_from_str() {
        assert_eq!("failover".parse::<Lane>().unwrap(), Lane::Failover);
        assert!("other".parse::<Lane>().is_err());
    }
}
