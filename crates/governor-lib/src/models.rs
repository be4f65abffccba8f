//! Core data models for the replica governor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default port used when an endpoint string carries no port
pub const DEFAULT_NODE_PORT: u16 = 6379;

/// Snapshot of the signals used by the scaling lane, captured once per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
    pub request_rate: f64,
    pub response_time_p95: f64,
    pub error_rate: f64,
    pub queue_depth: u64,
    pub active_connections: u64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// A sample with every signal at zero, stamped now
    pub fn zeroed() -> Self {
        Self {
            cpu_utilization: 0.0,
            memory_utilization: 0.0,
            request_rate: 0.0,
            response_time_p95: 0.0,
            error_rate: 0.0,
            queue_depth: 0,
            active_connections: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Directional summary of recent samples
///
/// All fields are zero when fewer than two samples were available; use
/// [`TrendSummary::has_data`] to tell "no data" apart from "flat".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub cpu_trend: f64,
    pub memory_trend: f64,
    pub request_trend: f64,
    pub response_time_trend: f64,
    pub error_trend: f64,
    /// Population standard deviation of CPU utilization over the window
    pub cpu_volatility: f64,
    pub sample_count: usize,
}

impl TrendSummary {
    pub fn has_data(&self) -> bool {
        self.sample_count >= 2
    }
}

/// Scaling action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    ScaleUp,
    ScaleDown,
    NoAction,
}

impl ScalingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingAction::ScaleUp => "scale_up",
            ScalingAction::ScaleDown => "scale_down",
            ScalingAction::NoAction => "no_action",
        }
    }
}

impl fmt::Display for ScalingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the scaling decision engine (and of the cooldown gate)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub action: ScalingAction,
    pub reason: String,
    pub confidence: f64,
    pub target_replicas: u32,
    pub current_replicas: u32,
    pub metrics_used: Vec<String>,
}

impl ScalingDecision {
    pub fn is_actionable(&self) -> bool {
        self.action != ScalingAction::NoAction
    }

    /// Replica count the decision leaves in place; a vetoed target is not applied
    pub fn effective_target(&self) -> u32 {
        if self.is_actionable() {
            self.target_replicas
        } else {
            self.current_replicas
        }
    }
}

/// Role reported by a cluster node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    Replica,
    Unknown,
    Error,
}

impl NodeRole {
    /// Map the `role` field of a Redis `INFO` reply
    pub fn from_info_role(role: &str) -> Self {
        match role {
            "master" => NodeRole::Primary,
            "slave" | "replica" => NodeRole::Replica,
            _ => NodeRole::Unknown,
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Replica => write!(f, "replica"),
            NodeRole::Unknown => write!(f, "unknown"),
            NodeRole::Error => write!(f, "error"),
        }
    }
}

/// Address of a cluster node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub host: String,
    pub port: u16,
}

impl NodeEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid node endpoint '{input}': {reason}")]
pub struct EndpointParseError {
    pub input: String,
    pub reason: &'static str,
}

impl FromStr for NodeEndpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = |reason| EndpointParseError {
            input: s.to_string(),
            reason,
        };

        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| err("port is not a number"))?;
                (host, port)
            }
            None => (s, DEFAULT_NODE_PORT),
        };

        if host.is_empty() {
            return Err(err("host is empty"));
        }
        if port == 0 {
            return Err(err("port must be non-zero"));
        }

        Ok(NodeEndpoint::new(host, port))
    }
}

/// Telemetry for one node, recreated on every poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub host: String,
    pub port: u16,
    pub role: NodeRole,
    pub connected: bool,
    /// Used memory as a percentage of maxmemory (0 when unbounded)
    pub memory_usage: f64,
    pub connections: u64,
    /// Replication lag in seconds; only meaningful for replicas
    pub replication_lag: u64,
    pub last_seen: Option<DateTime<Utc>>,
}

impl NodeInfo {
    /// A node that could not be reached at all
    pub fn unreachable(endpoint: &NodeEndpoint) -> Self {
        Self::disconnected(endpoint, NodeRole::Unknown)
    }

    /// A node that accepted a connection but failed its info query
    pub fn errored(endpoint: &NodeEndpoint) -> Self {
        Self::disconnected(endpoint, NodeRole::Error)
    }

    fn disconnected(endpoint: &NodeEndpoint, role: NodeRole) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            role,
            connected: false,
            memory_usage: 0.0,
            connections: 0,
            replication_lag: 0,
            last_seen: None,
        }
    }

    pub fn endpoint(&self) -> NodeEndpoint {
        NodeEndpoint::new(self.host.clone(), self.port)
    }
}

/// Aggregated view of a primary and its replicas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub primary_host: String,
    pub primary_port: u16,
    pub primary: NodeInfo,
    pub replicas: Vec<NodeInfo>,
    /// Sum of memory usage percentages across all nodes
    pub total_memory: f64,
    pub total_connections: u64,
    pub is_healthy: bool,
    pub failover_needed: bool,
    /// Every failover condition that fired, in evaluation order
    pub failover_reasons: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl ClusterStatus {
    pub fn primary_endpoint(&self) -> NodeEndpoint {
        NodeEndpoint::new(self.primary_host.clone(), self.primary_port)
    }

    /// Replicas that answered this poll and are eligible for promotion
    pub fn candidates(&self) -> Vec<NodeInfo> {
        self.replicas.iter().filter(|r| r.connected).cloned().collect()
    }

    pub fn healthy_replicas(&self) -> usize {
        self.replicas.iter().filter(|r| r.connected).count()
    }

    /// Connected replicas that claim the primary role
    pub fn replicas_reporting_primary(&self) -> Vec<NodeEndpoint> {
        self.replicas
            .iter()
            .filter(|r| r.connected && r.role == NodeRole::Primary)
            .map(NodeInfo::endpoint)
            .collect()
    }
}
