//! Cluster health evaluation
//!
//! Polls the primary and every replica concurrently, then evaluates the
//! failover conditions in a fixed order. Every condition is evaluated and
//! logged even after the first one fires.

use super::probe::NodeProbe;
use crate::config::ClusterConfig;
use crate::models::{ClusterStatus, NodeEndpoint, NodeInfo, NodeRole};
use chrono::Utc;
use futures_util::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Thresholds that decide whether a topology needs failover
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub replication_lag_secs: u64,
    pub memory_percent: f64,
    pub connections: u64,
}

impl HealthThresholds {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            replication_lag_secs: config.replication_lag_threshold_secs,
            memory_percent: config.memory_threshold,
            connections: config.connection_threshold,
        }
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self::from_config(&ClusterConfig::default())
    }
}

/// A failover condition that fired during evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum FailoverCondition {
    PrimaryUnreachable,
    ReplicationLag { replica: NodeEndpoint, lag_secs: u64 },
    PrimaryMemory { usage: f64 },
    PrimaryConnections { connections: u64 },
}

impl fmt::Display for FailoverCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverCondition::PrimaryUnreachable => write!(f, "Primary node unreachable"),
            FailoverCondition::ReplicationLag { replica, lag_secs } => {
                write!(f, "Replica {} replication lag {}s", replica, lag_secs)
            }
            FailoverCondition::PrimaryMemory { usage } => {
                write!(f, "Primary memory usage {:.1}%", usage)
            }
            FailoverCondition::PrimaryConnections { connections } => {
                write!(f, "Primary connections {}", connections)
            }
        }
    }
}

/// Evaluate the failover conditions against a polled topology
///
/// Order: primary reachability, replica lag, primary memory pressure with a
/// connected replica to absorb it, primary connection pressure with replicas
/// already serving connections.
pub fn evaluate_failover(
    primary: &NodeInfo,
    replicas: &[NodeInfo],
    thresholds: &HealthThresholds,
) -> Vec<FailoverCondition> {
    let mut conditions = Vec::new();

    if !primary.connected {
        conditions.push(FailoverCondition::PrimaryUnreachable);
    }

    for replica in replicas.iter().filter(|r| r.connected) {
        if replica.replication_lag > thresholds.replication_lag_secs {
            conditions.push(FailoverCondition::ReplicationLag {
                replica: replica.endpoint(),
                lag_secs: replica.replication_lag,
            });
        }
    }

    let connected: Vec<&NodeInfo> = replicas.iter().filter(|r| r.connected).collect();

    if primary.memory_usage > thresholds.memory_percent && !connected.is_empty() {
        conditions.push(FailoverCondition::PrimaryMemory {
            usage: primary.memory_usage,
        });
    }

    let replica_connections: u64 = connected.iter().map(|r| r.connections).sum();
    if primary.connections > thresholds.connections && replica_connections > 0 {
        conditions.push(FailoverCondition::PrimaryConnections {
            connections: primary.connections,
        });
    }

    conditions
}

/// Concurrent poller for a primary/replica topology
pub struct ClusterHealthMonitor {
    probe: Arc<dyn NodeProbe>,
    thresholds: HealthThresholds,
    node_timeout: Duration,
}

impl ClusterHealthMonitor {
    pub fn new(probe: Arc<dyn NodeProbe>, thresholds: HealthThresholds, node_timeout: Duration) -> Self {
        Self {
            probe,
            thresholds,
            node_timeout,
        }
    }

    async fn probe_bounded(&self, endpoint: &NodeEndpoint) -> NodeInfo {
        match tokio::time::timeout(self.node_timeout, self.probe.probe(endpoint)).await {
            Ok(info) => info,
            Err(_) => {
                warn!(
                    node = %endpoint,
                    timeout_ms = self.node_timeout.as_millis() as u64,
                    "Node probe timed out"
                );
                NodeInfo::unreachable(endpoint)
            }
        }
    }

    /// Probe every node and build the cluster status
    ///
    /// Replicas are polled even when the primary is down so that a
    /// promotion candidate can still be chosen.
    pub async fn poll(&self, primary: &NodeEndpoint, replicas: &[NodeEndpoint]) -> ClusterStatus {
        let probes = std::iter::once(primary)
            .chain(replicas.iter())
            .map(|endpoint| self.probe_bounded(endpoint));

        let mut nodes = join_all(probes).await;
        let replica_infos = nodes.split_off(1);
        let primary_info = nodes.remove(0);

        self.log_replica_warnings(&replica_infos);

        let conditions = evaluate_failover(&primary_info, &replica_infos, &self.thresholds);
        for condition in &conditions {
            warn!(
                event = "failover_condition",
                primary = %primary,
                condition = %condition,
                "Failover condition detected"
            );
        }

        let total_memory = primary_info.memory_usage
            + replica_infos.iter().map(|r| r.memory_usage).sum::<f64>();
        let total_connections =
            primary_info.connections + replica_infos.iter().map(|r| r.connections).sum::<u64>();

        let failover_needed = !conditions.is_empty();
        let is_healthy = primary_info.connected && !failover_needed;

        debug!(
            primary = %primary,
            replicas = replica_infos.len(),
            healthy = is_healthy,
            failover_needed = failover_needed,
            "Cluster polled"
        );

        ClusterStatus {
            primary_host: primary.host.clone(),
            primary_port: primary.port,
            primary: primary_info,
            replicas: replica_infos,
            total_memory,
            total_connections,
            is_healthy,
            failover_needed,
            failover_reasons: conditions.iter().map(ToString::to_string).collect(),
            checked_at: Utc::now(),
        }
    }

    fn log_replica_warnings(&self, replicas: &[NodeInfo]) {
        for replica in replicas {
            let node = replica.endpoint();
            if !replica.connected {
                warn!(node = %node, role = %replica.role, "Replica disconnected");
                continue;
            }
            if replica.role == NodeRole::Primary {
                warn!(node = %node, "Replica reports primary role");
            }
            if replica.replication_lag > self.thresholds.replication_lag_secs {
                warn!(node = %node, lag = replica.replication_lag, "Replica has high replication lag");
            }
            if replica.memory_usage > self.thresholds.memory_percent {
                warn!(node = %node, memory_usage = replica.memory_usage, "Replica has high memory usage");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Probe answering from a fixed table; hosts not in the table hang
    struct TableProbe {
        nodes: HashMap<String, NodeInfo>,
    }

    impl TableProbe {
        fn new(nodes: Vec<NodeInfo>) -> Self {
            Self {
                nodes: nodes.into_iter().map(|n| (n.host.clone(), n)).collect(),
            }
        }
    }

    #[async_trait]
    impl NodeProbe for TableProbe {
        async fn probe(&self, endpoint: &NodeEndpoint) -> NodeInfo {
            match self.nodes.get(&endpoint.host) {
                Some(node) => node.clone(),
                None => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    NodeInfo::unreachable(endpoint)
                }
            }
        }
    }

    fn node(host: &str, role: NodeRole, memory: f64, connections: u64, lag: u64) -> NodeInfo {
        NodeInfo {
            host: host.to_string(),
            port: 6379,
            role,
            connected: true,
            memory_usage: memory,
            connections,
            replication_lag: lag,
            last_seen: Some(Utc::now()),
        }
    }

    fn ep(host: &str) -> NodeEndpoint {
        NodeEndpoint::new(host, 6379)
    }

    fn monitor(nodes: Vec<NodeInfo>) -> ClusterHealthMonitor {
        ClusterHealthMonitor::new(
            Arc::new(TableProbe::new(nodes)),
            HealthThresholds::default(),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn test_healthy_cluster() {
        let m = monitor(vec![
            node("p", NodeRole::Primary, 40.0, 100, 0),
            node("r1", NodeRole::Replica, 30.0, 20, 1),
        ]);
        let status = m.poll(&ep("p"), &[ep("r1")]).await;

        assert!(status.is_healthy);
        assert!(!status.failover_needed);
        assert!(status.failover_reasons.is_empty());
        assert!((status.total_memory - 70.0).abs() < 1e-9);
        assert_eq!(status.total_connections, 120);
        assert_eq!(status.healthy_replicas(), 1);
    }

    #[tokio::test]
    async fn test_primary_timeout_triggers_failover() {
        let r1 = node("r1", NodeRole::Replica, 30.0, 20, 1);
        let r2 = node("r2", NodeRole::Replica, 45.0, 7, 3);
        // "p" is missing from the table so its probe hangs past the timeout
        let m = monitor(vec![r1.clone(), r2.clone()]);
        let status = m.poll(&ep("p"), &[ep("r1"), ep("r2")]).await;

        assert!(!status.primary.connected);
        assert!(status.failover_needed);
        assert!(!status.is_healthy);
        assert_eq!(status.failover_reasons[0], "Primary node unreachable");
        // Replicas are still polled and keep their telemetry
        assert_eq!(status.replicas, vec![r1, r2]);
        assert_eq!(status.candidates().len(), 2);
    }

    #[tokio::test]
    async fn test_replica_claiming_primary_is_reported() {
        let m = monitor(vec![
            node("p", NodeRole::Primary, 40.0, 100, 0),
            node("r1", NodeRole::Replica, 30.0, 20, 1),
            node("old", NodeRole::Primary, 20.0, 3, 0),
        ]);
        let status = m.poll(&ep("p"), &[ep("r1"), ep("old")]).await;

        assert_eq!(status.replicas_reporting_primary(), vec![ep("old")]);
    }

    #[tokio::test]
    async fn test_replica_order_preserved() {
        let m = monitor(vec![
            node("p", NodeRole::Primary, 10.0, 1, 0),
            node("r1", NodeRole::Replica, 10.0, 1, 0),
            node("r2", NodeRole::Replica, 10.0, 1, 0),
        ]);
        let status = m.poll(&ep("p"), &[ep("r2"), ep("r1")]).await;
        let hosts: Vec<_> = status.replicas.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(hosts, vec!["r2", "r1"]);
    }

    #[test]
    fn test_lagging_replica_triggers_failover() {
        let primary = node("p", NodeRole::Primary, 40.0, 100, 0);
        let replicas = vec![node("r1", NodeRole::Replica, 30.0, 20, 31)];
        let conditions = evaluate_failover(&primary, &replicas, &HealthThresholds::default());
        assert_eq!(
            conditions,
            vec![FailoverCondition::ReplicationLag {
                replica: ep("r1"),
                lag_secs: 31
            }]
        );
    }

    #[test]
    fn test_lag_at_threshold_is_fine() {
        let primary = node("p", NodeRole::Primary, 40.0, 100, 0);
        let replicas = vec![node("r1", NodeRole::Replica, 30.0, 20, 30)];
        assert!(evaluate_failover(&primary, &replicas, &HealthThresholds::default()).is_empty());
    }

    #[test]
    fn test_memory_pressure_needs_connected_replica() {
        let primary = node("p", NodeRole::Primary, 95.0, 100, 0);
        let thresholds = HealthThresholds::default();

        let none = vec![NodeInfo::unreachable(&ep("r1"))];
        assert!(evaluate_failover(&primary, &none, &thresholds).is_empty());

        let some = vec![node("r1", NodeRole::Replica, 30.0, 0, 0)];
        assert_eq!(
            evaluate_failover(&primary, &some, &thresholds),
            vec![FailoverCondition::PrimaryMemory { usage: 95.0 }]
        );
    }

    #[test]
    fn test_connection_pressure_needs_replica_connections() {
        let primary = node("p", NodeRole::Primary, 40.0, 1500, 0);
        let thresholds = HealthThresholds::default();

        let idle = vec![node("r1", NodeRole::Replica, 30.0, 0, 0)];
        assert!(evaluate_failover(&primary, &idle, &thresholds).is_empty());

        let busy = vec![node("r1", NodeRole::Replica, 30.0, 5, 0)];
        assert_eq!(
            evaluate_failover(&primary, &busy, &thresholds),
            vec![FailoverCondition::PrimaryConnections { connections: 1500 }]
        );
    }

    #[test]
    fn test_all_conditions_reported_in_order() {
        let mut primary = node("p", NodeRole::Primary, 95.0, 1500, 0);
        primary.connected = false;
        let replicas = vec![node("r1", NodeRole::Replica, 30.0, 5, 60)];

        let conditions = evaluate_failover(&primary, &replicas, &HealthThresholds::default());
        assert_eq!(conditions.len(), 4);
        assert_eq!(conditions[0], FailoverCondition::PrimaryUnreachable);
        assert!(matches!(conditions[1], FailoverCondition::ReplicationLag { .. }));
        assert!(matches!(conditions[2], FailoverCondition::PrimaryMemory { .. }));
        assert!(matches!(conditions[3], FailoverCondition::PrimaryConnections { .. }));
    }
}
