use crate::models::NodeInfo;
use std::cmp::Ordering;

/// Picks the replica to promote during failover
///
/// Candidates are ranked by replication lag, then memory usage, lowest
/// first. Disconnected replicas are never selected. On a full tie the
/// replica listed first wins, so selection is deterministic for a given
/// candidate order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailoverSelector;

impl FailoverSelector {
    pub fn new() -> Self {
        Self
    }

    pub fn select<'a>(&self, candidates: &'a [NodeInfo]) -> Option<&'a NodeInfo> {
        candidates
            .iter()
            .filter(|node| node.connected)
            .min_by(|a, b| rank(a, b))
    }
}

fn rank(a: &NodeInfo, b: &NodeInfo) -> Ordering {
    a.replication_lag
        .cmp(&b.replication_lag)
        .then_with(|| a.memory_usage.total_cmp(&b.memory_usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeEndpoint, NodeRole};
    use chrono::Utc;

    fn replica(host: &str, lag: u64, memory: f64) -> NodeInfo {
        NodeInfo {
            host: host.to_string(),
            port: 6379,
            role: NodeRole::Replica,
            connected: true,
            memory_usage: memory,
            connections: 10,
            replication_lag: lag,
            last_seen: Some(Utc::now()),
        }
    }

    #[test]
    fn test_lowest_lag_wins() {
        let nodes = vec![
            replica("r1", 5, 40.0),
            replica("r2", 2, 60.0),
            replica("r3", 9, 10.0),
        ];
        assert_eq!(FailoverSelector::new().select(&nodes).unwrap().host, "r2");
    }

    #[test]
    fn test_memory_breaks_lag_tie() {
        let nodes = vec![replica("r1", 2, 60.0), replica("r2", 2, 30.0)];
        assert_eq!(FailoverSelector::new().select(&nodes).unwrap().host, "r2");
    }

    #[test]
    fn test_full_tie_keeps_first() {
        let nodes = vec![replica("r1", 1, 50.0), replica("r2", 1, 50.0)];
        assert_eq!(FailoverSelector::new().select(&nodes).unwrap().host, "r1");
    }

    #[test]
    fn test_disconnected_never_selected() {
        let nodes = vec![
            NodeInfo::unreachable(&NodeEndpoint::new("r1", 6379)),
            replica("r2", 20, 90.0),
        ];
        assert_eq!(FailoverSelector::new().select(&nodes).unwrap().host, "r2");
    }

    #[test]
    fn test_no_candidates() {
        let selector = FailoverSelector::new();
        assert!(selector.select(&[]).is_none());

        let down = vec![NodeInfo::errored(&NodeEndpoint::new("r1", 6379))];
        assert!(selector.select(&down).is_none());
    }
}
