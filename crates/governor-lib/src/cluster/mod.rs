//! Primary/replica topology monitoring
//!
//! This module provides:
//! - Topology discovery (static or from Kubernetes services)
//! - Concurrent node probing over Redis `INFO`
//! - Failover evaluation and promotion candidate selection

mod discovery;
mod monitor;
mod probe;
mod selector;

pub use discovery::{
    endpoint_addresses, ClusterTopology, KubeServiceDiscovery, NodeDiscovery, StaticDiscovery,
};
pub use monitor::{evaluate_failover, ClusterHealthMonitor, FailoverCondition, HealthThresholds};
pub use probe::{node_info_from_info, NodeProbe, RedisNodeProbe};
pub(crate) use probe::{connect, query_info};
pub use selector::FailoverSelector;
