//! Node telemetry probes
//!
//! A probe never fails: an unreachable node is reported as a disconnected
//! [`NodeInfo`] so the monitor always reduces over a uniform shape.

use crate::models::{NodeEndpoint, NodeInfo, NodeRole};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::InfoDict;
use std::time::Duration;
use tracing::{debug, warn};

/// Reads the current telemetry of a single node
#[async_trait]
pub trait NodeProbe: Send + Sync {
    async fn probe(&self, endpoint: &NodeEndpoint) -> NodeInfo;
}

/// Open a connection to a Redis node, bounded by `timeout`
pub(crate) async fn connect(
    endpoint: &NodeEndpoint,
    password: Option<&str>,
    timeout: Duration,
) -> Result<MultiplexedConnection> {
    let info = redis::ConnectionInfo {
        addr: redis::ConnectionAddr::Tcp(endpoint.host.clone(), endpoint.port),
        redis: redis::RedisConnectionInfo {
            password: password.map(str::to_string),
            ..Default::default()
        },
    };
    let client = redis::Client::open(info)
        .with_context(|| format!("Invalid connection info for {}", endpoint))?;

    tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
        .await
        .with_context(|| format!("Timed out connecting to {}", endpoint))?
        .with_context(|| format!("Failed to connect to {}", endpoint))
}

/// Run `INFO` on an open connection, bounded by `timeout`
pub(crate) async fn query_info(
    conn: &mut MultiplexedConnection,
    endpoint: &NodeEndpoint,
    timeout: Duration,
) -> Result<InfoDict> {
    tokio::time::timeout(timeout, redis::cmd("INFO").query_async::<_, InfoDict>(conn))
        .await
        .with_context(|| format!("Timed out querying INFO on {}", endpoint))?
        .with_context(|| format!("INFO failed on {}", endpoint))
}

fn info_u64(info: &InfoDict, key: &str) -> u64 {
    info.get::<String>(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

/// Build node telemetry from an `INFO` reply
pub fn node_info_from_info(endpoint: &NodeEndpoint, info: &InfoDict) -> NodeInfo {
    let role = info
        .get::<String>("role")
        .map(|r| NodeRole::from_info_role(r.trim()))
        .unwrap_or(NodeRole::Unknown);

    let used_memory = info_u64(info, "used_memory");
    let max_memory = info_u64(info, "maxmemory");
    let memory_usage = if max_memory > 0 {
        used_memory as f64 / max_memory as f64 * 100.0
    } else {
        0.0
    };

    // A broken link reports how long it has been down; otherwise fall back to
    // the time since the last interaction with the primary.
    let replication_lag = if role == NodeRole::Replica {
        let link_down = info_u64(info, "master_link_down_since_seconds");
        if link_down > 0 {
            link_down
        } else {
            info_u64(info, "master_last_io_seconds_ago")
        }
    } else {
        0
    };

    NodeInfo {
        host: endpoint.host.clone(),
        port: endpoint.port,
        role,
        connected: true,
        memory_usage,
        connections: info_u64(info, "connected_clients"),
        replication_lag,
        last_seen: Some(Utc::now()),
    }
}

/// Probes Redis nodes with `INFO`
pub struct RedisNodeProbe {
    password: Option<String>,
    timeout: Duration,
}

impl RedisNodeProbe {
    pub fn new(password: Option<String>, timeout: Duration) -> Self {
        Self { password, timeout }
    }
}

#[async_trait]
impl NodeProbe for RedisNodeProbe {
    async fn probe(&self, endpoint: &NodeEndpoint) -> NodeInfo {
        let mut conn = match connect(endpoint, self.password.as_deref(), self.timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(node = %endpoint, error = %e, "Node unreachable");
                return NodeInfo::unreachable(endpoint);
            }
        };

        match query_info(&mut conn, endpoint, self.timeout).await {
            Ok(info) => {
                let node = node_info_from_info(endpoint, &info);
                debug!(
                    node = %endpoint,
                    role = %node.role,
                    memory_usage = node.memory_usage,
                    connections = node.connections,
                    lag = node.replication_lag,
                    "Node probed"
                );
                node
            }
            Err(e) => {
                warn!(node = %endpoint, error = %e, "Node info query failed");
                NodeInfo::errored(endpoint)
            }
        }
    }
}
