//! Actuators that apply decisions to the outside world
//!
//! Provides the actuation traits with three kinds of implementations:
//! - `KubeScaleActuator`: patches `Deployment.spec.replicas`
//! - `RedisFailoverActuator`: promotes a replica with `REPLICAOF NO ONE`
//! - `DryRun*`: logs the intended action and leaves everything untouched

mod deployment;
mod replication;

pub use deployment::KubeScaleActuator;
pub use replication::RedisFailoverActuator;

use crate::models::{NodeEndpoint, NodeRole};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors returned by actuators
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        operation: &'static str,
        timeout_secs: u64,
    },

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("node {node} unavailable: {reason}")]
    Unavailable { node: NodeEndpoint, reason: String },

    #[error("command failed on {node}: {source}")]
    Command {
        node: NodeEndpoint,
        #[source]
        source: redis::RedisError,
    },

    #[error("promotion of {node} not confirmed, node reports role {role}")]
    NotPromoted { node: NodeEndpoint, role: NodeRole },
}

/// How an accepted request was carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuation {
    /// The change was made
    Applied,
    /// The change was only logged
    Simulated,
}

/// Reads and mutates the replica count of the scaled workload
#[async_trait]
pub trait ScaleActuator: Send + Sync {
    async fn replica_count(&self) -> Result<u32, ActuatorError>;

    async fn set_replica_count(&self, replicas: u32) -> Result<Actuation, ActuatorError>;

    /// Workload identifier (for logging)
    fn target(&self) -> &str;
}

/// Promotes a replica to primary
#[async_trait]
pub trait FailoverActuator: Send + Sync {
    /// Promote `candidate` and re-point `peers` at it
    ///
    /// Succeeds only once the candidate confirms its new role. Peers that
    /// cannot be re-pointed are logged, not treated as failure.
    async fn promote_node(
        &self,
        candidate: &NodeEndpoint,
        peers: &[NodeEndpoint],
    ) -> Result<Actuation, ActuatorError>;
}

/// Reads through to the wrapped actuator, never writes
pub struct DryRunScaleActuator {
    inner: Arc<dyn ScaleActuator>,
}

impl DryRunScaleActuator {
    pub fn new(inner: Arc<dyn ScaleActuator>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ScaleActuator for DryRunScaleActuator {
    async fn replica_count(&self) -> Result<u32, ActuatorError> {
        self.inner.replica_count().await
    }

    async fn set_replica_count(&self, replicas: u32) -> Result<Actuation, ActuatorError> {
        info!(
            target_workload = self.inner.target(),
            replicas = replicas,
            dry_run = true,
            "Would set replica count"
        );
        Ok(Actuation::Simulated)
    }

    fn target(&self) -> &str {
        self.inner.target()
    }
}

/// Logs the promotion it would perform
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunFailoverActuator;

#[async_trait]
impl FailoverActuator for DryRunFailoverActuator {
    async fn promote_node(
        &self,
        candidate: &NodeEndpoint,
        peers: &[NodeEndpoint],
    ) -> Result<Actuation, ActuatorError> {
        let peers: Vec<String> = peers.iter().map(ToString::to_string).collect();
        info!(
            candidate = %candidate,
            peers = ?peers,
            dry_run = true,
            "Would promote replica to primary"
        );
        Ok(Actuation::Simulated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingActuator {
        replicas: AtomicU32,
    }

    #[async_trait]
    impl ScaleActuator for CountingActuator {
        async fn replica_count(&self) -> Result<u32, ActuatorError> {
            Ok(self.replicas.load(Ordering::SeqCst))
        }

        async fn set_replica_count(&self, replicas: u32) -> Result<Actuation, ActuatorError> {
            self.replicas.store(replicas, Ordering::SeqCst);
            Ok(Actuation::Applied)
        }

        fn target(&self) -> &str {
            "default/app"
        }
    }

    #[tokio::test]
    async fn test_dry_run_scale_reads_but_never_writes() {
        let inner = Arc::new(CountingActuator {
            replicas: AtomicU32::new(4),
        });
        let dry = DryRunScaleActuator::new(inner.clone());

        assert_eq!(dry.replica_count().await.unwrap(), 4);
        assert_eq!(dry.set_replica_count(9).await.unwrap(), Actuation::Simulated);
        assert_eq!(inner.replicas.load(Ordering::SeqCst), 4);
        assert_eq!(dry.target(), "default/app");
    }

    #[tokio::test]
    async fn test_dry_run_failover_is_simulated() {
        let result = DryRunFailoverActuator
            .promote_node(&NodeEndpoint::new("r1", 6379), &[NodeEndpoint::new("p", 6379)])
            .await
            .unwrap();
        assert_eq!(result, Actuation::Simulated);
    }

    #[test]
    fn test_error_messages() {
        let err = ActuatorError::Timeout {
            operation: "set_replica_count",
            timeout_secs: 30,
        };
        assert_eq!(err.to_string(), "set_replica_count timed out after 30s");

        let err = ActuatorError::NotPromoted {
            node: NodeEndpoint::new("r1", 6379),
            role: NodeRole::Replica,
        };
        assert!(err.to_string().contains("r1:6379"));
    }
}
