use super::{Actuation, ActuatorError, FailoverActuator};
use crate::cluster::{connect, query_info};
use crate::models::{NodeEndpoint, NodeRole};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::{info, warn};

/// Promotes Redis replicas with `REPLICAOF`
///
/// The candidate is detached with `REPLICAOF NO ONE`, then its `INFO` must
/// report `role:master` before any peer is re-pointed at it.
pub struct RedisFailoverActuator {
    password: Option<String>,
    timeout: Duration,
}

impl RedisFailoverActuator {
    pub fn new(password: Option<String>, timeout: Duration) -> Self {
        Self { password, timeout }
    }

    async fn open(&self, node: &NodeEndpoint) -> Result<MultiplexedConnection, ActuatorError> {
        connect(node, self.password.as_deref(), self.timeout)
            .await
            .map_err(|e| ActuatorError::Unavailable {
                node: node.clone(),
                reason: format!("{:#}", e),
            })
    }

    async fn replicaof(
        &self,
        conn: &mut MultiplexedConnection,
        node: &NodeEndpoint,
        args: (&str, &str),
    ) -> Result<(), ActuatorError> {
        let mut cmd = redis::cmd("REPLICAOF");
        cmd.arg(args.0).arg(args.1);

        tokio::time::timeout(self.timeout, cmd.query_async::<_, ()>(conn))
            .await
            .map_err(|_| ActuatorError::Timeout {
                operation: "REPLICAOF",
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|source| ActuatorError::Command {
                node: node.clone(),
                source,
            })
    }

    async fn confirm_primary(
        &self,
        conn: &mut MultiplexedConnection,
        node: &NodeEndpoint,
    ) -> Result<(), ActuatorError> {
        let info = query_info(conn, node, self.timeout)
            .await
            .map_err(|e| ActuatorError::Unavailable {
                node: node.clone(),
                reason: format!("{:#}", e),
            })?;

        let role = info
            .get::<String>("role")
            .map(|r| NodeRole::from_info_role(r.trim()))
            .unwrap_or(NodeRole::Unknown);

        if role == NodeRole::Primary {
            Ok(())
        } else {
            Err(ActuatorError::NotPromoted {
                node: node.clone(),
                role,
            })
        }
    }

    async fn repoint(&self, peer: &NodeEndpoint, primary: &NodeEndpoint) -> Result<(), ActuatorError> {
        let mut conn = self.open(peer).await?;
        let port = primary.port.to_string();
        self.replicaof(&mut conn, peer, (&primary.host, &port)).await
    }
}

#[async_trait]
impl FailoverActuator for RedisFailoverActuator {
    async fn promote_node(
        &self,
        candidate: &NodeEndpoint,
        peers: &[NodeEndpoint],
    ) -> Result<Actuation, ActuatorError> {
        let mut conn = self.open(candidate).await?;
        self.replicaof(&mut conn, candidate, ("NO", "ONE")).await?;
        self.confirm_primary(&mut conn, candidate).await?;

        info!(candidate = %candidate, "Replica promoted to primary");

        for peer in peers.iter().filter(|p| *p != candidate) {
            match self.repoint(peer, candidate).await {
                Ok(()) => info!(peer = %peer, primary = %candidate, "Peer re-pointed to new primary"),
                Err(e) => warn!(
                    peer = %peer,
                    primary = %candidate,
                    error = %e,
                    "Failed to re-point peer to new primary"
                ),
            }
        }

        Ok(Actuation::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_candidate_fails_promotion() {
        let actuator = RedisFailoverActuator::new(None, Duration::from_millis(500));
        let err = actuator
            .promote_node(&NodeEndpoint::new("127.0.0.1", 1), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ActuatorError::Unavailable { .. }));
    }
}
