//! Topology discovery
//!
//! Resolves which endpoint is the primary and which are replicas before each
//! poll.

use crate::config::{ClusterConfig, ConfigError};
use crate::models::NodeEndpoint;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::api::Api;
use tokio::sync::RwLock;
use tracing::info;

/// Primary endpoint plus its replicas, in a stable order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    pub primary: NodeEndpoint,
    pub replicas: Vec<NodeEndpoint>,
}

impl ClusterTopology {
    /// Make `new_primary` the primary and demote `old_primary` to a replica
    pub fn promote(&mut self, old_primary: &NodeEndpoint, new_primary: &NodeEndpoint) {
        self.replicas.retain(|r| r != new_primary);
        if !self.replicas.contains(old_primary) {
            self.replicas.push(old_primary.clone());
        }
        self.primary = new_primary.clone();
    }
}

#[async_trait]
pub trait NodeDiscovery: Send + Sync {
    /// Resolve the current topology
    async fn discover(&self) -> Result<ClusterTopology>;

    /// Called after a confirmed promotion of `new_primary`
    async fn record_promotion(&self, _old_primary: &NodeEndpoint, _new_primary: &NodeEndpoint) {}

    /// Discovery name (for logging)
    fn name(&self) -> &str;
}

/// Topology fixed in configuration, updated in place on promotion
pub struct StaticDiscovery {
    topology: RwLock<ClusterTopology>,
}

impl StaticDiscovery {
    pub fn new(topology: ClusterTopology) -> Self {
        Self {
            topology: RwLock::new(topology),
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Result<Self, ConfigError> {
        let (primary, replicas) = config.static_endpoints()?;
        Ok(Self::new(ClusterTopology { primary, replicas }))
    }
}

#[async_trait]
impl NodeDiscovery for StaticDiscovery {
    async fn discover(&self) -> Result<ClusterTopology> {
        Ok(self.topology.read().await.clone())
    }

    async fn record_promotion(&self, old_primary: &NodeEndpoint, new_primary: &NodeEndpoint) {
        self.topology.write().await.promote(old_primary, new_primary);

        info!(
            old_primary = %old_primary,
            new_primary = %new_primary,
            "Static topology updated after promotion"
        );
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Reads the primary from a Service's ClusterIP and the replicas from the
/// replica Service's Endpoints
///
/// The Service keeps naming the old primary after a promotion; the control
/// loop overlays its confirmed promotion on what this returns.
pub struct KubeServiceDiscovery {
    client: kube::Client,
    namespace: String,
    primary_service: String,
    replica_service: String,
    port: u16,
}

impl KubeServiceDiscovery {
    pub async fn new(config: &ClusterConfig) -> Result<Self> {
        let client = kube::Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: kube::Client, config: &ClusterConfig) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            primary_service: config.primary_service.clone(),
            replica_service: config.replica_service.clone(),
            port: config.node_port,
        }
    }
}

/// Replica addresses from an Endpoints object, in subset order
pub fn endpoint_addresses(endpoints: &Endpoints, port: u16) -> Vec<NodeEndpoint> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten())
        .map(|addr| NodeEndpoint::new(addr.ip.clone(), port))
        .collect()
}

#[async_trait]
impl NodeDiscovery for KubeServiceDiscovery {
    async fn discover(&self) -> Result<ClusterTopology> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        let service = services
            .get(&self.primary_service)
            .await
            .with_context(|| format!("Failed to get service '{}'", self.primary_service))?;

        let cluster_ip = service
            .spec
            .and_then(|s| s.cluster_ip)
            .filter(|ip| !ip.is_empty() && ip != "None")
            .ok_or_else(|| anyhow!("Service '{}' has no ClusterIP", self.primary_service))?;

        let endpoints: Api<Endpoints> = Api::namespaced(self.client.clone(), &self.namespace);
        let replica_endpoints = endpoints
            .get(&self.replica_service)
            .await
            .with_context(|| format!("Failed to get endpoints '{}'", self.replica_service))?;

        Ok(ClusterTopology {
            primary: NodeEndpoint::new(cluster_ip, self.port),
            replicas: endpoint_addresses(&replica_endpoints, self.port),
        })
    }

    fn name(&self) -> &str {
        "kubernetes"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointSubset};

    fn ep(host: &str) -> NodeEndpoint {
        NodeEndpoint::new(host, 6379)
    }

    #[tokio::test]
    async fn test_static_discovery_returns_configured_topology() {
        let config = ClusterConfig {
            primary: Some("10.0.0.1:6379".to_string()),
            replicas: vec!["10.0.0.2".to_string(), "10.0.0.3:6380".to_string()],
            ..ClusterConfig::default()
        };
        let discovery = StaticDiscovery::from_config(&config).unwrap();
        let topology = discovery.discover().await.unwrap();

        assert_eq!(topology.primary, ep("10.0.0.1"));
        assert_eq!(
            topology.replicas,
            vec![ep("10.0.0.2"), NodeEndpoint::new("10.0.0.3", 6380)]
        );
    }

    #[tokio::test]
    async fn test_static_discovery_follows_promotion() {
        let discovery = StaticDiscovery::new(ClusterTopology {
            primary: ep("p"),
            replicas: vec![ep("r1"), ep("r2")],
        });

        discovery.record_promotion(&ep("p"), &ep("r2")).await;
        let topology = discovery.discover().await.unwrap();

        assert_eq!(topology.primary, ep("r2"));
        assert_eq!(topology.replicas, vec![ep("r1"), ep("p")]);
    }

    #[test]
    fn test_endpoint_addresses_flattens_subsets() {
        let address = |ip: &str| EndpointAddress {
            ip: ip.to_string(),
            ..Default::default()
        };
        let endpoints = Endpoints {
            subsets: Some(vec![
                EndpointSubset {
                    addresses: Some(vec![address("10.1.0.4"), address("10.1.0.5")]),
                    ..Default::default()
                },
                EndpointSubset {
                    addresses: None,
                    ..Default::default()
                },
                EndpointSubset {
                    addresses: Some(vec![address("10.1.0.9")]),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        let hosts: Vec<_> = endpoint_addresses(&endpoints, 6379)
            .into_iter()
            .map(|e| e.host)
            .collect();
        assert_eq!(hosts, vec!["10.1.0.4", "10.1.0.5", "10.1.0.9"]);
    }

    #[test]
    fn test_endpoint_addresses_empty() {
        assert!(endpoint_addresses(&Endpoints::default(), 6379).is_empty());
    }
}
