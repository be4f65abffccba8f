use super::{Actuation, ActuatorError, ScaleActuator};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use tracing::info;

const FIELD_MANAGER: &str = "replica-governor";

/// Scales a Deployment by patching `spec.replicas`
pub struct KubeScaleActuator {
    deployments: Api<Deployment>,
    deployment: String,
    target: String,
}

impl KubeScaleActuator {
    pub async fn new(
        namespace: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Result<Self, ActuatorError> {
        let client = kube::Client::try_default().await?;
        Ok(Self::with_client(client, namespace, deployment))
    }

    pub fn with_client(
        client: kube::Client,
        namespace: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Self {
        let namespace = namespace.into();
        let deployment = deployment.into();
        Self {
            deployments: Api::namespaced(client, &namespace),
            target: format!("{}/{}", namespace, deployment),
            deployment,
        }
    }
}

/// Replica count declared by a Deployment; the API server defaults it to 1
pub(crate) fn declared_replicas(deployment: &Deployment) -> u32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .map(|r| r.max(0) as u32)
        .unwrap_or(1)
}

#[async_trait]
impl ScaleActuator for KubeScaleActuator {
    async fn replica_count(&self) -> Result<u32, ActuatorError> {
        let deployment = self.deployments.get(&self.deployment).await?;
        Ok(declared_replicas(&deployment))
    }

    async fn set_replica_count(&self, replicas: u32) -> Result<Actuation, ActuatorError> {
        let patch = serde_json::json!({
            "spec": {
                "replicas": replicas
            }
        });

        self.deployments
            .patch(
                &self.deployment,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;

        info!(target_workload = %self.target, replicas = replicas, "Deployment scaled");
        Ok(Actuation::Applied)
    }

    fn target(&self) -> &str {
        &self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentSpec;

    #[test]
    fn test_declared_replicas() {
        let with = Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(7),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(declared_replicas(&with), 7);

        let without = Deployment {
            spec: Some(DeploymentSpec::default()),
            ..Default::default()
        };
        assert_eq!(declared_replicas(&without), 1);
        assert_eq!(declared_replicas(&Deployment::default()), 1);
    }
}
