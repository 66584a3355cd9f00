//! 把部署缩容到 0 副本，恢复时扩回 1

use std::time::Duration;

use async_trait::async_trait;

use crate::cluster::Cluster;
use crate::task::scenario::{FaultProfile, FaultScenario};

#[derive(Debug, Clone)]
pub struct ScaleToZero {
    namespace: String,
    deployment: String,
    /// 缩放后等待集群收敛的时间
    settle: Duration,
}

impl ScaleToZero {
    pub fn new(namespace: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            deployment: deployment.into(),
            settle: Duration::from_secs(30),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    async fn scale(&self, cluster: &Cluster, replicas: u32) -> anyhow::Result<()> {
        cluster
            .kubectl(&format!(
                "scale deployment {} --replicas={} -n {}",
                self.deployment, replicas, self.namespace
            ))
            .await?;
        tracing::info!(deployment = %self.deployment, replicas, "Scaled deployment");
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        Ok(())
    }
}

#[async_trait]
impl FaultScenario for ScaleToZero {
    fn name(&self) -> &str {
        "scale_to_zero"
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn profile(&self) -> FaultProfile {
        FaultProfile {
            expected_anomaly: true,
            faulty_components: vec![self.deployment.clone()],
            system_level: Some("Virtualization".to_string()),
            fault_type: Some("Operation Error".to_string()),
        }
    }

    async fn inject_fault(&self, cluster: &Cluster) -> anyhow::Result<Vec<String>> {
        self.scale(cluster, 0).await?;
        Ok(vec![format!("deployment/{}", self.deployment)])
    }

    async fn recover_fault(&self, cluster: &Cluster) -> anyhow::Result<()> {
        self.scale(cluster, 1).await
    }

    async fn verify_mitigation(&self, cluster: &Cluster) -> anyhow::Result<bool> {
        let deployments = cluster.client().list_deployments(&self.namespace).await?;
        Ok(deployments
            .iter()
            .find(|d| d.name == self.deployment)
            .map(|d| d.replicas >= 1 && d.ready_replicas >= 1)
            .unwrap_or(false))
    }
}
