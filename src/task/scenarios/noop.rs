//! 无故障场景：用于检测任务的负样本

use async_trait::async_trait;

use crate::cluster::Cluster;
use crate::task::scenario::{FaultProfile, FaultScenario};

#[derive(Debug, Clone)]
pub struct NoopScenario {
    namespace: String,
}

impl NoopScenario {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl FaultScenario for NoopScenario {
    fn name(&self) -> &str {
        "noop"
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn profile(&self) -> FaultProfile {
        FaultProfile::default()
    }

    async fn inject_fault(&self, _cluster: &Cluster) -> anyhow::Result<Vec<String>> {
        tracing::info!(namespace = %self.namespace, "No fault injected");
        Ok(Vec::new())
    }

    async fn recover_fault(&self, _cluster: &Cluster) -> anyhow::Result<()> {
        Ok(())
    }
}
