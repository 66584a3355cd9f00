//! 共享基础设施（监控栈等）：问题开始前确保就绪，按需在结束时卸载

use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::Cluster;
use crate::config::InfrastructureSection;
use crate::core::OrchestratorError;

#[async_trait]
pub trait SharedInfrastructure: Send + Sync {
    fn name(&self) -> &str;

    /// 未安装时安装并等待就绪；已在运行则跳过
    async fn ensure(&self, cluster: &Cluster) -> Result<(), OrchestratorError>;

    async fn teardown(&self, cluster: &Cluster) -> Result<(), OrchestratorError>;

    /// 问题清理阶段是否卸载
    fn teardown_on_cleanup(&self) -> bool;
}

/// 以 kubectl 清单 + 安装后命令描述的组件
pub struct ManifestInfrastructure {
    section: InfrastructureSection,
}

impl ManifestInfrastructure {
    pub fn new(section: InfrastructureSection) -> Self {
        Self { section }
    }
}

#[async_trait]
impl SharedInfrastructure for ManifestInfrastructure {
    fn name(&self) -> &str {
        &self.section.name
    }

    async fn ensure(&self, cluster: &Cluster) -> Result<(), OrchestratorError> {
        let ns = &self.section.namespace;
        let pods = cluster.client().list_pods(ns).await?;
        if !pods.is_empty() && pods.iter().all(|p| p.phase == "Running") {
            tracing::info!(infra = %self.section.name, "Already running, skipping install");
            return Ok(());
        }

        tracing::info!(infra = %self.section.name, namespace = %ns, "Installing shared infrastructure");
        cluster.client().create_namespace(ns).await?;
        if let Some(manifest) = &self.section.manifest {
            cluster
                .kubectl(&format!("apply -f {} -n {}", manifest.display(), ns))
                .await?;
        }
        for command in &self.section.post_commands {
            cluster.exec(command).await?.into_stdout(command)?;
        }
        cluster.wait_for_ready(ns).await
    }

    async fn teardown(&self, cluster: &Cluster) -> Result<(), OrchestratorError> {
        let ns = &self.section.namespace;
        if let Some(manifest) = &self.section.manifest {
            let command = format!(
                "{} delete -f {} -n {} --ignore-not-found",
                cluster.kubectl_bin(),
                manifest.display(),
                ns
            );
            let out = cluster.exec(&command).await?;
            if !out.success {
                tracing::warn!(infra = %self.section.name, "Manifest delete failed: {}", out.stderr.trim());
            }
        }
        cluster.client().delete_namespace(ns).await
    }

    fn teardown_on_cleanup(&self) -> bool {
        self.section.teardown
    }
}

pub fn infrastructure_from_config(
    sections: &[InfrastructureSection],
) -> Vec<Arc<dyn SharedInfrastructure>> {
    sections
        .iter()
        .cloned()
        .map(|s| Arc::new(ManifestInfrastructure::new(s)) as Arc<dyn SharedInfrastructure>)
        .collect()
}
