//! 集群层：命令执行后端、资源客户端、引用展开、被测应用与共享基础设施
//!
//! Cluster 是显式传递的句柄，取代全局单例；编排器、任务与动作都通过它访问集群。

pub mod app;
pub mod discovery;
pub mod infra;
pub mod kubectl;
pub mod runner;

use std::sync::Arc;
use std::time::Duration;

pub use app::{AppCatalog, AppMetadata, Application, HelmConfig};
pub use discovery::expand_references;
pub use infra::{infrastructure_from_config, ManifestInfrastructure, SharedInfrastructure};
pub use kubectl::{
    ClusterClient, ContainerState, DeploymentInfo, KubectlClient, PodInfo, ServiceInfo,
    ServicePort,
};
pub use runner::{
    runner_from_config, CommandOutput, CommandRunner, KindRunner, LocalRunner, ScriptedRunner,
    SshRunner,
};

use crate::config::{AppConfig, ClusterSection};
use crate::core::OrchestratorError;

#[derive(Clone)]
pub struct Cluster {
    runner: Arc<dyn CommandRunner>,
    client: Arc<dyn ClusterClient>,
    settings: ClusterSection,
}

impl Cluster {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        client: Arc<dyn ClusterClient>,
        settings: ClusterSection,
    ) -> Self {
        Self {
            runner,
            client,
            settings,
        }
    }

    /// 按配置选择执行后端，并在其上构建 KubectlClient
    pub fn from_config(cfg: &AppConfig) -> Self {
        let runner = runner_from_config(&cfg.cluster, cfg.shell.command_timeout_secs);
        let client = Arc::new(KubectlClient::new(runner.clone(), cfg.cluster.kubectl.clone()));
        Self::new(runner, client, cfg.cluster.clone())
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    pub fn settings(&self) -> &ClusterSection {
        &self.settings
    }

    pub fn kubectl_bin(&self) -> &str {
        &self.settings.kubectl
    }

    pub async fn exec(&self, command: &str) -> Result<CommandOutput, OrchestratorError> {
        self.runner.exec(command).await
    }

    /// 执行 `kubectl <args>`，失败时返回 CommandFailed
    pub async fn kubectl(&self, args: &str) -> Result<String, OrchestratorError> {
        let command = format!("{} {}", self.settings.kubectl, args);
        self.runner.exec(&command).await?.into_stdout(&command)
    }

    pub async fn wait_for_ready(&self, namespace: &str) -> Result<(), OrchestratorError> {
        self.client
            .wait_for_ready(
                namespace,
                Duration::from_secs(self.settings.readiness_poll_secs),
                Duration::from_secs(self.settings.readiness_max_wait_secs),
            )
            .await
    }

    pub async fn wait_for_namespace_deletion(
        &self,
        namespace: &str,
    ) -> Result<(), OrchestratorError> {
        self.client
            .wait_for_namespace_deletion(
                namespace,
                Duration::from_secs(self.settings.readiness_poll_secs),
                Duration::from_secs(self.settings.readiness_max_wait_secs),
            )
            .await
    }
}
