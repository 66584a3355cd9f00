//! 被测应用：元数据、部署与清理
//!
//! 元数据来自 JSON（Name / Namespace / Desc / Supported Operations / Helm Config / K8S Deploy Path，
//! 可选 Frontend URL / Payload Script），
//! 相对路径以元数据文件所在目录为基准。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::core::OrchestratorError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmConfig {
    pub release_name: String,
    pub chart_path: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// 远端仓库的 chart（不做路径解析与 dependency update）
    #[serde(default)]
    pub remote_chart: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Namespace")]
    pub namespace: String,
    #[serde(rename = "Desc", default)]
    pub desc: String,
    #[serde(rename = "Supported Operations", default)]
    pub supported_operations: Vec<String>,
    #[serde(rename = "Helm Config", default)]
    pub helm: Option<HelmConfig>,
    #[serde(rename = "K8S Deploy Path", default)]
    pub k8s_deploy_path: Option<PathBuf>,
    /// 负载发生器访问的前端地址
    #[serde(rename = "Frontend URL", default)]
    pub frontend_url: Option<String>,
    /// wrk 的 Lua 负载脚本
    #[serde(rename = "Payload Script", default)]
    pub payload_script: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Application {
    meta: AppMetadata,
}

impl Application {
    pub fn new(meta: AppMetadata) -> Self {
        Self { meta }
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading app metadata {}", path.display()))?;
        let mut meta: AppMetadata = serde_json::from_str(&data)
            .with_context(|| format!("parsing app metadata {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if let Some(helm) = meta.helm.as_mut() {
            if !helm.remote_chart && Path::new(&helm.chart_path).is_relative() {
                helm.chart_path = base.join(&helm.chart_path).display().to_string();
            }
        }
        if let Some(deploy) = meta.k8s_deploy_path.as_mut() {
            if deploy.is_relative() {
                *deploy = base.join(&*deploy);
            }
        }
        if let Some(script) = meta.payload_script.as_mut() {
            if script.is_relative() {
                *script = base.join(&*script);
            }
        }
        Ok(Self { meta })
    }

    pub fn metadata(&self) -> &AppMetadata {
        &self.meta
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn namespace(&self) -> &str {
        &self.meta.namespace
    }

    /// 给人和 Agent 读的应用摘要
    pub fn summary(&self) -> String {
        let operations = self
            .meta
            .supported_operations
            .iter()
            .map(|op| format!("  - {op}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Service Name: {}\nNamespace: {}\nDescription: {}\nSupported Operations:\n{}",
            self.meta.name, self.meta.namespace, self.meta.desc, operations
        )
    }

    pub async fn deploy(&self, cluster: &Cluster) -> Result<(), OrchestratorError> {
        let ns = self.namespace();
        tracing::info!(app = %self.name(), namespace = %ns, "Deploying application");
        cluster.client().create_namespace(ns).await?;

        if let Some(helm) = &self.meta.helm {
            if !helm.remote_chart {
                let dep = format!("helm dependency update {}", helm.chart_path);
                let out = cluster.exec(&dep).await?;
                if !out.success {
                    tracing::warn!("helm dependency update failed: {}", out.stderr.trim());
                }
            }
            let mut command = format!(
                "helm install {} {} -n {} --create-namespace",
                helm.release_name, helm.chart_path, ns
            );
            if let Some(version) = &helm.version {
                command.push_str(&format!(" --version {version}"));
            }
            for arg in &helm.extra_args {
                command.push(' ');
                command.push_str(arg);
            }
            cluster.exec(&command).await?.into_stdout(&command)?;
        } else if let Some(path) = &self.meta.k8s_deploy_path {
            cluster
                .kubectl(&format!("apply -Rf {} -n {}", path.display(), ns))
                .await?;
        } else {
            return Err(OrchestratorError::Config(format!(
                "application {} has neither Helm Config nor K8S Deploy Path",
                self.name()
            )));
        }

        cluster.wait_for_ready(ns).await
    }

    /// 卸载并删除命名空间，等待删除完成
    pub async fn delete(&self, cluster: &Cluster) -> Result<(), OrchestratorError> {
        let ns = self.namespace();
        tracing::info!(app = %self.name(), namespace = %ns, "Deleting application");
        if let Some(helm) = &self.meta.helm {
            let command = format!("helm uninstall {} -n {}", helm.release_name, ns);
            let out = cluster.exec(&command).await?;
            if !out.success {
                tracing::debug!("helm uninstall skipped: {}", out.stderr.trim());
            }
        } else if let Some(path) = &self.meta.k8s_deploy_path {
            let command = format!(
                "{} delete -Rf {} -n {} --ignore-not-found",
                cluster.kubectl_bin(),
                path.display(),
                ns
            );
            let out = cluster.exec(&command).await?;
            if !out.success {
                tracing::debug!("manifest delete failed: {}", out.stderr.trim());
            }
        }
        cluster.client().delete_namespace(ns).await?;
        cluster.wait_for_namespace_deletion(ns).await
    }

    pub async fn cleanup(&self, cluster: &Cluster) -> Result<(), OrchestratorError> {
        cluster.client().delete_namespace(self.namespace()).await
    }
}

/// 按 key（元数据文件名去掉扩展名）索引的应用集合
#[derive(Debug, Clone, Default)]
pub struct AppCatalog {
    apps: BTreeMap<String, Application>,
}

impl AppCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加载目录下所有 .json 元数据；目录不存在时返回空集合
    pub fn load(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut catalog = Self::new();
        if !dir.exists() {
            tracing::warn!("App metadata dir {} not found", dir.display());
            return Ok(catalog);
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            catalog.insert(key, Application::from_file(&path)?);
        }
        tracing::info!("Loaded {} application(s) from {}", catalog.len(), dir.display());
        Ok(catalog)
    }

    pub fn insert(&mut self, key: impl Into<String>, app: Application) {
        self.apps.insert(key.into(), app);
    }

    pub fn get(&self, key: &str) -> Option<&Application> {
        self.apps.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.apps.keys()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}
