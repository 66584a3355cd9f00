//! 服务 targetPort 配置错误：把指向容器 9090 端口的 targetPort 改成 9999，恢复时改回

use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;

use crate::cluster::{Cluster, ServiceInfo};
use crate::task::scenario::{FaultProfile, FaultScenario};

pub const CORRECT_PORT: u16 = 9090;
pub const FAULTY_PORT: u16 = 9999;

/// 删除/重建服务可以绕过故障，必须用最小的 patch 修复
const FORBIDDEN: &[&str] = &[
    r"kubectl\s+delete\s+(svc|service|services)\b",
    r"delete\s+(svc|service|services)/",
    r"kubectl\s+replace\s+.*--force",
];

#[derive(Debug, Clone)]
pub struct TargetPortMisconfig {
    namespace: String,
    service: String,
    hint: Option<String>,
}

impl TargetPortMisconfig {
    pub fn new(namespace: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    async fn find_service(&self, cluster: &Cluster) -> anyhow::Result<ServiceInfo> {
        cluster
            .client()
            .list_services(&self.namespace)
            .await?
            .into_iter()
            .find(|s| s.name == self.service)
            .with_context(|| {
                format!("service {} not found in {}", self.service, self.namespace)
            })
    }

    /// 把所有 targetPort == from 的端口改成 to；返回改动的端口数
    async fn retarget(&self, cluster: &Cluster, from: u16, to: u16) -> anyhow::Result<usize> {
        let service = self.find_service(cluster).await?;
        let from = from.to_string();
        let mut patched = 0;
        for (idx, port) in service.ports.iter().enumerate() {
            if port.target_port != from {
                continue;
            }
            let patch = format!(
                r#"[{{"op": "replace", "path": "/spec/ports/{idx}/targetPort", "value": {to}}}]"#
            );
            cluster
                .kubectl(&format!(
                    "patch service {} -n {} --type='json' -p='{}'",
                    self.service, self.namespace, patch
                ))
                .await?;
            patched += 1;
        }
        tracing::info!(
            service = %self.service,
            namespace = %self.namespace,
            patched,
            "targetPort {} -> {}",
            from,
            to
        );
        Ok(patched)
    }
}

#[async_trait]
impl FaultScenario for TargetPortMisconfig {
    fn name(&self) -> &str {
        "target_port_misconfig"
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn profile(&self) -> FaultProfile {
        FaultProfile {
            expected_anomaly: true,
            faulty_components: vec![self.service.clone()],
            system_level: Some("Virtualization".to_string()),
            fault_type: Some("Misconfiguration".to_string()),
        }
    }

    async fn inject_fault(&self, cluster: &Cluster) -> anyhow::Result<Vec<String>> {
        if self.retarget(cluster, CORRECT_PORT, FAULTY_PORT).await? == 0 {
            tracing::warn!(service = %self.service, "No port targets {}", CORRECT_PORT);
        }
        Ok(vec![format!("service/{}", self.service)])
    }

    async fn recover_fault(&self, cluster: &Cluster) -> anyhow::Result<()> {
        self.retarget(cluster, FAULTY_PORT, CORRECT_PORT).await?;
        Ok(())
    }

    fn forbidden_patterns(&self) -> Vec<Regex> {
        FORBIDDEN.iter().filter_map(|p| Regex::new(p).ok()).collect()
    }

    async fn verify_mitigation(&self, cluster: &Cluster) -> anyhow::Result<bool> {
        let service = self.find_service(cluster).await?;
        let correct = CORRECT_PORT.to_string();
        let faulty = FAULTY_PORT.to_string();
        Ok(service.ports.iter().any(|p| p.target_port == correct)
            && service.ports.iter().all(|p| p.target_port != faulty))
    }

    fn task_hint(&self) -> Option<String> {
        self.hint.clone()
    }
}
