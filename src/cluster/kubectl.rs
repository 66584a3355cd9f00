//! 集群资源客户端
//!
//! ClusterClient 描述编排器需要的资源查询与命名空间管理；KubectlClient 通过 CommandRunner 调用
//! `kubectl ... -o json` 实现。就绪等待与命名空间删除等待是有界轮询，超时即致命。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::cluster::runner::CommandRunner;
use crate::core::OrchestratorError;

type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    pub name: String,
    pub ready: bool,
    pub waiting_reason: Option<String>,
    pub terminated_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub labels: Labels,
    /// Pending / Running / Succeeded / Failed / Unknown
    pub phase: String,
    pub containers: Vec<ContainerState>,
}

impl PodInfo {
    pub fn is_ready(&self) -> bool {
        match self.phase.as_str() {
            "Succeeded" => true,
            "Running" => self.containers.iter().all(|c| c.ready),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicePort {
    pub port: i64,
    /// 数字或命名端口
    pub target_port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub selector: Labels,
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentInfo {
    pub name: String,
    pub selector: Labels,
    pub replicas: i64,
    pub ready_replicas: i64,
}

/// selector 非空且全部键值都出现在 labels 中
pub fn selector_matches(selector: &Labels, labels: &Labels) -> bool {
    !selector.is_empty() && selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodInfo>, OrchestratorError>;

    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceInfo>, OrchestratorError>;

    async fn list_deployments(
        &self,
        namespace: &str,
    ) -> Result<Vec<DeploymentInfo>, OrchestratorError>;

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, OrchestratorError>;

    async fn namespace_exists(&self, namespace: &str) -> Result<bool, OrchestratorError>;

    async fn create_namespace(&self, namespace: &str) -> Result<(), OrchestratorError>;

    async fn delete_namespace(&self, namespace: &str) -> Result<(), OrchestratorError>;

    /// 轮询直到命名空间内所有 Pod 就绪；没有 Pod 时继续等待
    async fn wait_for_ready(
        &self,
        namespace: &str,
        poll: Duration,
        max_wait: Duration,
    ) -> Result<(), OrchestratorError> {
        tracing::info!(namespace = %namespace, "Waiting for pods to be ready");
        let deadline = Instant::now() + max_wait;
        loop {
            let pods = self.list_pods(namespace).await?;
            if !pods.is_empty() && pods.iter().all(PodInfo::is_ready) {
                tracing::info!(namespace = %namespace, pods = pods.len(), "All pods are ready");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(OrchestratorError::Timeout(format!(
                    "pods in namespace {} not ready within {}s",
                    namespace,
                    max_wait.as_secs()
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn wait_for_namespace_deletion(
        &self,
        namespace: &str,
        poll: Duration,
        max_wait: Duration,
    ) -> Result<(), OrchestratorError> {
        let deadline = Instant::now() + max_wait;
        while self.namespace_exists(namespace).await? {
            if Instant::now() >= deadline {
                return Err(OrchestratorError::Timeout(format!(
                    "namespace {} not deleted within {}s",
                    namespace,
                    max_wait.as_secs()
                )));
            }
            tracing::debug!(namespace = %namespace, "Waiting for namespace deletion");
            tokio::time::sleep(poll).await;
        }
        Ok(())
    }
}

/// 基于 kubectl 命令行的实现
pub struct KubectlClient {
    runner: Arc<dyn CommandRunner>,
    kubectl: String,
}

impl KubectlClient {
    pub fn new(runner: Arc<dyn CommandRunner>, kubectl: impl Into<String>) -> Self {
        Self {
            runner,
            kubectl: kubectl.into(),
        }
    }

    async fn get_json(&self, kind: &str, namespace: &str) -> Result<Value, OrchestratorError> {
        let command = format!("{} get {} -n {} -o json", self.kubectl, kind, namespace);
        let stdout = self.runner.exec(&command).await?.into_stdout(&command)?;
        Ok(serde_json::from_str(&stdout)?)
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodInfo>, OrchestratorError> {
        Ok(parse_pods(&self.get_json("pods", namespace).await?))
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceInfo>, OrchestratorError> {
        Ok(parse_services(&self.get_json("services", namespace).await?))
    }

    async fn list_deployments(
        &self,
        namespace: &str,
    ) -> Result<Vec<DeploymentInfo>, OrchestratorError> {
        Ok(parse_deployments(
            &self.get_json("deployments", namespace).await?,
        ))
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, OrchestratorError> {
        let command = format!("{} logs {} -n {}", self.kubectl, pod, namespace);
        self.runner.exec(&command).await?.into_stdout(&command)
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool, OrchestratorError> {
        let command = format!("{} get namespace {} -o name", self.kubectl, namespace);
        Ok(self.runner.exec(&command).await?.success)
    }

    async fn create_namespace(&self, namespace: &str) -> Result<(), OrchestratorError> {
        if self.namespace_exists(namespace).await? {
            return Ok(());
        }
        let command = format!("{} create namespace {}", self.kubectl, namespace);
        self.runner.exec(&command).await?.into_stdout(&command)?;
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), OrchestratorError> {
        let command = format!(
            "{} delete namespace {} --ignore-not-found",
            self.kubectl, namespace
        );
        self.runner.exec(&command).await?.into_stdout(&command)?;
        Ok(())
    }
}

fn str_at<'a>(v: &'a Value, pointer: &str) -> &'a str {
    v.pointer(pointer).and_then(Value::as_str).unwrap_or("")
}

fn labels_at(v: &Value, pointer: &str) -> Labels {
    v.pointer(pointer)
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn items(list: &Value) -> &[Value] {
    list.get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn parse_pods(list: &Value) -> Vec<PodInfo> {
    items(list)
        .iter()
        .map(|item| {
            let containers = item
                .pointer("/status/containerStatuses")
                .and_then(Value::as_array)
                .map(|statuses| {
                    statuses
                        .iter()
                        .map(|cs| ContainerState {
                            name: str_at(cs, "/name").to_string(),
                            ready: cs.get("ready").and_then(Value::as_bool).unwrap_or(false),
                            waiting_reason: cs
                                .pointer("/state/waiting/reason")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            terminated_reason: cs
                                .pointer("/state/terminated/reason")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        })
                        .collect()
                })
                .unwrap_or_default();
            PodInfo {
                name: str_at(item, "/metadata/name").to_string(),
                labels: labels_at(item, "/metadata/labels"),
                phase: str_at(item, "/status/phase").to_string(),
                containers,
            }
        })
        .collect()
}

pub fn parse_services(list: &Value) -> Vec<ServiceInfo> {
    items(list)
        .iter()
        .map(|item| ServiceInfo {
            name: str_at(item, "/metadata/name").to_string(),
            selector: labels_at(item, "/spec/selector"),
            ports: item
                .pointer("/spec/ports")
                .and_then(Value::as_array)
                .map(|ports| {
                    ports
                        .iter()
                        .map(|p| ServicePort {
                            port: p.get("port").and_then(Value::as_i64).unwrap_or(0),
                            target_port: match p.get("targetPort") {
                                Some(Value::String(s)) => s.clone(),
                                Some(Value::Number(n)) => n.to_string(),
                                _ => String::new(),
                            },
                        })
                        .collect()
                })
                .unwrap_or_default(),
        })
        .collect()
}

pub fn parse_deployments(list: &Value) -> Vec<DeploymentInfo> {
    items(list)
        .iter()
        .map(|item| DeploymentInfo {
            name: str_at(item, "/metadata/name").to_string(),
            selector: labels_at(item, "/spec/selector/matchLabels"),
            replicas: item
                .pointer("/spec/replicas")
                .and_then(Value::as_i64)
                .unwrap_or(1),
            ready_replicas: item
                .pointer("/status/readyReplicas")
                .and_then(Value::as_i64)
                .unwrap_or(0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::runner::{CommandOutput, ScriptedRunner};
    use serde_json::json;

    fn pod_list() -> Value {
        json!({"items": [
            {
                "metadata": {"name": "user-service-5d8f", "labels": {"app": "user-service"}},
                "status": {"phase": "Running", "containerStatuses": [
                    {"name": "main", "ready": true, "state": {"running": {}}}
                ]}
            },
            {
                "metadata": {"name": "geo-7c9", "labels": {"app": "geo"}},
                "status": {"phase": "Running", "containerStatuses": [
                    {"name": "main", "ready": false,
                     "state": {"waiting": {"reason": "CrashLoopBackOff"}}}
                ]}
            }
        ]})
    }

    #[test]
    fn test_parse_pods() {
        let pods = parse_pods(&pod_list());
        assert_eq!(pods.len(), 2);
        assert!(pods[0].is_ready());
        assert!(!pods[1].is_ready());
        assert_eq!(
            pods[1].containers[0].waiting_reason.as_deref(),
            Some("CrashLoopBackOff")
        );
        assert_eq!(pods[0].labels.get("app").map(String::as_str), Some("user-service"));
    }

    #[test]
    fn test_parse_services_and_deployments() {
        let services = parse_services(&json!({"items": [{
            "metadata": {"name": "user-service"},
            "spec": {"selector": {"app": "user-service"},
                     "ports": [{"port": 9090, "targetPort": 9999}]}
        }]}));
        assert_eq!(services[0].ports[0].target_port, "9999");

        let deployments = parse_deployments(&json!({"items": [{
            "metadata": {"name": "user-service"},
            "spec": {"replicas": 0, "selector": {"matchLabels": {"app": "user-service"}}},
            "status": {}
        }]}));
        assert_eq!(deployments[0].replicas, 0);
        assert_eq!(deployments[0].ready_replicas, 0);
        assert!(selector_matches(
            &deployments[0].selector,
            &services[0].selector
        ));
        assert!(!selector_matches(&Labels::new(), &services[0].selector));
    }

    #[tokio::test]
    async fn test_wait_for_ready_times_out() {
        let runner = Arc::new(
            ScriptedRunner::new().respond("get pods", CommandOutput::ok(pod_list().to_string())),
        );
        let client = KubectlClient::new(runner.clone(), "kubectl");
        let err = client
            .wait_for_ready("test-ns", Duration::from_millis(10), Duration::from_millis(40))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout(_)));
        assert!(runner.commands().len() >= 2);
    }

    #[tokio::test]
    async fn test_wait_for_ready_empty_namespace_keeps_waiting() {
        let runner = Arc::new(
            ScriptedRunner::new().respond("get pods", CommandOutput::ok(r#"{"items": []}"#)),
        );
        let client = KubectlClient::new(runner, "kubectl");
        let result = client
            .wait_for_ready("empty", Duration::from_millis(5), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(OrchestratorError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_namespace_lifecycle_commands() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .respond("get namespace", CommandOutput::failed("NotFound")),
        );
        let client = KubectlClient::new(runner.clone(), "kubectl");
        client.create_namespace("demo").await.unwrap();
        client.delete_namespace("demo").await.unwrap();
        client
            .wait_for_namespace_deletion("demo", Duration::from_millis(1), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(runner.received("kubectl create namespace demo"));
        assert!(runner.received("kubectl delete namespace demo --ignore-not-found"));
    }
}
