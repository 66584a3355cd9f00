//! 资源引用展开
//!
//! 故障注入返回的是符号引用（namespace/z、service/s、deployment/d ...），
//! 这里通过 label selector 展开为具体的 pod/service/deployment 名称，得到 Agent 可以修改的完整集合。

use std::collections::BTreeSet;

use crate::cluster::kubectl::{selector_matches, ClusterClient};
use crate::core::OrchestratorError;
use crate::session::normalize_ref;

pub async fn expand_references(
    client: &dyn ClusterClient,
    namespace: &str,
    hints: &[String],
) -> Result<BTreeSet<String>, OrchestratorError> {
    let mut out = BTreeSet::new();
    for hint in hints {
        let reference = normalize_ref(hint);
        if reference.is_empty() {
            continue;
        }
        let Some((kind, name)) = reference.split_once('/') else {
            out.insert(reference);
            continue;
        };
        match kind {
            "namespace" => {
                for pod in client.list_pods(name).await? {
                    out.insert(format!("pod/{}", pod.name));
                }
                for svc in client.list_services(name).await? {
                    out.insert(format!("service/{}", svc.name));
                }
                for deploy in client.list_deployments(name).await? {
                    out.insert(format!("deployment/{}", deploy.name));
                }
            }
            "service" => {
                let services = client.list_services(namespace).await?;
                if let Some(svc) = services.iter().find(|s| s.name == name) {
                    let pods: Vec<_> = client
                        .list_pods(namespace)
                        .await?
                        .into_iter()
                        .filter(|p| selector_matches(&svc.selector, &p.labels))
                        .collect();
                    for deploy in client.list_deployments(namespace).await? {
                        if pods
                            .iter()
                            .any(|p| selector_matches(&deploy.selector, &p.labels))
                        {
                            out.insert(format!("deployment/{}", deploy.name));
                        }
                    }
                    for pod in pods {
                        out.insert(format!("pod/{}", pod.name));
                    }
                } else {
                    tracing::warn!(service = %name, namespace = %namespace, "Service not found during expansion");
                }
            }
            "deployment" => {
                let deployments = client.list_deployments(namespace).await?;
                if let Some(deploy) = deployments.iter().find(|d| d.name == name) {
                    for pod in client.list_pods(namespace).await? {
                        if selector_matches(&deploy.selector, &pod.labels) {
                            out.insert(format!("pod/{}", pod.name));
                        }
                    }
                }
            }
            _ => {}
        }
        out.insert(reference);
    }
    tracing::debug!(count = out.len(), "Expanded mutable references");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::kubectl::{DeploymentInfo, PodInfo, ServiceInfo};
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct FakeCluster;

    fn labels(app: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), app.to_string())])
    }

    #[async_trait]
    impl ClusterClient for FakeCluster {
        async fn list_pods(&self, _ns: &str) -> Result<Vec<PodInfo>, OrchestratorError> {
            Ok(vec![
                PodInfo {
                    name: "user-1".into(),
                    labels: labels("user"),
                    phase: "Running".into(),
                    containers: vec![],
                },
                PodInfo {
                    name: "geo-1".into(),
                    labels: labels("geo"),
                    phase: "Running".into(),
                    containers: vec![],
                },
            ])
        }

        async fn list_services(&self, _ns: &str) -> Result<Vec<ServiceInfo>, OrchestratorError> {
            Ok(vec![ServiceInfo {
                name: "user".into(),
                selector: labels("user"),
                ports: vec![],
            }])
        }

        async fn list_deployments(
            &self,
            _ns: &str,
        ) -> Result<Vec<DeploymentInfo>, OrchestratorError> {
            Ok(vec![
                DeploymentInfo {
                    name: "user".into(),
                    selector: labels("user"),
                    replicas: 1,
                    ready_replicas: 1,
                },
                DeploymentInfo {
                    name: "geo".into(),
                    selector: labels("geo"),
                    replicas: 1,
                    ready_replicas: 1,
                },
            ])
        }

        async fn pod_logs(&self, _ns: &str, _pod: &str) -> Result<String, OrchestratorError> {
            Ok(String::new())
        }

        async fn namespace_exists(&self, _ns: &str) -> Result<bool, OrchestratorError> {
            Ok(true)
        }

        async fn create_namespace(&self, _ns: &str) -> Result<(), OrchestratorError> {
            Ok(())
        }

        async fn delete_namespace(&self, _ns: &str) -> Result<(), OrchestratorError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_expand_service() {
        let out = expand_references(&FakeCluster, "hotel", &["svc/user".to_string()])
            .await
            .unwrap();
        let expected: BTreeSet<String> = ["service/user", "pod/user-1", "deployment/user"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn test_expand_namespace_and_deployment() {
        let out = expand_references(&FakeCluster, "hotel", &["ns/hotel".to_string()])
            .await
            .unwrap();
        assert!(out.contains("namespace/hotel"));
        assert!(out.contains("pod/geo-1"));
        assert!(out.contains("deployment/geo"));
        assert!(out.contains("service/user"));

        let out = expand_references(&FakeCluster, "hotel", &["deployment.apps/geo".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.contains("pod/geo-1"));
        assert!(out.contains("deployment/geo"));
    }

    #[tokio::test]
    async fn test_unknown_kinds_kept_normalized() {
        let out = expand_references(&FakeCluster, "hotel", &["CM/settings".to_string(), " ".to_string()])
            .await
            .unwrap();
        assert_eq!(out.into_iter().collect::<Vec<_>>(), vec!["configmap/settings"]);
    }
}
