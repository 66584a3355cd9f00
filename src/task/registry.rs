//! 问题注册表：问题 id → (应用, 任务类型, 场景构造器)

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cluster::{AppCatalog, Application, Cluster};
use crate::config::AppConfig;
use crate::core::OrchestratorError;
use crate::task::kind::TaskKind;
use crate::task::scenario::FaultScenario;
use crate::task::scenarios::{NoopScenario, ScaleToZero, TargetPortMisconfig};
use crate::task::workload::WrkWorkload;
use crate::task::Task;

pub const SOCIAL_NETWORK: &str = "social_network";
pub const HOTEL_RESERVATION: &str = "hotel_reservation";

const TARGET_PORT_SERVICES: &[&str] = &["user-service", "text-service", "post-storage-service"];
const TARGET_PORT_HINT: &str = "Start by investigating the `compose-post-service` pod";
const COMPOSE_POST_PATH: &str = "/wrk2-api/post/compose";

type ScenarioBuilder = Box<dyn Fn(&Application) -> Arc<dyn FaultScenario> + Send + Sync>;

struct ProblemEntry {
    app_key: String,
    kind: TaskKind,
    build: ScenarioBuilder,
    /// 拼在应用 Frontend URL 后的负载路径
    workload_path: String,
}

pub struct ProblemRegistry {
    catalog: AppCatalog,
    problems: BTreeMap<String, ProblemEntry>,
}

impl ProblemRegistry {
    pub fn new(catalog: AppCatalog) -> Self {
        Self {
            catalog,
            problems: BTreeMap::new(),
        }
    }

    /// 内置问题集
    pub fn with_builtin(catalog: AppCatalog) -> Self {
        let mut registry = Self::new(catalog);
        for kind in TaskKind::ALL {
            for (idx, service) in TARGET_PORT_SERVICES.iter().enumerate() {
                let service = service.to_string();
                let id = format!("k8s_target_port-misconfig-{}-{}", kind, idx + 1);
                registry.register(
                    id.clone(),
                    SOCIAL_NETWORK,
                    kind,
                    move |app| -> Arc<dyn FaultScenario> {
                        let scenario = TargetPortMisconfig::new(app.namespace(), service.clone());
                        if kind == TaskKind::Mitigation {
                            Arc::new(scenario.with_hint(TARGET_PORT_HINT))
                        } else {
                            Arc::new(scenario)
                        }
                    },
                );
                registry.set_workload_path(&id, COMPOSE_POST_PATH);
            }
            let id = format!("scale_pod_zero_social_net-{kind}-1");
            registry.register(
                id.clone(),
                SOCIAL_NETWORK,
                kind,
                |app| -> Arc<dyn FaultScenario> {
                    Arc::new(ScaleToZero::new(app.namespace(), "user-service"))
                },
            );
            registry.set_workload_path(&id, COMPOSE_POST_PATH);
        }
        for app_key in [HOTEL_RESERVATION, SOCIAL_NETWORK] {
            registry.register(
                format!("noop_detection_{app_key}-1"),
                app_key,
                TaskKind::Detection,
                |app| -> Arc<dyn FaultScenario> { Arc::new(NoopScenario::new(app.namespace())) },
            );
        }
        registry
    }

    pub fn register<F>(
        &mut self,
        id: impl Into<String>,
        app_key: impl Into<String>,
        kind: TaskKind,
        build: F,
    ) where
        F: Fn(&Application) -> Arc<dyn FaultScenario> + Send + Sync + 'static,
    {
        self.problems.insert(
            id.into(),
            ProblemEntry {
                app_key: app_key.into(),
                kind,
                build: Box::new(build),
                workload_path: String::new(),
            },
        );
    }

    /// 覆盖问题的负载路径（默认直接打前端根路径）
    pub fn set_workload_path(&mut self, id: &str, path: impl Into<String>) -> bool {
        match self.problems.get_mut(id) {
            Some(entry) => {
                entry.workload_path = path.into();
                true
            }
            None => false,
        }
    }

    pub fn catalog(&self) -> &AppCatalog {
        &self.catalog
    }

    pub fn problem_ids(&self) -> Vec<String> {
        self.problems.keys().cloned().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.problems.contains_key(id)
    }

    pub fn build(
        &self,
        id: &str,
        cluster: Cluster,
        cfg: &AppConfig,
    ) -> Result<Task, OrchestratorError> {
        let entry = self
            .problems
            .get(id)
            .ok_or_else(|| OrchestratorError::ProblemNotFound(id.to_string()))?;
        let app = self.catalog.get(&entry.app_key).ok_or_else(|| {
            OrchestratorError::Config(format!(
                "application '{}' required by {} is not in the catalog",
                entry.app_key, id
            ))
        })?;
        let scenario = (entry.build)(app);
        let task = Task::new(id, entry.kind, scenario, app.clone(), cluster, cfg);
        let wrk = WrkWorkload::new(cfg.workload.clone());
        Ok(match wrk.command_for(app, &entry.workload_path) {
            Some(command) => task.with_workload(command),
            None => task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cluster::{AppMetadata, ScriptedRunner};
    use crate::task::scenarios::testing::scripted_cluster;
    use crate::task::Workload;

    fn catalog() -> AppCatalog {
        let mut catalog = AppCatalog::new();
        catalog.insert(
            SOCIAL_NETWORK,
            Application::new(AppMetadata {
                name: "Social Network".to_string(),
                namespace: "test-social-network".to_string(),
                desc: String::new(),
                supported_operations: Vec::new(),
                helm: None,
                k8s_deploy_path: None,
                frontend_url: None,
                payload_script: None,
            }),
        );
        catalog
    }

    #[test]
    fn test_builtin_ids() {
        let registry = ProblemRegistry::with_builtin(catalog());
        let ids = registry.problem_ids();
        assert!(ids.contains(&"k8s_target_port-misconfig-detection-1".to_string()));
        assert!(ids.contains(&"k8s_target_port-misconfig-mitigation-3".to_string()));
        assert!(ids.contains(&"scale_pod_zero_social_net-analysis-1".to_string()));
        assert!(ids.contains(&"noop_detection_hotel_reservation-1".to_string()));
        assert_eq!(ids.len(), 4 * 4 + 2);
    }

    #[test]
    fn test_build_task() {
        let registry = ProblemRegistry::with_builtin(catalog());
        let cluster = scripted_cluster(Arc::new(ScriptedRunner::new()));
        let task = registry
            .build("k8s_target_port-misconfig-localization-2", cluster, &AppConfig::default())
            .unwrap();
        assert_eq!(task.kind(), TaskKind::Localization);
        assert_eq!(task.namespace(), "test-social-network");
        assert_eq!(task.scenario().profile().faulty_components, vec!["text-service"]);
    }

    #[tokio::test]
    async fn test_build_attaches_wrk_workload() {
        let mut catalog = AppCatalog::new();
        catalog.insert(
            SOCIAL_NETWORK,
            Application::new(AppMetadata {
                name: "Social Network".to_string(),
                namespace: "test-social-network".to_string(),
                desc: String::new(),
                supported_operations: Vec::new(),
                helm: None,
                k8s_deploy_path: None,
                frontend_url: Some("http://nginx-thrift:8080".to_string()),
                payload_script: None,
            }),
        );
        let registry = ProblemRegistry::with_builtin(catalog);
        let runner = Arc::new(ScriptedRunner::new());
        let task = registry
            .build(
                "scale_pod_zero_social_net-detection-1",
                scripted_cluster(runner.clone()),
                &AppConfig::default(),
            )
            .unwrap();
        let Workload::Background(fut) = task.start_workload().await.unwrap() else {
            panic!("expected a background workload");
        };
        fut.await.unwrap();
        assert!(runner.received("wrk -D exp -t 2 -c 2 -d 10s -L http://nginx-thrift:8080/wrk2-api/post/compose -R 10"));

        let mut cfg = AppConfig::default();
        cfg.workload.enabled = false;
        let task = registry
            .build("noop_detection_social_network-1", scripted_cluster(runner), &cfg)
            .unwrap();
        assert!(matches!(task.start_workload().await.unwrap(), Workload::None));
    }

    #[test]
    fn test_unknown_problem_and_missing_app() {
        let registry = ProblemRegistry::with_builtin(catalog());
        let cluster = scripted_cluster(Arc::new(ScriptedRunner::new()));
        let err = registry
            .build("no_such_problem", cluster.clone(), &AppConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, OrchestratorError::ProblemNotFound(_)));

        let err = registry
            .build("noop_detection_hotel_reservation-1", cluster, &AppConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }
}
