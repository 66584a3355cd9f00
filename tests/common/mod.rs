//! 集成测试共用的假集群、计数场景与编排器构造

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use opsarena::cluster::{
    AppCatalog, AppMetadata, Application, Cluster, ClusterClient, ContainerState,
    DeploymentInfo, PodInfo, ScriptedRunner, ServiceInfo, ServicePort,
};
use opsarena::config::AppConfig;
use opsarena::core::{InterruptController, Orchestrator, OrchestratorError};
use opsarena::task::{FaultProfile, FaultScenario, ProblemRegistry, TaskKind, Workload};

pub const NAMESPACE: &str = "test-ns";
pub const PROBLEM: &str = "spy_fault-detection-1";

fn labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), app.to_string())])
}

/// 固定拓扑：user-service（1 个就绪 Pod）与 other-service
pub struct FakeCluster;

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_pods(&self, _ns: &str) -> Result<Vec<PodInfo>, OrchestratorError> {
        Ok(["user-service", "other-service"]
            .iter()
            .map(|app| PodInfo {
                name: format!("{app}-1"),
                labels: labels(app),
                phase: "Running".to_string(),
                containers: vec![ContainerState {
                    name: "main".to_string(),
                    ready: true,
                    ..Default::default()
                }],
            })
            .collect())
    }

    async fn list_services(&self, _ns: &str) -> Result<Vec<ServiceInfo>, OrchestratorError> {
        Ok(["user-service", "other-service"]
            .iter()
            .map(|app| ServiceInfo {
                name: app.to_string(),
                selector: labels(app),
                ports: vec![ServicePort {
                    port: 9090,
                    target_port: "9090".to_string(),
                }],
            })
            .collect())
    }

    async fn list_deployments(&self, _ns: &str) -> Result<Vec<DeploymentInfo>, OrchestratorError> {
        Ok(["user-service", "other-service"]
            .iter()
            .map(|app| DeploymentInfo {
                name: app.to_string(),
                selector: labels(app),
                replicas: 1,
                ready_replicas: 1,
            })
            .collect())
    }

    async fn pod_logs(&self, _ns: &str, pod: &str) -> Result<String, OrchestratorError> {
        Ok(format!("logs of {pod}"))
    }

    async fn namespace_exists(&self, _ns: &str) -> Result<bool, OrchestratorError> {
        Ok(false)
    }

    async fn create_namespace(&self, _ns: &str) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn delete_namespace(&self, _ns: &str) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

/// 被 drop 时置位，用来观察后台负载是否被中止
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// 记录注入/恢复次数；可在注入过程中投递一次中断，或让注入/恢复失败
#[derive(Default)]
pub struct SpyScenario {
    pub injected: AtomicUsize,
    pub recovered: AtomicUsize,
    pub interrupt_during_inject: Option<InterruptController>,
    /// 注入做完一半后报错
    pub fail_inject: bool,
    pub fail_recover: bool,
    /// 设置后 start_workload 返回永不结束的后台负载，负载被 drop 时置位
    pub endless_workload: Option<Arc<AtomicBool>>,
}

impl SpyScenario {
    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    pub fn recovered(&self) -> usize {
        self.recovered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FaultScenario for SpyScenario {
    fn name(&self) -> &str {
        "spy"
    }

    fn namespace(&self) -> &str {
        NAMESPACE
    }

    fn profile(&self) -> FaultProfile {
        FaultProfile {
            expected_anomaly: true,
            faulty_components: vec!["user-service".to_string()],
            system_level: Some("Application".to_string()),
            fault_type: Some("Misconfiguration".to_string()),
        }
    }

    async fn inject_fault(&self, _cluster: &Cluster) -> anyhow::Result<Vec<String>> {
        if let Some(interrupts) = &self.interrupt_during_inject {
            interrupts.trigger();
            tokio::task::yield_now().await;
        }
        self.injected.fetch_add(1, Ordering::SeqCst);
        if self.fail_inject {
            anyhow::bail!("patch rejected by admission webhook");
        }
        Ok(vec!["service/user-service".to_string()])
    }

    async fn recover_fault(&self, _cluster: &Cluster) -> anyhow::Result<()> {
        self.recovered.fetch_add(1, Ordering::SeqCst);
        if self.fail_recover {
            anyhow::bail!("service user-service not found");
        }
        Ok(())
    }

    async fn start_workload(&self, _cluster: &Cluster) -> anyhow::Result<Workload> {
        let Some(flag) = &self.endless_workload else {
            return Ok(Workload::None);
        };
        let guard = DropFlag(flag.clone());
        Ok(Workload::Background(Box::pin(async move {
            let _guard = guard;
            futures_util::future::pending::<()>().await;
            Ok(())
        })))
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub runner: Arc<ScriptedRunner>,
    pub scenario: Arc<SpyScenario>,
    pub results_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(scenario: SpyScenario, runner: ScriptedRunner) -> Self {
        let results_dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = AppConfig::default();
        cfg.orchestrator.results_dir = results_dir.path().to_path_buf();
        cfg.orchestrator.print_session = false;
        cfg.cluster.readiness_poll_secs = 0;
        cfg.cluster.readiness_max_wait_secs = 1;

        let runner = Arc::new(runner);
        let cluster = Cluster::new(runner.clone(), Arc::new(FakeCluster), cfg.cluster.clone());

        let mut catalog = AppCatalog::new();
        catalog.insert(
            "test_app",
            Application::new(AppMetadata {
                name: "Test App".to_string(),
                namespace: NAMESPACE.to_string(),
                desc: "Two services behind a gateway.".to_string(),
                supported_operations: vec!["Read user".to_string()],
                helm: None,
                k8s_deploy_path: Some(PathBuf::from("/tmp/test-app")),
                frontend_url: None,
                payload_script: None,
            }),
        );
        let scenario = Arc::new(scenario);
        let mut problems = ProblemRegistry::new(catalog);
        let spy = scenario.clone();
        problems.register(PROBLEM, "test_app", TaskKind::Detection, move |_app| {
            let scenario: Arc<dyn FaultScenario> = spy.clone();
            scenario
        });

        let orchestrator = Orchestrator::new(cfg, cluster, problems);
        Self {
            orchestrator,
            runner,
            scenario,
            results_dir,
        }
    }
}
