//! 任务层：故障场景 × 任务类型的组合
//!
//! Task 在每个问题实例中构造一次，持有故障场景、被测应用、动作注册表与执行器，
//! 提供注入/恢复/负载、任务描述与动作分发，以及按任务类型的评估。

pub mod evaluator;
pub mod guard;
pub mod kind;
pub mod registry;
pub mod scenario;
pub mod scenarios;
pub mod workload;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Map, Value};

pub use evaluator::{QualitativeJudge, TokenEstimator};
pub use guard::{FaultGuard, RecoveryLatch};
pub use kind::TaskKind;
pub use registry::ProblemRegistry;
pub use scenario::{FaultProfile, FaultScenario, Workload};
pub use workload::WrkWorkload;

use crate::cluster::{Application, Cluster};
use crate::config::{AppConfig, EvaluationSection};
use crate::core::OrchestratorError;
use crate::session::Turn;
use crate::tools::{ActionArgs, ActionContext, ActionExecutor, ActionRegistry, TelemetrySource};

pub struct Task {
    id: String,
    kind: TaskKind,
    scenario: Arc<dyn FaultScenario>,
    app: Application,
    cluster: Cluster,
    actions: ActionRegistry,
    executor: ActionExecutor,
    evaluation: EvaluationSection,
    action_timeout_secs: u64,
    judge: Option<Arc<dyn QualitativeJudge>>,
    /// 场景自身不提供负载时使用的命令
    workload: Option<String>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        kind: TaskKind,
        scenario: Arc<dyn FaultScenario>,
        app: Application,
        cluster: Cluster,
        cfg: &AppConfig,
    ) -> Self {
        let executor = ActionExecutor::new(
            ActionContext::new(cluster.clone()),
            cfg.orchestrator.action_timeout_secs,
        );
        Self {
            id: id.into(),
            kind,
            scenario,
            app,
            cluster,
            actions: kind.action_registry(),
            executor,
            evaluation: cfg.evaluation.clone(),
            action_timeout_secs: cfg.orchestrator.action_timeout_secs,
            judge: None,
            workload: None,
        }
    }

    pub fn with_judge(mut self, judge: Arc<dyn QualitativeJudge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn with_workload(mut self, command: impl Into<String>) -> Self {
        self.workload = Some(command.into());
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySource>) -> Self {
        self.executor = ActionExecutor::new(
            ActionContext::new(self.cluster.clone()).with_telemetry(telemetry),
            self.action_timeout_secs,
        );
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn namespace(&self) -> &str {
        self.scenario.namespace()
    }

    pub fn scenario(&self) -> Arc<dyn FaultScenario> {
        self.scenario.clone()
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn get_task_description(&self) -> String {
        let description = self.kind.description(&self.app.summary());
        match self.scenario.task_hint() {
            Some(hint) => format!("{description}\n{hint}\n"),
            None => description,
        }
    }

    pub fn get_instructions(&self) -> String {
        self.kind.instructions()
    }

    pub fn get_available_actions(&self) -> BTreeMap<String, String> {
        self.actions.descriptions()
    }

    pub fn forbidden_patterns(&self) -> Vec<Regex> {
        self.scenario.forbidden_patterns()
    }

    pub async fn inject_fault(&self) -> Result<Vec<String>, OrchestratorError> {
        tracing::info!(problem = %self.id, scenario = self.scenario.name(), "Injecting fault");
        self.scenario
            .inject_fault(&self.cluster)
            .await
            .map_err(OrchestratorError::external)
    }

    pub async fn recover_fault(&self) -> Result<(), OrchestratorError> {
        tracing::info!(problem = %self.id, scenario = self.scenario.name(), "Recovering fault");
        self.scenario
            .recover_fault(&self.cluster)
            .await
            .map_err(OrchestratorError::external)
    }

    pub async fn start_workload(&self) -> Result<Workload, OrchestratorError> {
        let workload = self
            .scenario
            .start_workload(&self.cluster)
            .await
            .map_err(OrchestratorError::external)?;
        Ok(match (workload, &self.workload) {
            (Workload::None, Some(command)) => WrkWorkload::start(&self.cluster, command),
            (workload, _) => workload,
        })
    }

    /// 按名称解析动作并校验参数
    pub fn bind_action(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<ActionArgs, OrchestratorError> {
        ActionArgs::bind(self.actions.resolve(name)?, args, kwargs)
    }

    pub async fn perform_action(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<String, OrchestratorError> {
        let bound = self.bind_action(name, args, kwargs)?;
        self.execute(&bound).await
    }

    pub async fn execute(&self, bound: &ActionArgs) -> Result<String, OrchestratorError> {
        self.executor.execute(bound).await
    }

    /// 评估候选解；结果至少包含 success 与耗时指标（TTD/TTL/TTA/TTM）
    pub async fn eval(
        &self,
        solution: &Value,
        history: &[Turn],
        duration: f64,
    ) -> Result<Map<String, Value>, OrchestratorError> {
        let mut results = evaluator::common_metrics(history);
        results.insert(self.kind.time_key().to_string(), json!(duration));

        let profile = self.scenario.profile();
        let specific = match self.kind {
            TaskKind::Detection => evaluator::evaluate_detection(solution, &profile),
            TaskKind::Localization => evaluator::evaluate_localization(solution, &profile),
            TaskKind::Analysis => evaluator::evaluate_analysis(solution, &profile),
            TaskKind::Mitigation => {
                evaluator::evaluate_mitigation(
                    &self.cluster,
                    self.scenario.as_ref(),
                    Duration::from_secs(self.evaluation.mitigation_poll_secs),
                    self.evaluation.mitigation_poll_rounds,
                )
                .await?
            }
        };
        results.extend(specific);

        if self.evaluation.qualitative_eval {
            match &self.judge {
                Some(judge) => {
                    results.extend(evaluator::qualitative_metrics(judge.as_ref(), history).await)
                }
                None => tracing::warn!("Qualitative evaluation enabled but no judge configured"),
            }
        }
        Ok(results)
    }
}
