//! 编排器：驱动单个问题的完整生命周期
//!
//! init_problem：构建 Task → 准备共享基础设施 → 删除并重新部署应用 → 临界区内{登记恢复钩子, 注入故障,
//! 展开可变资源} → 启动负载。start_problem：Agent/环境轮流交互直到有效提交或步数用尽 → 评估 →
//! 临界区内{恢复故障, 注销钩子} → 清理 → 保存会话。
//! 任何阶段出错，只要故障已注入，都会先恢复再把错误抛给调用方。

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::agent::Agent;
use crate::cluster::{expand_references, Cluster, SharedInfrastructure};
use crate::config::AppConfig;
use crate::core::critical_section::{CriticalSection, InterruptController};
use crate::core::shutdown::CleanupRegistry;
use crate::core::state::{PhaseTracker, ProblemPhase, SubmissionStatus};
use crate::core::{OrchestratorError, RecoveryEngine};
use crate::react::events::preview;
use crate::react::{ResponseParser, SessionEvent};
use crate::session::{Session, Turn};
use crate::task::{FaultGuard, ProblemRegistry, Task, Workload};
use crate::tools::{ActionKind, ShellGuard, Verdict};

/// 每轮附在环境输出后的提示
const NEXT_ACTION: &str = "Please take the next action";

/// init_problem 交给 Agent 的任务上下文
#[derive(Debug, Clone)]
pub struct ProblemContext {
    pub description: String,
    pub instructions: String,
    pub actions: BTreeMap<String, String>,
}

/// 一次问题运行的结果
#[derive(Debug, Clone)]
pub struct ProblemOutcome {
    pub session_id: Uuid,
    pub problem_id: String,
    /// 最后一次提交的判定；从未提交时为 None
    pub status: Option<SubmissionStatus>,
    pub steps: usize,
    pub results: Map<String, Value>,
    /// 会话文件路径；保存失败时为 None
    pub artifact: Option<PathBuf>,
}

/// 单次环境响应
enum EnvReply {
    Observation(String),
    Submission {
        status: SubmissionStatus,
        results: Map<String, Value>,
        at: DateTime<Utc>,
    },
}

/// 循环结束时的状态
struct LoopEnd {
    status: Option<SubmissionStatus>,
    steps: usize,
    /// 有效提交时的试评估结果
    results: Option<Map<String, Value>>,
}

/// 已初始化、尚未清理的问题
struct ActiveProblem {
    task: Task,
    session: Session,
    tracker: PhaseTracker,
    guard: Option<FaultGuard>,
    parser: ResponseParser,
    workload: Option<JoinHandle<()>>,
    started: Instant,
}

pub struct Orchestrator {
    cfg: AppConfig,
    cluster: Cluster,
    problems: ProblemRegistry,
    cleanup: CleanupRegistry,
    interrupts: InterruptController,
    infrastructure: Vec<Arc<dyn SharedInfrastructure>>,
    shell_guard: ShellGuard,
    recovery: RecoveryEngine,
    agent: Option<(String, Box<dyn Agent>)>,
    event_tx: Option<mpsc::UnboundedSender<SessionEvent>>,
    active: Option<ActiveProblem>,
}

impl Orchestrator {
    pub fn new(cfg: AppConfig, cluster: Cluster, problems: ProblemRegistry) -> Self {
        let shell_guard = ShellGuard::new(&cfg.shell, cluster.runner().clone());
        Self {
            cfg,
            cluster,
            problems,
            cleanup: CleanupRegistry::new(),
            interrupts: InterruptController::new(),
            infrastructure: Vec::new(),
            shell_guard,
            recovery: RecoveryEngine::new(),
            agent: None,
            event_tx: None,
            active: None,
        }
    }

    /// 与进程级崩溃清理共享登记表
    pub fn with_cleanup_registry(mut self, registry: CleanupRegistry) -> Self {
        self.cleanup = registry;
        self
    }

    pub fn with_interrupts(mut self, interrupts: InterruptController) -> Self {
        self.interrupts = interrupts;
        self
    }

    pub fn with_infrastructure(mut self, infrastructure: Vec<Arc<dyn SharedInfrastructure>>) -> Self {
        self.infrastructure = infrastructure;
        self
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn register_agent(&mut self, agent: Box<dyn Agent>, name: impl Into<String>) {
        let name = name.into();
        tracing::info!(agent = %name, "Agent registered");
        self.agent = Some((name, agent));
    }

    pub fn problems(&self) -> &ProblemRegistry {
        &self.problems
    }

    pub fn cleanup_registry(&self) -> &CleanupRegistry {
        &self.cleanup
    }

    pub fn interrupts(&self) -> &InterruptController {
        &self.interrupts
    }

    /// 当前（或最近一次）问题的会话
    pub fn session(&self) -> Option<&Session> {
        self.active.as_ref().map(|a| &a.session)
    }

    pub fn phase(&self) -> Option<ProblemPhase> {
        self.active.as_ref().map(|a| a.tracker.phase())
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    /// 部署应用并注入故障；出错时已注入的故障会先被恢复
    pub async fn init_problem(
        &mut self,
        problem_id: &str,
    ) -> Result<ProblemContext, OrchestratorError> {
        if let Some(previous) = &self.active {
            if !previous.tracker.phase().is_terminal() {
                return Err(OrchestratorError::Lifecycle(format!(
                    "problem {} is still active",
                    previous.task.id()
                )));
            }
        }
        self.interrupts.check()?;
        let started = Instant::now();
        let task = self.problems.build(problem_id, self.cluster.clone(), &self.cfg)?;
        let mut session = Session::new();
        session.set_problem(problem_id);
        if let Some((name, _)) = &self.agent {
            session.set_agent(name.clone());
        }
        let parser = ResponseParser::new(task.actions().names());

        let mut active = ActiveProblem {
            task,
            session,
            tracker: PhaseTracker::new(problem_id),
            guard: None,
            parser,
            workload: None,
            started,
        };
        tracing::info!(problem = %problem_id, session = %active.session.id(), "Initializing problem");

        if let Err(e) = self.prepare(&mut active).await {
            return Err(self.abort(active, e).await);
        }

        let context = ProblemContext {
            description: active.task.get_task_description(),
            instructions: active.task.get_instructions(),
            actions: active.task.get_available_actions(),
        };
        let init = match self.agent.as_mut() {
            Some((_, agent)) => {
                agent
                    .init_context(&context.description, &context.instructions, &context.actions)
                    .await
            }
            None => Ok(()),
        };
        if let Err(e) = init {
            let err = OrchestratorError::Agent(format!("{e:#}"));
            return Err(self.abort(active, err).await);
        }
        self.emit(SessionEvent::ProblemStarted {
            problem_id: problem_id.to_string(),
            session_id: active.session.id().to_string(),
        });
        self.active = Some(active);
        Ok(context)
    }

    async fn prepare(&self, active: &mut ActiveProblem) -> Result<(), OrchestratorError> {
        for infra in &self.infrastructure {
            self.interruptible(infra.ensure(&self.cluster)).await?;
        }

        let app = active.task.app().clone();
        self.interruptible(app.delete(&self.cluster)).await?;
        self.interruptible(app.deploy(&self.cluster)).await?;
        active.tracker.advance(ProblemPhase::Deployed)?;

        // 进入注入临界区前最后一次响应中断，之后的中断推迟到临界区结束
        self.interrupts.check()?;

        let guard = FaultGuard::arm(&self.cleanup, active.task.scenario(), self.cluster.clone());
        active.guard = Some(guard);
        let task = &active.task;
        let session = &mut active.session;
        let client = self.cluster.client().clone();
        CriticalSection::run(&self.interrupts, async move {
            let hints = task.inject_fault().await?;
            let expanded = expand_references(client.as_ref(), task.namespace(), &hints).await?;
            let added = session.add_mutables(&expanded)?;
            tracing::info!(hints = ?hints, mutables = added, "Fault injected");
            Ok(())
        })
        .await?;
        active.tracker.advance(ProblemPhase::Injected)?;

        match active.task.start_workload().await? {
            Workload::Background(fut) => {
                active.workload = Some(tokio::spawn(async move {
                    if let Err(e) = fut.await {
                        tracing::warn!("Background workload failed: {:#}", e);
                    }
                }));
            }
            Workload::Completed => tracing::info!("Workload completed"),
            Workload::None => {}
        }
        Ok(())
    }

    /// 临界区外的长耗时步骤（部署、就绪等待）与中断竞速
    async fn interruptible<T, F>(&self, fut: F) -> Result<T, OrchestratorError>
    where
        F: Future<Output = Result<T, OrchestratorError>>,
    {
        let token = self.interrupts.token();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(OrchestratorError::Interrupted),
            out = fut => out,
        }
    }

    /// Agent 与环境轮流交互，随后评估、恢复、清理并保存会话
    pub async fn start_problem(
        &mut self,
        max_steps: usize,
    ) -> Result<ProblemOutcome, OrchestratorError> {
        let mut active = match self.active.take() {
            Some(active) if active.tracker.phase() == ProblemPhase::Injected => active,
            other => {
                self.active = other;
                return Err(OrchestratorError::Lifecycle(
                    "start_problem requires an initialized problem".to_string(),
                ));
            }
        };

        let evaluated = match self.run_loop(&mut active, max_steps).await {
            Ok(end) => self.evaluate(&mut active, end).await,
            Err(e) => Err(e),
        };
        match evaluated {
            Ok(end) => self.complete(active, end).await,
            Err(e) => Err(self.abort(active, e).await),
        }
    }

    /// init_problem + start_problem
    pub async fn run_problem(
        &mut self,
        problem_id: &str,
        max_steps: Option<usize>,
    ) -> Result<ProblemOutcome, OrchestratorError> {
        self.init_problem(problem_id).await?;
        let steps = max_steps.unwrap_or(self.cfg.orchestrator.max_steps);
        self.start_problem(steps).await
    }

    async fn run_loop(
        &mut self,
        active: &mut ActiveProblem,
        max_steps: usize,
    ) -> Result<LoopEnd, OrchestratorError> {
        active.tracker.advance(ProblemPhase::Running)?;
        active.session.freeze_mutables();
        active.session.start();

        let mut observation = NEXT_ACTION.to_string();
        let mut end = LoopEnd {
            status: None,
            steps: 0,
            results: None,
        };
        for step in 1..=max_steps {
            self.interrupts.check()?;
            self.emit(SessionEvent::StepUpdate { step, max_steps });

            let action = self.ask_agent(&observation).await?;
            end.steps = step;
            if self.cfg.orchestrator.print_session {
                tracing::info!(step, "Agent:\n{}", action);
            }
            self.emit(SessionEvent::AgentAction {
                step,
                text: action.clone(),
            });
            active.session.add(Turn::assistant(action.clone()))?;

            let reply = match self.ask_env(active, &action).await? {
                EnvReply::Observation(text) => text,
                EnvReply::Submission {
                    status: SubmissionStatus::Valid,
                    results,
                    at,
                } => {
                    end.status = Some(SubmissionStatus::Valid);
                    end.results = Some(results);
                    active.session.end_at(at);
                    active.session.add(Turn::env(SubmissionStatus::Valid.to_string()))?;
                    tracing::info!(step, "Valid submission");
                    break;
                }
                EnvReply::Submission { status, .. } => {
                    end.status = Some(status);
                    self.emit(SessionEvent::SubmissionRejected { step });
                    OrchestratorError::SubmissionInvalid(
                        "the submitted solution did not pass evaluation; you may continue and submit again"
                            .to_string(),
                    )
                    .to_string()
                }
            };

            if self.cfg.orchestrator.print_session {
                tracing::info!(step, "Environment:\n{}", reply);
            }
            self.emit(SessionEvent::Observation {
                step,
                preview: preview(&reply),
            });
            active.session.add(Turn::env(reply.clone()))?;
            observation = format!("{reply}\n{NEXT_ACTION}");
        }

        if end.status != Some(SubmissionStatus::Valid) {
            tracing::info!(steps = end.steps, "Step budget exhausted");
        }
        active.session.end();
        Ok(end)
    }

    /// 等待 Agent；这是循环中唯一的挂起点，中断会立即结束等待
    async fn ask_agent(&mut self, observation: &str) -> Result<String, OrchestratorError> {
        let token = self.interrupts.token();
        let (_, agent) = self
            .agent
            .as_mut()
            .ok_or_else(|| OrchestratorError::Lifecycle("no agent registered".to_string()))?;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(OrchestratorError::Interrupted),
            action = agent.get_action(observation) => {
                action.map_err(|e| OrchestratorError::Agent(format!("{e:#}")))
            }
        }
    }

    /// 解析并执行动作；动作层面的错误都变成 Observation，只有中断会向上传播
    async fn ask_env(
        &self,
        active: &mut ActiveProblem,
        action: &str,
    ) -> Result<EnvReply, OrchestratorError> {
        match self.dispatch(active, action).await {
            Ok(reply) => Ok(reply),
            Err(e) => match self.recovery.to_observation(&e) {
                Some(text) => {
                    tracing::debug!(error = %e, "Dispatch error returned to agent");
                    Ok(EnvReply::Observation(text))
                }
                None => Err(e),
            },
        }
    }

    async fn dispatch(
        &self,
        active: &mut ActiveProblem,
        action: &str,
    ) -> Result<EnvReply, OrchestratorError> {
        let parsed = active.parser.parse(action)?;
        if !parsed.context.is_empty() {
            tracing::debug!(context = ?parsed.context, "Agent reasoning");
        }
        let bound = active
            .task
            .bind_action(&parsed.api_name, parsed.args, parsed.kwargs)?;

        match bound.kind() {
            ActionKind::Submit => {
                let solution = bound.solution();
                active.session.set_solution(solution.clone());
                let at = Utc::now();
                let duration = active.session.elapsed_until(at).unwrap_or(0.0);
                let results = self
                    .interruptible(active.task.eval(&solution, active.session.history(), duration))
                    .await?;
                let success = results
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let status = if success {
                    SubmissionStatus::Valid
                } else {
                    SubmissionStatus::Invalid
                };
                tracing::info!(solution = %solution, status = ?status, "Submission evaluated");
                Ok(EnvReply::Submission {
                    status,
                    results,
                    at,
                })
            }
            ActionKind::ExecShell => {
                let command = bound.str("command")?;
                let forbidden = active.task.forbidden_patterns();
                match self
                    .shell_guard
                    .check(command, active.session.mutables(), &forbidden)
                    .await
                {
                    Verdict::Allow => Ok(EnvReply::Observation(active.task.execute(&bound).await?)),
                    Verdict::Reject(reason) => Ok(EnvReply::Observation(reason)),
                }
            }
            _ => Ok(EnvReply::Observation(active.task.execute(&bound).await?)),
        }
    }

    async fn evaluate(
        &self,
        active: &mut ActiveProblem,
        end: LoopEnd,
    ) -> Result<LoopEnd, OrchestratorError> {
        active.tracker.advance(ProblemPhase::Submitted)?;
        let duration = active.session.duration().unwrap_or(0.0);
        let mut results = match (&end.status, &end.results) {
            (Some(SubmissionStatus::Valid), Some(results)) => results.clone(),
            _ => {
                let solution = active.session.solution().cloned().unwrap_or(Value::Null);
                self.interruptible(active.task.eval(&solution, active.session.history(), duration))
                    .await?
            }
        };
        if end.status == Some(SubmissionStatus::Invalid) {
            results.insert("success".to_string(), json!(false));
        }
        active.session.set_results(results);
        active.tracker.advance(ProblemPhase::Evaluated)?;
        let summary = Value::Object(active.session.results().clone());
        tracing::info!(results = %summary, "Evaluation finished");
        Ok(end)
    }

    /// 临界区内恢复故障并注销钩子；恢复失败只记录日志
    async fn recover_active(&self, active: &mut ActiveProblem) -> Result<bool, OrchestratorError> {
        let Some(guard) = &active.guard else {
            return Ok(false);
        };
        let recovered = CriticalSection::run(&self.interrupts, async {
            match guard.recover().await {
                Ok(recovered) => Ok(recovered),
                Err(e) => {
                    tracing::error!(problem = %active.task.id(), "Fault recovery failed: {:#}", e);
                    Ok(false)
                }
            }
        })
        .await;
        if active.tracker.phase().can_transition_to(ProblemPhase::Recovered) {
            active.tracker.advance(ProblemPhase::Recovered)?;
        }
        if matches!(recovered, Ok(true)) {
            self.emit(SessionEvent::FaultRecovered {
                problem_id: active.task.id().to_string(),
            });
        }
        recovered
    }

    /// 恢复当前问题的故障；已恢复过时是无副作用的空操作
    pub async fn recover(&mut self) -> Result<bool, OrchestratorError> {
        let Some(mut active) = self.active.take() else {
            return Ok(false);
        };
        let out = self.recover_active(&mut active).await;
        self.active = Some(active);
        out
    }

    /// 停止负载、删除应用、卸载需要卸载的共享基础设施；失败只记录日志
    async fn teardown(&self, active: &mut ActiveProblem) {
        if let Some(handle) = active.workload.take() {
            handle.abort();
        }
        if let Err(e) = active.task.app().cleanup(&self.cluster).await {
            tracing::warn!(problem = %active.task.id(), "Application cleanup failed: {}", e);
        }
        for infra in self.infrastructure.iter().filter(|i| i.teardown_on_cleanup()) {
            if let Err(e) = infra.teardown(&self.cluster).await {
                tracing::warn!(infra = infra.name(), "Infrastructure teardown failed: {}", e);
            }
        }
        if active.tracker.phase().can_transition_to(ProblemPhase::CleanedUp) {
            let _ = active.tracker.advance(ProblemPhase::CleanedUp);
        }
    }

    fn save(&self, active: &ActiveProblem) -> Option<PathBuf> {
        match active.session.save(&self.cfg.orchestrator.results_dir) {
            Ok(path) => {
                tracing::info!("Session saved to {}", path.display());
                Some(path)
            }
            Err(e) => {
                tracing::warn!("Failed to save session: {:#}", e);
                None
            }
        }
    }

    async fn complete(
        &mut self,
        mut active: ActiveProblem,
        end: LoopEnd,
    ) -> Result<ProblemOutcome, OrchestratorError> {
        let recovered = self.recover_active(&mut active).await;
        self.teardown(&mut active).await;

        let time_key = active.task.kind().time_key();
        let task_time = active
            .session
            .results()
            .get(time_key)
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let overhead = active.started.elapsed().as_secs_f64() - task_time;
        active
            .session
            .set_result("framework_overhead", json!(overhead));
        self.emit(SessionEvent::Evaluated {
            results: Value::Object(active.session.results().clone()),
        });

        let artifact = self.save(&active);
        let outcome = ProblemOutcome {
            session_id: active.session.id(),
            problem_id: active.task.id().to_string(),
            status: end.status,
            steps: end.steps,
            results: active.session.results().clone(),
            artifact,
        };
        self.active = Some(active);
        // 恢复期间推迟的中断在清理之后再抛出
        recovered?;
        // 最后一轮、试评估或评估期间收到的中断：结果已保存，仍要让调用方看到
        self.interrupts.check()?;
        Ok(outcome)
    }

    /// 错误路径：恢复 → 清理 → 保存，再返回原始错误
    async fn abort(&mut self, mut active: ActiveProblem, err: OrchestratorError) -> OrchestratorError {
        tracing::error!(problem = %active.task.id(), "Problem failed: {}", err);
        self.emit(SessionEvent::Error {
            text: err.to_string(),
        });
        if let Err(e) = self.recover_active(&mut active).await {
            tracing::warn!("Interrupt deferred during recovery: {}", e);
        }
        self.teardown(&mut active).await;
        if active.session.start_time().is_some() {
            active.session.end();
            active.session.set_result("success", json!(false));
            active.session.set_result("error", json!(err.to_string()));
            self.save(&active);
        }
        self.active = Some(active);
        err
    }
}
