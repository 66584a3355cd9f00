//! 编排器端到端：提交、恢复、门禁与中断

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{Harness, SpyScenario, PROBLEM};
use opsarena::cluster::{Cluster, CommandOutput, ScriptedRunner, SharedInfrastructure};
use opsarena::core::{InterruptController, OrchestratorError, ProblemPhase, SubmissionStatus};
use opsarena::session::{Role, SessionArtifact};
use opsarena::{Agent, ScriptedAgent};
use serde_json::json;

fn runner() -> ScriptedRunner {
    ScriptedRunner::new().respond("ls -l", CommandOutput::ok("file.txt\n"))
}

#[tokio::test]
async fn test_three_step_run_submits_and_recovers_once() {
    let mut h = Harness::new(SpyScenario::default(), runner());
    let agent = ScriptedAgent::new([
        "```\nexec_shell(\"ls -l\")\n```",
        "```\nexec_shell(\"ls -l\")\n```",
        "```\nsubmit(\"Yes\")\n```",
    ]);
    let seen = agent.observations();
    h.orchestrator.register_agent(Box::new(agent), "scripted");

    let outcome = h.orchestrator.run_problem(PROBLEM, Some(10)).await.unwrap();

    assert_eq!(outcome.steps, 3);
    assert_eq!(outcome.status, Some(SubmissionStatus::Valid));
    assert_eq!(outcome.results["success"], json!(true));
    assert_eq!(outcome.results["Detection Accuracy"], json!("Correct"));
    assert_eq!(outcome.results["steps"], json!(3));
    assert!(outcome.results.contains_key("TTD"));
    assert!(outcome.results.contains_key("framework_overhead"));

    assert_eq!(h.scenario.injected(), 1);
    assert_eq!(h.scenario.recovered(), 1);
    assert!(h.orchestrator.cleanup_registry().is_empty());
    assert_eq!(h.orchestrator.phase(), Some(ProblemPhase::CleanedUp));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen[1].starts_with("file.txt"));

    let path = outcome.artifact.expect("artifact saved");
    assert!(path.starts_with(h.results_dir.path()));
    let artifact = SessionArtifact::load(&path).unwrap();
    assert_eq!(artifact.agent.as_deref(), Some("scripted"));
    assert_eq!(artifact.problem_id.as_deref(), Some(PROBLEM));
    assert_eq!(artifact.trace.len(), 6);
    assert_eq!(artifact.trace[0].role, Role::Assistant);
    assert!(artifact.mutables.contains("pod/user-service-1"));
}

#[tokio::test]
async fn test_double_recovery_is_noop() {
    let mut h = Harness::new(SpyScenario::default(), runner());
    h.orchestrator.register_agent(
        Box::new(ScriptedAgent::new(["submit(\"Yes\")"])),
        "scripted",
    );
    h.orchestrator.run_problem(PROBLEM, Some(5)).await.unwrap();
    let history_len = h.orchestrator.session().unwrap().history().len();

    assert!(!h.orchestrator.recover().await.unwrap());
    assert!(!h.orchestrator.recover().await.unwrap());

    assert_eq!(h.scenario.recovered(), 1);
    assert_eq!(h.orchestrator.session().unwrap().history().len(), history_len);
    assert!(h.orchestrator.cleanup_registry().is_empty());
}

#[tokio::test]
async fn test_agent_failure_recovers_before_error() {
    let mut h = Harness::new(SpyScenario::default(), runner());
    // 第二轮回复用尽，get_action 报错
    h.orchestrator.register_agent(
        Box::new(ScriptedAgent::new(["exec_shell(\"ls -l\")"])),
        "flaky",
    );

    let err = h.orchestrator.run_problem(PROBLEM, Some(5)).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Agent(_)));
    assert_eq!(h.scenario.recovered(), 1);
    assert!(h.orchestrator.cleanup_registry().is_empty());
    assert_eq!(h.orchestrator.phase(), Some(ProblemPhase::CleanedUp));
    let session = h.orchestrator.session().unwrap();
    assert_eq!(session.results()["success"], json!(false));
}

#[tokio::test]
async fn test_mutation_gated_by_mutable_set() {
    let mut h = Harness::new(SpyScenario::default(), runner());
    let agent = ScriptedAgent::new([
        "exec_shell(\"kubectl delete pod/user-service-1 -n test-ns\")",
        "exec_shell(\"kubectl delete pod/other-service-1 -n test-ns\")",
        "submit(\"Yes\")",
    ]);
    let seen = agent.observations();
    h.orchestrator.register_agent(Box::new(agent), "scripted");

    let outcome = h.orchestrator.run_problem(PROBLEM, Some(5)).await.unwrap();
    assert_eq!(outcome.status, Some(SubmissionStatus::Valid));

    assert!(h.runner.received("kubectl delete pod/user-service-1 -n test-ns"));
    assert!(!h.runner.received("other-service-1"));
    let seen = seen.lock().unwrap();
    assert!(seen[2].contains("Permission Denied"));
}

#[tokio::test]
async fn test_dispatch_errors_become_observations() {
    let mut h = Harness::new(SpyScenario::default(), runner());
    let agent = ScriptedAgent::new([
        "exec_shell(\"ls -l)",
        "reboot_cluster()",
        "get_logs(\"test-ns\")",
        "submit(\"Yes\")",
    ]);
    let seen = agent.observations();
    h.orchestrator.register_agent(Box::new(agent), "scripted");

    let outcome = h.orchestrator.run_problem(PROBLEM, Some(10)).await.unwrap();
    assert_eq!(outcome.steps, 4);
    assert_eq!(outcome.status, Some(SubmissionStatus::Valid));

    let seen = seen.lock().unwrap();
    assert!(seen[1].contains("Error parsing response"));
    // 未知名称按 shell 命令处理
    assert!(h.runner.received("reboot_cluster()"));
    assert!(seen[3].contains("Invalid arguments for get_logs"));
}

#[tokio::test]
async fn test_invalid_submission_then_budget_exhausted() {
    let mut h = Harness::new(SpyScenario::default(), runner());
    let agent = ScriptedAgent::new(["submit(\"No\")", "exec_shell(\"ls -l\")"]);
    let seen = agent.observations();
    h.orchestrator.register_agent(Box::new(agent), "scripted");

    let outcome = h.orchestrator.run_problem(PROBLEM, Some(2)).await.unwrap();

    assert_eq!(outcome.steps, 2);
    assert_eq!(outcome.status, Some(SubmissionStatus::Invalid));
    assert_eq!(outcome.results["success"], json!(false));
    assert!(seen.lock().unwrap()[1].contains("Invalid submission"));
    assert_eq!(h.scenario.recovered(), 1);
}

#[tokio::test]
async fn test_interrupt_during_injection_is_deferred() {
    let interrupts = InterruptController::new();
    let scenario = SpyScenario {
        interrupt_during_inject: Some(interrupts.clone()),
        ..Default::default()
    };
    let h = Harness::new(scenario, runner());
    let mut orchestrator = h.orchestrator.with_interrupts(interrupts.clone());
    orchestrator.register_agent(Box::new(ScriptedAgent::new(["submit(\"Yes\")"])), "scripted");

    let err = orchestrator.init_problem(PROBLEM).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Interrupted));
    // 注入完整执行后才看到中断，随后故障被恢复
    assert_eq!(h.scenario.injected(), 1);
    assert_eq!(h.scenario.recovered(), 1);
    assert!(interrupts.is_interrupted());
    assert!(orchestrator.cleanup_registry().is_empty());
}

#[tokio::test]
async fn test_unknown_problem_never_injects() {
    let mut h = Harness::new(SpyScenario::default(), runner());
    h.orchestrator.register_agent(Box::new(ScriptedAgent::new(Vec::<String>::new())), "scripted");

    let err = h.orchestrator.run_problem("no_such_problem", None).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ProblemNotFound(_)));
    assert_eq!(h.scenario.injected(), 0);
    assert_eq!(h.scenario.recovered(), 0);
}

#[tokio::test]
async fn test_start_without_init_is_lifecycle_error() {
    let mut h = Harness::new(SpyScenario::default(), runner());
    let err = h.orchestrator.start_problem(3).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Lifecycle(_)));
    assert_eq!(h.scenario.injected(), 0);
}

/// 收到第一轮观察时按下 Ctrl+C，然后照常回复
struct InterruptingAgent {
    interrupts: InterruptController,
    reply: String,
}

#[async_trait]
impl Agent for InterruptingAgent {
    async fn get_action(&mut self, _observation: &str) -> anyhow::Result<String> {
        self.interrupts.trigger();
        Ok(self.reply.clone())
    }
}

/// 安装时触发中断并且永远不就绪
struct StallingInfra {
    interrupts: InterruptController,
}

#[async_trait]
impl SharedInfrastructure for StallingInfra {
    fn name(&self) -> &str {
        "stalling"
    }

    async fn ensure(&self, _cluster: &Cluster) -> Result<(), OrchestratorError> {
        self.interrupts.trigger();
        futures_util::future::pending::<()>().await;
        Ok(())
    }

    async fn teardown(&self, _cluster: &Cluster) -> Result<(), OrchestratorError> {
        Ok(())
    }

    fn teardown_on_cleanup(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn test_interrupt_before_init_never_deploys() {
    let interrupts = InterruptController::new();
    let h = Harness::new(SpyScenario::default(), runner());
    let mut orchestrator = h.orchestrator.with_interrupts(interrupts.clone());
    orchestrator.register_agent(Box::new(ScriptedAgent::new(["submit(\"Yes\")"])), "scripted");

    interrupts.trigger();
    let err = orchestrator.init_problem(PROBLEM).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Interrupted));
    assert_eq!(h.scenario.injected(), 0);
    assert!(h.runner.commands().is_empty());
    assert!(orchestrator.cleanup_registry().is_empty());
}

#[tokio::test]
async fn test_interrupt_while_waiting_for_infrastructure() {
    let interrupts = InterruptController::new();
    let h = Harness::new(SpyScenario::default(), runner());
    let infra: Arc<dyn SharedInfrastructure> = Arc::new(StallingInfra {
        interrupts: interrupts.clone(),
    });
    let mut orchestrator = h
        .orchestrator
        .with_interrupts(interrupts.clone())
        .with_infrastructure(vec![infra]);
    orchestrator.register_agent(Box::new(ScriptedAgent::new(["submit(\"Yes\")"])), "scripted");

    let err = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        orchestrator.init_problem(PROBLEM),
    )
    .await
    .expect("init_problem returns once interrupted")
    .unwrap_err();

    assert!(matches!(err, OrchestratorError::Interrupted));
    assert_eq!(h.scenario.injected(), 0);
    assert_eq!(h.scenario.recovered(), 0);
    assert!(!h.runner.received("apply -Rf"));
}

#[tokio::test]
async fn test_interrupt_before_final_submission_is_reported() {
    let interrupts = InterruptController::new();
    let h = Harness::new(SpyScenario::default(), runner());
    let results_dir = h.results_dir.path().to_path_buf();
    let mut orchestrator = h.orchestrator.with_interrupts(interrupts.clone());
    orchestrator.register_agent(
        Box::new(InterruptingAgent {
            interrupts: interrupts.clone(),
            reply: "submit(\"Yes\")".to_string(),
        }),
        "impatient",
    );

    let err = orchestrator.run_problem(PROBLEM, Some(3)).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Interrupted));
    assert_eq!(h.scenario.injected(), 1);
    assert_eq!(h.scenario.recovered(), 1);
    assert!(orchestrator.cleanup_registry().is_empty());
    assert_eq!(orchestrator.phase(), Some(ProblemPhase::CleanedUp));
    let saved = std::fs::read_dir(&results_dir).unwrap().count();
    assert_eq!(saved, 1);
}

#[tokio::test]
async fn test_interrupt_during_last_step_is_reported() {
    let interrupts = InterruptController::new();
    let h = Harness::new(SpyScenario::default(), runner());
    let mut orchestrator = h.orchestrator.with_interrupts(interrupts.clone());
    orchestrator.register_agent(
        Box::new(InterruptingAgent {
            interrupts: interrupts.clone(),
            reply: "exec_shell(\"ls -l\")".to_string(),
        }),
        "impatient",
    );

    // 唯一一步用完后进入评估，中断不能被吞掉
    let err = orchestrator.run_problem(PROBLEM, Some(1)).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Interrupted));
    assert_eq!(h.scenario.recovered(), 1);
    let session = orchestrator.session().unwrap();
    assert_eq!(session.results()["success"], json!(false));
}
