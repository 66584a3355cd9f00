//! 驱动方在故障注入后崩溃：遗留的恢复钩子在退出前执行且只执行一次

mod common;

use std::panic::AssertUnwindSafe;

use common::{Harness, SpyScenario, PROBLEM};
use futures_util::FutureExt;
use opsarena::cluster::ScriptedRunner;
use opsarena::core::run_with_crash_recovery;
use opsarena::ScriptedAgent;

#[tokio::test]
async fn test_panic_after_injection_runs_recovery_hook() {
    let h = Harness::new(SpyScenario::default(), ScriptedRunner::new());
    let cleanup = h.orchestrator.cleanup_registry().clone();
    let mut orchestrator = h.orchestrator;
    orchestrator.register_agent(Box::new(ScriptedAgent::new(["submit(\"Yes\")"])), "scripted");

    let crashed = AssertUnwindSafe(run_with_crash_recovery(&cleanup, async {
        orchestrator.init_problem(PROBLEM).await.unwrap();
        panic!("driver crashed after injection");
    }))
    .catch_unwind()
    .await;

    assert!(crashed.is_err());
    assert_eq!(h.scenario.injected(), 1);
    assert_eq!(h.scenario.recovered(), 1);
    assert!(cleanup.is_empty());
}

#[tokio::test]
async fn test_normal_exit_leaves_no_hooks() {
    let h = Harness::new(SpyScenario::default(), ScriptedRunner::new());
    let cleanup = h.orchestrator.cleanup_registry().clone();
    let mut orchestrator = h.orchestrator;
    orchestrator.register_agent(Box::new(ScriptedAgent::new(["submit(\"Yes\")"])), "scripted");

    let outcome = run_with_crash_recovery(&cleanup, orchestrator.run_problem(PROBLEM, Some(3)))
        .await
        .unwrap();

    assert!(outcome.results["success"].as_bool().unwrap());
    assert_eq!(h.scenario.recovered(), 1);
    assert!(cleanup.is_empty());
}
