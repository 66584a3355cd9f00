//! OpsArena 命令行入口
//!
//! `opsarena <problem_id> [max_steps]` 由人工通过标准输入扮演 Agent 求解一个问题；
//! `opsarena --list` 列出所有问题 id。

use std::path::PathBuf;

use anyhow::Context;
use opsarena::cluster::{infrastructure_from_config, AppCatalog, Cluster};
use opsarena::config::load_config;
use opsarena::core::{run_with_crash_recovery, CleanupRegistry, InterruptController, Orchestrator};
use opsarena::task::ProblemRegistry;
use opsarena::StdinAgent;

const USAGE: &str = "usage: opsarena <problem_id> [max_steps] | opsarena --list";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    opsarena::observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = std::env::var("OPSARENA_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let catalog = AppCatalog::load(&cfg.cluster.apps_dir).context("Failed to load app metadata")?;
    let problems = ProblemRegistry::with_builtin(catalog);

    let Some(first) = args.first() else {
        anyhow::bail!(USAGE);
    };
    if first == "--list" {
        for id in problems.problem_ids() {
            println!("{id}");
        }
        return Ok(());
    }
    let problem_id = first.clone();
    let max_steps = match args.get(1) {
        Some(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("invalid max_steps '{raw}'"))?,
        None => cfg.orchestrator.max_steps,
    };

    let cleanup = CleanupRegistry::new();
    let interrupts = InterruptController::new();
    interrupts.install_signal_listener();

    let cluster = Cluster::from_config(&cfg);
    let infrastructure = infrastructure_from_config(&cfg.infrastructure);
    let mut orchestrator = Orchestrator::new(cfg, cluster, problems)
        .with_cleanup_registry(cleanup.clone())
        .with_interrupts(interrupts)
        .with_infrastructure(infrastructure);
    orchestrator.register_agent(Box::new(StdinAgent::new()), "human");

    let outcome = run_with_crash_recovery(&cleanup, async {
        orchestrator.run_problem(&problem_id, Some(max_steps)).await
    })
    .await
    .with_context(|| format!("Problem {problem_id} failed"))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::Value::Object(outcome.results))?
    );
    if let Some(path) = outcome.artifact {
        tracing::info!("Session written to {}", path.display());
    }
    Ok(())
}
