//! 动作执行器
//!
//! 对每次动作调用施加超时，超时转为 CommandFailed；每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::OrchestratorError;
use crate::tools::actions::ActionContext;
use crate::tools::registry::ActionArgs;

pub struct ActionExecutor {
    context: ActionContext,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(context: ActionContext, timeout_secs: u64) -> Self {
        Self {
            context,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn context(&self) -> &ActionContext {
        &self.context
    }

    pub async fn execute(&self, args: &ActionArgs) -> Result<String, OrchestratorError> {
        let start = Instant::now();
        let action = args.kind().name();
        let result = timeout(self.timeout, self.context.perform(args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "action_audit",
            "action": action,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&args.preview()),
        });
        tracing::info!(audit = %audit.to_string(), "action");

        match result {
            Ok(inner) => inner,
            Err(_) => Err(OrchestratorError::CommandFailed(format!(
                "Action {} timed out after {}s",
                action,
                self.timeout.as_secs()
            ))),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
