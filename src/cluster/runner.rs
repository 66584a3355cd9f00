//! 命令执行后端：本机 / kind 容器 / SSH 远端
//!
//! 所有集群命令都经由 CommandRunner::exec，带统一超时；返回 stdout/stderr/成功标记。

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::ClusterSection;
use crate::core::OrchestratorError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
        }
    }

    /// 返回给 Agent 的文本：成功取 stdout，失败取 stderr（为空时退回 stdout）
    pub fn text(&self) -> &str {
        if self.success || self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }

    /// 失败时转为 CommandFailed
    pub fn into_stdout(self, command: &str) -> Result<String, OrchestratorError> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(OrchestratorError::CommandFailed(format!(
                "`{}`: {}",
                command,
                self.stderr.trim()
            )))
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn exec(&self, command: &str) -> Result<CommandOutput, OrchestratorError>;

    /// 后端描述（用于日志）
    fn describe(&self) -> String;
}

async fn run_process(
    mut cmd: Command,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput, OrchestratorError> {
    cmd.kill_on_drop(true);
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            OrchestratorError::CommandFailed(format!(
                "Command timed out after {}s: {}",
                timeout.as_secs(),
                command
            ))
        })?
        .map_err(|e| OrchestratorError::CommandFailed(format!("Execution failed: {}", e)))?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        success: output.status.success(),
    })
}

/// 在本机 `sh -c` 执行
pub struct LocalRunner {
    timeout: Duration,
}

impl LocalRunner {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn exec(&self, command: &str) -> Result<CommandOutput, OrchestratorError> {
        tracing::debug!(command = %command, "local exec");
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        run_process(cmd, command, self.timeout).await
    }

    fn describe(&self) -> String {
        "localhost".to_string()
    }
}

/// 在 kind 控制平面容器内执行
pub struct KindRunner {
    container: String,
    timeout: Duration,
}

impl KindRunner {
    pub fn new(container: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            container: container.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl CommandRunner for KindRunner {
    async fn exec(&self, command: &str) -> Result<CommandOutput, OrchestratorError> {
        tracing::debug!(container = %self.container, command = %command, "kind exec");
        let mut cmd = Command::new("docker");
        cmd.args(["exec", self.container.as_str(), "sh", "-c", command]);
        run_process(cmd, command, self.timeout).await
    }

    fn describe(&self) -> String {
        format!("kind ({})", self.container)
    }
}

/// 通过 SSH 在远端主机执行
pub struct SshRunner {
    host: String,
    user: Option<String>,
    key_path: Option<PathBuf>,
    timeout: Duration,
}

impl SshRunner {
    pub fn new(
        host: impl Into<String>,
        user: Option<String>,
        key_path: Option<PathBuf>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            host: host.into(),
            user,
            key_path,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn exec(&self, command: &str) -> Result<CommandOutput, OrchestratorError> {
        tracing::debug!(host = %self.host, command = %command, "ssh exec");
        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes"]);
        if let Some(key) = &self.key_path {
            cmd.arg("-i").arg(key);
        }
        cmd.arg(self.destination()).arg(command);
        run_process(cmd, command, self.timeout).await
    }

    fn describe(&self) -> String {
        format!("ssh ({})", self.destination())
    }
}

/// 按 cluster.host 选择后端
pub fn runner_from_config(cfg: &ClusterSection, timeout_secs: u64) -> Arc<dyn CommandRunner> {
    match cfg.host.as_str() {
        "localhost" => {
            tracing::warn!("Cluster host is localhost, commands will run on this machine");
            Arc::new(LocalRunner::new(timeout_secs))
        }
        "kind" => Arc::new(KindRunner::new(cfg.kind_container.clone(), timeout_secs)),
        host => Arc::new(SshRunner::new(
            host,
            cfg.user.clone(),
            cfg.ssh_key_path.clone(),
            timeout_secs,
        )),
    }
}

/// 按子串匹配返回预设输出并记录收到的命令；未匹配时返回空的成功输出。
/// 用于离线演练与测试。
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, CommandOutput)>>,
    log: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 命令包含 pattern 时返回 output；先登记的规则优先
    pub fn respond(self, pattern: impl Into<String>, output: CommandOutput) -> Self {
        self.add_rule(pattern, output);
        self
    }

    pub fn add_rule(&self, pattern: impl Into<String>, output: CommandOutput) {
        self.rules
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((pattern.into(), output));
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn received(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn exec(&self, command: &str) -> Result<CommandOutput, OrchestratorError> {
        self.log
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(command.to_string());
        let rules = self.rules.lock().unwrap_or_else(|p| p.into_inner());
        Ok(rules
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
