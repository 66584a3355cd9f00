//! 编排错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：可恢复的错误（解析、未知动作、参数、提交无效、分发失败）转为下一轮 Observation；
//! 生命周期错误（超时、中断、Agent 失败）终止本次运行，但只会在故障恢复之后才抛给调用方。

use thiserror::Error;

use crate::react::ParseError;
use crate::session::SessionError;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Agent 输出无法解析（可恢复，作为 Observation 返回给 Agent）
    #[error(transparent)]
    Parsing(#[from] ParseError),

    /// 调用了当前任务不支持的动作（可恢复）
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// 动作参数缺失或类型不符（可恢复）
    #[error("Invalid arguments for {action}: {reason}")]
    InvalidArguments { action: String, reason: String },

    /// 提交未通过评估（可恢复，Agent 可以继续尝试）
    #[error("Invalid submission: {0}")]
    SubmissionInvalid(String),

    /// 就绪/删除等有界轮询超时（致命）
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 集群命令执行失败
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// Agent 获取下一步动作失败（网络等）
    #[error("Agent error: {0}")]
    Agent(String),

    /// 外部中断（Ctrl+C）；在临界区内会被推迟到临界区结束后才抛出
    #[error("Interrupted by user")]
    Interrupted,

    #[error("Problem not found: {0}")]
    ProblemNotFound(String),

    /// 编排器状态机被以错误的顺序驱动
    #[error("Invalid lifecycle transition: {0}")]
    Lifecycle(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// 故障场景 / 评估等外部实现返回的其它错误
    #[error("{0}")]
    Other(String),
}

impl OrchestratorError {
    pub fn invalid_args(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// 外部实现（anyhow）错误转为 Other，保留完整的 context 链
    pub fn external(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 把错误文本作为下一轮 Observation 交给 Agent，循环继续
    Observe(String),
    /// 终止当前问题（恢复故障后再向上抛出）
    Abort,
}
