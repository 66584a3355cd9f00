//! OpsArena - 故障注入评测编排器
//!
//! 模块划分：
//! - **agent**: 被评测 Agent 的抽象（回放 / 标准输入）
//! - **cluster**: 命令执行后端、kubectl 资源客户端、引用展开、被测应用与共享基础设施
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、生命周期状态机、临界区、崩溃清理、错误与恢复
//! - **observability**: tracing 日志初始化
//! - **react**: Agent 输出解析与过程事件
//! - **session**: 会话历史、可变资源集合与结果持久化
//! - **task**: 故障场景、任务类型、评估与问题注册表
//! - **tools**: 动作注册表、shell 门禁与动作执行

pub mod agent;
pub mod cluster;
pub mod config;
pub mod core;
pub mod observability;
pub mod react;
pub mod session;
pub mod task;
pub mod tools;

pub use agent::{Agent, ScriptedAgent, StdinAgent};
pub use core::{Orchestrator, OrchestratorError, ProblemOutcome};
