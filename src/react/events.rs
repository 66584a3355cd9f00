//! 编排过程事件：供调用方实时展示每一步的动作、观察与结果

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// 问题已初始化（故障已注入）
    ProblemStarted {
        problem_id: String,
        session_id: String,
    },
    /// 步数更新（当前第几步）
    StepUpdate { step: usize, max_steps: usize },
    /// Agent 给出的原始动作文本
    AgentAction { step: usize, text: String },
    /// 环境返回（预览，避免过长）
    Observation { step: usize, preview: String },
    /// 提交被评估为无效，循环继续
    SubmissionRejected { step: usize },
    /// 最终评估结果
    Evaluated { results: serde_json::Value },
    /// 故障已恢复
    FaultRecovered { problem_id: String },
    Error { text: String },
}

/// 预览截断长度（字符）
pub const PREVIEW_CHARS: usize = 200;

pub fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{head}...")
}
