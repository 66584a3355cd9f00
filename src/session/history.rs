//! 轮次历史：角色 + 内容
//!
//! Session::add 接受单条 Turn、原始键值映射（JSON 对象）或二者的列表，统一归一化为 Turn；
//! 空输入（null、空对象、空列表、空字符串、false）直接忽略。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::SessionError;

/// 轮次角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    /// Agent 的输出
    Assistant,
    /// 环境（编排器）返回给 Agent 的 Observation
    Env,
}

/// 单条历史记录
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn env(content: impl Into<String>) -> Self {
        Self::new(Role::Env, content)
    }
}

/// Session::add 的输入形态
#[derive(Clone, Debug)]
pub enum TurnInput {
    Turn(Turn),
    Raw(Value),
    Many(Vec<TurnInput>),
}

impl From<Turn> for TurnInput {
    fn from(turn: Turn) -> Self {
        Self::Turn(turn)
    }
}

impl From<Value> for TurnInput {
    fn from(value: Value) -> Self {
        Self::Raw(value)
    }
}

impl From<Vec<Turn>> for TurnInput {
    fn from(turns: Vec<Turn>) -> Self {
        Self::Many(turns.into_iter().map(TurnInput::Turn).collect())
    }
}

impl From<Vec<Value>> for TurnInput {
    fn from(values: Vec<Value>) -> Self {
        Self::Many(values.into_iter().map(TurnInput::Raw).collect())
    }
}

impl From<Option<Turn>> for TurnInput {
    fn from(turn: Option<Turn>) -> Self {
        match turn {
            Some(t) => Self::Turn(t),
            None => Self::Raw(Value::Null),
        }
    }
}

impl TurnInput {
    /// 按原顺序展开为 Turn 列表；任一元素不合法则整体失败（不做部分写入）
    pub fn normalize(self) -> Result<Vec<Turn>, SessionError> {
        let mut out = Vec::new();
        self.normalize_into(&mut out)?;
        Ok(out)
    }

    fn normalize_into(self, out: &mut Vec<Turn>) -> Result<(), SessionError> {
        match self {
            TurnInput::Turn(turn) => out.push(turn),
            TurnInput::Many(items) => {
                for item in items {
                    item.normalize_into(out)?;
                }
            }
            TurnInput::Raw(value) => {
                if is_falsy(&value) {
                    return Ok(());
                }
                match value {
                    Value::Object(_) => {
                        let turn: Turn = serde_json::from_value(value)
                            .map_err(|e| SessionError::InvalidTurn(e.to_string()))?;
                        out.push(turn);
                    }
                    Value::Array(items) => {
                        for item in items {
                            TurnInput::Raw(item).normalize_into(out)?;
                        }
                    }
                    other => {
                        return Err(SessionError::InvalidTurn(format!(
                            "unsupported history item: {other}"
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}
