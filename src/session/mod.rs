//! 会话：一次问题求解的完整记录
//!
//! 身份（UUID）、问题/Agent 标识、可变资源集合、轮次历史、起止时间与评估结果。
//! 只有编排器会修改 Session；Agent 通过编排器的返回值间接看到历史。

pub mod history;
pub mod mutables;
pub mod store;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub use history::{Role, Turn, TurnInput};
pub use mutables::{canonical_kind, normalize_ref, MutableSet};
pub use store::{to_epoch_secs, SessionArtifact};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("mutables are frozen once the agent loop has started")]
    MutablesFrozen,

    #[error("invalid history item: {0}")]
    InvalidTurn(String),
}

#[derive(Debug)]
pub struct Session {
    id: Uuid,
    problem_id: Option<String>,
    agent_name: Option<String>,
    solution: Option<Value>,
    mutables: MutableSet,
    history: Vec<Turn>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    results: Map<String, Value>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            problem_id: None,
            agent_name: None,
            solution: None,
            mutables: MutableSet::new(),
            history: Vec::new(),
            start_time: None,
            end_time: None,
            results: Map::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn problem_id(&self) -> Option<&str> {
        self.problem_id.as_deref()
    }

    pub fn agent_name(&self) -> Option<&str> {
        self.agent_name.as_deref()
    }

    pub fn set_problem(&mut self, problem_id: impl Into<String>) {
        self.problem_id = Some(problem_id.into());
    }

    pub fn set_agent(&mut self, name: impl Into<String>) {
        self.agent_name = Some(name.into());
    }

    pub fn solution(&self) -> Option<&Value> {
        self.solution.as_ref()
    }

    pub fn set_solution(&mut self, solution: Value) {
        self.solution = Some(solution);
    }

    pub fn mutables(&self) -> &MutableSet {
        &self.mutables
    }

    /// 并入故障注入返回的资源引用；freeze 之后返回 MutablesFrozen
    pub fn add_mutables<I, S>(&mut self, refs: I) -> Result<usize, SessionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mutables.extend(refs)
    }

    pub fn freeze_mutables(&mut self) {
        self.mutables.freeze();
    }

    /// 追加历史；空输入不产生任何记录
    pub fn add(&mut self, input: impl Into<TurnInput>) -> Result<(), SessionError> {
        let turns = input.into().normalize()?;
        self.history.extend(turns);
        Ok(())
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// 记录开始时间；重复调用保留第一次的值
    pub fn start(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Utc::now());
        }
    }

    pub fn end(&mut self) {
        self.end_at(Utc::now());
    }

    /// 以给定时刻结束（有效提交时使用提交时刻）；重复调用保留第一次的值
    pub fn end_at(&mut self, at: DateTime<Utc>) {
        if self.end_time.is_none() {
            self.end_time = Some(at);
        }
    }

    /// end - start（秒）；任一未设置时为 None
    pub fn duration(&self) -> Option<f64> {
        let (start, end) = (self.start_time?, self.end_time?);
        (end - start)
            .num_microseconds()
            .map(|us| us as f64 / 1_000_000.0)
    }

    /// 从开始到给定时刻的秒数（用于尚未结束时的试评估）
    pub fn elapsed_until(&self, at: DateTime<Utc>) -> Option<f64> {
        let start = self.start_time?;
        (at - start)
            .num_microseconds()
            .map(|us| us as f64 / 1_000_000.0)
    }

    pub fn results(&self) -> &Map<String, Value> {
        &self.results
    }

    pub fn set_results(&mut self, results: Map<String, Value>) {
        self.results = results;
    }

    pub fn set_result(&mut self, key: impl Into<String>, value: Value) {
        self.results.insert(key.into(), value);
    }

    pub fn to_artifact(&self) -> SessionArtifact {
        SessionArtifact {
            agent: self.agent_name.clone(),
            session_id: self.id.to_string(),
            problem_id: self.problem_id.clone(),
            start_time: self.start_time.map(to_epoch_secs),
            end_time: self.end_time.map(to_epoch_secs),
            mutables: self.mutables.joined(),
            trace: self.history.clone(),
            results: self.results.clone(),
        }
    }

    pub fn save(&self, dir: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
        self.to_artifact().save(dir)
    }
}
