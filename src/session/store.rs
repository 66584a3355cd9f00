//! 会话结果文件
//!
//! 每个问题一份 JSON：`<results_dir>/<session_id>_<start_time>.json`，
//! 时间为 Unix 纪元秒（浮点），mutables 为逗号拼接字符串。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::session::Turn;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionArtifact {
    pub agent: Option<String>,
    pub session_id: String,
    pub problem_id: Option<String>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub mutables: String,
    pub trace: Vec<Turn>,
    pub results: Map<String, Value>,
}

impl SessionArtifact {
    pub fn file_name(&self) -> String {
        let start = self
            .start_time
            .map(|t| t.to_string())
            .unwrap_or_else(|| "unstarted".to_string());
        format!("{}_{}.json", self.session_id, start)
    }

    /// 写入结果目录（不存在时创建），返回文件路径
    pub fn save(&self, dir: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn mutables_list(&self) -> Vec<String> {
        self.mutables
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub fn to_epoch_secs(t: DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}
