//! 遥测数据来源（可选）
//!
//! get_metrics / get_traces 把最近一段时间的数据导出到本地目录，read_* 读取导出的 CSV。
//! 环境没有配置遥测时，相关动作只返回提示文本。

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::OrchestratorError;

pub const TELEMETRY_NOT_CONFIGURED: &str = "Telemetry is not configured for this environment.";

#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// 导出最近 duration_mins 分钟的指标，返回导出目录
    async fn export_metrics(
        &self,
        namespace: &str,
        duration_mins: u64,
    ) -> Result<PathBuf, OrchestratorError>;

    async fn export_traces(
        &self,
        namespace: &str,
        duration_mins: u64,
    ) -> Result<PathBuf, OrchestratorError>;
}

/// 读取导出的 CSV 原文
pub fn read_csv(path: impl AsRef<Path>) -> Result<String, OrchestratorError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(OrchestratorError::CommandFailed(format!(
            "file {} not found",
            path.display()
        )));
    }
    Ok(std::fs::read_to_string(path)?)
}
