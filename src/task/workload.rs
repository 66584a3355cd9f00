//! wrk 负载：注入后向应用前端持续发请求，使故障在日志/指标中可见
//!
//! 命令由 [workload] 配置拼出；URL 取应用元数据的 Frontend URL 加上问题自己的路径。

use crate::cluster::{Application, Cluster};
use crate::config::WorkloadSection;
use crate::task::scenario::Workload;

#[derive(Debug, Clone)]
pub struct WrkWorkload {
    settings: WorkloadSection,
}

impl WrkWorkload {
    pub fn new(settings: WorkloadSection) -> Self {
        Self { settings }
    }

    pub fn command(&self, url: &str, script: Option<&str>) -> String {
        let s = &self.settings;
        let mut command = format!(
            "{} -D {} -t {} -c {} -d {}s -L",
            s.wrk_bin, s.dist, s.threads, s.connections, s.duration_secs
        );
        if let Some(script) = script {
            command.push_str(&format!(" -s {script}"));
        }
        command.push_str(&format!(" {} -R {}", url, s.rate));
        if s.latency {
            command.push_str(" --latency");
        }
        command
    }

    /// 应用没有前端地址或负载被关闭时返回 None
    pub fn command_for(&self, app: &Application, path: &str) -> Option<String> {
        if !self.settings.enabled {
            return None;
        }
        let frontend = app.metadata().frontend_url.as_deref()?;
        let url = format!("{}{}", frontend.trim_end_matches('/'), path);
        let script = app
            .metadata()
            .payload_script
            .as_ref()
            .map(|p| p.display().to_string());
        Some(self.command(&url, script.as_deref()))
    }

    pub fn start(cluster: &Cluster, command: &str) -> Workload {
        tracing::info!(command = %command, "Starting workload");
        Workload::command(cluster, command)
    }
}
