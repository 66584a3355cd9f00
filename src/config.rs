//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `OPSARENA__*` 覆盖（双下划线表示嵌套，如 `OPSARENA__CLUSTER__HOST=kind`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub orchestrator: OrchestratorSection,
    pub cluster: ClusterSection,
    pub shell: ShellSection,
    pub evaluation: EvaluationSection,
    pub workload: WorkloadSection,
    /// 多个问题共享的基础设施（如监控栈）
    pub infrastructure: Vec<InfrastructureSection>,
}

/// [orchestrator] 段：步数预算、结果目录、会话打印
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_steps: usize,
    pub results_dir: PathBuf,
    /// 是否把每一轮 Agent/环境输出打印到日志
    pub print_session: bool,
    /// 单个动作（非 shell）的超时
    pub action_timeout_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_steps: 30,
            results_dir: PathBuf::from("results"),
            print_session: true,
            action_timeout_secs: 120,
        }
    }
}

/// [cluster] 段：命令执行后端与 kubectl 轮询参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// localhost / kind / 其它视为 SSH 主机名
    pub host: String,
    pub user: Option<String>,
    pub ssh_key_path: Option<PathBuf>,
    pub kind_container: String,
    pub kubectl: String,
    pub readiness_poll_secs: u64,
    pub readiness_max_wait_secs: u64,
    /// 应用元数据 JSON 所在目录
    pub apps_dir: PathBuf,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            user: None,
            ssh_key_path: None,
            kind_container: "kind-control-plane".to_string(),
            kubectl: "kubectl".to_string(),
            readiness_poll_secs: 2,
            readiness_max_wait_secs: 300,
            apps_dir: PathBuf::from("metadata"),
        }
    }
}

/// [shell] 段：Agent shell 命令的门禁
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    /// 以此开头的命令才做 mutable 检查
    pub cli_prefix: String,
    /// 出现即拒绝的子串（交互式编辑等）
    pub forbidden_substrings: Vec<String>,
    pub command_timeout_secs: u64,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            cli_prefix: "kubectl".to_string(),
            forbidden_substrings: vec!["kubectl edit".to_string(), "edit svc".to_string()],
            command_timeout_secs: 60,
        }
    }
}

/// [evaluation] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluationSection {
    /// 是否启用定性评估（QualitativeJudge）
    pub qualitative_eval: bool,
    pub mitigation_poll_secs: u64,
    pub mitigation_poll_rounds: u32,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            qualitative_eval: false,
            mitigation_poll_secs: 5,
            mitigation_poll_rounds: 12,
        }
    }
}

/// [workload] 段：注入后施加的 wrk 负载
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkloadSection {
    pub enabled: bool,
    /// 可换成在集群内执行 wrk 的包装命令
    pub wrk_bin: String,
    pub threads: u32,
    pub connections: u32,
    pub duration_secs: u64,
    /// 每秒请求数
    pub rate: u32,
    /// 请求间隔分布：exp / fixed / norm / zipf
    pub dist: String,
    pub latency: bool,
}

impl Default for WorkloadSection {
    fn default() -> Self {
        Self {
            enabled: true,
            wrk_bin: "wrk".to_string(),
            threads: 2,
            connections: 2,
            duration_secs: 10,
            rate: 10,
            dist: "exp".to_string(),
            latency: true,
        }
    }
}

/// [[infrastructure]] 项：一个共享组件
#[derive(Debug, Clone, Deserialize)]
pub struct InfrastructureSection {
    pub name: String,
    pub namespace: String,
    /// `kubectl apply -f` 的清单路径
    pub manifest: Option<PathBuf>,
    #[serde(default)]
    pub post_commands: Vec<String>,
    /// 问题结束后是否卸载
    #[serde(default)]
    pub teardown: bool,
}

pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, using defaults", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("OPSARENA")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
