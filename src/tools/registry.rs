//! 动作注册表
//!
//! Agent 可调用的动作是封闭集合 ActionKind；每个任务在构造时建一张 名称 -> 动作 的查找表，
//! 表中没有的名字一律是 InvalidAction。ActionArgs 负责位置/关键字参数绑定与类型读取。

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::core::OrchestratorError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    ExecShell,
    GetLogs,
    GetMetrics,
    ReadMetrics,
    GetTraces,
    ReadTraces,
    Submit,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::ExecShell,
        ActionKind::GetLogs,
        ActionKind::GetMetrics,
        ActionKind::ReadMetrics,
        ActionKind::GetTraces,
        ActionKind::ReadTraces,
        ActionKind::Submit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::ExecShell => "exec_shell",
            ActionKind::GetLogs => "get_logs",
            ActionKind::GetMetrics => "get_metrics",
            ActionKind::ReadMetrics => "read_metrics",
            ActionKind::GetTraces => "get_traces",
            ActionKind::ReadTraces => "read_traces",
            ActionKind::Submit => "submit",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// 参数名（按位置顺序）
    pub fn params(self) -> &'static [&'static str] {
        match self {
            ActionKind::ExecShell => &["command"],
            ActionKind::GetLogs => &["namespace", "service"],
            ActionKind::GetMetrics | ActionKind::GetTraces => &["namespace", "duration"],
            ActionKind::ReadMetrics | ActionKind::ReadTraces => &["file_path"],
            ActionKind::Submit => &["solution"],
        }
    }

    /// 给 Agent 看的说明（submit 的说明由任务类型提供）
    pub fn description(self) -> &'static str {
        match self {
            ActionKind::ExecShell => {
                "exec_shell(command: str) -> str\n\
                 Execute any shell command in a predefined debugging environment.\n\
                 Note: this is NOT A STATEFUL OR INTERACTIVE shell session. Interactive editors \
                 such as `kubectl edit` are not allowed; use `kubectl patch` instead.\n\
                 Args: command (str): The command to execute.\n\
                 Returns: str: The output of the command."
            }
            ActionKind::GetLogs => {
                "get_logs(namespace: str, service: str) -> str\n\
                 Collects relevant log data from a pod using kubectl.\n\
                 Args: namespace (str): The namespace in which the service is running. \
                 service (str): The name of the service.\n\
                 Returns: str: Log data as a string."
            }
            ActionKind::GetMetrics => {
                "get_metrics(namespace: str, duration: int = 5) -> str\n\
                 Collects metrics data of the last `duration` minutes and exports them to a local directory.\n\
                 Returns: str: Path to the directory where metrics are saved."
            }
            ActionKind::ReadMetrics => {
                "read_metrics(file_path: str) -> str\n\
                 Reads and returns metrics from a CSV file exported by get_metrics."
            }
            ActionKind::GetTraces => {
                "get_traces(namespace: str, duration: int = 5) -> str\n\
                 Collects trace data of the last `duration` minutes and exports them to a local directory.\n\
                 Returns: str: Path to the directory where traces are saved."
            }
            ActionKind::ReadTraces => {
                "read_traces(file_path: str) -> str\n\
                 Reads and returns traces from a CSV file exported by get_traces."
            }
            ActionKind::Submit => "submit(solution) -> SubmissionStatus\nSubmit your solution.",
        }
    }
}

/// 名称 -> (动作, 说明)
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, (ActionKind, String)>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取/shell 类动作加上带任务说明的 submit
    pub fn standard(submit_doc: impl Into<String>) -> Self {
        let mut registry = Self::new();
        for kind in ActionKind::ALL {
            if kind != ActionKind::Submit {
                registry.register(kind, kind.description());
            }
        }
        registry.register(ActionKind::Submit, submit_doc);
        registry
    }

    pub fn register(&mut self, kind: ActionKind, description: impl Into<String>) {
        self.actions
            .insert(kind.name().to_string(), (kind, description.into()));
    }

    pub fn resolve(&self, name: &str) -> Result<ActionKind, OrchestratorError> {
        self.actions
            .get(name)
            .map(|(kind, _)| *kind)
            .ok_or_else(|| OrchestratorError::InvalidAction(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    /// 供 Agent 的 available actions（名称 -> 说明）
    pub fn descriptions(&self) -> BTreeMap<String, String> {
        self.actions
            .iter()
            .map(|(name, (_, doc))| (name.clone(), doc.clone()))
            .collect()
    }
}

/// 已按动作参数表校验过的调用参数
#[derive(Debug, Clone, PartialEq)]
pub struct ActionArgs {
    kind: ActionKind,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
}

impl ActionArgs {
    /// 校验位置参数个数与关键字名称
    pub fn bind(
        kind: ActionKind,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Self, OrchestratorError> {
        let params = kind.params();
        if kind != ActionKind::Submit {
            if args.len() > params.len() {
                return Err(OrchestratorError::invalid_args(
                    kind.name(),
                    format!(
                        "takes at most {} positional argument(s) but {} were given",
                        params.len(),
                        args.len()
                    ),
                ));
            }
            if let Some(unknown) = kwargs.keys().find(|k| !params.contains(&k.as_str())) {
                return Err(OrchestratorError::invalid_args(
                    kind.name(),
                    format!("unexpected keyword argument '{unknown}'"),
                ));
            }
            for name in params.iter().take(args.len()) {
                if kwargs.contains_key(*name) {
                    return Err(OrchestratorError::invalid_args(
                        kind.name(),
                        format!("got multiple values for argument '{name}'"),
                    ));
                }
            }
        }
        Ok(Self { kind, args, kwargs })
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn positional(&self) -> &[Value] {
        &self.args
    }

    pub fn keywords(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    /// 按参数名取值（关键字优先，否则取对应位置）
    pub fn get(&self, name: &str) -> Option<&Value> {
        if let Some(v) = self.kwargs.get(name) {
            return Some(v);
        }
        let index = self.kind.params().iter().position(|p| *p == name)?;
        self.args.get(index)
    }

    pub fn str(&self, name: &str) -> Result<&str, OrchestratorError> {
        match self.get(name) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(OrchestratorError::invalid_args(
                self.kind.name(),
                format!("'{name}' must be a string, got {other}"),
            )),
            None => Err(OrchestratorError::invalid_args(
                self.kind.name(),
                format!("missing required argument '{name}'"),
            )),
        }
    }

    /// 整数参数；缺省时用 default，接受数字字符串
    pub fn u64_or(&self, name: &str, default: u64) -> Result<u64, OrchestratorError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Number(n)) => n.as_u64().ok_or_else(|| {
                OrchestratorError::invalid_args(
                    self.kind.name(),
                    format!("'{name}' must be a non-negative integer"),
                )
            }),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| {
                OrchestratorError::invalid_args(
                    self.kind.name(),
                    format!("'{name}' must be an integer, got '{s}'"),
                )
            }),
            Some(other) => Err(OrchestratorError::invalid_args(
                self.kind.name(),
                format!("'{name}' must be an integer, got {other}"),
            )),
        }
    }

    /// 审计日志用的参数预览
    pub fn preview(&self) -> Value {
        serde_json::json!({ "args": self.args, "kwargs": self.kwargs })
    }

    /// 提交的候选解：单个位置参数取其本身；只有一个关键字时取其值；
    /// 只有关键字时取整个映射；否则为位置参数列表
    pub fn solution(&self) -> Value {
        match (self.args.len(), self.kwargs.len()) {
            (1, 0) => self.args[0].clone(),
            (0, 1) => self.kwargs.values().next().cloned().unwrap_or(Value::Null),
            (0, n) if n > 1 => Value::Object(self.kwargs.clone()),
            (0, _) => Value::Null,
            _ => Value::Array(self.args.clone()),
        }
    }
}
