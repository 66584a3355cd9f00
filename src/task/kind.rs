//! 任务类型：检测 / 定位 / 根因分析 / 缓解
//!
//! 决定任务描述与指令文本、submit 的参数形式，以及耗时指标的键名（TTD/TTL/TTA/TTM）。

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::core::OrchestratorError;
use crate::tools::ActionRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Detection,
    Localization,
    Analysis,
    Mitigation,
}

const RESPONSE_FORMAT: &str = "You will respond with one of the above APIs as your next action.\n\
Please respond in the following format in a markdown code block:\n\
```\n<API_NAME>(<API_PARAM1>, <API_PARAM2> ...)\n```\n\
For instance, if you want to list files in current directory, your response must be exactly:\n\
```\nexec_shell(\"ls -l\")\n```\n";

const SINGLE_ACTION: &str = "Please respond with only a single API call (a.k.a., action) per turn \
without any additional words, labels, or prefixes.\n";

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Detection,
        TaskKind::Localization,
        TaskKind::Analysis,
        TaskKind::Mitigation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Detection => "detection",
            TaskKind::Localization => "localization",
            TaskKind::Analysis => "analysis",
            TaskKind::Mitigation => "mitigation",
        }
    }

    /// 结果中耗时指标的键
    pub fn time_key(self) -> &'static str {
        match self {
            TaskKind::Detection => "TTD",
            TaskKind::Localization => "TTL",
            TaskKind::Analysis => "TTA",
            TaskKind::Mitigation => "TTM",
        }
    }

    pub fn submit_doc(self) -> &'static str {
        match self {
            TaskKind::Detection => {
                "submit(has_anomaly: str) -> SubmissionStatus\n\
                 Submit if anomalies are detected to the orchestrator for evaluation.\n\
                 Args: has_anomaly (str): \"Yes\" if anomalies are detected, \"No\" otherwise."
            }
            TaskKind::Localization => {
                "submit(faulty_components: list[str]) -> SubmissionStatus\n\
                 Submit the detected faulty components to the orchestrator for evaluation.\n\
                 Args: faulty_components (list[str]): List of faulty components (i.e., service names)."
            }
            TaskKind::Analysis => {
                "submit(analysis: dict[str, str]) -> SubmissionStatus\n\
                 Submit the root cause analysis to the orchestrator for evaluation.\n\
                 Args: analysis (dict): keys 'system_level' and 'fault_type'."
            }
            TaskKind::Mitigation => {
                "submit() -> SubmissionStatus\n\
                 Submit once your mitigation is complete and ready for evaluation."
            }
        }
    }

    pub fn action_registry(self) -> ActionRegistry {
        ActionRegistry::standard(self.submit_doc())
    }

    /// 任务描述（含应用摘要）
    pub fn description(self, app_summary: &str) -> String {
        match self {
            TaskKind::Detection => format!(
                "You are an expert DevOps engineer assigned to detect anomalies in a deployed service.\n\n\
                 Service Details:\n{app_summary}\n\n\
                 You will begin by analyzing the service's state and telemetry, and then submit your solution:\n\
                 1. str: \"Yes\" or \"No\" to indicate whether there are anomalies detected\n"
            ),
            TaskKind::Localization => format!(
                "You are an expert DevOps engineer assigned to localize faults in a deployed service.\n\n\
                 Service Details:\n{app_summary}\n\n\
                 You are requested to identify the service(s) where the root cause of the fault lies.\n\
                 You will begin by analyzing the service's state and telemetry, and then submit one of two possible solutions:\n\
                 1. list[str]: list of faulty components (i.e., service names)\n\
                 2. list[]: an empty list if no faults were detected\n"
            ),
            TaskKind::Analysis => format!(
                "You are an expert DevOps engineer assigned to do root cause analysis in a deployed service.\n\n\
                 Service Details:\n{app_summary}\n\n\
                 You will begin by analyzing the service's state and telemetry, and then submit one of two possible solutions:\n\
                 1. dict[str, str]: A dictionary with two keys: 'system_level' and 'fault_type'.\n\
                 \x20   - system_level: one of 'Hardware', 'Operating System', 'Virtualization', 'Application'\n\
                 \x20   - fault_type: one of 'Misconfiguration', 'Code Defect', 'Authentication Issue', \
                 'Network/Storage Issue', 'Operation Error', 'Dependency Problem'\n\
                 2. str: `None` if no faults were detected\n"
            ),
            TaskKind::Mitigation => format!(
                "You are an expert DevOps engineer assigned to mitigate anomalies in a deployed service.\n\n\
                 Service Details:\n{app_summary}\n\n\
                 You will begin by analyzing the service's state and telemetry, and then submit a solution \
                 that mitigates any detected anomalies.\n\
                 Your mitigation can be performed using any of the available APIs.\n"
            ),
        }
    }

    pub fn instructions(self) -> String {
        let submit = match self {
            TaskKind::Detection => {
                "If you decide that there are no anomalies:\n```\nsubmit(\"No\")\n```\n\
                 Or, if anomalies are found:\n```\nsubmit(\"Yes\")\n```\n"
            }
            TaskKind::Localization => {
                "If there are faulty components to submit:\n```\nsubmit([\"placeholderA\", \"placeholderB\"])\n```\n\
                 (where \"placeholderA\" and \"placeholderB\" are placeholders; replace them with the faulty components in your environment)\n\
                 Or, if no faults are found:\n```\nsubmit([])\n```\n"
            }
            TaskKind::Analysis => {
                "When submitting your analysis, use the following format:\n\
                 ```\nsubmit({\"system_level\": \"your_system_level_analysis\", \"fault_type\": \"your_fault_type_analysis\"})\n```\n\
                 Or, if no fault is detected, you should respond with:\n```\nsubmit()\n```\n"
            }
            TaskKind::Mitigation => {
                "Once your solution is complete and ready for evaluation, you must call:\n```\nsubmit()\n```\n\
                 Note:\n\
                 - The submit() call for the mitigation task does not take any parameters.\n\
                 - A submission via submit() is evaluated immediately; if the service is not yet healthy you may continue.\n"
            }
        };
        format!("{RESPONSE_FORMAT}{submit}{SINGLE_ACTION}")
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| OrchestratorError::Config(format!("unknown task kind: {s}")))
    }
}
