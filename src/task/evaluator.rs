//! 评估：各任务类型的正确性判定与通用指标
//!
//! 通用指标：steps（Agent 轮数）、in_tokens / out_tokens（环境输入与 Agent 输出的估算 token 数），
//! 开启定性评估时附加 QualitativeJudge 的 reasoning_score / reasoning_judgement。

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::cluster::{Cluster, PodInfo};
use crate::core::OrchestratorError;
use crate::session::{Role, Turn};
use crate::task::scenario::{FaultProfile, FaultScenario};

/// 异常的容器等待原因
const BAD_WAITING_REASONS: &[&str] = &["CrashLoopBackOff", "Error", "ImagePullBackOff", "ErrImagePull"];

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 英文约 4 字符/token，中文约 1.5 字符/token；空文本为 0
    pub fn estimate(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let mut ascii_chars = 0;
        let mut non_ascii_chars = 0;
        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }
        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }
}

pub fn common_metrics(history: &[Turn]) -> Map<String, Value> {
    let steps = history.iter().filter(|t| t.role == Role::Assistant).count();
    let agent_text: String = history
        .iter()
        .filter(|t| t.role == Role::Assistant)
        .map(|t| t.content.as_str())
        .collect();
    let env_text: String = history
        .iter()
        .filter(|t| t.role != Role::Assistant)
        .map(|t| t.content.as_str())
        .collect();

    let mut out = Map::new();
    out.insert("steps".to_string(), json!(steps));
    out.insert("in_tokens".to_string(), json!(TokenEstimator::estimate(&env_text)));
    out.insert("out_tokens".to_string(), json!(TokenEstimator::estimate(&agent_text)));
    out
}

/// 定性评估：给完整轨迹打 1-10 分
#[async_trait]
pub trait QualitativeJudge: Send + Sync {
    async fn judge(&self, trace: &str) -> anyhow::Result<String>;
}

pub fn format_trace(history: &[Turn]) -> String {
    history
        .iter()
        .map(|t| {
            let role = serde_json::to_value(t.role)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            format!("###{}:\n{}\n\n", role, t.content)
        })
        .collect()
}

/// 从评语中取 `[[x]]`（退而求其次 `[x]`）形式的分数；找不到为 -1
pub fn parse_score(judgement: &str) -> f64 {
    let patterns = [r"\[\[(\d+\.?\d*)\]\]", r"\[(\d+\.?\d*)\]"];
    for pattern in patterns {
        let Ok(re) = Regex::new(pattern) else {
            continue;
        };
        if let Some(score) = re
            .captures(judgement)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
        {
            return score;
        }
    }
    -1.0
}

pub async fn qualitative_metrics(
    judge: &dyn QualitativeJudge,
    history: &[Turn],
) -> Map<String, Value> {
    let mut out = Map::new();
    match judge.judge(&format_trace(history)).await {
        Ok(judgement) => {
            out.insert("reasoning_score".to_string(), json!(parse_score(&judgement)));
            out.insert("reasoning_judgement".to_string(), json!(judgement));
        }
        Err(e) => {
            tracing::warn!("Qualitative evaluation failed: {:#}", e);
            out.insert("reasoning_score".to_string(), json!(-1.0));
            out.insert(
                "reasoning_judgement".to_string(),
                json!(format!("evaluation failed: {e}")),
            );
        }
    }
    out
}

pub fn evaluate_detection(solution: &Value, profile: &FaultProfile) -> Map<String, Value> {
    let expected = if profile.expected_anomaly { "yes" } else { "no" };
    let accuracy = match solution {
        Value::String(s) if s.trim().to_lowercase() == expected => "Correct",
        Value::String(_) => "Incorrect",
        _ => "Invalid Format",
    };
    tracing::info!(solution = %solution, accuracy, "Detection evaluated");
    let mut out = Map::new();
    out.insert("Detection Accuracy".to_string(), json!(accuracy));
    out.insert("success".to_string(), json!(accuracy == "Correct"));
    out
}

pub fn evaluate_localization(solution: &Value, profile: &FaultProfile) -> Map<String, Value> {
    let predicted: Option<Vec<String>> = match solution {
        Value::String(s) => Some(vec![s.trim().to_string()]),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(|s| s.trim().to_string()))
            .collect(),
        _ => None,
    };

    let mut out = Map::new();
    let Some(predicted) = predicted else {
        tracing::info!(solution = %solution, "Localization solution has an invalid format");
        out.insert("Localization Accuracy".to_string(), json!(0.0));
        out.insert("success".to_string(), json!(false));
        out.insert("is_subset".to_string(), json!(false));
        return out;
    };

    let expected: BTreeSet<&str> = profile.faulty_components.iter().map(String::as_str).collect();
    let predicted_set: BTreeSet<&str> = predicted.iter().map(String::as_str).collect();
    let is_exact = predicted_set == expected;
    let is_subset = expected.is_subset(&predicted_set);
    let accuracy = if is_exact {
        100.0
    } else if is_subset {
        expected.len() as f64 / predicted_set.len() as f64 * 100.0
    } else {
        0.0
    };
    tracing::info!(solution = %solution, accuracy, "Localization evaluated");

    out.insert("Localization Accuracy".to_string(), json!(accuracy));
    out.insert(
        "success".to_string(),
        json!(is_exact || (is_subset && predicted_set.len() == 1)),
    );
    out.insert("is_subset".to_string(), json!(is_subset));
    out
}

fn eq_ignore_case(given: Option<&Value>, expected: &str) -> bool {
    given
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase() == expected.trim().to_lowercase())
        .unwrap_or(false)
}

pub fn evaluate_analysis(solution: &Value, profile: &FaultProfile) -> Map<String, Value> {
    let (system_ok, fault_ok) = match (&profile.system_level, &profile.fault_type) {
        (Some(level), Some(fault)) => match solution {
            Value::Object(map) => (
                eq_ignore_case(map.get("system_level"), level),
                eq_ignore_case(map.get("fault_type"), fault),
            ),
            _ => (false, false),
        },
        // 没有故障时期望 submit() / None
        _ => {
            let none = solution.is_null()
                || solution
                    .as_str()
                    .map(|s| s.trim().eq_ignore_ascii_case("none"))
                    .unwrap_or(false);
            (none, none)
        }
    };
    tracing::info!(solution = %solution, system_ok, fault_ok, "Analysis evaluated");

    let mut out = Map::new();
    out.insert("system_level_correct".to_string(), json!(system_ok));
    out.insert("fault_type_correct".to_string(), json!(fault_ok));
    out.insert("success".to_string(), json!(system_ok && fault_ok));
    out
}

/// 所有容器都就绪且没有异常等待/终止
pub fn pods_healthy(pods: &[PodInfo]) -> bool {
    pods.iter().filter(|p| p.phase != "Succeeded").all(|pod| {
        pod.containers.iter().all(|c| {
            if let Some(reason) = &c.waiting_reason {
                if BAD_WAITING_REASONS.contains(&reason.as_str()) {
                    tracing::info!(pod = %pod.name, container = %c.name, reason = %reason, "Container unhealthy");
                    return false;
                }
            }
            if let Some(reason) = &c.terminated_reason {
                if reason != "Completed" {
                    tracing::info!(pod = %pod.name, container = %c.name, reason = %reason, "Container terminated");
                    return false;
                }
            }
            c.ready
        })
    })
}

/// 轮询若干次，场景检查与 Pod 健康同时满足即成功
pub async fn evaluate_mitigation(
    cluster: &Cluster,
    scenario: &dyn FaultScenario,
    poll: Duration,
    rounds: u32,
) -> Result<Map<String, Value>, OrchestratorError> {
    let namespace = scenario.namespace();
    let mut success = false;
    for round in 0..rounds.max(1) {
        let scenario_ok = match scenario.verify_mitigation(cluster).await {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!("Mitigation check failed: {:#}", e);
                false
            }
        };
        if scenario_ok && pods_healthy(&cluster.client().list_pods(namespace).await?) {
            success = true;
            break;
        }
        if round + 1 < rounds {
            tokio::time::sleep(poll).await;
        }
    }
    tracing::info!(namespace = %namespace, success, "Mitigation evaluated");
    let mut out = Map::new();
    out.insert("success".to_string(), json!(success));
    Ok(out)
}
