//! Shell 门禁：Agent 的 shell 命令在分发前检查
//!
//! 所有命令都不允许包含全局禁止子串（交互式 `kubectl edit` 等）或任务禁止的模式；
//! 以 CLI 前缀开头、会修改资源的命令，其目标对象必须在本问题的可变集合中。
//! 静态无法确定目标（`-f`、`-l`、`--all` 等）时用服务端 dry run 求出受影响对象；dry run 本身失败则放行。

use std::sync::Arc;

use regex::Regex;

use crate::cluster::CommandRunner;
use crate::config::ShellSection;
use crate::session::{normalize_ref, MutableSet};

/// 修改类动词：目标可以静态提取
const STATIC_VERBS: &[&str] = &[
    "delete", "patch", "edit", "scale", "label", "annotate", "rollout", "set", "autoscale", "taint",
];

/// 只作用于节点、参数直接是节点名的动词（不支持 `-o name` 的 dry run）
const NODE_VERBS: &[&str] = &["drain", "cordon", "uncordon"];

/// 修改类动词：目标只能靠 dry run 求出
const DRY_RUN_VERBS: &[&str] = &["create", "apply", "replace", "run", "expose"];

/// 目标由文件/选择器决定的参数
const DYNAMIC_FLAGS: &[&str] = &[
    "-f", "--filename", "-l", "--selector", "--all", "-A", "--all-namespaces", "-k", "--kustomize",
    "-R", "--recursive", "--field-selector",
];

/// 带独立取值的参数（`--flag value` 形式时跳过 value）
const VALUE_FLAGS: &[&str] = &[
    "-n", "--namespace", "-p", "--patch", "--type", "--replicas", "-c", "--container", "-o",
    "--output", "--grace-period", "--timeout", "--field-manager", "--current-replicas",
    "--resource-version", "--cascade", "--min", "--max", "--cpu-percent", "--context",
    "--kubeconfig", "--patch-file", "--subresource", "-f", "--filename", "-l", "--selector",
    "--field-selector", "-k", "--kustomize",
];

const PERMISSION_DENIED: &str =
    "Permission Denied: You are not allowed to run this command because this is an immutable object.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// 拒绝原因（原样作为 Observation 返回）
    Reject(String),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// 单条 CLI 子命令的目标
#[derive(Debug, Clone, PartialEq, Eq)]
enum Targets {
    /// 不修改资源
    ReadOnly,
    /// 静态提取出的 kind/name
    Known(Vec<String>),
    /// 需要 dry run
    Dynamic,
    /// 无法确定目标，也无法靠 dry run 求出
    Unresolved,
}

pub struct ShellGuard {
    cli_prefix: String,
    forbidden_substrings: Vec<String>,
    runner: Arc<dyn CommandRunner>,
}

impl ShellGuard {
    pub fn new(settings: &ShellSection, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            cli_prefix: settings.cli_prefix.clone(),
            forbidden_substrings: settings.forbidden_substrings.clone(),
            runner,
        }
    }

    pub async fn check(
        &self,
        command: &str,
        mutables: &MutableSet,
        task_forbidden: &[Regex],
    ) -> Verdict {
        let lowered = command.to_lowercase();
        for forbidden in &self.forbidden_substrings {
            if lowered.contains(&forbidden.to_lowercase()) {
                if forbidden.contains("edit") {
                    return Verdict::Reject(
                        "Error: Cannot use `kubectl edit`. Use `kubectl patch` instead."
                            .to_string(),
                    );
                }
                return Verdict::Reject(format!(
                    "Error: Command contains forbidden pattern `{forbidden}`."
                ));
            }
        }
        for pattern in task_forbidden {
            if pattern.is_match(command) {
                return Verdict::Reject(format!(
                    "Error: This command is not allowed for this problem (matches `{}`). \
                     Find a more targeted fix.",
                    pattern.as_str()
                ));
            }
        }

        for segment in split_segments(command) {
            if segment.first().map(String::as_str) != Some(self.cli_prefix.as_str()) {
                continue;
            }
            let denied = match cli_targets(&segment[1..]) {
                Targets::ReadOnly => Vec::new(),
                Targets::Known(targets) => targets
                    .into_iter()
                    .filter(|t| !mutables.contains(t))
                    .collect(),
                Targets::Dynamic => self.dry_run_denied(&segment, mutables).await,
                Targets::Unresolved => {
                    tracing::warn!(command = %command, "Rejected mutation with unresolved targets");
                    return Verdict::Reject(format!(
                        "{} The targets of this command could not be determined; name the objects explicitly.",
                        PERMISSION_DENIED
                    ));
                }
            };
            if !denied.is_empty() {
                tracing::warn!(command = %command, denied = ?denied, "Rejected mutation of immutable objects");
                return Verdict::Reject(format!(
                    "{} Immutable targets: {}",
                    PERMISSION_DENIED,
                    denied.join(", ")
                ));
            }
        }
        Verdict::Allow
    }

    /// 服务端 dry run 列出受影响对象，返回不可变的那些；dry run 失败时放行
    async fn dry_run_denied(&self, segment: &[String], mutables: &MutableSet) -> Vec<String> {
        let dry_run = format!("{} --dry-run=server -o name", shell_join(segment));
        match self.runner.exec(&dry_run).await {
            Ok(out) if out.success => out
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(normalize_ref)
                .filter(|r| !mutables.contains(r))
                .collect(),
            Ok(out) => {
                tracing::debug!("dry run failed, letting command through: {}", out.stderr.trim());
                Vec::new()
            }
            Err(e) => {
                tracing::debug!("dry run errored, letting command through: {}", e);
                Vec::new()
            }
        }
    }
}

/// 分析 CLI 参数（不含前缀本身）
fn cli_targets(args: &[String]) -> Targets {
    let mut words = Vec::new();
    let mut iter = args.iter().peekable();
    let mut dynamic = false;
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }
        if arg.starts_with('-') && arg.len() > 1 {
            let flag = arg.split('=').next().unwrap_or(arg);
            if DYNAMIC_FLAGS.contains(&flag) {
                dynamic = true;
            }
            if !arg.contains('=') && VALUE_FLAGS.contains(&flag) {
                iter.next();
            }
            continue;
        }
        words.push(arg.as_str());
    }

    let Some((&verb, rest)) = words.split_first() else {
        return Targets::ReadOnly;
    };
    if NODE_VERBS.contains(&verb) {
        let nodes: Vec<String> = rest
            .iter()
            .map(|w| {
                if w.contains('/') {
                    normalize_ref(w)
                } else {
                    format!("node/{w}")
                }
            })
            .collect();
        return if dynamic || nodes.is_empty() {
            Targets::Unresolved
        } else {
            Targets::Known(nodes)
        };
    }
    if DRY_RUN_VERBS.contains(&verb) {
        return Targets::Dynamic;
    }
    if !STATIC_VERBS.contains(&verb) {
        return Targets::ReadOnly;
    }
    if dynamic {
        return Targets::Dynamic;
    }

    // rollout restart / set image 等带子命令
    let rest = if matches!(verb, "rollout" | "set") {
        match rest.split_first() {
            Some((&"status", _)) | Some((&"history", _)) => return Targets::ReadOnly,
            Some((_, tail)) => tail,
            None => return Targets::ReadOnly,
        }
    } else {
        rest
    };

    // label/annotate/set 的 key=value、key- 不是对象名
    let names: Vec<&str> = rest
        .iter()
        .copied()
        .filter(|w| !w.contains('=') && !(w.ends_with('-') && verb != "delete"))
        .collect();

    let Some((&first, others)) = names.split_first() else {
        return Targets::Dynamic;
    };
    if first.contains('/') {
        return Targets::Known(
            names
                .iter()
                .filter(|w| w.contains('/'))
                .map(|w| normalize_ref(w))
                .collect(),
        );
    }
    if first.contains(',') || others.is_empty() {
        return Targets::Dynamic;
    }
    Targets::Known(
        others
            .iter()
            .map(|name| normalize_ref(&format!("{first}/{name}")))
            .collect(),
    )
}

/// 按 `&&`、`||`、`;`、`|`、`&` 拆分为子命令，每个子命令是去引号后的词列表
pub fn split_segments(command: &str) -> Vec<Vec<String>> {
    let mut segments = Vec::new();
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = command.chars().peekable();

    fn end_word(words: &mut Vec<String>, current: &mut String, in_word: &mut bool) {
        if *in_word {
            words.push(std::mem::take(current));
            *in_word = false;
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '"' => {
                in_word = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' => {
                            if let Some(&next) = chars.peek() {
                                if matches!(next, '"' | '\\' | '$' | '`') {
                                    chars.next();
                                    current.push(next);
                                    continue;
                                }
                            }
                            current.push('\\');
                        }
                        other => current.push(other),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ';' | '|' | '&' | '\n' => {
                end_word(&mut words, &mut current, &mut in_word);
                if matches!(chars.peek(), Some(&n) if n == c && c != ';' && c != '\n') {
                    chars.next();
                }
                if !words.is_empty() {
                    segments.push(std::mem::take(&mut words));
                }
            }
            c if c.is_whitespace() => end_word(&mut words, &mut current, &mut in_word),
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    end_word(&mut words, &mut current, &mut in_word);
    if !words.is_empty() {
        segments.push(words);
    }
    segments
}

/// 重新拼成可交给 `sh -c` 的命令
fn shell_join(words: &[String]) -> String {
    words
        .iter()
        .map(|w| {
            if !w.is_empty()
                && w.chars()
                    .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
            {
                w.clone()
            } else {
                format!("'{}'", w.replace('\'', r"'\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
