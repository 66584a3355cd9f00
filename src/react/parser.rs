//! ResponseParser：把 Agent 的自由文本解析为结构化动作
//!
//! 取第一对代码围栏（按整行识别 ```，行内出现的 ``` 不算）中的内容；
//! 以已知 API 名 + `(` 开头的按调用解析参数，其余整体作为 exec_shell 的命令。
//! 围栏外的文字收集到 context，仅用于日志。

use std::collections::HashSet;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::react::literal::parse_call_arguments;

/// 代码围栏标记
pub const FENCE: &str = "```";
/// 不带括号时也视为提交的裸指令
const BARE_SUBMIT: &str = "submit";
/// 非 API 调用时使用的兜底动作
const SHELL_ACTION: &str = "exec_shell";

/// 解析失败：message 说明原因，fragment 为出错位置附近的原文
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Error parsing response: {message} (near `{fragment}`)")]
pub struct ParseError {
    pub message: String,
    pub fragment: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fragment: fragment.into(),
        }
    }
}

/// 一次 Agent 输出解析出的动作
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAction {
    pub api_name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    /// 围栏外的说明文字（按出现顺序，已 trim）
    pub context: Vec<String>,
}

/// 已知 API 名集合决定哪些 `name(...)` 会被当作调用解析
#[derive(Debug, Clone)]
pub struct ResponseParser {
    known_apis: HashSet<String>,
}

impl ResponseParser {
    pub fn new<I, S>(known_apis: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_apis: known_apis.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.known_apis.contains(name)
    }

    pub fn parse(&self, text: &str) -> Result<ParsedAction, ParseError> {
        let (code, context) = split_fenced(text);
        let code = code.trim();

        if code == BARE_SUBMIT {
            return Ok(ParsedAction {
                api_name: BARE_SUBMIT.to_string(),
                args: vec![Value::Null],
                kwargs: Map::new(),
                context,
            });
        }

        if let Some(open) = code.find('(') {
            let name = code[..open].trim();
            if self.is_known(name) {
                let close = code
                    .rfind(')')
                    .filter(|&close| close > open)
                    .ok_or_else(|| ParseError::new("missing closing parenthesis", code))?;
                let trailing = code[close + 1..].trim();
                if !trailing.is_empty() {
                    tracing::debug!(trailing = %trailing, "ignoring text after action call");
                }
                let (mut args, mut kwargs) = parse_call_arguments(&code[open + 1..close])?;
                splat_trailing_mapping(&mut args, &mut kwargs);
                return Ok(ParsedAction {
                    api_name: name.to_string(),
                    args,
                    kwargs,
                    context,
                });
            }
        }

        let command = code.trim_matches('`').trim();
        if command.is_empty() {
            return Err(ParseError::new("no action found in response", text.trim()));
        }
        Ok(ParsedAction {
            api_name: SHELL_ACTION.to_string(),
            args: vec![Value::String(command.to_string())],
            kwargs: Map::new(),
            context,
        })
    }
}

/// 多个位置参数且最后一个是字符串键字典时，按 `**mapping` 展开为关键字参数；
/// 单个字典参数（如 analysis 的提交）保持为位置参数
fn splat_trailing_mapping(args: &mut Vec<Value>, kwargs: &mut Map<String, Value>) {
    if args.len() < 2 || !kwargs.is_empty() {
        return;
    }
    if let Some(Value::Object(_)) = args.last() {
        if let Some(Value::Object(mapping)) = args.pop() {
            *kwargs = mapping;
        }
    }
}

fn is_fence_line(line: &str) -> bool {
    line.trim_start().starts_with(FENCE)
}

/// 拆出第一对围栏内的代码与围栏外的上下文；没有围栏时整段即代码
fn split_fenced(text: &str) -> (String, Vec<String>) {
    let mut lines = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        lines.push((offset, offset + line.len(), line));
        offset += line.len();
    }

    let Some(open_idx) = lines.iter().position(|(_, _, l)| is_fence_line(l)) else {
        return (text.trim().to_string(), Vec::new());
    };
    let (open_start, open_end, open_line) = lines[open_idx];

    // ```submit()``` 这种单行围栏
    let trimmed = open_line.trim();
    if trimmed.len() >= 2 * FENCE.len() && trimmed.ends_with(FENCE) {
        let inner = &trimmed[FENCE.len()..trimmed.len() - FENCE.len()];
        if !inner.trim().is_empty() {
            let context = collect_context(&[&text[..open_start], &text[open_end..]]);
            return (inner.trim().to_string(), context);
        }
    }

    let close = lines
        .iter()
        .skip(open_idx + 1)
        .find(|(_, _, l)| is_fence_line(l))
        .map(|&(start, end, _)| (start, end));

    match close {
        Some((close_start, close_end)) => {
            let body = &text[open_end..close_start];
            let context = collect_context(&[&text[..open_start], &text[close_end..]]);
            (body.to_string(), context)
        }
        None => {
            let body = &text[open_end..];
            let context = collect_context(&[&text[..open_start]]);
            (body.to_string(), context)
        }
    }
}

fn collect_context(parts: &[&str]) -> Vec<String> {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> ResponseParser {
        ResponseParser::new([
            "exec_shell",
            "get_logs",
            "get_metrics",
            "submit",
            "myApi",
            "f",
        ])
    }

    #[test]
    fn test_call_with_mixed_literals() {
        let input = "Let me check.\n```\nf(1, \"a\", [1,2], {\"k\": true})\n```\n";
        let parsed = parser().parse(input).unwrap();
        assert_eq!(parsed.api_name, "f");
        assert_eq!(parsed.args, vec![json!(1), json!("a"), json!([1, 2])]);
        assert_eq!(Value::Object(parsed.kwargs), json!({"k": true}));
        assert_eq!(parsed.context, vec!["Let me check.".to_string()]);
    }

    #[test]
    fn test_bare_submit() {
        let parsed = parser().parse("submit").unwrap();
        assert_eq!(parsed.api_name, "submit");
        assert_eq!(parsed.args, vec![Value::Null]);
    }

    #[test]
    fn test_unknown_command_goes_to_shell() {
        let parsed = parser().parse("  kubectl get pods -n test-ns  \n").unwrap();
        assert_eq!(parsed.api_name, "exec_shell");
        assert_eq!(parsed.args, vec![json!("kubectl get pods -n test-ns")]);

        let parsed = parser().parse("```\necho \"Hello World\"\n```").unwrap();
        assert_eq!(parsed.api_name, "exec_shell");
        assert_eq!(parsed.args, vec![json!("echo \"Hello World\"")]);
    }

    #[test]
    fn test_backticks_stripped() {
        let parsed = parser().parse("`ls -la`").unwrap();
        assert_eq!(parsed.args, vec![json!("ls -la")]);
    }

    #[test]
    fn test_no_args_and_kwargs() {
        let input = "\n        Action:\n        ```\n        myApi()\n        ```\n        ";
        let parsed = parser().parse(input).unwrap();
        assert_eq!(parsed.api_name, "myApi");
        assert!(parsed.args.is_empty());

        let parsed = parser()
            .parse("```\nsubmit(faulty_components=['s1', 's2', 's3'])\n```")
            .unwrap();
        assert!(parsed.args.is_empty());
        assert_eq!(
            parsed.kwargs.get("faulty_components"),
            Some(&json!(["s1", "s2", "s3"]))
        );
    }

    #[test]
    fn test_single_dict_stays_positional() {
        let parsed = parser()
            .parse("```\nsubmit({'system_level': 'xxx', 'fault_type': 'yyy'})\n```")
            .unwrap();
        assert_eq!(
            parsed.args,
            vec![json!({"system_level": "xxx", "fault_type": "yyy"})]
        );
        assert!(parsed.kwargs.is_empty());
    }

    #[test]
    fn test_nested_quotes_in_shell_argument() {
        let input = r#"
        Action:
        ```
        exec_shell("kubectl patch svc user-service -n test-social-network --type='json' -p='[{\"op\": \"replace\", \"path\": \"/spec/ports/0/targetPort\", \"value\": 9090}]'")
        ```
        "#;
        let parsed = parser().parse(input).unwrap();
        assert_eq!(parsed.api_name, "exec_shell");
        assert_eq!(
            parsed.args,
            vec![json!(
                r#"kubectl patch svc user-service -n test-social-network --type='json' -p='[{"op": "replace", "path": "/spec/ports/0/targetPort", "value": 9090}]'"#
            )]
        );
    }

    #[test]
    fn test_context_extraction() {
        let input = "\n        Thought: I need logs from `compose-post-service`.\n        \n        Action:\n        ```\n        get_logs('compose-post-service', 'test-social-network')\n        ```\n\n        This will help me understand the current state.\n        ";
        let parsed = parser().parse(input).unwrap();
        assert_eq!(parsed.api_name, "get_logs");
        assert_eq!(
            parsed.args,
            vec![json!("compose-post-service"), json!("test-social-network")]
        );
        assert_eq!(parsed.context.len(), 2);
        assert_eq!(
            parsed.context[0],
            "Thought: I need logs from `compose-post-service`.\n        \n        Action:"
        );
        assert_eq!(
            parsed.context[1],
            "This will help me understand the current state."
        );
    }

    #[test]
    fn test_only_first_fence_pair_used() {
        let input = "```\nget_logs('a', 'ns')\n```\nthen\n```\nsubmit('Yes')\n```";
        let parsed = parser().parse(input).unwrap();
        assert_eq!(parsed.api_name, "get_logs");
        assert_eq!(parsed.context[0], "then\n```\nsubmit('Yes')\n```");
    }

    #[test]
    fn test_inline_backticks_are_not_fences() {
        let input = "```bash\nexec_shell(\"echo '```' > /tmp/x\")\n```";
        let parsed = parser().parse(input).unwrap();
        assert_eq!(parsed.api_name, "exec_shell");
        assert_eq!(parsed.args, vec![json!("echo '```' > /tmp/x")]);
    }

    #[test]
    fn test_single_line_fence() {
        let parsed = parser().parse("```submit(\"Yes\")```").unwrap();
        assert_eq!(parsed.api_name, "submit");
        assert_eq!(parsed.args, vec![json!("Yes")]);
    }

    #[test]
    fn test_malformed_arguments() {
        let err = parser()
            .parse("```\nexec_shell(\"ls -l)\n```")
            .unwrap_err();
        assert!(err.message.contains("unterminated"));
        assert!(err.fragment.starts_with("\"ls -l"));

        let err = parser().parse("get_logs('a', os.system('x'))").unwrap_err();
        assert!(err.to_string().starts_with("Error parsing response"));
    }

    #[test]
    fn test_empty_response() {
        assert!(parser().parse("   ").is_err());
        assert!(parser().parse("```\n```").is_err());
    }

    #[test]
    fn test_deeply_nested_arguments_are_a_parse_error() {
        let input = format!("exec_shell({})", "[".repeat(20_000));
        let err = parser().parse(&input).unwrap_err();
        assert_eq!(err.message, "nesting too deep");
    }
}
