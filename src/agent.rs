//! 被评测的 Agent
//!
//! 编排器只依赖 `Agent` trait：初始化时拿到任务描述、指令与可用动作，之后每轮把环境输出交给
//! `get_action` 并等待一段自由文本。ScriptedAgent 按顺序回放固定回复（演练与测试），
//! StdinAgent 从标准输入读取人工输入（供命令行使用）。

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::react::FENCE;

#[async_trait]
pub trait Agent: Send {
    async fn init_context(
        &mut self,
        _description: &str,
        _instructions: &str,
        _actions: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// 根据上一轮的环境输出给出下一步动作（自由文本）
    async fn get_action(&mut self, observation: &str) -> anyhow::Result<String>;
}

/// 依次返回预设回复；回复用尽后报错。收到的输入可通过 `observations()` 查看。
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    responses: VecDeque<String>,
    observations: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAgent {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            observations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 与 Agent 共享的输入记录（Agent 交给编排器后仍可读取）
    pub fn observations(&self) -> Arc<Mutex<Vec<String>>> {
        self.observations.clone()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn get_action(&mut self, observation: &str) -> anyhow::Result<String> {
        self.observations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(observation.to_string());
        self.responses
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted agent has no more responses"))
    }
}

/// 人工操作：打印环境输出，从 stdin 读取一行动作；以 ``` 开头时读到闭合围栏为止
pub struct StdinAgent {
    reader: BufReader<tokio::io::Stdin>,
}

impl Default for StdinAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl StdinAgent {
    pub fn new() -> Self {
        Self {
            reader: BufReader::new(tokio::io::stdin()),
        }
    }

    async fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

#[async_trait]
impl Agent for StdinAgent {
    async fn init_context(
        &mut self,
        description: &str,
        instructions: &str,
        actions: &BTreeMap<String, String>,
    ) -> anyhow::Result<()> {
        let mut text = format!("{description}\n\nAvailable actions:\n");
        for (name, doc) in actions {
            text.push_str(&format!("- {name}: {doc}\n"));
        }
        text.push('\n');
        text.push_str(instructions);
        let mut stdout = tokio::io::stdout();
        stdout.write_all(text.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }

    async fn get_action(&mut self, observation: &str) -> anyhow::Result<String> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("\n{observation}\n\n> ").as_bytes())
            .await?;
        stdout.flush().await?;

        let first = self
            .read_line()
            .await?
            .ok_or_else(|| anyhow::anyhow!("stdin closed"))?;
        if !first.trim_start().starts_with(FENCE) {
            return Ok(first);
        }
        let mut block = vec![first];
        while let Some(line) = self.read_line().await? {
            let closing = line.trim_start().starts_with(FENCE);
            block.push(line);
            if closing {
                break;
            }
        }
        Ok(block.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_agent_replays_and_records() {
        let mut agent = ScriptedAgent::new(["exec_shell(\"ls\")", "submit(\"Yes\")"]);
        let seen = agent.observations();
        assert_eq!(agent.get_action("start").await.unwrap(), "exec_shell(\"ls\")");
        assert_eq!(agent.get_action("file.txt").await.unwrap(), "submit(\"Yes\")");
        assert!(agent.get_action("again").await.is_err());
        assert_eq!(seen.lock().unwrap().len(), 3);
    }
}
