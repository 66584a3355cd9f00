//! 故障场景：注入、恢复、负载与期望答案
//!
//! 场景只负责把集群带入/带出故障状态并描述正确答案；任务类型（检测/定位/分析/缓解）
//! 在 Task 中与场景组合。

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use regex::Regex;

use crate::cluster::Cluster;

/// 场景的期望答案
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultProfile {
    /// 检测任务的期望回答（Yes / No）
    pub expected_anomaly: bool,
    /// 定位任务的期望组件
    pub faulty_components: Vec<String>,
    /// 分析任务的期望系统层级；None 表示没有故障
    pub system_level: Option<String>,
    pub fault_type: Option<String>,
}

/// start_workload 的结果：同步跑完，或交给后台任务（不等待）
pub enum Workload {
    None,
    Completed,
    Background(BoxFuture<'static, anyhow::Result<()>>),
}

impl Workload {
    /// 在后台执行一条负载命令
    pub fn command(cluster: &Cluster, command: impl Into<String>) -> Self {
        let cluster = cluster.clone();
        let command = command.into();
        Workload::Background(Box::pin(async move {
            let out = cluster.exec(&command).await?;
            if !out.success {
                anyhow::bail!("workload command failed: {}", out.stderr.trim());
            }
            Ok(())
        }))
    }
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Workload::None => write!(f, "Workload::None"),
            Workload::Completed => write!(f, "Workload::Completed"),
            Workload::Background(_) => write!(f, "Workload::Background(..)"),
        }
    }
}

#[async_trait]
pub trait FaultScenario: Send + Sync {
    fn name(&self) -> &str;

    /// 故障所在命名空间
    fn namespace(&self) -> &str;

    fn profile(&self) -> FaultProfile;

    /// 注入故障，返回被触碰资源的符号引用（service/x、namespace/y ...）
    async fn inject_fault(&self, cluster: &Cluster) -> anyhow::Result<Vec<String>>;

    async fn recover_fault(&self, cluster: &Cluster) -> anyhow::Result<()>;

    async fn start_workload(&self, _cluster: &Cluster) -> anyhow::Result<Workload> {
        Ok(Workload::None)
    }

    /// 本场景不允许 Agent 执行的命令模式
    fn forbidden_patterns(&self) -> Vec<Regex> {
        Vec::new()
    }

    /// 缓解任务中场景特有的检查（如端口是否已改回）
    async fn verify_mitigation(&self, _cluster: &Cluster) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// 追加在任务描述末尾的提示
    fn task_hint(&self) -> Option<String> {
        None
    }
}
