//! FaultGuard：注入后立即登记崩溃恢复钩子，保证 recover_fault 每个会话最多执行一次
//!
//! 正常路径由编排器调用 `recover()`（先恢复再注销）；进程提前结束时由
//! `run_with_crash_recovery` 执行仍在登记中的钩子。两条路径共享同一个 RecoveryLatch。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::Cluster;
use crate::core::shutdown::{CleanupRegistry, HookId, ShutdownCleanup};
use crate::task::scenario::FaultScenario;

/// 一次性闩：只有第一个 claim 的调用方执行恢复
#[derive(Debug, Clone, Default)]
pub struct RecoveryLatch(Arc<AtomicBool>);

impl RecoveryLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 首次调用返回 true
    pub fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct FaultRecoveryHook {
    name: String,
    scenario: Arc<dyn FaultScenario>,
    cluster: Cluster,
    latch: RecoveryLatch,
}

#[async_trait]
impl ShutdownCleanup for FaultRecoveryHook {
    async fn cleanup(&self) -> anyhow::Result<()> {
        if !self.latch.claim() {
            return Ok(());
        }
        tracing::warn!(scenario = %self.name, "Recovering fault from crash hook");
        self.scenario.recover_fault(&self.cluster).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct FaultGuard {
    registry: CleanupRegistry,
    hook_id: HookId,
    hook: Arc<FaultRecoveryHook>,
}

impl FaultGuard {
    pub fn arm(
        registry: &CleanupRegistry,
        scenario: Arc<dyn FaultScenario>,
        cluster: Cluster,
    ) -> Self {
        let hook = Arc::new(FaultRecoveryHook {
            name: format!("recover:{}", scenario.name()),
            scenario,
            cluster,
            latch: RecoveryLatch::new(),
        });
        let hook_id = registry.register(hook.clone());
        Self {
            registry: registry.clone(),
            hook_id,
            hook,
        }
    }

    /// 恢复故障后注销钩子；已恢复过（含钩子已执行）时返回 Ok(false)
    pub async fn recover(&self) -> anyhow::Result<bool> {
        if !self.hook.latch.claim() {
            self.registry.unregister(self.hook_id);
            return Ok(false);
        }
        let result = self.hook.scenario.recover_fault(&self.hook.cluster).await;
        self.registry.unregister(self.hook_id);
        result.map(|_| true)
    }

    pub fn is_recovered(&self) -> bool {
        self.hook.latch.is_claimed()
    }
}
