//! 崩溃清理注册表
//!
//! 故障注入后登记一个恢复钩子；正常路径恢复后注销。进程在编排器之前结束（panic、提前返回）时，
//! `run_with_crash_recovery` 会把仍然登记着的钩子全部执行一遍，保证集群不会停留在故障状态。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;

/// 单个钩子的超时（秒）
const HOOK_TIMEOUT_SECS: u64 = 60;

/// 退出时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    hooks: Vec<(HookId, Arc<dyn ShutdownCleanup>)>,
}

/// 已登记的清理钩子；clone 共享同一份登记表
#[derive(Clone)]
pub struct CleanupRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl Default for CleanupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, hook: Arc<dyn ShutdownCleanup>) -> HookId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = HookId(inner.next_id);
        tracing::debug!(hook = hook.name(), "Registered cleanup hook");
        inner.hooks.push((id, hook));
        id
    }

    /// 注销；返回该钩子此前是否仍在登记中
    pub fn unregister(&self, id: HookId) -> bool {
        let mut inner = self.lock();
        let before = inner.hooks.len();
        inner.hooks.retain(|(hid, _)| *hid != id);
        inner.hooks.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().hooks.is_empty()
    }

    /// 取出并按登记的逆序执行所有钩子；返回执行的数量
    pub async fn run_cleanup(&self) -> usize {
        let hooks: Vec<_> = std::mem::take(&mut self.lock().hooks);
        if hooks.is_empty() {
            return 0;
        }
        tracing::info!("Running {} cleanup hooks...", hooks.len());

        let timeout = tokio::time::Duration::from_secs(HOOK_TIMEOUT_SECS);
        let count = hooks.len();
        for (_, hook) in hooks.into_iter().rev() {
            let name = hook.name().to_string();
            match tokio::time::timeout(timeout, hook.cleanup()).await {
                Ok(Ok(())) => tracing::info!("Cleanup hook '{}' completed", name),
                Ok(Err(e)) => tracing::error!("Cleanup hook '{}' failed: {:#}", name, e),
                Err(_) => tracing::error!(
                    "Cleanup hook '{}' timed out after {}s",
                    name,
                    HOOK_TIMEOUT_SECS
                ),
            }
        }
        count
    }
}

/// 运行主流程；结束（含 panic）后执行所有遗留的钩子，panic 会在清理后继续传播
pub async fn run_with_crash_recovery<Fut, T>(registry: &CleanupRegistry, app: Fut) -> T
where
    Fut: Future<Output = T>,
{
    let result = AssertUnwindSafe(app).catch_unwind().await;
    if !registry.is_empty() {
        tracing::warn!(
            "{} cleanup hooks still registered at exit, running them",
            registry.len()
        );
        registry.run_cleanup().await;
    }
    match result {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ShutdownCleanup for CountingHook {
        async fn cleanup(&self) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            "CountingHook"
        }
    }

    fn hook(calls: &Arc<AtomicUsize>) -> Arc<dyn ShutdownCleanup> {
        Arc::new(CountingHook {
            calls: calls.clone(),
        })
    }

    #[tokio::test]
    async fn test_unregistered_hook_not_run() {
        let registry = CleanupRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = registry.register(hook(&calls));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert_eq!(registry.run_cleanup().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_cleanup_drains() {
        let registry = CleanupRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(hook(&calls));
        registry.register(hook(&calls));
        assert_eq!(registry.run_cleanup().await, 2);
        assert_eq!(registry.run_cleanup().await, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_crash_recovery_runs_leftover_hooks() {
        let registry = CleanupRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = registry.clone();
        let leftover = hook(&calls);
        let out = run_with_crash_recovery(&registry, async move {
            inner.register(leftover);
            42
        })
        .await;
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_crash_recovery_on_panic() {
        let registry = CleanupRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = registry.clone();
        let leftover = hook(&calls);
        let task_registry = registry.clone();
        let handle = tokio::spawn(async move {
            run_with_crash_recovery(&task_registry, async move {
                inner.register(leftover);
                panic!("scenario exploded");
            })
            .await
        });
        assert!(handle.await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}
