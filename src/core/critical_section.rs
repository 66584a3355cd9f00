//! 临界区：故障注入/恢复期间推迟外部中断（Ctrl+C）
//!
//! 中断只通过 InterruptController 的 CancellationToken 传播。临界区内收到的中断只记一个标记，
//! 最外层临界区退出时再触发，并以 `OrchestratorError::Interrupted` 报告一次；
//! 因此注入与恢复这两段转换不会被同一次中断撕裂。

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tokio_util::sync::CancellationToken;

use crate::core::OrchestratorError;

#[derive(Debug, Default)]
struct GuardState {
    /// 当前嵌套深度
    depth: usize,
    /// 临界区内收到、尚未触发的中断
    pending: bool,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<GuardState>,
    token: CancellationToken,
    listener_installed: AtomicBool,
    /// 创建控制器的线程；只有它会安装信号监听
    owner: ThreadId,
}

/// 进程中断的唯一入口
#[derive(Clone, Debug)]
pub struct InterruptController {
    inner: Arc<Inner>,
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(GuardState::default()),
                token: CancellationToken::new(),
                listener_installed: AtomicBool::new(false),
                owner: thread::current().id(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, GuardState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 中断 token（用于 select! 取消 Agent 等待）
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// 已触发中断时返回 Interrupted
    pub fn check(&self) -> Result<(), OrchestratorError> {
        if self.is_interrupted() {
            Err(OrchestratorError::Interrupted)
        } else {
            Ok(())
        }
    }

    pub fn is_guarded(&self) -> bool {
        self.state().depth > 0
    }

    pub fn has_pending(&self) -> bool {
        self.state().pending
    }

    /// 安装 Ctrl+C 监听；只在创建线程上、且只安装一次，返回本次是否安装
    pub fn install_signal_listener(&self) -> bool {
        if thread::current().id() != self.inner.owner {
            tracing::debug!("Not the primary context, skipping interrupt listener");
            return false;
        }
        if self.inner.listener_installed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                    break;
                }
                controller.trigger();
            }
        });
        true
    }

    /// 投递一次中断：临界区内只记标记，否则立即取消 token
    pub fn trigger(&self) {
        let mut state = self.state();
        if state.depth > 0 {
            if !state.pending {
                tracing::warn!("Interrupt received inside critical section, deferring until it ends");
            }
            state.pending = true;
            return;
        }
        drop(state);
        if self.inner.token.is_cancelled() {
            tracing::warn!("Interrupt already delivered, still shutting down");
        } else {
            tracing::info!("Received Ctrl+C, interrupting");
            self.inner.token.cancel();
        }
    }
}

/// 临界区守卫；正常路径用 `exit()` 结束，被 drop 时同样释放
#[must_use = "dropping the guard immediately ends the critical section"]
pub struct CriticalSection {
    controller: InterruptController,
    released: bool,
}

impl CriticalSection {
    pub fn enter(controller: &InterruptController) -> Self {
        controller.state().depth += 1;
        Self {
            controller: controller.clone(),
            released: false,
        }
    }

    /// 结束临界区；最外层且期间有中断时触发并返回 Interrupted
    pub fn exit(mut self) -> Result<(), OrchestratorError> {
        self.released = true;
        if self.release() {
            Err(OrchestratorError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// 在临界区内把 body 完整执行完；body 自身的错误优先于推迟的中断
    pub async fn run<F, T>(controller: &InterruptController, body: F) -> Result<T, OrchestratorError>
    where
        F: Future<Output = Result<T, OrchestratorError>>,
    {
        let section = Self::enter(controller);
        let out = body.await;
        let exited = section.exit();
        let value = out?;
        exited?;
        Ok(value)
    }

    fn release(&self) -> bool {
        let mut state = self.controller.state();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 && state.pending {
            state.pending = false;
            drop(state);
            tracing::warn!("Re-raising interrupt deferred by critical section");
            self.controller.inner.token.cancel();
            return true;
        }
        false
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if self.release() {
                tracing::warn!("Critical section dropped with a deferred interrupt");
            }
        }
    }
}
