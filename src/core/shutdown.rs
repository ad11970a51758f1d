//! 生命周期：进程关闭与会话中止
//!
//! ShutdownManager 持有进程级 CancellationToken 并监听 Ctrl+C / SIGTERM；每个会话的 AbortHandle 是其子 token，
//! 进程关闭会连带中止所有会话。ShutdownCoordinator 在退出前依次执行清理任务（如历史索引落盘）。

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::memory::HistoricalIndex;

/// 关闭原因
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    FatalError(String),
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::UserInitiated => write!(f, "user interrupt"),
            ShutdownReason::Signal => write!(f, "terminated by signal"),
            ShutdownReason::FatalError(e) => write!(f, "fatal error: {}", e),
        }
    }
}

/// 关闭信号管理器
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Arc<Mutex<Option<ShutdownReason>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发关闭；只记录第一次的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert(reason);
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().ok().and_then(|r| r.clone())
    }

    /// 为新会话创建中止句柄（进程关闭时一并取消）
    pub fn session_handle(&self) -> AbortHandle {
        AbortHandle {
            token: self.token.child_token(),
            reason: Arc::new(Mutex::new(None)),
            shutdown: Some(self.clone()),
        }
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, aborting running sessions...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, aborting running sessions...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

/// 会话中止句柄：abort(reason) 取消该会话正在进行的工具调用，循环随后以 Aborted(reason) 结束
#[derive(Clone, Default)]
pub struct AbortHandle {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
    shutdown: Option<ShutdownManager>,
}

impl AbortHandle {
    /// 独立句柄（不挂在进程关闭上）
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert_with(|| reason.into());
        }
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 中止原因；由进程关闭触发时取关闭原因
    pub fn reason(&self) -> Option<String> {
        if let Some(r) = self.reason.lock().ok().and_then(|r| r.clone()) {
            return Some(r);
        }
        if self.is_aborted() {
            return Some(
                self.shutdown
                    .as_ref()
                    .and_then(|s| s.reason())
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "aborted".to_string()),
            );
        }
        None
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：按注册顺序执行清理任务，每个任务受超时限制
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout_secs: u64,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cleanup_tasks: Vec::new(),
            timeout_secs: 5,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());
        let timeout = tokio::time::Duration::from_secs(self.timeout_secs);

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!("Cleanup task '{}' completed successfully", name),
                Ok(Err(e)) => tracing::warn!("Cleanup task '{}' failed: {}", name, e),
                Err(_) => tracing::warn!(
                    "Cleanup task '{}' timed out after {}s",
                    name,
                    self.timeout_secs
                ),
            }
        }
    }
}

/// 历史索引落盘
pub struct HistoricalIndexCleanup {
    index: Arc<HistoricalIndex>,
}

impl HistoricalIndexCleanup {
    pub fn new(index: Arc<HistoricalIndex>) -> Self {
        Self { index }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for HistoricalIndexCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.index.persist().await
    }

    fn name(&self) -> &'static str {
        "HistoricalIndex"
    }
}
