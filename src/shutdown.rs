use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

/// 触发关闭的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 进程信号（Ctrl+C / SIGTERM）
    Signal,
    /// 控制台 `exit`
    ConsoleExit,
    /// 某个后台循环异常结束
    Fault,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ShutdownReason::Signal => "进程信号",
            ShutdownReason::ConsoleExit => "控制台 exit",
            ShutdownReason::Fault => "后台任务异常",
        };
        f.write_str(text)
    }
}

/// 节点关闭协调器
///
/// 心跳循环、命令分发循环和控制台都订阅同一个广播；
/// 第一次触发记录原因，之后的触发都是空操作。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    reason: Arc<RwLock<Option<ShutdownReason>>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_tx: Arc::new(RwLock::new(Some(shutdown_tx))),
            reason: Arc::new(RwLock::new(None)),
        }
    }

    /// 订阅关闭信号；已关闭时返回立即就绪的接收器
    pub async fn subscribe(&self) -> broadcast::Receiver<()> {
        let shutdown_tx = self.shutdown_tx.read().await;
        if let Some(ref tx) = *shutdown_tx {
            tx.subscribe()
        } else {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            rx
        }
    }

    /// 触发关闭，返回本次调用是否真正生效
    pub async fn trigger(&self, reason: ShutdownReason) -> bool {
        let mut current = self.reason.write().await;
        if let Some(previous) = *current {
            debug!("关闭已由 {} 触发，忽略 {}", previous, reason);
            return false;
        }

        info!("开始关闭节点，原因: {}", reason);
        *current = Some(reason);

        let mut shutdown_tx = self.shutdown_tx.write().await;
        if let Some(tx) = shutdown_tx.take() {
            debug!("通知 {} 个订阅者", tx.receiver_count());
            let _ = tx.send(());
        }
        true
    }

    pub async fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.read().await
    }

    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.subscribe().await;
        let _ = rx.recv().await;
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
