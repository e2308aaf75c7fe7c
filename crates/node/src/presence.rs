use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use fleet_core::{FleetResult, PresenceHeartbeat};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::context::NodeContext;

/// 在线记录发布器：每个心跳周期刷新本节点的地址、端口和空闲内存
pub struct PresencePublisher {
    context: Arc<NodeContext>,
    accepting: AtomicBool,
    shutting_down: AtomicBool,
}

impl PresencePublisher {
    pub fn new(context: Arc<NodeContext>, accepting: bool) -> Self {
        Self {
            context,
            accepting: AtomicBool::new(accepting),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// 本节点是否接受新的启动请求
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// 发送一次心跳；关闭流程开始后不再写入
    pub async fn heartbeat(&self) -> FleetResult<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Ok(());
        }

        let identity = &self.context.identity;
        let heartbeat = PresenceHeartbeat {
            address: identity.address.clone(),
            port: identity.port,
            free_mb: self.context.free_memory_mb(),
            timestamp: Utc::now(),
        };

        let created = self.context.presence.upsert_heartbeat(&heartbeat).await?;
        if created {
            info!("首次心跳，已创建在线记录: {}", identity.address);
            // 新记录默认接受新工作，和本地标记不一致时以本地为准
            if !self.is_accepting() {
                self.context
                    .presence
                    .set_accepting(&identity.address, false)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn set_accepting(&self, accepting: bool) -> FleetResult<()> {
        self.accepting.store(accepting, Ordering::SeqCst);
        self.heartbeat().await?;
        self.context
            .presence
            .set_accepting(&self.context.identity.address, accepting)
            .await?;
        info!(
            "{}接受新的服务器",
            if accepting { "开始" } else { "停止" }
        );
        Ok(())
    }

    /// 停止心跳并删除在线记录
    pub async fn remove(&self) -> FleetResult<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.context
            .presence
            .delete(&self.context.identity.address)
            .await?;
        info!("已删除在线记录: {}", self.context.identity.address);
        Ok(())
    }

    /// 心跳循环，收到关闭信号后退出；单次失败只记录日志
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let interval = self.context.timings.heartbeat_interval;
        info!("心跳循环已启动，间隔 {:?}", interval);

        loop {
            if let Err(e) = self.heartbeat().await {
                warn!("更新在线记录失败: {}", e);
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("心跳循环收到关闭信号");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
