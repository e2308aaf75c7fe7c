use std::sync::Arc;
use std::time::Duration;

use fleet_core::{
    config::models::{ChannelConfig, FleetConfig},
    traits::{
        BackendFactory, BlobStore, MemoryProbe, MessageBus, PresenceRepository, ServerRepository,
        WorldInstaller,
    },
    FleetResult, MetadataUpdate, NodeIdentity, ServerRecord, UpdateEvent,
};
use tracing::warn;

use crate::workspace::Workspace;

/// 节点级定时参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetTimings {
    pub heartbeat_interval: Duration,
    pub watchdog_poll: Duration,
    pub startup_timeout: Duration,
}

impl From<&FleetConfig> for FleetTimings {
    fn from(config: &FleetConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            watchdog_poll: Duration::from_secs(config.watchdog_poll_seconds),
            startup_timeout: Duration::from_secs(config.startup_timeout_seconds),
        }
    }
}

/// 一个管理节点上所有组件共享的协作方与参数
pub struct NodeContext {
    pub identity: NodeIdentity,
    pub servers: Arc<dyn ServerRepository>,
    pub presence: Arc<dyn PresenceRepository>,
    pub server_files: Arc<dyn BlobStore>,
    pub global_files: Arc<dyn BlobStore>,
    pub bus: Arc<dyn MessageBus>,
    pub backends: Arc<dyn BackendFactory>,
    pub memory: Arc<dyn MemoryProbe>,
    pub world_installer: Arc<dyn WorldInstaller>,
    pub workspace: Workspace,
    pub channels: ChannelConfig,
    pub timings: FleetTimings,
    /// 准入控制的安全余量，与内存上限分开保存
    pub admission_margin_mb: u64,
}

impl NodeContext {
    pub async fn find_record(&self, name: &str) -> FleetResult<Option<ServerRecord>> {
        self.servers.find_by_name(name).await
    }

    /// 字段级更新元数据并广播 UPDATE；记录不存在时返回 false 且不广播
    pub async fn write_metadata(&self, name: &str, update: &MetadataUpdate) -> FleetResult<bool> {
        let updated = self.servers.update_metadata(name, update).await?;
        if updated {
            self.announce(UpdateEvent::Updated(name.to_string())).await;
        }
        Ok(updated)
    }

    /// 广播失败只记录日志
    pub async fn announce(&self, event: UpdateEvent) {
        if let Err(e) = self.bus.publish(&self.channels.update, &event.encode()).await {
            warn!("广播变更失败 ({}): {}", event.encode(), e);
        }
    }

    /// 当前空闲内存估计，探测失败按 0 处理
    pub fn free_memory_mb(&self) -> u64 {
        self.memory.free_mb().unwrap_or_else(|e| {
            warn!("读取空闲内存失败: {}", e);
            0
        })
    }
}
