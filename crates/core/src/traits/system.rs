use std::path::Path;

use async_trait::async_trait;

use crate::errors::FleetResult;

/// 本机空闲内存估计（MB）
pub trait MemoryProbe: Send + Sync {
    fn free_mb(&self) -> FleetResult<u64>;
}

/// 外部访问白名单；REGISTER 命令只触发这里，不在核心里操作防火墙
#[async_trait]
pub trait AllowList: Send + Sync {
    async fn allow(&self, address: &str) -> FleetResult<()>;
}

/// 自定义世界下载安装
#[async_trait]
pub trait WorldInstaller: Send + Sync {
    /// 下载归档、清理危险内容并合并到 `world_dir`
    async fn install(&self, url: &str, world_dir: &Path) -> FleetResult<()>;
}
