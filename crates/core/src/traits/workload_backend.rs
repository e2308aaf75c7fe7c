//! 工作负载后端接口
//!
//! 后端负责真正运行一个游戏服务器（进程或容器）。生命周期事件通过
//! [`BackendListener`] 回调通知持有者；后端只持有监听者的弱引用。

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::FleetResult;
use crate::models::ServerSettings;

/// 后端生命周期回调
///
/// 回调在后端自己的任务中触发，实现方不得在回调里等待后端持有的锁。
#[async_trait]
pub trait BackendListener: Send + Sync {
    async fn on_start(&self);

    async fn on_stop(&self);

    async fn on_restart_begin(&self);

    async fn on_restart_end(&self);
}

/// 工作负载后端
#[async_trait]
pub trait WorkloadBackend: Send + Sync {
    fn set_listener(&self, listener: Weak<dyn BackendListener>);

    /// 按给定参数启动；已在运行时返回 `AlreadyOnline`
    async fn start(&self, settings: &ServerSettings) -> FleetResult<()>;

    /// 停止；未运行时返回 `NotOnline`
    async fn stop(&self, force: bool) -> FleetResult<()>;

    /// 由后端自行完成停止与重新拉起，期间触发 restart_begin/restart_end
    async fn restart(&self) -> FleetResult<()>;

    async fn console_command(&self, command: &str) -> FleetResult<()>;

    fn is_running(&self) -> bool;

    /// 最近一次观察到的活动时间
    fn last_activity(&self) -> Option<DateTime<Utc>>;
}

/// 后端工厂，每次冷启动创建一个新的后端句柄
pub trait BackendFactory: Send + Sync {
    fn create(&self, server_name: &str) -> FleetResult<Arc<dyn WorkloadBackend>>;
}
