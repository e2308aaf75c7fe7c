//! 数据仓储层接口定义
//!
//! - `ServerRepository` - 服务器记录，按小写名称查找，元数据只做字段级更新
//! - `PresenceRepository` - 管理节点在线记录，按网络地址一行
//!
//! 存储层不提供乐观并发令牌，也不假定多文档事务。同一服务器名的单写者约束
//! 由调用方（任务串行器）保证，而不是由存储保证。

use async_trait::async_trait;

use crate::errors::FleetResult;
use crate::models::{ManagerPresence, MetadataUpdate, PresenceHeartbeat, ServerRecord};

/// 服务器记录仓储接口
#[async_trait]
pub trait ServerRepository: Send + Sync {
    /// 按名称查找（大小写不敏感）
    async fn find_by_name(&self, name: &str) -> FleetResult<Option<ServerRecord>>;

    /// 插入新记录；小写名称已存在时返回 false
    async fn insert(&self, record: &ServerRecord) -> FleetResult<bool>;

    /// 字段级 set/unset；记录不存在时返回 false
    async fn update_metadata(&self, name: &str, update: &MetadataUpdate) -> FleetResult<bool>;

    /// 重命名记录
    ///
    /// 源记录不存在返回 `UnknownServer`，目标名称已存在返回 `NameTaken`。
    async fn rename(&self, name: &str, target: &str) -> FleetResult<()>;

    /// 删除记录并返回被删除的内容
    async fn delete(&self, name: &str) -> FleetResult<Option<ServerRecord>>;

    /// 列出元数据中某个键存在且非空的记录
    async fn list_with_metadata_key(&self, key: &str) -> FleetResult<Vec<ServerRecord>>;

    async fn list_all(&self) -> FleetResult<Vec<ServerRecord>>;
}

/// 管理节点在线记录仓储接口
#[async_trait]
pub trait PresenceRepository: Send + Sync {
    /// 写入心跳；记录不存在时创建并默认接受新工作，返回是否为新建
    async fn upsert_heartbeat(&self, heartbeat: &PresenceHeartbeat) -> FleetResult<bool>;

    async fn set_accepting(&self, address: &str, accepting: bool) -> FleetResult<()>;

    async fn find(&self, address: &str) -> FleetResult<Option<ManagerPresence>>;

    async fn list(&self) -> FleetResult<Vec<ManagerPresence>>;

    async fn delete(&self, address: &str) -> FleetResult<()>;
}
