//! 节点级服务器索引
//!
//! 名称大小写不敏感。条目只在重命名和删除时移除。停止、重启、控制台命令和
//! 元数据修改只作用于本节点已加载的服务器，未加载时返回 `false`。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use fleet_core::{
    traits::archive_key, validate_name, FleetError, FleetResult, ResourceProfile, ServerRecord,
    ServerStatus, UpdateEvent,
};
use futures::future::join_all;
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::context::NodeContext;
use crate::presence::PresencePublisher;
use crate::server::Server;

/// 无效名称修复时使用的前缀
pub const REPAIR_NAME_PREFIX: &str = "リネーム-";

pub struct FleetRegistry {
    context: Arc<NodeContext>,
    presence: Arc<PresencePublisher>,
    servers: RwLock<HashMap<String, Arc<Server>>>,
}

impl FleetRegistry {
    pub fn new(context: Arc<NodeContext>, presence: Arc<PresencePublisher>) -> Self {
        Self {
            context,
            presence,
            servers: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.context
    }

    pub fn presence(&self) -> &Arc<PresencePublisher> {
        &self.presence
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Server>> {
        self.servers.read().await.get(&name.to_lowercase()).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<Server>> {
        self.servers.read().await.values().cloned().collect()
    }

    async fn refresh_presence(&self) {
        if let Err(e) = self.presence.heartbeat().await {
            warn!("刷新在线记录失败: {}", e);
        }
    }

    /// 名称已存在时返回 false
    pub async fn create_server(&self, name: &str, server_type: &str) -> FleetResult<bool> {
        if self.context.find_record(name).await?.is_some() {
            return Ok(false);
        }
        if !self
            .context
            .servers
            .insert(&ServerRecord::new(name, server_type))
            .await?
        {
            return Ok(false);
        }

        info!("已创建服务器 {} (类型 {})", name, server_type);
        self.context
            .announce(UpdateEvent::Updated(name.to_string()))
            .await;
        Ok(true)
    }

    /// 准入控制后启动
    ///
    /// 内存检查只是建议性的：两个并发检查可能同时通过，同名服务器的重复启动
    /// 由任务串行器阻止。
    pub async fn start_server(&self, name: &str) -> FleetResult<()> {
        let record = self
            .context
            .find_record(name)
            .await?
            .ok_or_else(|| FleetError::unknown_server(name))?;

        let (server, is_new) = match self.get(name).await {
            Some(server) => (server, false),
            None => (Server::new(&record.name, Arc::clone(&self.context)), true),
        };

        if record.status() != ServerStatus::Offline {
            return Err(FleetError::already_online(&record.name));
        }

        let profile = ResourceProfile::from_metadata(&record.metadata, Utc::now());
        let required = profile
            .memory_mb
            .saturating_add(self.context.admission_margin_mb);
        let available = self.context.free_memory_mb();
        if available < required {
            warn!(
                "内存不足，拒绝启动 {}: 需要 {} MB, 可用 {} MB",
                record.name, required, available
            );
            return Err(FleetError::ResourceExhausted {
                required,
                available,
            });
        }

        server.start().await?;
        self.refresh_presence().await;

        if is_new {
            self.servers
                .write()
                .await
                .entry(record.name_lower.clone())
                .or_insert(server);
        }
        Ok(())
    }

    pub async fn stop_server(&self, name: &str, force: bool) -> FleetResult<bool> {
        let Some(server) = self.get(name).await else {
            return Ok(false);
        };
        server.stop(force).await?;
        self.refresh_presence().await;
        Ok(true)
    }

    pub async fn restart_server(&self, name: &str) -> FleetResult<bool> {
        let Some(server) = self.get(name).await else {
            return Ok(false);
        };
        server.restart().await?;
        Ok(true)
    }

    pub async fn console_command(&self, name: &str, command: &str) -> FleetResult<bool> {
        let Some(server) = self.get(name).await else {
            return Ok(false);
        };
        server.console_command(command).await?;
        Ok(true)
    }

    pub async fn alter_metadata(&self, name: &str, key: &str, value: &str) -> FleetResult<bool> {
        let Some(server) = self.get(name).await else {
            return Ok(false);
        };
        server.set_metadata(key, value).await?;
        Ok(true)
    }

    /// 重命名记录和存档；目标名称已存在时返回 false
    ///
    /// 旧名称广播 DELETE，新名称广播 UPDATE，两条消息互相独立。
    pub async fn rename_server(&self, name: &str, target: &str) -> FleetResult<bool> {
        let record = self
            .context
            .find_record(name)
            .await?
            .ok_or_else(|| FleetError::unknown_server(name))?;

        let online = match self.get(name).await {
            Some(server) => server.is_running().await,
            None => record.status() != ServerStatus::Offline,
        };
        if online {
            return Err(FleetError::already_online(&record.name));
        }

        let case_only = record.name_lower == target.to_lowercase();
        if !case_only && self.context.find_record(target).await?.is_some() {
            return Ok(false);
        }

        match self.context.servers.rename(&record.name, target).await {
            Ok(()) => {}
            Err(FleetError::NameTaken { .. }) => return Ok(false),
            Err(e) => return Err(e),
        }

        match self
            .context
            .server_files
            .rename(&archive_key(&record.name), &archive_key(target))
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!("{} 没有存档，只重命名记录", record.name),
            Err(e) => {
                // 存档仍在旧名称下，记录也要改回去
                let rollback = self.context.servers.rename(target, &record.name).await;
                if let Err(rollback) = rollback {
                    error!(
                        "回滚 {} 的重命名失败: {}，记录停留在 {}",
                        record.name, rollback, target
                    );
                }
                return Err(e);
            }
        }

        self.servers.write().await.remove(&record.name_lower);
        info!("已将 {} 重命名为 {}", record.name, target);

        self.context
            .announce(UpdateEvent::Deleted(record.name.clone()))
            .await;
        self.context
            .announce(UpdateEvent::Updated(target.to_string()))
            .await;
        Ok(true)
    }

    /// 删除记录（或 `just_data` 时只删存档）；记录不存在时返回 false
    pub async fn delete_server(&self, name: &str, just_data: bool) -> FleetResult<bool> {
        let local = self.get(name).await;

        if local.is_none() {
            match self.context.find_record(name).await? {
                None => return Ok(false),
                Some(record) if record.status() != ServerStatus::Offline => {
                    return Err(FleetError::already_online(&record.name));
                }
                Some(_) => {}
            }
        }

        if let Some(server) = &local {
            if server.is_running().await {
                match server.discard_and_stop().await {
                    Ok(()) | Err(FleetError::NotOnline { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        let deleted = if just_data {
            self.context.find_record(name).await?
        } else {
            self.context.servers.delete(name).await?
        };
        let Some(deleted) = deleted else {
            return Ok(false);
        };

        self.context
            .server_files
            .delete(&archive_key(&deleted.name))
            .await?;
        if !just_data {
            self.servers.write().await.remove(&deleted.name_lower);
        }

        info!(
            "已删除 {}{}",
            deleted.name,
            if just_data { " 的数据" } else { "" }
        );
        self.context
            .announce(UpdateEvent::Deleted(deleted.name.clone()))
            .await;
        Ok(true)
    }

    /// 并发地正常停止所有运行中的服务器，返回尝试停止的数量
    pub async fn turn_off_all(&self) -> usize {
        let mut running = Vec::new();
        for server in self.list().await {
            if server.is_running().await {
                running.push(server);
            }
        }

        let count = running.len();
        let stops = running.into_iter().map(|server| async move {
            info!("正在关闭 {}", server.name());
            if let Err(e) = server.stop(false).await {
                error!("关闭 {} 失败: {}", server.name(), e);
            }
        });
        join_all(stops).await;
        count
    }

    /// 把名称不合法的记录重命名为 `リネーム-<随机数>`，返回 (旧名, 新名) 列表
    pub async fn repair_invalid_names(&self) -> FleetResult<Vec<(String, String)>> {
        let mut renamed = Vec::new();

        for record in self.context.servers.list_all().await? {
            if validate_name(&record.name) {
                continue;
            }
            warn!("无效的服务器名称: {}", record.name);

            let target = format!(
                "{}{}",
                REPAIR_NAME_PREFIX,
                rand::rng().random_range(0..99999)
            );
            match self.rename_server(&record.name, &target).await {
                Ok(true) => {
                    info!("已改名为 {}", target);
                    renamed.push((record.name, target));
                }
                Ok(false) => warn!("修复名称冲突，跳过 {}", record.name),
                Err(e) => warn!("修复 {} 的名称失败: {}", record.name, e),
            }
        }
        Ok(renamed)
    }
}
