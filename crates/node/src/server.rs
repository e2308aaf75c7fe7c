//! 单台服务器的内存代表
//!
//! 持久化记录每次访问都重新读取，不做缓存。这里只保存本节点上的瞬时状态：
//! 端口、后端句柄、重启标记和启动看门狗。
//!
//! 状态流转：OFFLINE → STARTING →（隐含 ONLINE）→ STOPPING → OFFLINE。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use fleet_core::{
    metadata_keys,
    traits::{BackendListener, WorkloadBackend},
    FleetError, FleetResult, MetadataUpdate, ResourceProfile, ServerRecord, ServerSettings,
    ServerStatus, WorldType,
};
use fleet_infrastructure::world;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::NodeContext;

/// 启动前如何准备工作目录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provision {
    /// 从存档恢复或从模板初始化
    Full,
    /// 目录仍在本地，只覆盖模板
    TemplatesOnly,
}

#[derive(Default)]
struct ServerState {
    port: Option<u16>,
    backend: Option<Arc<dyn WorkloadBackend>>,
    watchdog: Option<CancellationToken>,
}

pub struct Server {
    name: String,
    context: Arc<NodeContext>,
    state: Mutex<ServerState>,
    restarting: AtomicBool,
    /// 删除流程中的强制停止不再上传存档
    discarded: AtomicBool,
    self_ref: Weak<Server>,
}

fn allocate_port() -> FleetResult<u16> {
    let listener = std::net::TcpListener::bind(("0.0.0.0", 0))?;
    Ok(listener.local_addr()?.port())
}

fn flag_enabled(record: &ServerRecord, key: &str) -> bool {
    record.get(key).unwrap_or("on") == "on"
}

impl Server {
    pub fn new(name: &str, context: Arc<NodeContext>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            name: name.to_string(),
            context,
            state: Mutex::new(ServerState::default()),
            restarting: AtomicBool::new(false),
            discarded: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn record(&self) -> FleetResult<ServerRecord> {
        self.context
            .find_record(&self.name)
            .await?
            .ok_or_else(|| FleetError::unknown_server(&self.name))
    }

    pub async fn persisted_status(&self) -> FleetResult<ServerStatus> {
        Ok(self.record().await?.status())
    }

    pub async fn port(&self) -> Option<u16> {
        self.state.lock().await.port
    }

    async fn backend(&self) -> Option<Arc<dyn WorkloadBackend>> {
        self.state.lock().await.backend.clone()
    }

    /// 持有后端句柄且后端在运行（或正在重启）
    pub async fn is_running(&self) -> bool {
        match self.backend().await {
            Some(backend) => self.restarting.load(Ordering::SeqCst) || backend.is_running(),
            None => false,
        }
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting.load(Ordering::SeqCst)
    }

    pub async fn start(&self) -> FleetResult<()> {
        self.launch(Provision::Full).await
    }

    async fn launch(&self, provision: Provision) -> FleetResult<()> {
        if self.state.lock().await.backend.is_some() {
            return Err(FleetError::already_online(&self.name));
        }

        let record = self.record().await?;
        self.discarded.store(false, Ordering::SeqCst);
        let server_type = record.get(metadata_keys::SERVER_TYPE).map(str::to_string);

        match provision {
            Provision::Full => {
                self.context
                    .workspace
                    .materialize(
                        &self.name,
                        server_type.as_deref(),
                        self.context.server_files.as_ref(),
                    )
                    .await?;
            }
            Provision::TemplatesOnly => self.reapply_templates(server_type).await?,
        }

        let port = allocate_port()?;
        let generator = self.prepare_world(&record).await?;
        let settings = self.build_settings(&record, port, generator)?;

        let backend = self.context.backends.create(&self.name)?;
        let listener: Weak<dyn BackendListener> = self.self_ref.clone();
        backend.set_listener(listener);

        {
            let mut state = self.state.lock().await;
            if state.backend.is_some() {
                return Err(FleetError::already_online(&self.name));
            }
            state.backend = Some(Arc::clone(&backend));
            state.port = Some(port);
        }

        info!(
            "启动服务器 {} (端口 {}, 内存 {} MB)",
            self.name, port, settings.memory_mb
        );
        if let Err(e) = backend.start(&settings).await {
            let mut state = self.state.lock().await;
            state.backend = None;
            state.port = None;
            return Err(e);
        }
        Ok(())
    }

    async fn reapply_templates(&self, server_type: Option<String>) -> FleetResult<()> {
        let dir = self.context.workspace.server_dir(&self.name)?;
        let workspace = self.context.workspace.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir)?;
            workspace.apply_templates(&dir, server_type.as_deref())
        })
        .await
        .map_err(|e| FleetError::Internal(format!("应用模板任务失败: {e}")))?
    }

    /// 根据 `wt` 准备世界，返回传给后端的生成器名
    async fn prepare_world(&self, record: &ServerRecord) -> FleetResult<String> {
        let Some(world_type) = record
            .get(metadata_keys::WORLD_TYPE)
            .and_then(WorldType::parse)
        else {
            return Ok(String::new());
        };

        match world_type {
            WorldType::Flat | WorldType::Normal => {}
            WorldType::Void => {
                let settings_file = self.context.workspace.settings_file(&self.name)?;
                let generator = self.context.workspace.void_generator().to_string();
                tokio::task::spawn_blocking(move || {
                    world::apply_void_generator(&settings_file, &generator)
                })
                .await
                .map_err(|e| FleetError::Internal(format!("写入世界设置任务失败: {e}")))??;
            }
            WorldType::Upload => {
                if let Some(url) = record.get(metadata_keys::WORLD_URL).filter(|u| !u.is_empty()) {
                    // 地址只使用一次
                    self.context
                        .write_metadata(
                            &self.name,
                            &MetadataUpdate::new().unset(metadata_keys::WORLD_URL),
                        )
                        .await?;

                    let world_dir = self.context.workspace.world_dir(&self.name)?;
                    if let Err(e) = self.context.world_installer.install(url, &world_dir).await {
                        warn!("安装自定义世界失败 ({}): {}", self.name, e);
                    }
                }
            }
        }

        Ok(world_type.generator().to_string())
    }

    fn build_settings(
        &self,
        record: &ServerRecord,
        port: u16,
        generator: String,
    ) -> FleetResult<ServerSettings> {
        let profile = ResourceProfile::from_metadata(&record.metadata, Utc::now());
        let dir = self.context.workspace.server_dir(&self.name)?;

        let mut settings = ServerSettings::new(&self.name, dir, port, profile.memory_mb);
        settings.max_players = profile.max_players;
        settings.allow_flight = flag_enabled(record, metadata_keys::ALLOW_FLIGHT);
        settings.command_blocks = flag_enabled(record, metadata_keys::COMMAND_BLOCKS);
        settings.generator = generator;
        Ok(settings)
    }

    /// 写入 STOPPING 后停止后端；后端失败时回滚为 ONLINE 并返回原错误
    pub async fn stop(&self, force: bool) -> FleetResult<()> {
        let backend = self
            .backend()
            .await
            .ok_or_else(|| FleetError::not_online(&self.name))?;

        self.set_status(ServerStatus::Stopping).await?;
        if let Err(e) = backend.stop(force).await {
            warn!("停止 {} 失败，状态回滚为 ONLINE: {}", self.name, e);
            if let Err(rollback) = self.set_status(ServerStatus::Online).await {
                error!("回滚 {} 的状态失败: {}", self.name, rollback);
            }
            return Err(e);
        }
        Ok(())
    }

    /// 删除流程使用：强制停止且不上传存档
    pub async fn discard_and_stop(&self) -> FleetResult<()> {
        self.discarded.store(true, Ordering::SeqCst);
        let result = self.stop(true).await;
        if result.is_err() {
            self.discarded.store(false, Ordering::SeqCst);
        }
        result
    }

    pub async fn restart(&self) -> FleetResult<()> {
        let backend = self
            .backend()
            .await
            .ok_or_else(|| FleetError::not_online(&self.name))?;
        backend.restart().await
    }

    pub async fn console_command(&self, command: &str) -> FleetResult<()> {
        let backend = self
            .backend()
            .await
            .ok_or_else(|| FleetError::not_online(&self.name))?;
        backend.console_command(command).await
    }

    /// 写入单个元数据键（空值表示删除）并广播
    pub async fn set_metadata(&self, key: &str, value: &str) -> FleetResult<()> {
        let updated = self
            .context
            .write_metadata(&self.name, &MetadataUpdate::assign(key, value))
            .await?;
        if !updated {
            return Err(FleetError::unknown_server(&self.name));
        }
        Ok(())
    }

    async fn set_status(&self, status: ServerStatus) -> FleetResult<()> {
        self.context
            .write_metadata(
                &self.name,
                &MetadataUpdate::new().set(metadata_keys::STATUS, status.as_str()),
            )
            .await?;
        Ok(())
    }

    async fn release_backend(&self) {
        let mut state = self.state.lock().await;
        state.backend = None;
        state.port = None;
        if let Some(token) = state.watchdog.take() {
            token.cancel();
        }
    }

    async fn autorestart_requested(&self) -> bool {
        match self.record().await {
            Ok(record) => record.get(metadata_keys::AUTO_RESTART) == Some("true"),
            Err(e) => {
                warn!("读取 {} 的 autorestart 失败: {}", self.name, e);
                false
            }
        }
    }

    /// 启动新的看门狗并取消上一个
    async fn start_watchdog(&self) {
        let Some(server) = self.self_ref.upgrade() else {
            return;
        };
        let token = CancellationToken::new();
        if let Some(previous) = self.state.lock().await.watchdog.replace(token.clone()) {
            previous.cancel();
        }
        tokio::spawn(async move { server.watch_startup(token).await });
    }

    async fn watch_startup(&self, token: CancellationToken) {
        let poll = self.context.timings.watchdog_poll;
        let limit = self.context.timings.startup_timeout;
        let began = Utc::now();
        info!("等待 {} 启动完成", self.name);

        loop {
            match self.persisted_status().await {
                Ok(ServerStatus::Starting) => {}
                Ok(status) => {
                    debug!("{} 的启动检查结束: {}", self.name, status);
                    return;
                }
                Err(FleetError::UnknownServer { .. }) => return,
                Err(e) => warn!("读取 {} 状态失败: {}", self.name, e),
            }

            let Some(backend) = self.backend().await else {
                return;
            };
            let last_activity = backend.last_activity().unwrap_or(began);
            let idle = (Utc::now() - last_activity).to_std().unwrap_or_default();
            if idle > limit {
                warn!("{} 在 {:?} 内没有活动，强制停止", self.name, limit);
                match backend.stop(true).await {
                    Ok(()) => info!("已强制停止 {}", self.name),
                    Err(e) => error!("强制停止 {} 失败: {}", self.name, e),
                }
                return;
            }

            tokio::select! {
                _ = token.cancelled() => {
                    debug!("{} 的看门狗已取消", self.name);
                    return;
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    async fn handle_start(&self) {
        let port = self.port().await.unwrap_or_default();
        let update = MetadataUpdate::new()
            .set(metadata_keys::STATUS, ServerStatus::Starting.as_str())
            .set(
                metadata_keys::SOURCE,
                self.context.identity.source_for(port),
            );
        if let Err(e) = self.context.write_metadata(&self.name, &update).await {
            error!("写入 {} 的启动状态失败: {}", self.name, e);
        }
        self.start_watchdog().await;
    }

    async fn handle_stop(&self) {
        if self.restarting.load(Ordering::SeqCst) {
            debug!("{} 重启中，重新应用模板", self.name);
            let server_type = self
                .record()
                .await
                .ok()
                .and_then(|r| r.get(metadata_keys::SERVER_TYPE).map(str::to_string));
            if let Err(e) = self.reapply_templates(server_type).await {
                error!("重启时应用模板失败 ({}): {}", self.name, e);
            }
            if let Err(e) = self.set_status(ServerStatus::Starting).await {
                error!("写入 {} 的状态失败: {}", self.name, e);
            }
            return;
        }

        let discarded = self.discarded.load(Ordering::SeqCst);
        if !discarded && self.autorestart_requested().await {
            info!("{} 已停止，按 autorestart 重新启动", self.name);
            self.release_backend().await;
            match self.launch(Provision::TemplatesOnly).await {
                Ok(()) => return,
                Err(e) => error!("自动重启 {} 失败: {}", self.name, e),
            }
        }

        if let Err(e) = self.set_status(ServerStatus::Stopping).await {
            warn!("写入 {} 的状态失败: {}", self.name, e);
        }

        if discarded {
            if let Err(e) = self.context.workspace.discard(&self.name).await {
                warn!("删除 {} 的工作目录失败: {}", self.name, e);
            }
        } else {
            match self
                .context
                .workspace
                .archive_and_upload(&self.name, self.context.server_files.as_ref())
                .await
            {
                Ok(true) => info!("{} 的存档上传完成", self.name),
                Ok(false) => warn!("{} 没有本地工作目录，跳过上传", self.name),
                Err(e) => error!("上传 {} 的存档失败: {}", self.name, e),
            }
        }

        // 无论上传是否成功都要回到 OFFLINE，保证之后可以再次启动
        let update = MetadataUpdate::new()
            .set(metadata_keys::STATUS, ServerStatus::Offline.as_str())
            .unset(metadata_keys::SOURCE);
        if let Err(e) = self.context.write_metadata(&self.name, &update).await {
            error!("写入 {} 的离线状态失败: {}", self.name, e);
        }
        self.release_backend().await;
        info!("{} 已离线", self.name);
    }
}

#[async_trait]
impl BackendListener for Server {
    async fn on_start(&self) {
        self.handle_start().await;
    }

    async fn on_stop(&self) {
        self.handle_stop().await;
    }

    async fn on_restart_begin(&self) {
        self.restarting.store(true, Ordering::SeqCst);
    }

    async fn on_restart_end(&self) {
        self.restarting.store(false, Ordering::SeqCst);
    }
}
