use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fleet_core::{
    config::models::{AppConfig, NodeConfig},
    NodeIdentity,
};
use fleet_dispatcher::{CommandDispatcher, CrashRecoveryService, RecoveryService};
use fleet_infrastructure::{
    BlobBucket, DatabaseManager, HttpWorldInstaller, LoggingAllowList, MessageBusFactory,
    ProcMemoryProbe, ProcessBackendFactory, SqliteBlobStore, SqlitePresenceRepository,
    SqliteServerRepository,
};
use fleet_node::{
    FleetRegistry, FleetTimings, GlobalAssetSync, NodeContext, PresencePublisher, Workspace,
};
use tracing::{error, info, warn};

use crate::console::Console;
use crate::shutdown::{ShutdownManager, ShutdownReason};

const FALLBACK_ADDRESS: &str = "127.0.0.1";

/// 启动时的一次性选项（来自命令行）
#[derive(Debug, Clone, Copy, Default)]
pub struct StartupOptions {
    pub skip_downloads: bool,
    pub fix_names: bool,
}

/// 一个管理节点进程
pub struct Application {
    config: AppConfig,
    options: StartupOptions,
    database: DatabaseManager,
    context: Arc<NodeContext>,
    presence: Arc<PresencePublisher>,
    registry: Arc<FleetRegistry>,
    assets: Arc<GlobalAssetSync>,
    dispatcher: Arc<CommandDispatcher>,
}

impl Application {
    pub async fn new(config: AppConfig, options: StartupOptions) -> Result<Self> {
        let address = resolve_address(&config.node).await;
        info!("本节点地址: {}:{}", address, config.node.port);

        let database = DatabaseManager::new(&config.database)
            .await
            .with_context(|| format!("连接数据库失败: {}", config.database.url))?;
        database.migrate().await.context("初始化数据库表失败")?;
        let pool = database.pool().clone();

        let bus = MessageBusFactory::create(&config.message_bus)
            .await
            .context("创建消息总线失败")?;
        let world_installer =
            HttpWorldInstaller::new(&config.world).context("创建世界下载器失败")?;

        let context = Arc::new(NodeContext {
            identity: NodeIdentity::new(address, config.node.port),
            servers: Arc::new(SqliteServerRepository::new(pool.clone())),
            presence: Arc::new(SqlitePresenceRepository::new(pool.clone())),
            server_files: Arc::new(SqliteBlobStore::new(pool.clone(), BlobBucket::ServerFiles)),
            global_files: Arc::new(SqliteBlobStore::new(pool, BlobBucket::GlobalFiles)),
            bus,
            backends: Arc::new(ProcessBackendFactory::new(config.backend.clone())),
            memory: Arc::new(ProcMemoryProbe::new()),
            world_installer: Arc::new(world_installer),
            workspace: Workspace::new(
                config.paths.clone(),
                config.archive.clone(),
                config.world.clone(),
            ),
            channels: config.message_bus.channels.clone(),
            timings: FleetTimings::from(&config.fleet),
            admission_margin_mb: config.fleet.admission_margin_mb,
        });

        let presence = Arc::new(PresencePublisher::new(
            context.clone(),
            config.node.accept_on_startup,
        ));
        let registry = Arc::new(FleetRegistry::new(context.clone(), presence.clone()));
        let assets = Arc::new(GlobalAssetSync::new(context.clone()));
        let dispatcher =
            CommandDispatcher::new(registry.clone(), assets.clone(), Arc::new(LoggingAllowList));

        Ok(Self {
            config,
            options,
            database,
            context,
            presence,
            registry,
            assets,
            dispatcher,
        })
    }

    /// 接收命令之前的准备：崩溃恢复、名称修复、全局资源同步
    async fn prepare(&self) -> Result<()> {
        let recovery = CrashRecoveryService::new(self.context.clone());
        let report = recovery
            .recover_node_state()
            .await
            .context("崩溃恢复失败")?;
        info!(
            "崩溃恢复完成: 清理 {} 条记录，补传 {} 个存档，耗时 {}ms",
            report.reconciled.len(),
            report.uploaded.len(),
            report.recovery_duration_ms
        );
        for e in &report.errors {
            warn!("崩溃恢复: {}", e);
        }

        if self.options.fix_names {
            let renamed = self
                .registry
                .repair_invalid_names()
                .await
                .context("修复服务器名称失败")?;
            info!("已修复 {} 个无效名称", renamed.len());
        }

        if self.options.skip_downloads {
            info!("跳过全局资源下载");
        } else {
            match self.assets.refresh().await {
                Ok(count) => info!("已同步 {} 个全局资源", count),
                Err(e) => warn!("同步全局资源失败: {}", e),
            }
        }

        if !self.presence.is_accepting() {
            warn!("本节点以不接受新服务器的模式启动");
        }
        Ok(())
    }

    /// 运行直到收到关闭信号，然后依次删除在线记录、关闭所有服务器
    pub async fn run(&self, shutdown: ShutdownManager) -> Result<()> {
        self.prepare().await?;

        let heartbeat = tokio::spawn(
            self.presence
                .clone()
                .run(shutdown.subscribe().await),
        );
        let mut commands = tokio::spawn(
            self.dispatcher
                .clone()
                .run(shutdown.subscribe().await),
        );

        let console = if self.config.node.console_enabled {
            let console = Console::new(
                self.registry.clone(),
                self.assets.clone(),
                self.dispatcher.clone(),
                shutdown.clone(),
                ".",
            );
            Some(tokio::spawn(console.run(shutdown.subscribe().await)))
        } else {
            None
        };

        info!("节点已启动");

        let mut shutdown_rx = shutdown.subscribe().await;
        tokio::select! {
            _ = shutdown_rx.recv() => {}
            result = &mut commands => {
                match result {
                    Ok(Ok(())) => warn!("命令分发循环提前结束"),
                    Ok(Err(e)) => error!("命令分发循环失败: {}", e),
                    Err(e) => error!("命令分发任务异常: {}", e),
                }
                shutdown.trigger(ShutdownReason::Fault).await;
            }
        }

        if let Err(e) = heartbeat.await {
            warn!("心跳任务异常结束: {}", e);
        }
        if !commands.is_finished() {
            commands.abort();
        }
        if let Some(console) = console {
            console.abort();
        }

        self.drain().await;
        Ok(())
    }

    async fn drain(&self) {
        if let Err(e) = self.presence.remove().await {
            warn!("删除在线记录失败: {}", e);
        }

        let limit = Duration::from_secs(self.config.fleet.shutdown_timeout_seconds);
        match tokio::time::timeout(limit, self.registry.turn_off_all()).await {
            Ok(count) => info!("已关闭 {} 台服务器", count),
            Err(_) => warn!("关闭服务器超过 {:?}，放弃等待", limit),
        }

        self.database.close().await;
    }
}

/// 配置中没有地址时通过外部服务查询公网地址，失败退回本机地址
async fn resolve_address(config: &NodeConfig) -> String {
    if let Some(address) = &config.address {
        return address.trim().to_string();
    }

    let lookup = async {
        let body = reqwest::get(config.ip_lookup_url.as_str())
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok::<_, reqwest::Error>(body.trim().to_string())
    };

    match lookup.await {
        Ok(address) if !address.is_empty() => address,
        Ok(_) => {
            warn!("IP查询返回空内容，使用 {}", FALLBACK_ADDRESS);
            FALLBACK_ADDRESS.to_string()
        }
        Err(e) => {
            warn!("查询公网IP失败: {}，使用 {}", e, FALLBACK_ADDRESS);
            FALLBACK_ADDRESS.to_string()
        }
    }
}
