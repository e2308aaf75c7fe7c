//! 分布式命令分发
//!
//! 订阅本节点的请求频道和全局频道。每条消息立即交给独立任务处理，订阅循环
//! 不会被阻塞。会改变服务器状态的命令按服务器名经过 [`TaskSerializer`]，
//! 每个带关联ID的请求恰好得到一个响应。

use std::future::Future;
use std::sync::Arc;

use fleet_core::{
    traits::AllowList, validate_name, Command, CommandResponse, FleetError, FleetResult,
    ResponseCode,
};
use fleet_node::{FleetRegistry, GlobalAssetSync};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::task_serializer::TaskSerializer;

pub struct CommandDispatcher {
    registry: Arc<FleetRegistry>,
    assets: Arc<GlobalAssetSync>,
    allow_list: Arc<dyn AllowList>,
    serializer: TaskSerializer,
}

/// 把错误映射为响应码，意外错误额外记录日志
fn error_code(command: &str, name: &str, error: &FleetError) -> ResponseCode {
    if error.is_unexpected() || matches!(error, FleetError::ResourceExhausted { .. }) {
        error!("{} {} 失败: {}", command, name, error);
    } else {
        debug!("{} {} 被拒绝: {}", command, name, error);
    }
    ResponseCode::from_error(error)
}

fn found_or_unknown(found: bool, code: ResponseCode) -> ResponseCode {
    if found {
        code
    } else {
        ResponseCode::UnknownServer
    }
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<FleetRegistry>,
        assets: Arc<GlobalAssetSync>,
        allow_list: Arc<dyn AllowList>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            assets,
            allow_list,
            serializer: TaskSerializer::new(),
        })
    }

    pub fn serializer(&self) -> &TaskSerializer {
        &self.serializer
    }

    /// 本节点订阅的频道：请求频道和全局频道
    pub fn channels(&self) -> Vec<String> {
        let context = self.registry.context();
        vec![
            context.channels.request_channel(&context.identity.address),
            context.channels.global.clone(),
        ]
    }

    /// 订阅循环，收到关闭信号或订阅结束后返回
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> FleetResult<()> {
        let channels = self.channels();
        let mut subscription = self.registry.context().bus.subscribe(&channels).await?;
        info!("命令分发器已启动，监听频道: {:?}", channels);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("命令分发器收到关闭信号");
                    break;
                }
                message = subscription.recv() => {
                    let Some(message) = message else {
                        warn!("消息订阅已结束");
                        break;
                    };
                    debug!("收到消息 [{}]: {}", message.channel, message.payload);
                    let dispatcher = Arc::clone(&self);
                    tokio::spawn(async move {
                        dispatcher.handle_message(&message.payload).await;
                    });
                }
            }
        }
        Ok(())
    }

    /// 解码一条消息并处理；返回串行化任务的句柄（如果有）
    pub async fn handle_message(self: &Arc<Self>, payload: &str) -> Option<JoinHandle<()>> {
        match Command::parse(payload) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => {
                warn!("无法解码消息 \"{}\": {}", payload, e);
                if let Some(request_id) = e.request_id() {
                    self.respond(request_id, ResponseCode::UnknownError).await;
                }
                None
            }
        }
    }

    pub async fn dispatch(self: &Arc<Self>, command: Command) -> Option<JoinHandle<()>> {
        match command {
            Command::Start { request_id, name } => {
                let dispatcher = Arc::clone(self);
                let key = name.clone();
                let busy_id = request_id.clone();
                self.serializer
                    .submit(
                        &key,
                        dispatcher.answer(request_id, move |d| async move {
                            d.start(&name).await
                        }),
                        self.respond(&busy_id, ResponseCode::ServerAlreadyRunning),
                    )
                    .await
            }
            Command::Stop {
                request_id,
                name,
                force,
            } => {
                let dispatcher = Arc::clone(self);
                let key = name.clone();
                let busy_id = request_id.clone();
                self.serializer
                    .submit(
                        &key,
                        dispatcher.answer(request_id, move |d| async move {
                            d.stop(&name, force).await
                        }),
                        self.respond(&busy_id, ResponseCode::ServerStopped),
                    )
                    .await
            }
            Command::Delete { request_id, name } => self.delete(request_id, name, false).await,
            Command::DeleteData { request_id, name } => self.delete(request_id, name, true).await,
            Command::Restart { request_id, name } => {
                let dispatcher = Arc::clone(self);
                let key = name.clone();
                let busy_id = request_id.clone();
                self.serializer
                    .submit(
                        &key,
                        dispatcher.answer(request_id, move |d| async move {
                            d.restart(&name).await
                        }),
                        self.respond(&busy_id, ResponseCode::ServerNotRunning),
                    )
                    .await
            }
            Command::SetMetadata {
                request_id,
                name,
                key,
                value,
            } => {
                let code = match self.registry.alter_metadata(&name, &key, &value).await {
                    Ok(found) => found_or_unknown(found, ResponseCode::MetadataSet),
                    Err(e) => error_code("SET_METADATA", &name, &e),
                };
                self.respond(&request_id, code).await;
                None
            }
            Command::Console {
                request_id,
                name,
                command,
            } => {
                // 与旧客户端保持一致：成功时回复 METADATA_SET
                let code = match self.registry.console_command(&name, &command).await {
                    Ok(found) => found_or_unknown(found, ResponseCode::MetadataSet),
                    Err(e) => error_code("COMMAND", &name, &e),
                };
                self.respond(&request_id, code).await;
                None
            }
            Command::Create {
                request_id,
                name,
                server_type,
            } => {
                let dispatcher = Arc::clone(self);
                let key = name.clone();
                let busy_id = request_id.clone();
                self.serializer
                    .submit(
                        &key,
                        dispatcher.answer(request_id, move |d| async move {
                            d.create(&name, &server_type).await
                        }),
                        self.respond(&busy_id, ResponseCode::ServerNameTaken),
                    )
                    .await
            }
            Command::Rename {
                request_id,
                name,
                target,
            } => {
                let dispatcher = Arc::clone(self);
                let key = name.clone();
                let busy_id = request_id.clone();
                self.serializer
                    .submit(
                        &key,
                        dispatcher.answer(request_id, move |d| async move {
                            d.rename(&name, &target).await
                        }),
                        self.respond(&busy_id, ResponseCode::UnknownError),
                    )
                    .await
            }
            Command::NewGlobalFile => {
                match self.assets.refresh().await {
                    Ok(count) => info!("全局资源已更新，共 {} 个", count),
                    Err(e) => error!("更新全局资源失败: {}", e),
                }
                None
            }
            Command::Register { address } => {
                match self.allow_list.allow(&address).await {
                    Ok(()) => info!("已登记访问地址 {}", address),
                    Err(e) => error!("登记访问地址 {} 失败: {}", address, e),
                }
                None
            }
        }
    }

    async fn delete(
        self: &Arc<Self>,
        request_id: String,
        name: String,
        just_data: bool,
    ) -> Option<JoinHandle<()>> {
        let dispatcher = Arc::clone(self);
        let key = name.clone();
        let busy_id = request_id.clone();
        self.serializer
            .submit(
                &key,
                dispatcher.answer(request_id, move |d| async move {
                    match d.registry.delete_server(&name, just_data).await {
                        Ok(found) => found_or_unknown(found, ResponseCode::ServerRemoved),
                        Err(e) => error_code("DELETE", &name, &e),
                    }
                }),
                self.respond(&busy_id, ResponseCode::ServerAlreadyRunning),
            )
            .await
    }

    /// 在独立任务中执行操作并回复；操作 panic 时回复 UNKNOWN_ERROR
    async fn answer<F, Fut>(self: Arc<Self>, request_id: String, op: F)
    where
        F: FnOnce(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ResponseCode> + Send + 'static,
    {
        let code = match tokio::spawn(op(Arc::clone(&self))).await {
            Ok(code) => code,
            Err(e) => {
                error!("请求 {} 异常结束: {}", request_id, e);
                ResponseCode::UnknownError
            }
        };
        self.respond(&request_id, code).await;
    }

    async fn start(&self, name: &str) -> ResponseCode {
        if !self.registry.presence().is_accepting() {
            info!("本节点不接受新的服务器，拒绝启动 {}", name);
            return ResponseCode::MemoryLimitReached;
        }
        match self.registry.start_server(name).await {
            Ok(()) => ResponseCode::ServerStarting,
            Err(e) => error_code("START", name, &e),
        }
    }

    async fn stop(&self, name: &str, force: bool) -> ResponseCode {
        let stopped = if force {
            ResponseCode::ServerForceStopped
        } else {
            ResponseCode::ServerStopped
        };
        match self.registry.stop_server(name, force).await {
            Ok(found) => found_or_unknown(found, stopped),
            Err(e) => error_code("STOP", name, &e),
        }
    }

    async fn restart(&self, name: &str) -> ResponseCode {
        match self.registry.restart_server(name).await {
            Ok(found) => found_or_unknown(found, ResponseCode::ServerRestarting),
            Err(e) => error_code("RESTART", name, &e),
        }
    }

    async fn create(&self, name: &str, server_type: &str) -> ResponseCode {
        if !validate_name(name) {
            return ResponseCode::ServerNameInvalid;
        }
        match self.registry.create_server(name, server_type).await {
            Ok(true) => ResponseCode::ServerCreated,
            Ok(false) => ResponseCode::ServerNameTaken,
            Err(e) => error_code("CREATE", name, &e),
        }
    }

    async fn rename(&self, name: &str, target: &str) -> ResponseCode {
        if !validate_name(target) {
            return ResponseCode::ServerNameInvalid;
        }
        match self.registry.rename_server(name, target).await {
            Ok(true) => ResponseCode::ServerRenamed,
            Ok(false) => ResponseCode::ServerNameTaken,
            // 旧客户端只认识 UNKNOWN_ERROR
            Err(FleetError::AlreadyOnline { .. }) => ResponseCode::UnknownError,
            Err(e) => error_code("RENAME", name, &e),
        }
    }

    async fn respond(&self, request_id: &str, code: ResponseCode) {
        let context = self.registry.context();
        let response = CommandResponse::new(request_id, code);
        debug!("响应 {}", response.encode());
        if let Err(e) = context
            .bus
            .publish(&context.channels.response, &response.encode())
            .await
        {
            error!("发布响应 {} 失败: {}", response.encode(), e);
        }
    }
}
