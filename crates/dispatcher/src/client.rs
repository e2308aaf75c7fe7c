//! 调用方使用的命令客户端
//!
//! 总线不保证投递，调用方必须自带超时：先订阅响应频道，再发布请求，
//! 只接受关联ID匹配的响应。

use std::sync::Arc;
use std::time::Duration;

use fleet_core::{
    config::models::ChannelConfig, traits::MessageBus, Command, CommandResponse, FleetError,
    FleetResult, ResponseCode,
};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct CommandClient {
    bus: Arc<dyn MessageBus>,
    channels: ChannelConfig,
    timeout: Duration,
}

impl CommandClient {
    pub fn new(bus: Arc<dyn MessageBus>, channels: ChannelConfig, timeout: Duration) -> Self {
        Self {
            bus,
            channels,
            timeout,
        }
    }

    /// 新的关联ID（不含空格）
    pub fn new_request_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// 向指定节点发送命令并等待响应
    ///
    /// `build` 接收新生成的关联ID并返回要发送的命令。
    pub async fn request<F>(&self, node_address: &str, build: F) -> FleetResult<ResponseCode>
    where
        F: FnOnce(String) -> Command,
    {
        let request_id = Self::new_request_id();
        let command = build(request_id.clone());
        if command.request_id() != Some(request_id.as_str()) {
            return Err(FleetError::Internal(format!(
                "命令 {} 没有使用生成的关联ID",
                command.verb()
            )));
        }

        let mut responses = self
            .bus
            .subscribe(std::slice::from_ref(&self.channels.response))
            .await?;
        let channel = self.channels.request_channel(node_address);
        debug!("发送 {} 到 {}", command.encode(), channel);
        self.bus.publish(&channel, &command.encode()).await?;

        let wait = async {
            while let Some(message) = responses.recv().await {
                match CommandResponse::parse(&message.payload) {
                    Some(response) if response.request_id == request_id => {
                        return Some(response.code)
                    }
                    Some(_) => {}
                    None => warn!("无法解析的响应: {}", message.payload),
                }
            }
            None
        };

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(Some(code)) => Ok(code),
            Ok(None) => Err(FleetError::MessageBus("响应订阅已结束".to_string())),
            Err(_) => Err(FleetError::MessageBus(format!(
                "等待 {} 的响应超时 ({:?})",
                request_id, self.timeout
            ))),
        }
    }
}
