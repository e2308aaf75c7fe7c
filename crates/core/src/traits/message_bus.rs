use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::FleetResult;

/// 从总线收到的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// 订阅句柄：发送端被丢弃即表示订阅结束
pub type BusSubscription = mpsc::UnboundedReceiver<BusMessage>;

/// 消息总线抽象接口
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// 发布文本消息到指定频道
    async fn publish(&self, channel: &str, payload: &str) -> FleetResult<()>;

    /// 订阅一组频道，消息按到达顺序投递到返回的接收端
    async fn subscribe(&self, channels: &[String]) -> FleetResult<BusSubscription>;
}
