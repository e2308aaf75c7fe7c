use std::sync::Arc;

use async_trait::async_trait;
use fleet_core::{
    traits::{BusMessage, BusSubscription, MessageBus},
    FleetResult,
};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

struct Subscriber {
    channels: Vec<String>,
    sender: mpsc::UnboundedSender<BusMessage>,
}

/// 进程内消息总线
///
/// 用于单节点部署和测试：所有发布的消息都会记录下来，便于断言。
#[derive(Clone, Default)]
pub struct InMemoryMessageBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    history: Arc<RwLock<Vec<BusMessage>>>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某个频道上已发布的全部消息
    pub async fn published(&self, channel: &str) -> Vec<String> {
        self.history
            .read()
            .await
            .iter()
            .filter(|m| m.channel == channel)
            .map(|m| m.payload.clone())
            .collect()
    }

    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, channel: &str, payload: &str) -> FleetResult<()> {
        let message = BusMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        self.history.write().await.push(message.clone());

        let mut subscribers = self.subscribers.write().await;
        subscribers.retain(|s| !s.sender.is_closed());
        for subscriber in subscribers.iter() {
            if subscriber.channels.iter().any(|c| c == channel) {
                let _ = subscriber.sender.send(message.clone());
            }
        }

        debug!("内存总线发布到 {}: {}", channel, payload);
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> FleetResult<BusSubscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.write().await.push(Subscriber {
            channels: channels.to_vec(),
            sender,
        });
        Ok(receiver)
    }
}
