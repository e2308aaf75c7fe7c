use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{
    config::models::RedisConfig,
    traits::{BusMessage, BusSubscription, MessageBus},
    FleetError, FleetResult,
};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Redis 发布/订阅总线
///
/// 发布使用共享的 `ConnectionManager`；每次订阅占用一条独立的 pubsub 连接，
/// 连接断开后自动重新订阅，直到接收端被丢弃。
pub struct RedisMessageBus {
    client: Client,
    connection: ConnectionManager,
}

impl RedisMessageBus {
    pub async fn new(config: &RedisConfig) -> FleetResult<Self> {
        let client = Client::open(config.build_url()).map_err(|e| {
            FleetError::MessageBus(format!("Failed to create Redis client: {e}"))
        })?;

        let connection = tokio::time::timeout(
            Duration::from_secs(config.connection_timeout_seconds),
            ConnectionManager::new(client.clone()),
        )
        .await
        .map_err(|_| FleetError::MessageBus("连接Redis超时".to_string()))?
        .map_err(|e| FleetError::MessageBus(format!("连接Redis失败: {e}")))?;

        info!("已连接Redis消息总线 {}:{}", config.host, config.port);

        Ok(Self { client, connection })
    }

    async fn forward_messages(
        client: Client,
        channels: Vec<String>,
        sender: mpsc::UnboundedSender<BusMessage>,
    ) {
        while !sender.is_closed() {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    error!("建立Redis订阅连接失败: {}", e);
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    continue;
                }
            };

            let mut subscribed = true;
            for channel in &channels {
                if let Err(e) = pubsub.subscribe(channel).await {
                    error!("订阅频道 {} 失败: {}", channel, e);
                    subscribed = false;
                    break;
                }
            }
            if !subscribed {
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                continue;
            }
            debug!("已订阅频道: {:?}", channels);

            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("无法解码消息内容: {}", e);
                        continue;
                    }
                };
                let message = BusMessage {
                    channel: msg.get_channel_name().to_string(),
                    payload,
                };
                if sender.send(message).is_err() {
                    debug!("订阅接收端已关闭，停止转发");
                    return;
                }
            }

            warn!("Redis订阅连接中断，准备重新订阅");
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }
}

#[async_trait]
impl MessageBus for RedisMessageBus {
    async fn publish(&self, channel: &str, payload: &str) -> FleetResult<()> {
        let mut connection = self.connection.clone();
        let receivers: i64 = connection
            .publish(channel, payload)
            .await
            .map_err(|e| FleetError::MessageBus(format!("发布消息失败: {e}")))?;

        debug!("发布到 {} ({} 个订阅者): {}", channel, receivers, payload);
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> FleetResult<BusSubscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Self::forward_messages(
            self.client.clone(),
            channels.to_vec(),
            sender,
        ));
        Ok(receiver)
    }
}
