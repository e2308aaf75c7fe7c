pub mod in_memory_bus;
pub mod redis_bus;

pub use in_memory_bus::InMemoryMessageBus;
pub use redis_bus::RedisMessageBus;

use std::sync::Arc;

use fleet_core::{
    config::models::{MessageBusConfig, MessageBusType},
    traits::MessageBus,
    FleetResult,
};
use tracing::{debug, info};

pub struct MessageBusFactory;

impl MessageBusFactory {
    pub async fn create(config: &MessageBusConfig) -> FleetResult<Arc<dyn MessageBus>> {
        debug!("Creating message bus with type: {:?}", config.bus_type);

        match config.bus_type {
            MessageBusType::Redis => {
                info!("Initializing Redis pub/sub message bus");
                Ok(Arc::new(RedisMessageBus::new(&config.redis).await?))
            }
            MessageBusType::InMemory => {
                info!("Initializing in-memory message bus");
                Ok(Arc::new(InMemoryMessageBus::new()))
            }
        }
    }
}
