pub mod app_config;
pub mod database;
pub mod logging;
pub mod message_bus;
pub mod node;
pub mod paths;
pub mod runtime;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use logging::LoggingConfig;
pub use message_bus::{ChannelConfig, MessageBusConfig, MessageBusType, RedisConfig};
pub use node::{FleetConfig, NodeConfig};
pub use paths::{ArchiveConfig, PathsConfig};
pub use runtime::{BackendConfig, WorldConfig};
