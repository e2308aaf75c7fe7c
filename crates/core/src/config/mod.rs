//! 配置管理
//!
//! 配置按以下顺序叠加：内置默认值、TOML 配置文件、`FLEET_` 前缀的环境变量。
//! 每个配置段都有独立的 `validate`，由 [`AppConfig::validate`] 统一调用。
//!
//! ```toml
//! [node]
//! address = "10.0.0.5"
//!
//! [message_bus]
//! type = "redis"
//!
//! [message_bus.redis]
//! host = "10.0.0.2"
//! ```

pub mod models;

pub use models::*;
