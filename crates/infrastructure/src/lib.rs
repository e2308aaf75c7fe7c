//! 舰队节点的基础设施实现：SQLite 仓储、消息总线、归档、进程后端和世界安装

pub mod archive;
pub mod database;
pub mod fs_utils;
pub mod message_bus;
pub mod process_backend;
pub mod system;
pub mod world;

pub use database::*;
pub use message_bus::{InMemoryMessageBus, MessageBusFactory, RedisMessageBus};
pub use process_backend::{ProcessBackend, ProcessBackendFactory};
pub use system::{LoggingAllowList, ProcMemoryProbe};
pub use world::HttpWorldInstaller;
