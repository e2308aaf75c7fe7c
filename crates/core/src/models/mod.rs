//! # 数据模型
//!
//! 集群控制面的核心数据结构：持久化的服务器记录与节点在线记录、
//! 分布式命令协议、资源档位和启动参数。
//!
//! ## 核心模型
//!
//! ### ServerRecord - 服务器记录
//! 以小写名称为全局唯一键，元数据是字符串到字符串的映射，只做字段级 set/unset。
//!
//! ### ManagerPresence - 节点在线记录
//! 每个网络地址一行，每秒心跳刷新，正常退出时删除。
//!
//! ### Command / ResponseCode - 命令协议
//! 总线上的文本在边界处解码一次，业务逻辑只处理类型化的命令。
//!
//! ## 设计原则
//!
//! - 时间字段使用 `DateTime<Utc>`
//! - 状态字段使用枚举类型，无法识别的持久化值按 OFFLINE 处理

pub mod command;
pub mod presence;
pub mod resources;
pub mod server;
pub mod settings;

pub use command::{Command, CommandResponse, DecodeError, ResponseCode, UpdateEvent, Verb};
pub use presence::{ManagerPresence, NodeIdentity, PresenceHeartbeat};
pub use resources::{ResourceProfile, ResourceTier};
pub use server::{metadata_keys, MetadataUpdate, ServerRecord, ServerStatus};
pub use settings::{ServerSettings, WorldType};
