//! 管理节点：服务器实体、工作目录、节点级注册表、在线心跳和全局资源同步

pub mod context;
pub mod global_assets;
pub mod presence;
pub mod registry;
pub mod server;
pub mod workspace;

pub use context::{FleetTimings, NodeContext};
pub use global_assets::GlobalAssetSync;
pub use presence::PresencePublisher;
pub use registry::{FleetRegistry, REPAIR_NAME_PREFIX};
pub use server::Server;
pub use workspace::Workspace;
