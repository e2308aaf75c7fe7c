//! # Fleet Testing Utils
//!
//! 各 crate 共用的测试工具：协作方接口的内存实现、测试数据构造器和等待辅助函数。
//!
//! 作为 dev-dependency 引入：
//!
//! ```toml
//! [dev-dependencies]
//! fleet-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;

/// 进程内消息总线本身就可以充当测试替身
pub use fleet_infrastructure::InMemoryMessageBus;
