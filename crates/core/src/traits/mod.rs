pub mod blob_store;
pub mod message_bus;
pub mod repository;
pub mod system;
pub mod workload_backend;

pub use blob_store::*;
pub use message_bus::*;
pub use repository::*;
pub use system::*;
pub use workload_backend::*;
