pub mod config;
pub mod errors;
pub mod models;
pub mod traits;
pub mod validation;

pub use config::AppConfig;
pub use errors::*;
pub use models::*;
pub use traits::*;
pub use validation::validate_name;
