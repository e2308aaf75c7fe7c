pub mod mapping;
pub mod sqlite;

pub use sqlite::{
    BlobBucket, DatabaseManager, DbPool, SqliteBlobStore, SqlitePresenceRepository,
    SqliteServerRepository,
};
