pub mod sqlite_blob_store;
pub mod sqlite_presence_repository;
pub mod sqlite_server_repository;

pub use sqlite_blob_store::{BlobBucket, SqliteBlobStore};
pub use sqlite_presence_repository::SqlitePresenceRepository;
pub use sqlite_server_repository::SqliteServerRepository;

use anyhow::Result;
use fleet_core::config::models::DatabaseConfig;
use sqlx::{Pool, Sqlite, SqlitePool};
use std::time::Duration;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS servers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        server_name TEXT NOT NULL,
        server_name_lower TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS server_metadata (
        server_id INTEGER NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (server_id, key)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_server_metadata_key ON server_metadata(key)",
    r#"
    CREATE TABLE IF NOT EXISTS managers (
        ip TEXT PRIMARY KEY,
        port INTEGER NOT NULL,
        free INTEGER NOT NULL,
        time INTEGER NOT NULL,
        accept INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS server_files (
        filename TEXT PRIMARY KEY,
        data BLOB NOT NULL,
        uploaded_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS global_files (
        filename TEXT PRIMARY KEY,
        data BLOB NOT NULL,
        uploaded_at INTEGER NOT NULL
    )
    "#,
];

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(Duration::from_secs(1800)) // 30分钟默认生命周期
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// 单连接内存数据库，连接永不回收，供测试和嵌入式场景使用
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("数据库表结构已就绪");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub type DbPool = Pool<Sqlite>;
