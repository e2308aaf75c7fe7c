use async_trait::async_trait;
use chrono::Utc;
use fleet_core::{
    traits::{BlobInfo, BlobStore},
    FleetError, FleetResult,
};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::database::mapping::MappingHelpers;

/// 存储桶
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobBucket {
    /// 每台服务器的归档，文件名为 `<name>.zip`
    ServerFiles,
    /// 所有节点共享的全局资源
    GlobalFiles,
}

impl BlobBucket {
    fn table(&self) -> &'static str {
        match self {
            BlobBucket::ServerFiles => "server_files",
            BlobBucket::GlobalFiles => "global_files",
        }
    }
}

/// 以 SQLite 表实现的归档存储桶
pub struct SqliteBlobStore {
    pool: SqlitePool,
    bucket: BlobBucket,
}

impl SqliteBlobStore {
    pub fn new(pool: SqlitePool, bucket: BlobBucket) -> Self {
        Self { pool, bucket }
    }
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn upload(&self, filename: &str, data: Vec<u8>) -> FleetResult<()> {
        let size = data.len();
        let sql = format!(
            r#"
            INSERT INTO {} (filename, data, uploaded_at) VALUES ($1, $2, $3)
            ON CONFLICT(filename) DO UPDATE SET data = excluded.data, uploaded_at = excluded.uploaded_at
            "#,
            self.bucket.table()
        );

        sqlx::query(&sql)
            .bind(filename)
            .bind(data)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        debug!("上传 {} 到 {} ({} 字节)", filename, self.bucket.table(), size);
        Ok(())
    }

    async fn download(&self, filename: &str) -> FleetResult<Option<Vec<u8>>> {
        let sql = format!("SELECT data FROM {} WHERE filename = $1", self.bucket.table());
        let row = sqlx::query(&sql)
            .bind(filename)
            .fetch_optional(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        row.map(|r| r.try_get::<Vec<u8>, _>("data").map_err(FleetError::Database))
            .transpose()
    }

    async fn delete(&self, filename: &str) -> FleetResult<bool> {
        let sql = format!("DELETE FROM {} WHERE filename = $1", self.bucket.table());
        let result = sqlx::query(&sql)
            .bind(filename)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn rename(&self, from: &str, to: &str) -> FleetResult<bool> {
        if from == to {
            return Ok(self.download(from).await?.is_some());
        }

        let mut tx = self.pool.begin().await.map_err(FleetError::Database)?;

        // 目标名若有旧对象先删除，保持“同名替换”语义
        let sql = format!("DELETE FROM {} WHERE filename = $1", self.bucket.table());
        let exists = format!("SELECT 1 FROM {} WHERE filename = $1", self.bucket.table());
        let source = sqlx::query(&exists)
            .bind(from)
            .fetch_optional(&mut *tx)
            .await
            .map_err(FleetError::Database)?;
        if source.is_none() {
            return Ok(false);
        }

        sqlx::query(&sql)
            .bind(to)
            .execute(&mut *tx)
            .await
            .map_err(FleetError::Database)?;

        let sql = format!(
            "UPDATE {} SET filename = $1 WHERE filename = $2",
            self.bucket.table()
        );
        sqlx::query(&sql)
            .bind(to)
            .bind(from)
            .execute(&mut *tx)
            .await
            .map_err(FleetError::Database)?;

        tx.commit().await.map_err(FleetError::Database)?;
        Ok(true)
    }

    async fn list(&self) -> FleetResult<Vec<BlobInfo>> {
        let sql = format!(
            "SELECT filename, length(data) AS size, uploaded_at FROM {} ORDER BY filename",
            self.bucket.table()
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        rows.iter()
            .map(|row| {
                let size: i64 = row.try_get("size")?;
                let uploaded_at: i64 = row.try_get("uploaded_at")?;
                Ok(BlobInfo {
                    filename: row.try_get("filename")?,
                    size: MappingHelpers::i64_to_u64(size),
                    uploaded_at: MappingHelpers::millis_to_datetime(uploaded_at)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;

    async fn stores() -> (SqliteBlobStore, SqliteBlobStore) {
        let db = DatabaseManager::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        (
            SqliteBlobStore::new(db.pool().clone(), BlobBucket::ServerFiles),
            SqliteBlobStore::new(db.pool().clone(), BlobBucket::GlobalFiles),
        )
    }

    #[tokio::test]
    async fn test_upload_replaces_previous() {
        let (servers, _) = stores().await;
        servers.upload("alpha.zip", vec![1, 2, 3]).await.unwrap();
        servers.upload("alpha.zip", vec![4]).await.unwrap();

        assert_eq!(servers.download("alpha.zip").await.unwrap(), Some(vec![4]));
        let listed = servers.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, 1);
    }

    #[tokio::test]
    async fn test_buckets_are_isolated() {
        let (servers, globals) = stores().await;
        globals.upload("assets.zip", vec![9]).await.unwrap();
        assert!(servers.download("assets.zip").await.unwrap().is_none());
        assert!(globals.delete("assets.zip").await.unwrap());
        assert!(!globals.delete("assets.zip").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename() {
        let (servers, _) = stores().await;
        servers.upload("alpha.zip", vec![1]).await.unwrap();
        servers.upload("beta.zip", vec![2]).await.unwrap();

        assert!(servers.rename("alpha.zip", "beta.zip").await.unwrap());
        assert_eq!(servers.download("beta.zip").await.unwrap(), Some(vec![1]));
        assert!(servers.download("alpha.zip").await.unwrap().is_none());
        assert!(!servers.rename("ghost.zip", "x.zip").await.unwrap());
    }
}
