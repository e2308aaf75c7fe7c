use std::collections::BTreeMap;

use async_trait::async_trait;
use fleet_core::{
    traits::ServerRepository, FleetError, FleetResult, MetadataUpdate, ServerRecord,
};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::database::mapping::MappingHelpers;

/// 服务器记录仓储（SQLite）
///
/// 元数据按 `(server_id, key)` 单独成行，set/unset 只触及涉及的键。
pub struct SqliteServerRepository {
    pool: SqlitePool,
}

impl SqliteServerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_metadata(&self, server_id: i64) -> FleetResult<BTreeMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM server_metadata WHERE server_id = $1")
            .bind(server_id)
            .fetch_all(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        let mut metadata = BTreeMap::new();
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            metadata.insert(key, value);
        }
        Ok(metadata)
    }

    async fn row_to_record(&self, row: &sqlx::sqlite::SqliteRow) -> FleetResult<ServerRecord> {
        let id: i64 = row.try_get("id")?;
        Ok(ServerRecord {
            name: row.try_get("server_name")?,
            name_lower: row.try_get("server_name_lower")?,
            metadata: self.load_metadata(id).await?,
        })
    }

    async fn find_id(&self, name: &str) -> FleetResult<Option<i64>> {
        let row = sqlx::query("SELECT id FROM servers WHERE server_name_lower = $1")
            .bind(name.to_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        row.map(|r| r.try_get::<i64, _>("id").map_err(FleetError::Database))
            .transpose()
    }
}

#[async_trait]
impl ServerRepository for SqliteServerRepository {
    async fn find_by_name(&self, name: &str) -> FleetResult<Option<ServerRecord>> {
        let row = sqlx::query(
            "SELECT id, server_name, server_name_lower FROM servers WHERE server_name_lower = $1",
        )
        .bind(name.to_lowercase())
        .fetch_optional(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        match row {
            Some(row) => Ok(Some(self.row_to_record(&row).await?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, record: &ServerRecord) -> FleetResult<bool> {
        let mut tx = self.pool.begin().await.map_err(FleetError::Database)?;

        let inserted = sqlx::query(
            "INSERT INTO servers (server_name, server_name_lower) VALUES ($1, $2)",
        )
        .bind(&record.name)
        .bind(record.name.to_lowercase())
        .execute(&mut *tx)
        .await;

        let server_id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(e) if MappingHelpers::is_unique_violation(&e) => {
                debug!("服务器名称已存在: {}", record.name);
                return Ok(false);
            }
            Err(e) => return Err(FleetError::Database(e)),
        };

        for (key, value) in &record.metadata {
            sqlx::query("INSERT INTO server_metadata (server_id, key, value) VALUES ($1, $2, $3)")
                .bind(server_id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(FleetError::Database)?;
        }

        tx.commit().await.map_err(FleetError::Database)?;
        debug!("创建服务器记录成功: {}", record.name);
        Ok(true)
    }

    async fn update_metadata(&self, name: &str, update: &MetadataUpdate) -> FleetResult<bool> {
        let Some(server_id) = self.find_id(name).await? else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await.map_err(FleetError::Database)?;

        for (key, value) in &update.set {
            sqlx::query(
                r#"
                INSERT INTO server_metadata (server_id, key, value) VALUES ($1, $2, $3)
                ON CONFLICT(server_id, key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(server_id)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(FleetError::Database)?;
        }

        for key in &update.unset {
            sqlx::query("DELETE FROM server_metadata WHERE server_id = $1 AND key = $2")
                .bind(server_id)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(FleetError::Database)?;
        }

        tx.commit().await.map_err(FleetError::Database)?;
        Ok(true)
    }

    async fn rename(&self, name: &str, target: &str) -> FleetResult<()> {
        let mut tx = self.pool.begin().await.map_err(FleetError::Database)?;

        let source = sqlx::query("SELECT id FROM servers WHERE server_name_lower = $1")
            .bind(name.to_lowercase())
            .fetch_optional(&mut *tx)
            .await
            .map_err(FleetError::Database)?;
        let Some(source) = source else {
            return Err(FleetError::unknown_server(name));
        };
        let source_id: i64 = source.try_get("id")?;

        // 只改大小写时目标键就是源记录自身
        let taken = sqlx::query("SELECT id FROM servers WHERE server_name_lower = $1 AND id != $2")
            .bind(target.to_lowercase())
            .bind(source_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(FleetError::Database)?;
        if taken.is_some() {
            return Err(FleetError::name_taken(target));
        }

        let result = sqlx::query(
            "UPDATE servers SET server_name = $1, server_name_lower = $2 WHERE id = $3",
        )
        .bind(target)
        .bind(target.to_lowercase())
        .bind(source_id)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(e) if MappingHelpers::is_unique_violation(&e) => {
                return Err(FleetError::name_taken(target));
            }
            Err(e) => return Err(FleetError::Database(e)),
        }

        tx.commit().await.map_err(FleetError::Database)?;
        debug!("重命名服务器记录: {} -> {}", name, target);
        Ok(())
    }

    async fn delete(&self, name: &str) -> FleetResult<Option<ServerRecord>> {
        let Some(record) = self.find_by_name(name).await? else {
            return Ok(None);
        };

        let mut tx = self.pool.begin().await.map_err(FleetError::Database)?;
        sqlx::query(
            "DELETE FROM server_metadata WHERE server_id IN (SELECT id FROM servers WHERE server_name_lower = $1)",
        )
        .bind(&record.name_lower)
        .execute(&mut *tx)
        .await
        .map_err(FleetError::Database)?;

        let result = sqlx::query("DELETE FROM servers WHERE server_name_lower = $1")
            .bind(&record.name_lower)
            .execute(&mut *tx)
            .await
            .map_err(FleetError::Database)?;
        tx.commit().await.map_err(FleetError::Database)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        debug!("删除服务器记录成功: {}", record.name);
        Ok(Some(record))
    }

    async fn list_with_metadata_key(&self, key: &str) -> FleetResult<Vec<ServerRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.server_name, s.server_name_lower
            FROM servers s
            JOIN server_metadata m ON m.server_id = s.id
            WHERE m.key = $1 AND m.value != ''
            ORDER BY s.id
            "#,
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(self.row_to_record(row).await?);
        }
        Ok(records)
    }

    async fn list_all(&self) -> FleetResult<Vec<ServerRecord>> {
        let rows = sqlx::query("SELECT id, server_name, server_name_lower FROM servers ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(self.row_to_record(row).await?);
        }
        Ok(records)
    }
}
