use async_trait::async_trait;
use fleet_core::{
    traits::PresenceRepository, FleetError, FleetResult, ManagerPresence, PresenceHeartbeat,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::database::mapping::MappingHelpers;

/// 管理节点在线记录仓储（SQLite），每个地址一行
pub struct SqlitePresenceRepository {
    pool: SqlitePool,
}

impl SqlitePresenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_presence(row: &sqlx::sqlite::SqliteRow) -> FleetResult<ManagerPresence> {
        let port: i64 = row.try_get("port")?;
        let free: i64 = row.try_get("free")?;
        let time: i64 = row.try_get("time")?;
        let accept: bool = row.try_get("accept")?;

        Ok(ManagerPresence {
            address: row.try_get("ip")?,
            port: u16::try_from(port)
                .map_err(|_| FleetError::DatabaseOperation(format!("无效的端口: {port}")))?,
            free_mb: MappingHelpers::i64_to_u64(free),
            last_heartbeat: MappingHelpers::millis_to_datetime(time)?,
            accepting: accept,
        })
    }
}

#[async_trait]
impl PresenceRepository for SqlitePresenceRepository {
    async fn upsert_heartbeat(&self, heartbeat: &PresenceHeartbeat) -> FleetResult<bool> {
        let free = MappingHelpers::u64_to_i64(heartbeat.free_mb);
        let time = heartbeat.timestamp.timestamp_millis();

        let result = sqlx::query("UPDATE managers SET port = $1, free = $2, time = $3 WHERE ip = $4")
            .bind(heartbeat.port as i64)
            .bind(free)
            .bind(time)
            .bind(&heartbeat.address)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        if result.rows_affected() > 0 {
            return Ok(false);
        }

        // 首次心跳：创建记录并默认接受新工作
        let result = sqlx::query(
            r#"
            INSERT INTO managers (ip, port, free, time, accept) VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT(ip) DO NOTHING
            "#,
        )
        .bind(&heartbeat.address)
        .bind(heartbeat.port as i64)
        .bind(free)
        .bind(time)
        .execute(&self.pool)
        .await
        .map_err(FleetError::Database)?;

        let created = result.rows_affected() > 0;
        if created {
            info!("首次心跳，已创建节点在线记录: {}", heartbeat.address);
        }
        Ok(created)
    }

    async fn set_accepting(&self, address: &str, accepting: bool) -> FleetResult<()> {
        sqlx::query("UPDATE managers SET accept = $1 WHERE ip = $2")
            .bind(accepting)
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        debug!("节点 {} 接受新工作: {}", address, accepting);
        Ok(())
    }

    async fn find(&self, address: &str) -> FleetResult<Option<ManagerPresence>> {
        let row = sqlx::query("SELECT ip, port, free, time, accept FROM managers WHERE ip = $1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        row.as_ref().map(Self::row_to_presence).transpose()
    }

    async fn list(&self) -> FleetResult<Vec<ManagerPresence>> {
        let rows = sqlx::query("SELECT ip, port, free, time, accept FROM managers ORDER BY ip")
            .fetch_all(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        rows.iter().map(Self::row_to_presence).collect()
    }

    async fn delete(&self, address: &str) -> FleetResult<()> {
        sqlx::query("DELETE FROM managers WHERE ip = $1")
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(FleetError::Database)?;

        info!("已删除节点在线记录: {}", address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use chrono::Utc;

    async fn repository() -> SqlitePresenceRepository {
        let db = DatabaseManager::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        SqlitePresenceRepository::new(db.pool().clone())
    }

    fn heartbeat(free_mb: u64) -> PresenceHeartbeat {
        PresenceHeartbeat {
            address: "10.0.0.1".to_string(),
            port: 8484,
            free_mb,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_first_heartbeat_creates_accepting_row() {
        let repo = repository().await;
        assert!(repo.upsert_heartbeat(&heartbeat(16000)).await.unwrap());
        assert!(!repo.upsert_heartbeat(&heartbeat(12000)).await.unwrap());

        let presence = repo.find("10.0.0.1").await.unwrap().unwrap();
        assert!(presence.accepting);
        assert_eq!(presence.free_mb, 12000);
        assert_eq!(presence.port, 8484);
    }

    #[tokio::test]
    async fn test_accepting_survives_heartbeats() {
        let repo = repository().await;
        repo.upsert_heartbeat(&heartbeat(1)).await.unwrap();
        repo.set_accepting("10.0.0.1", false).await.unwrap();
        repo.upsert_heartbeat(&heartbeat(2)).await.unwrap();

        let presence = repo.find("10.0.0.1").await.unwrap().unwrap();
        assert!(!presence.accepting);
    }

    #[tokio::test]
    async fn test_delete_presence() {
        let repo = repository().await;
        repo.upsert_heartbeat(&heartbeat(1)).await.unwrap();
        assert_eq!(repo.list().await.unwrap().len(), 1);

        repo.delete("10.0.0.1").await.unwrap();
        assert!(repo.find("10.0.0.1").await.unwrap().is_none());
    }
}
