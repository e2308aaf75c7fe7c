use chrono::{DateTime, TimeZone, Utc};
use fleet_core::{FleetError, FleetResult};

/// 行映射辅助函数
pub struct MappingHelpers;

impl MappingHelpers {
    /// 持久化的毫秒时间戳转换为 `DateTime<Utc>`
    pub fn millis_to_datetime(millis: i64) -> FleetResult<DateTime<Utc>> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| FleetError::DatabaseOperation(format!("无效的时间戳: {millis}")))
    }

    /// 无符号容量值按 SQLite INTEGER 存储
    pub fn u64_to_i64(value: u64) -> i64 {
        i64::try_from(value).unwrap_or(i64::MAX)
    }

    pub fn i64_to_u64(value: i64) -> u64 {
        u64::try_from(value).unwrap_or(0)
    }

    /// SQLite 唯一约束冲突
    pub fn is_unique_violation(error: &sqlx::Error) -> bool {
        match error {
            sqlx::Error::Database(db_error) => db_error.is_unique_violation(),
            _ => false,
        }
    }
}
