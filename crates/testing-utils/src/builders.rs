//! 测试数据构造器

use chrono::{Duration, Utc};
use fleet_core::{metadata_keys, ServerRecord, ServerStatus};

/// 服务器记录构造器
pub struct ServerRecordBuilder {
    record: ServerRecord,
}

impl ServerRecordBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            record: ServerRecord::new(name, "vanilla"),
        }
    }

    pub fn with_type(self, server_type: &str) -> Self {
        self.with_metadata(metadata_keys::SERVER_TYPE, server_type)
    }

    pub fn with_status(self, status: ServerStatus) -> Self {
        self.with_metadata(metadata_keys::STATUS, status.as_str())
    }

    pub fn with_source(self, source: &str) -> Self {
        self.with_metadata(metadata_keys::SOURCE, source)
    }

    /// 高级会员，在给定天数后到期
    pub fn premium_for_days(self, days: i64) -> Self {
        let until = (Utc::now() + Duration::days(days)).timestamp_millis();
        self.with_metadata(metadata_keys::PREMIUM_UNTIL, &until.to_string())
    }

    pub fn ultra_for_days(self, days: i64) -> Self {
        let until = (Utc::now() + Duration::days(days)).timestamp_millis();
        self.premium_for_days(days)
            .with_metadata(metadata_keys::ULTRA_UNTIL, &until.to_string())
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.record
            .metadata
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> ServerRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{ResourceProfile, ResourceTier};

    #[test]
    fn test_builder_tiers() {
        let premium = ServerRecordBuilder::new("alpha").premium_for_days(3).build();
        let ultra = ServerRecordBuilder::new("beta").ultra_for_days(3).build();

        assert_eq!(
            ResourceProfile::from_metadata(&premium.metadata, Utc::now()).tier,
            ResourceTier::Premium
        );
        assert_eq!(
            ResourceProfile::from_metadata(&ultra.metadata, Utc::now()).tier,
            ResourceTier::Ultra
        );
    }

    #[test]
    fn test_builder_status_and_source() {
        let record = ServerRecordBuilder::new("alpha")
            .with_status(ServerStatus::Starting)
            .with_source("10.0.0.1:30000")
            .build();
        assert_eq!(record.status(), ServerStatus::Starting);
        assert_eq!(record.source_host(), Some("10.0.0.1"));
    }
}
