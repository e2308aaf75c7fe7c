use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 服务器记录中约定的元数据键
pub mod metadata_keys {
    pub const STATUS: &str = "STATUS";
    pub const SOURCE: &str = "SOURCE";
    pub const SERVER_TYPE: &str = "type";
    pub const PREMIUM_UNTIL: &str = "premiumtime";
    pub const ULTRA_UNTIL: &str = "ultra_time";
    pub const ULTRA_FLAG: &str = "ultra";
    pub const MEMORY_OVERRIDE: &str = "ram";
    pub const MAX_PLAYERS_OVERRIDE: &str = "maxplayers";
    pub const AUTO_RESTART: &str = "autorestart";
    pub const WORLD_TYPE: &str = "wt";
    pub const WORLD_URL: &str = "url";
    pub const COMMAND_BLOCKS: &str = "cb";
    pub const ALLOW_FLIGHT: &str = "af";
}

/// 持久化的服务器记录
///
/// `name_lower` 是全局唯一键；元数据只通过字段级 set/unset 修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub name: String,
    pub name_lower: String,
    pub metadata: BTreeMap<String, String>,
}

impl ServerRecord {
    /// 创建只包含服务器类型的最小记录
    pub fn new(name: &str, server_type: &str) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            metadata_keys::SERVER_TYPE.to_string(),
            server_type.to_string(),
        );
        Self {
            name: name.to_string(),
            name_lower: name.to_lowercase(),
            metadata,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// 持久化状态，缺省为 OFFLINE；无法识别的值同样视为 OFFLINE
    pub fn status(&self) -> ServerStatus {
        self.get(metadata_keys::STATUS)
            .and_then(|s| s.parse().ok())
            .unwrap_or(ServerStatus::Offline)
    }

    /// SOURCE 中的主机部分（`host:port`）
    pub fn source_host(&self) -> Option<&str> {
        self.get(metadata_keys::SOURCE)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.split(':').next())
    }
}

/// 服务器生命周期状态
///
/// ONLINE 只在停止失败回滚时显式写入，其余时候由 STARTING 隐含。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    #[serde(rename = "OFFLINE")]
    Offline,
    #[serde(rename = "STARTING")]
    Starting,
    #[serde(rename = "ONLINE")]
    Online,
    #[serde(rename = "STOPPING")]
    Stopping,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Offline => "OFFLINE",
            ServerStatus::Starting => "STARTING",
            ServerStatus::Online => "ONLINE",
            ServerStatus::Stopping => "STOPPING",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFFLINE" => Ok(ServerStatus::Offline),
            "STARTING" => Ok(ServerStatus::Starting),
            "ONLINE" => Ok(ServerStatus::Online),
            "STOPPING" => Ok(ServerStatus::Stopping),
            _ => Err(format!("Invalid server status: {s}")),
        }
    }
}

/// 字段级元数据更新
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub set: Vec<(String, String)>,
    pub unset: Vec<String>,
}

impl MetadataUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set.push((key.to_string(), value.into()));
        self
    }

    pub fn unset(mut self, key: &str) -> Self {
        self.unset.push(key.to_string());
        self
    }

    /// 空值表示删除该键
    pub fn assign(key: &str, value: &str) -> Self {
        if value.is_empty() {
            Self::new().unset(key)
        } else {
            Self::new().set(key, value)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// 在内存中应用更新，供内存实现和测试使用
    pub fn apply_to(&self, metadata: &mut BTreeMap<String, String>) {
        for (key, value) in &self.set {
            metadata.insert(key.clone(), value.clone());
        }
        for key in &self.unset {
            metadata.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_offline_with_type() {
        let record = ServerRecord::new("Alpha", "vanilla");
        assert_eq!(record.name_lower, "alpha");
        assert_eq!(record.get(metadata_keys::SERVER_TYPE), Some("vanilla"));
        assert_eq!(record.status(), ServerStatus::Offline);
    }

    #[test]
    fn test_source_host_strips_port() {
        let mut record = ServerRecord::new("alpha", "vanilla");
        record
            .metadata
            .insert(metadata_keys::SOURCE.to_string(), "10.0.0.5:25565".to_string());
        assert_eq!(record.source_host(), Some("10.0.0.5"));

        record
            .metadata
            .insert(metadata_keys::SOURCE.to_string(), String::new());
        assert_eq!(record.source_host(), None);
    }

    #[test]
    fn test_assign_empty_value_unsets() {
        let mut metadata = BTreeMap::new();
        metadata.insert("motd".to_string(), "hi".to_string());
        MetadataUpdate::assign("motd", "").apply_to(&mut metadata);
        assert!(metadata.is_empty());

        MetadataUpdate::assign("motd", "hello").apply_to(&mut metadata);
        assert_eq!(metadata.get("motd").map(String::as_str), Some("hello"));
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            ServerStatus::Offline,
            ServerStatus::Starting,
            ServerStatus::Online,
            ServerStatus::Stopping,
        ] {
            assert_eq!(status.as_str().parse::<ServerStatus>(), Ok(status));
        }
        assert!("RUNNING".parse::<ServerStatus>().is_err());
    }
}
