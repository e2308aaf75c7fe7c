use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 管理节点在线记录，每个网络地址一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerPresence {
    pub address: String,
    pub port: u16,
    /// 空闲资源估计（MB）
    pub free_mb: u64,
    pub last_heartbeat: DateTime<Utc>,
    pub accepting: bool,
}

impl ManagerPresence {
    /// 检查心跳是否超时
    pub fn is_heartbeat_expired(&self, timeout_seconds: i64) -> bool {
        (Utc::now() - self.last_heartbeat).num_seconds() > timeout_seconds
    }
}

/// 管理节点心跳信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceHeartbeat {
    pub address: String,
    pub port: u16,
    pub free_mb: u64,
    pub timestamp: DateTime<Utc>,
}

/// 本节点身份：请求频道和 SOURCE 都以它为准
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub address: String,
    pub port: u16,
}

impl NodeIdentity {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// 运行在本节点的服务器的 SOURCE 值
    pub fn source_for(&self, server_port: u16) -> String {
        format!("{}:{}", self.address, server_port)
    }
}
