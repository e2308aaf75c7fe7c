use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::FleetResult;

/// 单个存储对象的描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub filename: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// 归档存储桶接口，按文件名寻址
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// 上传并替换同名对象
    async fn upload(&self, filename: &str, data: Vec<u8>) -> FleetResult<()>;

    async fn download(&self, filename: &str) -> FleetResult<Option<Vec<u8>>>;

    /// 返回是否确实删除了对象
    async fn delete(&self, filename: &str) -> FleetResult<bool>;

    /// 源对象不存在时返回 false
    async fn rename(&self, from: &str, to: &str) -> FleetResult<bool>;

    async fn list(&self) -> FleetResult<Vec<BlobInfo>>;
}

/// 服务器归档在存储桶中的键
pub fn archive_key(server_name: &str) -> String {
    format!("{server_name}.zip")
}
