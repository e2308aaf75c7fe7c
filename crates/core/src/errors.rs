use thiserror::Error;

/// 集群管理错误类型定义
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("服务器已在线: {name}")]
    AlreadyOnline { name: String },

    #[error("服务器未在线: {name}")]
    NotOnline { name: String },

    #[error("服务器不存在: {name}")]
    UnknownServer { name: String },

    #[error("服务器名称已被占用: {name}")]
    NameTaken { name: String },

    #[error("服务器名称无效: {name}")]
    NameInvalid { name: String },

    #[error("资源不足: 需要 {required} MB, 可用 {available} MB")]
    ResourceExhausted { required: u64, available: u64 },

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("消息总线错误: {0}")]
    MessageBus(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("归档错误: {0}")]
    Archive(String),

    #[error("工作负载后端错误: {0}")]
    Backend(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl FleetError {
    pub fn already_online<S: Into<String>>(name: S) -> Self {
        Self::AlreadyOnline { name: name.into() }
    }
    pub fn not_online<S: Into<String>>(name: S) -> Self {
        Self::NotOnline { name: name.into() }
    }
    pub fn unknown_server<S: Into<String>>(name: S) -> Self {
        Self::UnknownServer { name: name.into() }
    }
    pub fn name_taken<S: Into<String>>(name: S) -> Self {
        Self::NameTaken { name: name.into() }
    }
    pub fn name_invalid<S: Into<String>>(name: S) -> Self {
        Self::NameInvalid { name: name.into() }
    }

    /// 不属于业务分类的意外故障（IO、传输、存储等），对外统一报告为 UnknownError
    pub fn is_unexpected(&self) -> bool {
        !matches!(
            self,
            Self::AlreadyOnline { .. }
                | Self::NotOnline { .. }
                | Self::UnknownServer { .. }
                | Self::NameTaken { .. }
                | Self::NameInvalid { .. }
                | Self::ResourceExhausted { .. }
        )
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type FleetResult<T> = std::result::Result<T, FleetError>;
