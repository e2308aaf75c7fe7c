use serde::{Deserialize, Serialize};

/// Message bus type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageBusType {
    #[default]
    Redis,
    InMemory,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub database: i64,
    pub password: Option<String>,
    pub connection_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            connection_timeout_seconds: 30,
        }
    }
}

impl RedisConfig {
    /// Validate Redis configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("Redis主机地址不能为空"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("Redis端口必须大于0"));
        }

        if self.database < 0 {
            return Err(anyhow::anyhow!("Redis数据库索引不能为负数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Redis连接超时时间必须大于0"));
        }

        Ok(())
    }

    /// Build Redis connection URL
    pub fn build_url(&self) -> String {
        let auth = match &self.password {
            Some(password) if !password.is_empty() => format!(":{password}@"),
            _ => String::new(),
        };
        format!(
            "redis://{}{}:{}/{}",
            auth, self.host, self.port, self.database
        )
    }
}

/// 频道命名
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// 每个节点的请求频道为 `request_prefix + 节点地址`
    pub request_prefix: String,
    pub global: String,
    pub response: String,
    pub update: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_prefix: "manager_request_".to_string(),
            global: "manager_global".to_string(),
            response: "manager_response".to_string(),
            update: "manager_update".to_string(),
        }
    }
}

impl ChannelConfig {
    pub fn request_channel(&self, address: &str) -> String {
        format!("{}{}", self.request_prefix, address)
    }
}

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MessageBusConfig {
    #[serde(rename = "type")]
    pub bus_type: MessageBusType,
    pub redis: RedisConfig,
    pub channels: ChannelConfig,
}

impl MessageBusConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bus_type == MessageBusType::Redis {
            self.redis.validate()?;
        }

        let channels = &self.channels;
        for (name, value) in [
            ("request_prefix", &channels.request_prefix),
            ("global", &channels.global),
            ("response", &channels.response),
            ("update", &channels.update),
        ] {
            if value.is_empty() {
                return Err(anyhow::anyhow!("频道名称不能为空: {}", name));
            }
        }

        Ok(())
    }
}
