use serde::{Deserialize, Serialize};

/// 本节点身份配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// 对外地址；为空时通过 `ip_lookup_url` 查询
    pub address: Option<String>,
    pub port: u16,
    pub ip_lookup_url: String,
    /// 启动时是否接受新工作（命令行 `--block` 会覆盖为 false）
    pub accept_on_startup: bool,
    /// 是否启用标准输入控制台
    pub console_enabled: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: 8484,
            ip_lookup_url: "http://checkip.amazonaws.com".to_string(),
            accept_on_startup: true,
            console_enabled: true,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            return Err(anyhow::anyhow!("节点端口必须大于0"));
        }

        if let Some(address) = &self.address {
            if address.trim().is_empty() {
                return Err(anyhow::anyhow!("节点地址不能为空字符串"));
            }
        } else if !self.ip_lookup_url.starts_with("http://")
            && !self.ip_lookup_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!("IP查询地址必须是HTTP(S) URL"));
        }

        Ok(())
    }
}

/// 集群运行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// 准入控制的安全余量（与内存档位分开保存）
    pub admission_margin_mb: u64,
    pub heartbeat_interval_ms: u64,
    pub watchdog_poll_seconds: u64,
    /// 启动期间无活动超过此时长即强制停止
    pub startup_timeout_seconds: u64,
    /// 退出时等待所有服务器停止的上限
    pub shutdown_timeout_seconds: u64,
    /// 命令客户端等待响应的超时
    pub command_timeout_seconds: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            admission_margin_mb: 8192,
            heartbeat_interval_ms: 1000,
            watchdog_poll_seconds: 10,
            startup_timeout_seconds: 300,
            shutdown_timeout_seconds: 60,
            command_timeout_seconds: 10,
        }
    }
}

impl FleetConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.watchdog_poll_seconds == 0 {
            return Err(anyhow::anyhow!("看门狗轮询间隔必须大于0"));
        }

        if self.startup_timeout_seconds < self.watchdog_poll_seconds {
            return Err(anyhow::anyhow!("启动超时不能小于看门狗轮询间隔"));
        }

        if self.command_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("命令超时时间必须大于0"));
        }

        Ok(())
    }
}
