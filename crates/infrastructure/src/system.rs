use std::path::PathBuf;

use async_trait::async_trait;
use fleet_core::{
    traits::{AllowList, MemoryProbe},
    FleetError, FleetResult,
};
use tracing::{info, warn};

/// 读取 `/proc/meminfo` 中的 `MemAvailable`
pub struct ProcMemoryProbe {
    meminfo_path: PathBuf,
}

impl Default for ProcMemoryProbe {
    fn default() -> Self {
        Self {
            meminfo_path: PathBuf::from("/proc/meminfo"),
        }
    }
}

impl ProcMemoryProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(meminfo_path: impl Into<PathBuf>) -> Self {
        Self {
            meminfo_path: meminfo_path.into(),
        }
    }

    fn parse_available_mb(meminfo: &str) -> Option<u64> {
        meminfo
            .lines()
            .find(|line| line.starts_with("MemAvailable:"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb / 1024)
    }
}

impl MemoryProbe for ProcMemoryProbe {
    fn free_mb(&self) -> FleetResult<u64> {
        let meminfo = std::fs::read_to_string(&self.meminfo_path)?;
        Self::parse_available_mb(&meminfo).ok_or_else(|| {
            FleetError::Internal(format!(
                "{} 中缺少 MemAvailable",
                self.meminfo_path.display()
            ))
        })
    }
}

/// 只记录日志的白名单实现；防火墙规则由外部运维工具维护
#[derive(Default)]
pub struct LoggingAllowList;

#[async_trait]
impl AllowList for LoggingAllowList {
    async fn allow(&self, address: &str) -> FleetResult<()> {
        if address.parse::<std::net::IpAddr>().is_err() {
            warn!("REGISTER 地址无效，忽略: {}", address);
            return Ok(());
        }
        info!("收到访问登记请求: {}", address);
        Ok(())
    }
}
