use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    logging::LoggingConfig,
    message_bus::MessageBusConfig,
    node::{FleetConfig, NodeConfig},
    paths::{ArchiveConfig, PathsConfig},
    runtime::{BackendConfig, WorldConfig},
};

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub database: DatabaseConfig,
    pub message_bus: MessageBusConfig,
    pub paths: PathsConfig,
    pub fleet: FleetConfig,
    pub backend: BackendConfig,
    pub world: WorldConfig,
    pub archive: ArchiveConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: FLEET_, nested keys joined by `__`,
    ///    e.g. `FLEET_NODE__PORT=9000`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/fleet.toml", "fleet.toml", "/etc/realm-fleet/config.toml"];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("FLEET")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.node.validate().context("节点配置验证失败")?;
        self.database.validate().context("数据库配置验证失败")?;
        self.message_bus
            .validate()
            .context("消息总线配置验证失败")?;
        self.paths.validate().context("目录配置验证失败")?;
        self.fleet.validate().context("集群配置验证失败")?;
        self.backend.validate().context("后端配置验证失败")?;
        self.world.validate().context("世界配置验证失败")?;
        self.archive.validate().context("归档配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;

        Ok(())
    }
}
