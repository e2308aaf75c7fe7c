use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 本地目录布局
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// 每台服务器的工作目录为 `servers_dir/<name>`
    pub servers_dir: PathBuf,
    /// 所有服务器共用的基础模板
    pub base_template_dir: PathBuf,
    /// 按类型区分的模板，`type_template_dir/<type>`
    pub type_template_dir: PathBuf,
    /// 首次初始化时遗留目录的归档位置
    pub stale_archive_dir: PathBuf,
    /// 插件库，恢复时用于替换占位文件
    pub plugin_library_dir: PathBuf,
    /// 全局资源解压目录
    pub global_asset_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            servers_dir: PathBuf::from("servers"),
            base_template_dir: PathBuf::from("commons"),
            type_template_dir: PathBuf::from("servertypes"),
            stale_archive_dir: PathBuf::from("tmp"),
            plugin_library_dir: PathBuf::from("commons/plugins/PlayerRealms/plugins"),
            global_asset_dir: PathBuf::from("."),
        }
    }
}

impl PathsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.servers_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("服务器目录不能为空"));
        }

        if self.servers_dir == self.base_template_dir {
            return Err(anyhow::anyhow!("服务器目录不能与模板目录相同"));
        }

        Ok(())
    }
}

/// 上传前的归档清理规则
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// 相对工作目录，上传前删除
    pub strip_paths: Vec<String>,
    /// 插件目录，其中的二进制被替换为占位文件
    pub plugin_dir: String,
    pub plugin_extension: String,
    pub placeholder_suffix: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            strip_paths: vec![
                "spigot.jar".to_string(),
                "plugins/PlayerRealms/plugins".to_string(),
                "core".to_string(),
            ],
            plugin_dir: "plugins".to_string(),
            plugin_extension: ".jar".to_string(),
            placeholder_suffix: ".temp".to_string(),
        }
    }
}

impl ArchiveConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.placeholder_suffix.is_empty() {
            return Err(anyhow::anyhow!("占位文件后缀不能为空"));
        }

        if self
            .strip_paths
            .iter()
            .any(|p| p.is_empty() || p.starts_with('/') || p.contains(".."))
        {
            return Err(anyhow::anyhow!("清理路径必须是工作目录内的相对路径"));
        }

        Ok(())
    }
}
