use serde::{Deserialize, Serialize};

/// 进程后端配置
///
/// 参数中的占位符在启动时替换：`{memory}`、`{port}`、`{name}`、`{max_players}`；
/// 单独的 `{jvm_args}` 参数展开为服务器的 JVM 参数列表。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub program: String,
    pub args: Vec<String>,
    pub stop_command: String,
    /// 优雅停止的等待上限，超时后强制结束
    pub graceful_stop_timeout_seconds: u64,
    /// 是否在启动前写入 server.properties
    pub write_properties: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: "java".to_string(),
            args: vec![
                "-Xms{memory}M".to_string(),
                "-Xmx{memory}M".to_string(),
                "{jvm_args}".to_string(),
                "-jar".to_string(),
                "spigot.jar".to_string(),
                "nogui".to_string(),
            ],
            stop_command: "stop".to_string(),
            graceful_stop_timeout_seconds: 60,
            write_properties: true,
        }
    }
}

impl BackendConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.program.is_empty() {
            return Err(anyhow::anyhow!("后端启动程序不能为空"));
        }

        if self.graceful_stop_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("优雅停止超时必须大于0"));
        }

        Ok(())
    }
}

/// 世界生成与上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub max_download_bytes: u64,
    pub download_timeout_seconds: u64,
    /// VOID 世界写入设置文件的生成器名
    pub void_generator: String,
    /// 相对工作目录的设置文件
    pub settings_file: String,
    pub world_dir: String,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            max_download_bytes: 52_428_800,
            download_timeout_seconds: 120,
            void_generator: "PlayerRealms".to_string(),
            settings_file: "bukkit.yml".to_string(),
            world_dir: "world".to_string(),
        }
    }
}

impl WorldConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_download_bytes == 0 {
            return Err(anyhow::anyhow!("世界下载大小上限必须大于0"));
        }

        if self.world_dir.is_empty() || self.settings_file.is_empty() {
            return Err(anyhow::anyhow!("世界目录和设置文件不能为空"));
        }

        Ok(())
    }
}
