//! 世界生成辅助：VOID 世界的设置改写和自定义世界的下载安装

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fleet_core::{
    config::models::WorldConfig, traits::WorldInstaller, FleetError, FleetResult,
};
use serde_yml::{Mapping, Value};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::{archive, fs_utils};

const STAGING_DIR: &str = "upload";

/// 在设置文件中写入 `worlds.world.generator`，文件不存在时新建
pub fn apply_void_generator(settings_file: &Path, generator: &str) -> FleetResult<()> {
    let mut root = if settings_file.exists() {
        let text = fs::read_to_string(settings_file)?;
        if text.trim().is_empty() {
            Value::Mapping(Mapping::new())
        } else {
            serde_yml::from_str(&text)
                .map_err(|e| FleetError::Serialization(format!("解析 {} 失败: {e}", settings_file.display())))?
        }
    } else {
        Value::Mapping(Mapping::new())
    };

    let worlds = child_mapping(&mut root, "worlds")?;
    let world = child_mapping(worlds, "world")?;
    if let Value::Mapping(map) = world {
        map.insert(
            Value::String("generator".to_string()),
            Value::String(generator.to_string()),
        );
    }

    let text = serde_yml::to_string(&root)
        .map_err(|e| FleetError::Serialization(format!("序列化设置失败: {e}")))?;
    fs::write(settings_file, text)?;
    Ok(())
}

fn child_mapping<'a>(value: &'a mut Value, key: &str) -> FleetResult<&'a mut Value> {
    let Value::Mapping(map) = value else {
        return Err(FleetError::Serialization(format!("设置节点不是映射: {key}")));
    };

    let key = Value::String(key.to_string());
    let needs_reset = !matches!(map.get(&key), Some(Value::Mapping(_)));
    if needs_reset {
        map.insert(key.clone(), Value::Mapping(Mapping::new()));
    }
    map.get_mut(&key)
        .ok_or_else(|| FleetError::Internal("设置节点插入后丢失".to_string()))
}

/// 删除上传内容中的插件、玩家数据、可执行文件、配置文件和嵌套归档
pub fn sanitize_upload(dir: &Path) -> FleetResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let lower = name.to_lowercase();

        if path.is_dir() {
            if lower == "plugins" || lower == "players" {
                fs::remove_dir_all(&path)?;
            } else {
                sanitize_upload(&path)?;
            }
        } else if lower.ends_with(".jar")
            || lower.ends_with(".properties")
            || lower.ends_with(".yml")
            || archive::is_zip_file(&path)
        {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// 深度优先查找包含 `level.dat` 的目录
pub fn find_world_folder(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name() == "level.dat")
        .and_then(|e| e.path().parent().map(Path::to_path_buf))
}

/// 解包、清理并把世界合并到 `world_dir`
pub fn install_world_archive(data: &[u8], world_dir: &Path) -> FleetResult<()> {
    fs::create_dir_all(world_dir)?;
    let staging = world_dir.join(STAGING_DIR);
    fs_utils::remove_path(&staging)?;

    let result = (|| {
        archive::unpack(data, &staging)?;
        sanitize_upload(&staging)?;
        let source = find_world_folder(&staging).ok_or_else(|| {
            FleetError::Archive("上传的世界中没有 level.dat".to_string())
        })?;
        fs_utils::copy_dir_all(&source, world_dir)
    })();

    fs_utils::remove_path(&staging)?;
    result
}

/// 通过 HTTP 下载自定义世界
pub struct HttpWorldInstaller {
    client: reqwest::Client,
    max_download_bytes: u64,
}

impl HttpWorldInstaller {
    pub fn new(config: &WorldConfig) -> FleetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_seconds))
            .build()
            .map_err(|e| FleetError::Network(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            max_download_bytes: config.max_download_bytes,
        })
    }

    async fn download(&self, url: &str) -> FleetResult<Vec<u8>> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FleetError::Network(format!("下载世界失败: {e}")))?;

        if let Some(length) = response.content_length() {
            if length > self.max_download_bytes {
                return Err(FleetError::Network(format!(
                    "世界文件过大: {length} 字节"
                )));
            }
        }

        let mut data = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FleetError::Network(format!("下载世界失败: {e}")))?
        {
            data.extend_from_slice(&chunk);
            if data.len() as u64 > self.max_download_bytes {
                return Err(FleetError::Network(format!(
                    "世界文件超过上限 {} 字节",
                    self.max_download_bytes
                )));
            }
        }
        Ok(data)
    }
}

#[async_trait]
impl WorldInstaller for HttpWorldInstaller {
    async fn install(&self, url: &str, world_dir: &Path) -> FleetResult<()> {
        let started = Instant::now();
        let data = match self.download(url).await {
            Ok(data) => data,
            Err(e) => {
                warn!("自定义世界下载失败 ({}): {}", url, e);
                return Err(e);
            }
        };
        info!("世界下载完成，耗时 {} ms", started.elapsed().as_millis());

        let started = Instant::now();
        let world_dir = world_dir.to_path_buf();
        tokio::task::spawn_blocking(move || install_world_archive(&data, &world_dir))
            .await
            .map_err(|e| FleetError::Internal(format!("安装世界任务失败: {e}")))??;
        info!("世界解压完成，耗时 {} ms", started.elapsed().as_millis());
        Ok(())
    }
}
