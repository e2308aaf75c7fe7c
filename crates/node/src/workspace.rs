//! 服务器工作目录的准备与归档
//!
//! 启动前：有存档则下载解包并补回插件，否则从模板初始化（遗留目录先归档到
//! `stale_archive_dir` 再丢弃）。两种情况最后都会覆盖一次模板。
//! 停止后：删除可再生的文件，插件替换为占位文件，打包上传，然后删除目录。

use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use fleet_core::{
    config::models::{ArchiveConfig, PathsConfig, WorldConfig},
    traits::{archive_key, BlobStore},
    FleetError, FleetResult,
};
use fleet_infrastructure::{archive, fs_utils};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Workspace {
    paths: PathsConfig,
    archive: ArchiveConfig,
    world: WorldConfig,
}

async fn blocking<T, F>(task: F) -> FleetResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> FleetResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| FleetError::Internal(format!("文件任务失败: {e}")))?
}

impl Workspace {
    pub fn new(paths: PathsConfig, archive: ArchiveConfig, world: WorldConfig) -> Self {
        Self {
            paths,
            archive,
            world,
        }
    }

    pub fn paths(&self) -> &PathsConfig {
        &self.paths
    }

    /// 服务器工作目录；名称不能跳出服务器根目录
    pub fn server_dir(&self, name: &str) -> FleetResult<PathBuf> {
        let path = Path::new(name);
        let single = path.components().count() == 1
            && matches!(path.components().next(), Some(Component::Normal(_)));
        if name.is_empty() || !single {
            return Err(FleetError::name_invalid(name));
        }
        Ok(self.paths.servers_dir.join(name))
    }

    pub fn world_dir(&self, name: &str) -> FleetResult<PathBuf> {
        Ok(self.server_dir(name)?.join(&self.world.world_dir))
    }

    pub fn settings_file(&self, name: &str) -> FleetResult<PathBuf> {
        Ok(self.server_dir(name)?.join(&self.world.settings_file))
    }

    pub fn void_generator(&self) -> &str {
        &self.world.void_generator
    }

    /// 依次覆盖基础模板和类型模板
    pub fn apply_templates(&self, dir: &Path, server_type: Option<&str>) -> FleetResult<()> {
        if self.paths.base_template_dir.is_dir() {
            fs_utils::copy_dir_all(&self.paths.base_template_dir, dir)?;
        } else {
            warn!("基础模板目录不存在: {}", self.paths.base_template_dir.display());
        }

        if let Some(server_type) = server_type {
            let type_dir = self.paths.type_template_dir.join(server_type);
            if type_dir.is_dir() {
                fs_utils::copy_dir_all(&type_dir, dir)?;
            } else {
                warn!("缺少服务器类型模板: {}", server_type);
            }
        }
        Ok(())
    }

    /// 用插件库中的最新版本替换占位文件；插件库里没有的插件直接丢弃
    pub fn restore_plugins(&self, dir: &Path) -> FleetResult<usize> {
        let plugins = dir.join(&self.archive.plugin_dir);
        if !plugins.is_dir() {
            return Ok(0);
        }

        let entries = fs::read_dir(&plugins)?.collect::<Result<Vec<_>, _>>()?;
        let mut restored = 0;
        for entry in entries {
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            let original = file_name
                .strip_suffix(&self.archive.placeholder_suffix)
                .unwrap_or(&file_name)
                .to_string();
            if !original.ends_with(&self.archive.plugin_extension) {
                continue;
            }

            fs::remove_file(entry.path())?;
            let library_copy = self.paths.plugin_library_dir.join(&original);
            if library_copy.is_file() {
                fs::copy(&library_copy, plugins.join(&original))?;
                restored += 1;
            } else {
                debug!("插件库中没有 {}，已移除", original);
            }
        }
        Ok(restored)
    }

    /// 删除可再生内容，并把插件二进制替换为空的占位文件
    pub fn prepare_for_upload(&self, dir: &Path) -> FleetResult<()> {
        for relative in &self.archive.strip_paths {
            fs_utils::remove_path(&dir.join(relative))?;
        }

        let plugins = dir.join(&self.archive.plugin_dir);
        if !plugins.is_dir() {
            return Ok(());
        }
        let entries = fs::read_dir(&plugins)?.collect::<Result<Vec<_>, _>>()?;
        for entry in entries {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_file() && file_name.ends_with(&self.archive.plugin_extension) {
                fs::remove_file(entry.path())?;
                fs::File::create(
                    plugins.join(format!("{file_name}{}", self.archive.placeholder_suffix)),
                )?;
            }
        }
        Ok(())
    }

    /// 把遗留目录归档到 `stale_archive_dir/<name>_<millis>.zip`
    pub fn archive_stale(&self, name: &str, dir: &Path) -> FleetResult<PathBuf> {
        let target = self
            .paths
            .stale_archive_dir
            .join(format!("{}_{}.zip", name, Utc::now().timestamp_millis()));
        archive::pack_directory_to_file(dir, &target)?;
        Ok(target)
    }

    /// 准备工作目录，返回是否从存档恢复
    pub async fn materialize(
        &self,
        name: &str,
        server_type: Option<&str>,
        blobs: &dyn BlobStore,
    ) -> FleetResult<bool> {
        let dir = self.server_dir(name)?;
        let workspace = self.clone();
        let name_owned = name.to_string();
        let server_type = server_type.map(str::to_string);

        match blobs.download(&archive_key(name)).await? {
            Some(data) => {
                info!("从存档恢复 {} ({} 字节)", name, data.len());
                archive::unpack_blocking(data, dir.clone()).await?;
                blocking(move || {
                    let restored = workspace.restore_plugins(&dir)?;
                    debug!("{} 恢复了 {} 个插件", name_owned, restored);
                    workspace.apply_templates(&dir, server_type.as_deref())
                })
                .await?;
                Ok(true)
            }
            None => {
                info!("首次初始化 ({})", name);
                blocking(move || {
                    if dir.exists() {
                        let stale = workspace.archive_stale(&name_owned, &dir)?;
                        warn!("发现遗留目录，已归档到 {}", stale.display());
                        fs_utils::remove_path(&dir)?;
                    }
                    fs::create_dir_all(&dir)?;
                    workspace.apply_templates(&dir, server_type.as_deref())
                })
                .await?;
                Ok(false)
            }
        }
    }

    /// 打包上传工作目录，成功后删除目录；目录不存在时返回 false
    pub async fn archive_and_upload(&self, name: &str, blobs: &dyn BlobStore) -> FleetResult<bool> {
        let dir = self.server_dir(name)?;
        if !dir.is_dir() {
            return Ok(false);
        }

        let workspace = self.clone();
        let source = dir.clone();
        let data = blocking(move || {
            workspace.prepare_for_upload(&source)?;
            archive::pack_directory(&source)
        })
        .await?;

        info!("上传 {} 的存档 ({} 字节)", name, data.len());
        blobs.upload(&archive_key(name), data).await?;

        blocking(move || fs_utils::remove_path(&dir)).await?;
        Ok(true)
    }

    /// 删除工作目录（不上传）
    pub async fn discard(&self, name: &str) -> FleetResult<()> {
        let dir = self.server_dir(name)?;
        blocking(move || fs_utils::remove_path(&dir)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_testing_utils::MockBlobStore;
    use tempfile::TempDir;

    fn workspace(root: &Path) -> Workspace {
        let paths = PathsConfig {
            servers_dir: root.join("servers"),
            base_template_dir: root.join("commons"),
            type_template_dir: root.join("servertypes"),
            stale_archive_dir: root.join("tmp"),
            plugin_library_dir: root.join("library"),
            global_asset_dir: root.to_path_buf(),
        };
        fs::create_dir_all(root.join("commons/plugins")).unwrap();
        fs::write(root.join("commons/spigot.jar"), "bin").unwrap();
        fs::create_dir_all(root.join("servertypes/vanilla")).unwrap();
        fs::write(root.join("servertypes/vanilla/server.properties"), "motd=v").unwrap();
        fs::create_dir_all(root.join("library")).unwrap();
        fs::write(root.join("library/Essentials.jar"), "v2").unwrap();
        Workspace::new(paths, ArchiveConfig::default(), WorldConfig::default())
    }

    #[test]
    fn test_server_dir_rejects_traversal() {
        let root = TempDir::new().unwrap();
        let ws = workspace(root.path());
        assert!(ws.server_dir("alpha").is_ok());
        assert!(ws.server_dir("../etc").is_err());
        assert!(ws.server_dir("a/b").is_err());
        assert!(ws.server_dir("").is_err());
    }

    #[tokio::test]
    async fn test_first_time_setup_archives_stale_dir() {
        let root = TempDir::new().unwrap();
        let ws = workspace(root.path());
        let blobs = MockBlobStore::new();
        let dir = ws.server_dir("alpha").unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("old.txt"), "stale").unwrap();

        let restored = ws.materialize("alpha", Some("vanilla"), &blobs).await.unwrap();

        assert!(!restored);
        assert!(!dir.join("old.txt").exists());
        assert!(dir.join("spigot.jar").exists());
        assert!(dir.join("server.properties").exists());
        let stale: Vec<_> = fs::read_dir(root.path().join("tmp")).unwrap().collect();
        assert_eq!(stale.len(), 1);
    }

    #[tokio::test]
    async fn test_upload_then_restore_round_trips_plugins() {
        let root = TempDir::new().unwrap();
        let ws = workspace(root.path());
        let blobs = MockBlobStore::new();
        let dir = ws.server_dir("alpha").unwrap();
        fs::create_dir_all(dir.join("plugins/PlayerRealms/plugins")).unwrap();
        fs::write(dir.join("plugins/Essentials.jar"), "v1").unwrap();
        fs::write(dir.join("plugins/Custom.jar"), "c").unwrap();
        fs::write(dir.join("plugins/config.yml"), "keep").unwrap();
        fs::write(dir.join("spigot.jar"), "bin").unwrap();
        fs::write(dir.join("world.dat"), "save").unwrap();

        assert!(ws.archive_and_upload("alpha", &blobs).await.unwrap());
        assert!(!dir.exists());
        assert!(blobs.contains("alpha.zip"));

        let restored = ws.materialize("alpha", Some("vanilla"), &blobs).await.unwrap();
        assert!(restored);
        assert_eq!(fs::read_to_string(dir.join("plugins/Essentials.jar")).unwrap(), "v2");
        assert!(!dir.join("plugins/Custom.jar").exists());
        assert!(!dir.join("plugins/Custom.jar.temp").exists());
        assert!(!dir.join("plugins/Essentials.jar.temp").exists());
        assert_eq!(fs::read_to_string(dir.join("plugins/config.yml")).unwrap(), "keep");
        assert_eq!(fs::read_to_string(dir.join("world.dat")).unwrap(), "save");
        assert!(dir.join("spigot.jar").exists());
    }

    #[test]
    fn test_prepare_for_upload_strips_payloads() {
        let root = TempDir::new().unwrap();
        let ws = workspace(root.path());
        let dir = root.path().join("work");
        fs::create_dir_all(dir.join("plugins/PlayerRealms/plugins")).unwrap();
        fs::write(dir.join("plugins/PlayerRealms/plugins/x.jar"), "x").unwrap();
        fs::write(dir.join("plugins/A.jar"), "a").unwrap();
        fs::write(dir.join("core"), "dump").unwrap();

        ws.prepare_for_upload(&dir).unwrap();

        assert!(!dir.join("plugins/PlayerRealms/plugins").exists());
        assert!(!dir.join("core").exists());
        assert!(!dir.join("plugins/A.jar").exists());
        assert_eq!(fs::read(dir.join("plugins/A.jar.temp")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_upload_missing_dir_is_noop() {
        let root = TempDir::new().unwrap();
        let ws = workspace(root.path());
        let blobs = MockBlobStore::new();
        assert!(!ws.archive_and_upload("ghost", &blobs).await.unwrap());
        assert!(!blobs.contains("ghost.zip"));
    }
}
