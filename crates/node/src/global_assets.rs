//! 全局资源同步
//!
//! 全局存储桶中的每个对象都是一个 zip，下载到全局资源目录后原地解压。
//! 本地副本与远端字节相同时跳过写入，但仍会解压。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fleet_core::{Command, FleetError, FleetResult};
use fleet_infrastructure::archive;
use tracing::{debug, info, warn};

use crate::context::NodeContext;

pub struct GlobalAssetSync {
    context: Arc<NodeContext>,
}

fn file_name_of(path: &Path) -> FleetResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| FleetError::Internal(format!("无效的文件路径: {}", path.display())))
}

impl GlobalAssetSync {
    pub fn new(context: Arc<NodeContext>) -> Self {
        Self { context }
    }

    fn asset_dir(&self) -> PathBuf {
        self.context.workspace.paths().global_asset_dir.clone()
    }

    /// 下载并解压全部全局资源，返回处理的对象数
    pub async fn refresh(&self) -> FleetResult<usize> {
        let dir = self.asset_dir();
        tokio::fs::create_dir_all(&dir).await?;

        let mut processed = 0;
        for blob in self.context.global_files.list().await? {
            if blob.filename.contains('/') || blob.filename.contains("..") {
                warn!("跳过可疑的全局资源名: {}", blob.filename);
                continue;
            }

            let Some(data) = self.context.global_files.download(&blob.filename).await? else {
                continue;
            };
            info!(
                "同步全局资源 {} ({} 字节, 上传于 {})",
                blob.filename, blob.size, blob.uploaded_at
            );

            let local = dir.join(&blob.filename);
            let unchanged = match tokio::fs::read(&local).await {
                Ok(existing) => existing == data,
                Err(_) => false,
            };
            if unchanged {
                debug!("{} 内容未变化，跳过写入", blob.filename);
            } else {
                tokio::fs::write(&local, &data).await?;
            }

            if let Err(e) = archive::unpack_blocking(data, dir.clone()).await {
                warn!("解压全局资源 {} 失败: {}", blob.filename, e);
                continue;
            }
            processed += 1;
        }
        Ok(processed)
    }

    /// 上传文件到全局存储桶并通知所有节点重新同步
    pub async fn publish_global_file(&self, path: &Path) -> FleetResult<String> {
        let filename = file_name_of(path)?;
        let data = tokio::fs::read(path).await?;
        self.context.global_files.upload(&filename, data).await?;
        info!("已上传全局资源 {}", filename);

        self.context
            .bus
            .publish(&self.context.channels.global, &Command::NewGlobalFile.encode())
            .await?;
        Ok(filename)
    }

    /// 直接上传文件到服务器存储桶（例如手工准备的存档）
    pub async fn upload_server_file(&self, path: &Path) -> FleetResult<String> {
        let filename = file_name_of(path)?;
        let data = tokio::fs::read(path).await?;
        self.context.server_files.upload(&filename, data).await?;
        info!("已上传服务器文件 {}", filename);
        Ok(filename)
    }
}
