use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use fleet_core::{metadata_keys, FleetResult, MetadataUpdate};
use fleet_node::NodeContext;
use tracing::{debug, error, info, warn};

/// 恢复服务接口
#[async_trait]
pub trait RecoveryService: Send + Sync {
    /// 节点启动时清理上次崩溃遗留的状态
    async fn recover_node_state(&self) -> FleetResult<RecoveryReport>;
}

/// 恢复报告
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// 清除了 STATUS/SOURCE 的服务器
    pub reconciled: Vec<String>,
    /// 本地目录仍在、已补传存档的服务器
    pub uploaded: Vec<String>,
    /// SOURCE 指向其他节点而跳过的记录数
    pub foreign: usize,
    pub recovery_duration_ms: u64,
    pub errors: Vec<String>,
}

/// 崩溃恢复
///
/// SOURCE 主机等于本节点地址的记录不可能在崩溃后仍然存活：清除其 STATUS 和
/// SOURCE，若本地工作目录还在则立即打包上传。单条记录失败只记录在报告里。
pub struct CrashRecoveryService {
    context: Arc<NodeContext>,
}

impl CrashRecoveryService {
    pub fn new(context: Arc<NodeContext>) -> Self {
        Self { context }
    }

    async fn reconcile(&self, name: &str, report: &mut RecoveryReport) {
        let update = MetadataUpdate::new()
            .unset(metadata_keys::STATUS)
            .unset(metadata_keys::SOURCE);
        if let Err(e) = self.context.write_metadata(name, &update).await {
            error!("清除 {} 的运行状态失败: {}", name, e);
            report.errors.push(format!("{name}: {e}"));
            return;
        }
        report.reconciled.push(name.to_string());

        match self
            .context
            .workspace
            .archive_and_upload(name, self.context.server_files.as_ref())
            .await
        {
            Ok(true) => {
                info!("{} 的本地文件仍在，已上传", name);
                report.uploaded.push(name.to_string());
            }
            Ok(false) => debug!("{} 没有本地文件", name),
            Err(e) => {
                warn!("上传 {} 的遗留文件失败: {}", name, e);
                report.errors.push(format!("{name}: {e}"));
            }
        }
    }
}

#[async_trait]
impl RecoveryService for CrashRecoveryService {
    async fn recover_node_state(&self) -> FleetResult<RecoveryReport> {
        let started = Instant::now();
        let address = &self.context.identity.address;
        info!("开始修复上次运行遗留的服务器状态 ({})", address);

        let mut report = RecoveryReport::default();
        let records = self
            .context
            .servers
            .list_with_metadata_key(metadata_keys::SOURCE)
            .await?;

        for record in records {
            match record.source_host() {
                Some(host) if host == address.as_str() => {
                    self.reconcile(&record.name, &mut report).await
                }
                Some(_) => report.foreign += 1,
                None => {}
            }
        }

        report.recovery_duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "状态修复完成: 清理 {} 个, 补传 {} 个, 错误 {} 个, 耗时 {} ms",
            report.reconciled.len(),
            report.uploaded.len(),
            report.errors.len(),
            report.recovery_duration_ms
        );
        Ok(report)
    }
}
