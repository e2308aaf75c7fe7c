//! 标准输入运维控制台
//!
//! 每行一条命令，直接调用注册表上的同步操作；不经过消息总线，也不产生响应码。

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use fleet_core::validate_name;
use fleet_dispatcher::CommandDispatcher;
use fleet_node::{FleetRegistry, GlobalAssetSync};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::shutdown::{ShutdownManager, ShutdownReason};

/// 控制台命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Create { name: String, server_type: String },
    Delete { name: String },
    Start { name: String },
    Stop { name: String },
    Cmd { name: String, command: String },
    Restart { name: String },
    Set { name: String, key: String, value: String },
    Rename { name: String, target: String },
    Regrab,
    Global { path: PathBuf },
    Supload { path: PathBuf },
    Allow,
    Disallow,
    Dump,
    Exit,
}

fn arg<'a>(args: &[&'a str], index: usize, usage: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(value) => Ok(value),
        None => bail!("用法: {}", usage),
    }
}

impl ConsoleCommand {
    /// 解析一行输入；空行返回 `None`。命令字不区分大小写。
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = args.first() else {
            return Ok(None);
        };

        let command = match first.to_lowercase().as_str() {
            "create" => ConsoleCommand::Create {
                name: arg(&args, 1, "create <名称> <类型>")?.to_string(),
                server_type: arg(&args, 2, "create <名称> <类型>")?.to_string(),
            },
            "delete" => ConsoleCommand::Delete {
                name: arg(&args, 1, "delete <名称>")?.to_string(),
            },
            "start" => ConsoleCommand::Start {
                name: arg(&args, 1, "start <名称>")?.to_string(),
            },
            "stop" => ConsoleCommand::Stop {
                name: arg(&args, 1, "stop <名称>")?.to_string(),
            },
            "cmd" => {
                let name = arg(&args, 1, "cmd <名称> <命令>")?.to_string();
                let command = args[2..].join(" ");
                if command.is_empty() {
                    bail!("用法: cmd <名称> <命令>");
                }
                ConsoleCommand::Cmd { name, command }
            }
            "restart" => ConsoleCommand::Restart {
                name: arg(&args, 1, "restart <名称>")?.to_string(),
            },
            "set" => ConsoleCommand::Set {
                name: arg(&args, 1, "set <名称> <键> <值>")?.to_string(),
                key: arg(&args, 2, "set <名称> <键> <值>")?.to_string(),
                value: args.get(3..).map(|rest| rest.join(" ")).unwrap_or_default(),
            },
            "rename" => ConsoleCommand::Rename {
                name: arg(&args, 1, "rename <名称> <新名称>")?.to_string(),
                target: arg(&args, 2, "rename <名称> <新名称>")?.to_string(),
            },
            "regrab" => ConsoleCommand::Regrab,
            "global" => ConsoleCommand::Global {
                path: PathBuf::from(arg(&args, 1, "global <文件>")?),
            },
            "supload" => ConsoleCommand::Supload {
                path: PathBuf::from(arg(&args, 1, "supload <文件>")?),
            },
            "allow" => ConsoleCommand::Allow,
            "disallow" => ConsoleCommand::Disallow,
            "dump" => ConsoleCommand::Dump,
            "exit" => ConsoleCommand::Exit,
            other => bail!("未知命令: {}", other),
        };
        Ok(Some(command))
    }
}

pub struct Console {
    registry: Arc<FleetRegistry>,
    assets: Arc<GlobalAssetSync>,
    dispatcher: Arc<CommandDispatcher>,
    shutdown: ShutdownManager,
    dump_dir: PathBuf,
}

impl Console {
    pub fn new(
        registry: Arc<FleetRegistry>,
        assets: Arc<GlobalAssetSync>,
        dispatcher: Arc<CommandDispatcher>,
        shutdown: ShutdownManager,
        dump_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            assets,
            dispatcher,
            shutdown,
            dump_dir: dump_dir.into(),
        }
    }

    /// 逐行读取标准输入，直到 EOF、`exit` 或关闭信号
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        info!("控制台已就绪");

        loop {
            let line = tokio::select! {
                _ = shutdown_rx.recv() => break,
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("标准输入已关闭，控制台退出");
                    break;
                }
                Err(e) => {
                    error!("读取标准输入失败: {}", e);
                    break;
                }
            };

            let command = match ConsoleCommand::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    warn!("{}", e);
                    continue;
                }
            };

            let exiting = command == ConsoleCommand::Exit;
            if let Err(e) = self.execute(command).await {
                error!("{:#}", e);
            }
            if exiting {
                break;
            }
        }
    }

    /// 执行一条命令；失败只返回错误，由调用方记录
    pub async fn execute(&self, command: ConsoleCommand) -> Result<()> {
        match command {
            ConsoleCommand::Create { name, server_type } => {
                if !validate_name(&name) {
                    bail!("名称不合法: {}", name);
                }
                if self.registry.create_server(&name, &server_type).await? {
                    info!("已创建服务器 {}", name);
                } else {
                    info!("名称已被占用: {}", name);
                }
            }
            ConsoleCommand::Delete { name } => {
                if self.registry.delete_server(&name, false).await? {
                    info!("已删除 {}", name);
                } else {
                    info!("{} 不存在", name);
                }
            }
            ConsoleCommand::Start { name } => {
                self.registry.start_server(&name).await?;
                info!("{} 正在启动", name);
            }
            ConsoleCommand::Stop { name } => {
                if !self.registry.stop_server(&name, false).await? {
                    info!("{} 不在本节点上", name);
                }
            }
            ConsoleCommand::Cmd { name, command } => {
                if !self.registry.console_command(&name, &command).await? {
                    info!("{} 不在本节点上", name);
                }
            }
            ConsoleCommand::Restart { name } => {
                if !self.registry.restart_server(&name).await? {
                    info!("{} 不在本节点上", name);
                }
            }
            ConsoleCommand::Set { name, key, value } => {
                if !self.registry.alter_metadata(&name, &key, &value).await? {
                    info!("{} 不在本节点上", name);
                }
            }
            ConsoleCommand::Rename { name, target } => {
                if !validate_name(&target) {
                    bail!("名称不合法: {}", target);
                }
                if self.registry.rename_server(&name, &target).await? {
                    info!("已将 {} 改名为 {}", name, target);
                } else {
                    info!("名称已被占用: {}", target);
                }
            }
            ConsoleCommand::Regrab => {
                info!("正在下载全局资源");
                let count = self.assets.refresh().await?;
                info!("全局资源下载完成，共 {} 个", count);
            }
            ConsoleCommand::Global { path } => {
                self.assets.publish_global_file(&path).await?;
            }
            ConsoleCommand::Supload { path } => {
                self.assets.upload_server_file(&path).await?;
            }
            ConsoleCommand::Allow => {
                self.registry.presence().set_accepting(true).await?;
            }
            ConsoleCommand::Disallow => {
                self.registry.presence().set_accepting(false).await?;
            }
            ConsoleCommand::Dump => {
                let path = self.dump(&self.dump_dir).await?;
                info!("状态已写入 {}", path.display());
            }
            ConsoleCommand::Exit => {
                self.shutdown.trigger(ShutdownReason::ConsoleExit).await;
            }
        }
        Ok(())
    }

    /// 把已加载服务器与执行中的串行化任务写入 `crash_<毫秒>.log`
    pub async fn dump(&self, dir: &Path) -> Result<PathBuf> {
        let mut out = String::new();
        let _ = writeln!(out, "# 节点 {}", self.registry.context().identity.address);
        let _ = writeln!(
            out,
            "accepting={}",
            self.registry.presence().is_accepting()
        );

        let _ = writeln!(out, "\n# 已加载服务器");
        for server in self.registry.list().await {
            let status = match server.persisted_status().await {
                Ok(status) => status.as_str().to_string(),
                Err(e) => format!("未知 ({})", e),
            };
            let port = server
                .port()
                .await
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "{} status={} running={} restarting={} port={}",
                server.name(),
                status,
                server.is_running().await,
                server.is_restarting(),
                port
            );
        }

        let _ = writeln!(out, "\n# 执行中的任务");
        for (key, since) in self.dispatcher.serializer().in_flight().await {
            let _ = writeln!(out, "{} since {}", key, since.to_rfc3339());
        }

        let path = dir.join(format!("crash_{}.log", Utc::now().timestamp_millis()));
        tokio::fs::write(&path, out)
            .await
            .with_context(|| format!("写入 {} 失败", path.display()))?;
        Ok(path)
    }
}
