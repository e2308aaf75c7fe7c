use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use fleet_core::AppConfig;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod console;
mod shutdown;

use app::{Application, StartupOptions};
use shutdown::{ShutdownManager, ShutdownReason};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("realm-fleet")
        .version("1.0.0")
        .about("游戏服务器集群管理节点")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径（缺省时依次查找 config/fleet.toml、fleet.toml）"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("skip-downloads")
                .long("skip-downloads")
                .help("启动时不下载全局资源")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("fix-names")
                .long("fix-names")
                .help("启动时把名称不合法的服务器改为随机名称")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("block")
                .long("block")
                .help("启动后不接受新的服务器")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mut config = AppConfig::load(config_path.map(String::as_str)).with_context(|| {
        format!(
            "加载配置失败: {}",
            config_path.map(String::as_str).unwrap_or("<默认路径>")
        )
    })?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.logging.format = format.clone();
    }
    if matches.get_flag("block") {
        config.node.accept_on_startup = false;
    }
    let options = StartupOptions {
        skip_downloads: matches.get_flag("skip-downloads"),
        fix_names: matches.get_flag("fix-names"),
    };

    init_logging(&config.logging.level, &config.logging.format)?;

    info!("启动集群管理节点");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let shutdown_timeout = Duration::from_secs(config.fleet.shutdown_timeout_seconds + 10);
    let console_enabled = config.node.console_enabled;

    let app = Arc::new(Application::new(config, options).await?);
    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let app = Arc::clone(&app);
        let shutdown_manager = shutdown_manager.clone();
        tokio::spawn(async move { app.run(shutdown_manager).await })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            shutdown_manager.trigger(ShutdownReason::Signal).await;
        }
        _ = shutdown_manager.wait_for_shutdown() => {}
        result = &mut app_handle => {
            report_exit(result);
            shutdown_manager.trigger(ShutdownReason::Fault).await;
            return finish(console_enabled);
        }
    }

    if let Some(reason) = shutdown_manager.reason().await {
        info!("关闭原因: {reason}，等待节点清理");
    }

    match tokio::time::timeout(shutdown_timeout, app_handle).await {
        Ok(result) => report_exit(result),
        Err(_) => warn!("节点关闭超时，强制退出"),
    }

    finish(console_enabled)
}

fn report_exit(result: Result<Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("节点已关闭"),
        Ok(Err(e)) => error!("节点运行失败: {e:#}"),
        Err(e) => error!("节点任务异常: {e}"),
    }
}

fn finish(console_enabled: bool) -> Result<()> {
    info!("集群管理节点已退出");
    if console_enabled {
        // 阻塞中的标准输入读取会拖住运行时退出
        std::process::exit(0);
    }
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 等待关闭信号；信号处理器安装失败时只记录日志并一直等待
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
