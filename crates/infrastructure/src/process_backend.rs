//! 基于本地进程的工作负载后端
//!
//! 每个后端句柄对应一台服务器。进程由监督任务持有：进程退出后先回调
//! `on_stop`，再通知等待中的 `stop`/`restart`，因此 `stop` 返回时停止处理已经完成。

use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fleet_core::{
    config::models::BackendConfig,
    traits::{BackendFactory, BackendListener, WorkloadBackend},
    FleetError, FleetResult, ServerSettings,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, error, info, warn};

const PROPERTIES_FILE: &str = "server.properties";

struct RunningProcess {
    stdin: Option<ChildStdin>,
    kill: Option<oneshot::Sender<()>>,
}

struct Inner {
    name: String,
    config: BackendConfig,
    listener: RwLock<Option<Weak<dyn BackendListener>>>,
    process: Mutex<Option<RunningProcess>>,
    settings: Mutex<Option<ServerSettings>>,
    running: AtomicBool,
    restarting: AtomicBool,
    last_activity_ms: AtomicI64,
    /// 每处理完一次进程退出加一
    exits: watch::Sender<u64>,
}

/// 本地进程后端
pub struct ProcessBackend {
    inner: Arc<Inner>,
}

impl ProcessBackend {
    pub fn new(name: &str, config: BackendConfig) -> Self {
        let (exits, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                config,
                listener: RwLock::new(None),
                process: Mutex::new(None),
                settings: Mutex::new(None),
                running: AtomicBool::new(false),
                restarting: AtomicBool::new(false),
                last_activity_ms: AtomicI64::new(0),
                exits,
            }),
        }
    }
}

/// 展开启动参数模板
pub fn expand_args(template: &[String], settings: &ServerSettings) -> Vec<String> {
    let mut args = Vec::with_capacity(template.len() + settings.jvm_args.len());
    for arg in template {
        if arg == "{jvm_args}" {
            args.extend(settings.jvm_args.iter().cloned());
            continue;
        }
        args.push(
            arg.replace("{memory}", &settings.memory_mb.to_string())
                .replace("{port}", &settings.port.to_string())
                .replace("{name}", &settings.name)
                .replace("{max_players}", &settings.max_players.to_string()),
        );
    }
    args
}

/// 更新 server.properties 中由节点决定的键，其余行保持原样
pub fn write_properties(dir: &Path, settings: &ServerSettings) -> FleetResult<()> {
    let path = dir.join(PROPERTIES_FILE);
    let existing = if path.exists() {
        fs::read_to_string(&path)?
    } else {
        String::new()
    };

    let mut pending = settings.properties();
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            let key = line.split('=').next().unwrap_or_default().trim();
            match pending.iter().position(|(k, _)| *k == key) {
                Some(index) if !line.trim_start().starts_with('#') => {
                    let (k, v) = pending.remove(index);
                    format!("{k}={v}")
                }
                _ => line.to_string(),
            }
        })
        .collect();
    lines.extend(pending.into_iter().map(|(k, v)| format!("{k}={v}")));

    fs::write(&path, lines.join("\n") + "\n")?;
    Ok(())
}

impl Inner {
    fn listener(&self) -> Option<Arc<dyn BackendListener>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    async fn launch(self: &Arc<Self>, settings: &ServerSettings) -> FleetResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(FleetError::already_online(&self.name));
        }

        match self.spawn_process(settings).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn spawn_process(self: &Arc<Self>, settings: &ServerSettings) -> FleetResult<()> {
        if self.config.write_properties {
            write_properties(&settings.working_dir, settings)?;
        }

        let args = expand_args(&self.config.args, settings);
        debug!("启动 {}: {} {:?}", self.name, self.config.program, args);

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .current_dir(&settings.working_dir)
            .envs(&settings.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FleetError::Backend(format!("启动进程失败 ({}): {e}", self.name)))?;

        let stdin = child.stdin.take();
        if let Some(stdout) = child.stdout.take() {
            self.spawn_output_reader(BufReader::new(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_output_reader(BufReader::new(stderr));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        *self.process.lock().await = Some(RunningProcess {
            stdin,
            kill: Some(kill_tx),
        });
        self.touch();

        tokio::spawn(Arc::clone(self).supervise(child, kill_rx));
        info!("服务器进程已启动: {} (端口 {})", self.name, settings.port);
        Ok(())
    }

    fn spawn_output_reader<R>(self: &Arc<Self>, reader: BufReader<R>)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                inner.touch();
                debug!(server = %inner.name, "{}", line);
            }
        });
    }

    async fn supervise(self: Arc<Self>, mut child: Child, kill_rx: oneshot::Receiver<()>) {
        let status = tokio::select! {
            status = child.wait() => status,
            Ok(()) = kill_rx => {
                warn!("强制结束服务器进程: {}", self.name);
                if let Err(e) = child.start_kill() {
                    error!("结束进程失败 ({}): {}", self.name, e);
                }
                child.wait().await
            }
        };

        match status {
            Ok(status) => info!("服务器进程已退出: {} ({})", self.name, status),
            Err(e) => error!("等待服务器进程失败 ({}): {}", self.name, e),
        }

        *self.process.lock().await = None;
        self.running.store(false, Ordering::SeqCst);

        if let Some(listener) = self.listener() {
            listener.on_stop().await;
        }
        self.exits.send_modify(|count| *count += 1);
    }

    async fn request_kill(&self) {
        if let Some(process) = self.process.lock().await.as_mut() {
            if let Some(kill) = process.kill.take() {
                let _ = kill.send(());
            }
        }
    }

    async fn write_line(&self, line: &str) -> FleetResult<()> {
        let mut guard = self.process.lock().await;
        let stdin = guard
            .as_mut()
            .and_then(|p| p.stdin.as_mut())
            .ok_or_else(|| FleetError::not_online(&self.name))?;

        stdin
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| FleetError::Backend(format!("写入控制台失败 ({}): {e}", self.name)))?;
        stdin.flush().await?;
        Ok(())
    }

    /// 停止进程并等待退出处理完成
    async fn stop_and_wait(&self, force: bool) -> FleetResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(FleetError::not_online(&self.name));
        }

        let mut exits = self.exits.subscribe();
        let seen = *exits.borrow_and_update();

        if force {
            self.request_kill().await;
        } else if let Err(e) = self.write_line(&self.config.stop_command).await {
            warn!("发送停止命令失败，改为强制结束 ({}): {}", self.name, e);
            self.request_kill().await;
        }

        let graceful = Duration::from_secs(self.config.graceful_stop_timeout_seconds);
        let exited = tokio::time::timeout(graceful, exits.wait_for(|count| *count > seen))
            .await
            .is_ok();
        if !exited {
            warn!("{} 未在 {:?} 内停止，强制结束", self.name, graceful);
            self.request_kill().await;
            let _ = exits.wait_for(|count| *count > seen).await;
        }
        Ok(())
    }

    async fn restart_sequence(self: Arc<Self>, settings: ServerSettings) {
        let listener = self.listener();
        if let Some(listener) = &listener {
            listener.on_restart_begin().await;
        }

        let result = match self.stop_and_wait(false).await {
            Ok(()) => self.launch(&settings).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                if let Some(listener) = &listener {
                    listener.on_start().await;
                }
            }
            Err(e) => error!("重启服务器失败 ({}): {}", self.name, e),
        }

        self.restarting.store(false, Ordering::SeqCst);
        if let Some(listener) = &listener {
            listener.on_restart_end().await;
        }
    }
}

#[async_trait]
impl WorkloadBackend for ProcessBackend {
    fn set_listener(&self, listener: Weak<dyn BackendListener>) {
        *self
            .inner
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    async fn start(&self, settings: &ServerSettings) -> FleetResult<()> {
        self.inner.launch(settings).await?;
        *self.inner.settings.lock().await = Some(settings.clone());

        if let Some(listener) = self.inner.listener() {
            listener.on_start().await;
        }
        Ok(())
    }

    async fn stop(&self, force: bool) -> FleetResult<()> {
        self.inner.stop_and_wait(force).await
    }

    async fn restart(&self) -> FleetResult<()> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(FleetError::not_online(&self.inner.name));
        }
        let settings = self
            .inner
            .settings
            .lock()
            .await
            .clone()
            .ok_or_else(|| FleetError::not_online(&self.inner.name))?;

        if self.inner.restarting.swap(true, Ordering::SeqCst) {
            debug!("{} 已在重启中", self.inner.name);
            return Ok(());
        }

        tokio::spawn(Arc::clone(&self.inner).restart_sequence(settings));
        Ok(())
    }

    async fn console_command(&self, command: &str) -> FleetResult<()> {
        self.inner.write_line(command).await
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst) || self.inner.restarting.load(Ordering::SeqCst)
    }

    fn last_activity(&self) -> Option<DateTime<Utc>> {
        match self.inner.last_activity_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }
}

/// 进程后端工厂
pub struct ProcessBackendFactory {
    config: BackendConfig,
}

impl ProcessBackendFactory {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

impl BackendFactory for ProcessBackendFactory {
    fn create(&self, server_name: &str) -> FleetResult<Arc<dyn WorkloadBackend>> {
        Ok(Arc::new(ProcessBackend::new(server_name, self.config.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingListener {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl BackendListener for CountingListener {
        async fn on_start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_restart_begin(&self) {}
        async fn on_restart_end(&self) {}
    }

    fn shell_config() -> BackendConfig {
        // 读到 stop 行就退出的最小“服务器”
        BackendConfig {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "echo ready; while read line; do [ \"$line\" = stop ] && exit 0; echo \"$line\"; done"
                    .to_string(),
            ],
            stop_command: "stop".to_string(),
            graceful_stop_timeout_seconds: 5,
            write_properties: true,
        }
    }

    fn settings(dir: &Path) -> ServerSettings {
        ServerSettings::new("alpha", dir.to_path_buf(), 30001, 1224)
    }

    #[test]
    fn test_expand_args() {
        let template = vec![
            "-Xmx{memory}M".to_string(),
            "{jvm_args}".to_string(),
            "--port={port}".to_string(),
        ];
        let settings = ServerSettings::new("alpha", "/tmp".into(), 25565, 1224);
        assert_eq!(
            expand_args(&template, &settings),
            vec!["-Xmx1224M", "-Dserver.name=alpha", "--port=25565"]
        );
    }

    #[test]
    fn test_write_properties_merges() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(PROPERTIES_FILE),
            "#comment\nmotd=Hello\nserver-port=1\n",
        )
        .unwrap();

        write_properties(dir.path(), &settings(dir.path())).unwrap();

        let text = fs::read_to_string(dir.path().join(PROPERTIES_FILE)).unwrap();
        assert!(text.contains("motd=Hello"));
        assert!(text.contains("server-port=30001"));
        assert!(!text.contains("server-port=1\n"));
        assert!(text.contains("max-players=15"));
        assert!(text.starts_with("#comment"));
    }

    #[tokio::test]
    async fn test_process_lifecycle() {
        let dir = TempDir::new().unwrap();
        let backend = ProcessBackend::new("alpha", shell_config());
        let listener = Arc::new(CountingListener::default());
        let weak: Weak<dyn BackendListener> = Arc::downgrade(&listener) as Weak<dyn BackendListener>;
        backend.set_listener(weak);

        assert!(matches!(
            backend.stop(false).await,
            Err(FleetError::NotOnline { .. })
        ));

        backend.start(&settings(dir.path())).await.unwrap();
        assert!(backend.is_running());
        assert!(backend.last_activity().is_some());
        assert_eq!(listener.starts.load(Ordering::SeqCst), 1);
        assert!(matches!(
            backend.start(&settings(dir.path())).await,
            Err(FleetError::AlreadyOnline { .. })
        ));

        backend.console_command("say hi").await.unwrap();
        backend.stop(false).await.unwrap();

        assert!(!backend.is_running());
        assert_eq!(listener.stops.load(Ordering::SeqCst), 1);
        assert!(dir.path().join(PROPERTIES_FILE).exists());
    }

    #[tokio::test]
    async fn test_force_stop_kills_process() {
        let dir = TempDir::new().unwrap();
        let mut config = shell_config();
        config.args = vec!["-c".to_string(), "sleep 60".to_string()];
        let backend = ProcessBackend::new("alpha", config);

        backend.start(&settings(dir.path())).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), backend.stop(true))
            .await
            .unwrap()
            .unwrap();
        assert!(!backend.is_running());
    }

    #[tokio::test]
    async fn test_graceful_stop_times_out_then_kills() {
        let dir = TempDir::new().unwrap();
        let mut config = shell_config();
        config.args = vec!["-c".to_string(), "sleep 60".to_string()];
        config.graceful_stop_timeout_seconds = 1;
        let backend = ProcessBackend::new("alpha", config);

        backend.start(&settings(dir.path())).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), backend.stop(false))
            .await
            .unwrap()
            .unwrap();
        assert!(!backend.is_running());
    }
}
