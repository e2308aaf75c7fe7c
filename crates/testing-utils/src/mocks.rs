//! 协作方接口的内存实现
//!
//! 这些实现不依赖数据库、Redis 或真实进程，行为与生产实现的约定保持一致
//! （例如大小写不敏感的名称查找、后端回调的触发顺序）。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_core::{
    traits::{
        AllowList, BackendFactory, BackendListener, BlobInfo, BlobStore, MemoryProbe,
        PresenceRepository, ServerRepository, WorkloadBackend, WorldInstaller,
    },
    FleetError, FleetResult, ManagerPresence, MetadataUpdate, PresenceHeartbeat, ServerRecord,
    ServerSettings,
};

/// 服务器记录仓储的内存实现，按小写名称索引
#[derive(Debug, Clone, Default)]
pub struct MockServerRepository {
    records: Arc<Mutex<BTreeMap<String, ServerRecord>>>,
}

impl MockServerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ServerRecord>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.records.lock().unwrap();
            for record in records {
                map.insert(record.name_lower.clone(), record);
            }
        }
        repo
    }

    /// 直接写入记录（覆盖同名记录）
    pub fn put(&self, record: ServerRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.name_lower.clone(), record);
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn get(&self, name: &str) -> Option<ServerRecord> {
        self.records.lock().unwrap().get(&name.to_lowercase()).cloned()
    }
}

#[async_trait]
impl ServerRepository for MockServerRepository {
    async fn find_by_name(&self, name: &str) -> FleetResult<Option<ServerRecord>> {
        Ok(self.get(name))
    }

    async fn insert(&self, record: &ServerRecord) -> FleetResult<bool> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.name_lower) {
            return Ok(false);
        }
        records.insert(record.name_lower.clone(), record.clone());
        Ok(true)
    }

    async fn update_metadata(&self, name: &str, update: &MetadataUpdate) -> FleetResult<bool> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&name.to_lowercase()) {
            Some(record) => {
                update.apply_to(&mut record.metadata);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rename(&self, name: &str, target: &str) -> FleetResult<()> {
        let mut records = self.records.lock().unwrap();
        let target_lower = target.to_lowercase();
        if records.contains_key(&target_lower) && target_lower != name.to_lowercase() {
            return Err(FleetError::name_taken(target));
        }
        let mut record = records
            .remove(&name.to_lowercase())
            .ok_or_else(|| FleetError::unknown_server(name))?;
        record.name = target.to_string();
        record.name_lower = target_lower.clone();
        records.insert(target_lower, record);
        Ok(())
    }

    async fn delete(&self, name: &str) -> FleetResult<Option<ServerRecord>> {
        Ok(self.records.lock().unwrap().remove(&name.to_lowercase()))
    }

    async fn list_with_metadata_key(&self, key: &str) -> FleetResult<Vec<ServerRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.get(key).is_some_and(|v| !v.is_empty()))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> FleetResult<Vec<ServerRecord>> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }
}

/// 在线记录仓储的内存实现
#[derive(Debug, Clone, Default)]
pub struct MockPresenceRepository {
    rows: Arc<Mutex<HashMap<String, ManagerPresence>>>,
    heartbeats: Arc<AtomicUsize>,
}

impl MockPresenceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PresenceRepository for MockPresenceRepository {
    async fn upsert_heartbeat(&self, heartbeat: &PresenceHeartbeat) -> FleetResult<bool> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&heartbeat.address) {
            Some(row) => {
                row.port = heartbeat.port;
                row.free_mb = heartbeat.free_mb;
                row.last_heartbeat = heartbeat.timestamp;
                Ok(false)
            }
            None => {
                rows.insert(
                    heartbeat.address.clone(),
                    ManagerPresence {
                        address: heartbeat.address.clone(),
                        port: heartbeat.port,
                        free_mb: heartbeat.free_mb,
                        last_heartbeat: heartbeat.timestamp,
                        accepting: true,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn set_accepting(&self, address: &str, accepting: bool) -> FleetResult<()> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(address) {
            row.accepting = accepting;
        }
        Ok(())
    }

    async fn find(&self, address: &str) -> FleetResult<Option<ManagerPresence>> {
        Ok(self.rows.lock().unwrap().get(address).cloned())
    }

    async fn list(&self) -> FleetResult<Vec<ManagerPresence>> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn delete(&self, address: &str) -> FleetResult<()> {
        self.rows.lock().unwrap().remove(address);
        Ok(())
    }
}

/// 存储桶的内存实现
#[derive(Debug, Clone, Default)]
pub struct MockBlobStore {
    blobs: Arc<Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>>,
    fail_uploads: Arc<AtomicBool>,
    fail_renames: Arc<AtomicBool>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, filename: &str, data: Vec<u8>) {
        self.blobs
            .lock()
            .unwrap()
            .insert(filename.to_string(), (data, Utc::now()));
    }

    pub fn get(&self, filename: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(filename).map(|(d, _)| d.clone())
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(filename)
    }

    /// 之后的上传全部失败
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// 之后的重命名全部失败
    pub fn fail_renames(&self, fail: bool) {
        self.fail_renames.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn upload(&self, filename: &str, data: Vec<u8>) -> FleetResult<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(FleetError::DatabaseOperation("模拟上传失败".to_string()));
        }
        self.insert(filename, data);
        Ok(())
    }

    async fn download(&self, filename: &str) -> FleetResult<Option<Vec<u8>>> {
        Ok(self.get(filename))
    }

    async fn delete(&self, filename: &str) -> FleetResult<bool> {
        Ok(self.blobs.lock().unwrap().remove(filename).is_some())
    }

    async fn rename(&self, from: &str, to: &str) -> FleetResult<bool> {
        if self.fail_renames.load(Ordering::SeqCst) {
            return Err(FleetError::DatabaseOperation("模拟重命名失败".to_string()));
        }
        let mut blobs = self.blobs.lock().unwrap();
        match blobs.remove(from) {
            Some(blob) => {
                blobs.insert(to.to_string(), blob);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> FleetResult<Vec<BlobInfo>> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .iter()
            .map(|(filename, (data, uploaded_at))| BlobInfo {
                filename: filename.clone(),
                size: data.len() as u64,
                uploaded_at: *uploaded_at,
            })
            .collect())
    }
}

/// 后端替身：回调在调用方任务中同步触发
///
/// `stop` 返回前已经执行完 `on_stop`，与进程后端“停止处理完成后才返回”的约定一致。
#[derive(Default)]
pub struct MockBackend {
    listener: Mutex<Option<Weak<dyn BackendListener>>>,
    running: AtomicBool,
    last_activity: Mutex<Option<DateTime<Utc>>>,
    freeze_activity: AtomicBool,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    started: Mutex<Vec<ServerSettings>>,
    stops: Mutex<Vec<bool>>,
    commands: Mutex<Vec<String>>,
    restarts: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn listener(&self) -> Option<Arc<dyn BackendListener>> {
        self.listener.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// 手动设置最近活动时间
    pub fn set_last_activity(&self, at: Option<DateTime<Utc>>) {
        *self.last_activity.lock().unwrap() = at;
    }

    /// 启动后不再刷新活动时间，模拟卡在启动阶段的服务器
    pub fn freeze_activity(&self, freeze: bool) {
        self.freeze_activity.store(freeze, Ordering::SeqCst);
    }

    /// 模拟进程意外退出
    pub async fn simulate_exit(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(listener) = self.listener() {
            listener.on_stop().await;
        }
    }

    pub fn started_settings(&self) -> Vec<ServerSettings> {
        self.started.lock().unwrap().clone()
    }

    pub fn stop_calls(&self) -> Vec<bool> {
        self.stops.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadBackend for MockBackend {
    fn set_listener(&self, listener: Weak<dyn BackendListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    async fn start(&self, settings: &ServerSettings) -> FleetResult<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(FleetError::already_online(&settings.name));
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(FleetError::Backend("模拟启动失败".to_string()));
        }

        self.running.store(true, Ordering::SeqCst);
        if !self.freeze_activity.load(Ordering::SeqCst) {
            *self.last_activity.lock().unwrap() = Some(Utc::now());
        }
        self.started.lock().unwrap().push(settings.clone());

        if let Some(listener) = self.listener() {
            listener.on_start().await;
        }
        Ok(())
    }

    async fn stop(&self, force: bool) -> FleetResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(FleetError::not_online("mock"));
        }
        self.stops.lock().unwrap().push(force);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(FleetError::Backend("模拟停止失败".to_string()));
        }

        self.running.store(false, Ordering::SeqCst);
        if let Some(listener) = self.listener() {
            listener.on_stop().await;
        }
        Ok(())
    }

    async fn restart(&self) -> FleetResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(FleetError::not_online("mock"));
        }
        self.restarts.fetch_add(1, Ordering::SeqCst);

        let listener = self.listener();
        if let Some(listener) = &listener {
            listener.on_restart_begin().await;
        }
        self.running.store(false, Ordering::SeqCst);
        if let Some(listener) = &listener {
            listener.on_stop().await;
        }
        self.running.store(true, Ordering::SeqCst);
        if let Some(listener) = &listener {
            listener.on_start().await;
            listener.on_restart_end().await;
        }
        Ok(())
    }

    async fn console_command(&self, command: &str) -> FleetResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(FleetError::not_online("mock"));
        }
        self.commands.lock().unwrap().push(command.to_string());
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self.last_activity.lock().unwrap()
    }
}

/// 记录每个服务器最近创建的后端
#[derive(Default)]
pub struct MockBackendFactory {
    backends: Mutex<HashMap<String, Arc<MockBackend>>>,
    created: AtomicUsize,
    failing_starts: Mutex<HashSet<String>>,
    frozen: AtomicBool,
}

impl MockBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某个服务器最近一次创建的后端
    pub fn backend(&self, server_name: &str) -> Option<Arc<MockBackend>> {
        self.backends
            .lock()
            .unwrap()
            .get(&server_name.to_lowercase())
            .cloned()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// 之后为该服务器创建的后端启动即失败
    pub fn fail_starts_for(&self, server_name: &str) {
        self.failing_starts
            .lock()
            .unwrap()
            .insert(server_name.to_lowercase());
    }

    /// 之后创建的后端都不产生活动
    pub fn freeze_activity(&self, freeze: bool) {
        self.frozen.store(freeze, Ordering::SeqCst);
    }
}

impl BackendFactory for MockBackendFactory {
    fn create(&self, server_name: &str) -> FleetResult<Arc<dyn WorkloadBackend>> {
        let key = server_name.to_lowercase();
        let backend = Arc::new(MockBackend::new());
        backend.set_fail_start(self.failing_starts.lock().unwrap().contains(&key));
        backend.freeze_activity(self.frozen.load(Ordering::SeqCst));

        self.created.fetch_add(1, Ordering::SeqCst);
        self.backends.lock().unwrap().insert(key, backend.clone());
        Ok(backend)
    }
}

/// 固定值的内存探针
#[derive(Debug, Default)]
pub struct FixedMemoryProbe {
    free_mb: AtomicU64,
    failing: AtomicBool,
}

impl FixedMemoryProbe {
    pub fn new(free_mb: u64) -> Self {
        Self {
            free_mb: AtomicU64::new(free_mb),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set(&self, free_mb: u64) {
        self.free_mb.store(free_mb, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn free_mb(&self) -> FleetResult<u64> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FleetError::Internal("模拟内存探测失败".to_string()));
        }
        Ok(self.free_mb.load(Ordering::SeqCst))
    }
}

/// 记录登记地址的白名单
#[derive(Debug, Default)]
pub struct RecordingAllowList {
    addresses: Mutex<Vec<String>>,
}

impl RecordingAllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.addresses.lock().unwrap().clone()
    }
}

#[async_trait]
impl AllowList for RecordingAllowList {
    async fn allow(&self, address: &str) -> FleetResult<()> {
        self.addresses.lock().unwrap().push(address.to_string());
        Ok(())
    }
}

/// 不访问网络的世界安装器，在目标目录写入 `level.dat`
#[derive(Debug, Default)]
pub struct FakeWorldInstaller {
    installs: Mutex<Vec<(String, PathBuf)>>,
    failing: AtomicBool,
}

impl FakeWorldInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn installs(&self) -> Vec<(String, PathBuf)> {
        self.installs.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorldInstaller for FakeWorldInstaller {
    async fn install(&self, url: &str, world_dir: &Path) -> FleetResult<()> {
        self.installs
            .lock()
            .unwrap()
            .push((url.to_string(), world_dir.to_path_buf()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(FleetError::Network("模拟下载失败".to_string()));
        }
        std::fs::create_dir_all(world_dir)?;
        std::fs::write(world_dir.join("level.dat"), url.as_bytes())?;
        Ok(())
    }
}
