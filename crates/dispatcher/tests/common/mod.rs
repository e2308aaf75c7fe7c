#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fleet_core::{
    config::models::{ArchiveConfig, ChannelConfig, PathsConfig, WorldConfig},
    CommandResponse, NodeIdentity, ResponseCode,
};
use fleet_dispatcher::CommandDispatcher;
use fleet_node::{
    FleetRegistry, FleetTimings, GlobalAssetSync, NodeContext, PresencePublisher, Workspace,
};
use fleet_testing_utils::{
    FakeWorldInstaller, FixedMemoryProbe, InMemoryMessageBus, MockBackendFactory, MockBlobStore,
    MockPresenceRepository, MockServerRepository, RecordingAllowList, TestEnv,
};
use tempfile::TempDir;

pub const NODE_ADDRESS: &str = "10.0.0.1";

pub struct Harness {
    pub root: TempDir,
    pub context: Arc<NodeContext>,
    pub repo: MockServerRepository,
    pub server_files: MockBlobStore,
    pub global_files: MockBlobStore,
    pub bus: InMemoryMessageBus,
    pub backends: Arc<MockBackendFactory>,
    pub memory: Arc<FixedMemoryProbe>,
    pub allow_list: Arc<RecordingAllowList>,
    pub presence: Arc<PresencePublisher>,
    pub registry: Arc<FleetRegistry>,
    pub dispatcher: Arc<CommandDispatcher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_address(NODE_ADDRESS)
    }

    pub fn with_address(address: &str) -> Self {
        let root = TempDir::new().unwrap();
        let base = root.path();
        fs::create_dir_all(base.join("commons")).unwrap();
        fs::write(base.join("commons/spigot.jar"), "bin").unwrap();
        fs::create_dir_all(base.join("servertypes/vanilla")).unwrap();

        let paths = PathsConfig {
            servers_dir: base.join("servers"),
            base_template_dir: base.join("commons"),
            type_template_dir: base.join("servertypes"),
            stale_archive_dir: base.join("tmp"),
            plugin_library_dir: base.join("library"),
            global_asset_dir: base.join("global"),
        };

        let repo = MockServerRepository::new();
        let server_files = MockBlobStore::new();
        let global_files = MockBlobStore::new();
        let bus = InMemoryMessageBus::new();
        let backends = Arc::new(MockBackendFactory::new());
        let memory = Arc::new(FixedMemoryProbe::new(64 * 1024));
        let allow_list = Arc::new(RecordingAllowList::new());

        let context = Arc::new(NodeContext {
            identity: NodeIdentity::new(address, 8484),
            servers: Arc::new(repo.clone()),
            presence: Arc::new(MockPresenceRepository::new()),
            server_files: Arc::new(server_files.clone()),
            global_files: Arc::new(global_files.clone()),
            bus: Arc::new(bus.clone()),
            backends: backends.clone(),
            memory: memory.clone(),
            world_installer: Arc::new(FakeWorldInstaller::new()),
            workspace: Workspace::new(paths, ArchiveConfig::default(), WorldConfig::default()),
            channels: ChannelConfig::default(),
            timings: FleetTimings {
                heartbeat_interval: Duration::from_millis(20),
                watchdog_poll: Duration::from_millis(20),
                startup_timeout: Duration::from_secs(60),
            },
            admission_margin_mb: 8192,
        });
        let presence = Arc::new(PresencePublisher::new(context.clone(), true));
        let registry = Arc::new(FleetRegistry::new(context.clone(), presence.clone()));
        let assets = Arc::new(GlobalAssetSync::new(context.clone()));
        let dispatcher = CommandDispatcher::new(registry.clone(), assets, allow_list.clone());

        Self {
            root,
            context,
            repo,
            server_files,
            global_files,
            bus,
            backends,
            memory,
            allow_list,
            presence,
            registry,
            dispatcher,
        }
    }

    pub fn server_dir(&self, name: &str) -> PathBuf {
        self.root.path().join("servers").join(name)
    }

    /// 已发布的全部响应
    pub async fn responses(&self) -> Vec<CommandResponse> {
        self.bus
            .published("manager_response")
            .await
            .iter()
            .filter_map(|payload| CommandResponse::parse(payload))
            .collect()
    }

    /// 某个关联ID收到的响应码
    pub async fn responses_for(&self, request_id: &str) -> Vec<ResponseCode> {
        self.responses()
            .await
            .into_iter()
            .filter(|r| r.request_id == request_id)
            .map(|r| r.code)
            .collect()
    }

    /// 处理一条消息并等待串行化任务完成，返回该请求的响应码
    pub async fn send(&self, payload: &str) -> Vec<ResponseCode> {
        if let Some(handle) = self.dispatcher.handle_message(payload).await {
            handle.await.unwrap();
        }
        let request_id = payload.split_whitespace().nth(1).unwrap_or_default();
        self.responses_for(request_id).await
    }

    /// 等待某个关联ID收到响应
    pub async fn wait_response(&self, request_id: &str) -> Option<ResponseCode> {
        let bus = self.bus.clone();
        let id = request_id.to_string();
        let arrived = TestEnv::wait_for(
            || {
                let bus = bus.clone();
                let id = id.clone();
                async move {
                    bus.published("manager_response")
                        .await
                        .iter()
                        .any(|p| p.split_whitespace().next() == Some(id.as_str()))
                }
            },
            Duration::from_secs(5),
        )
        .await;
        if !arrived {
            return None;
        }
        self.responses_for(request_id).await.first().copied()
    }
}
