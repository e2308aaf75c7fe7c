#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fleet_core::{
    config::models::{ArchiveConfig, ChannelConfig, PathsConfig, WorldConfig},
    NodeIdentity, ServerRecord,
};
use fleet_node::{FleetRegistry, FleetTimings, NodeContext, PresencePublisher, Workspace};
use fleet_testing_utils::{
    FakeWorldInstaller, FixedMemoryProbe, InMemoryMessageBus, MockBackendFactory, MockBlobStore,
    MockPresenceRepository, MockServerRepository,
};
use tempfile::TempDir;

pub const NODE_ADDRESS: &str = "10.0.0.1";

pub struct Harness {
    pub root: TempDir,
    pub context: Arc<NodeContext>,
    pub repo: MockServerRepository,
    pub presence_repo: MockPresenceRepository,
    pub server_files: MockBlobStore,
    pub global_files: MockBlobStore,
    pub bus: InMemoryMessageBus,
    pub backends: Arc<MockBackendFactory>,
    pub memory: Arc<FixedMemoryProbe>,
    pub installer: Arc<FakeWorldInstaller>,
    pub presence: Arc<PresencePublisher>,
    pub registry: Arc<FleetRegistry>,
}

pub fn fast_timings() -> FleetTimings {
    FleetTimings {
        heartbeat_interval: Duration::from_millis(20),
        watchdog_poll: Duration::from_millis(20),
        startup_timeout: Duration::from_secs(60),
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timings(fast_timings())
    }

    pub fn with_timings(timings: FleetTimings) -> Self {
        let root = TempDir::new().unwrap();
        let base = root.path();
        fs::create_dir_all(base.join("commons/plugins")).unwrap();
        fs::write(base.join("commons/spigot.jar"), "bin").unwrap();
        fs::create_dir_all(base.join("servertypes/vanilla")).unwrap();
        fs::write(base.join("servertypes/vanilla/server.properties"), "motd=hi").unwrap();
        fs::create_dir_all(base.join("library")).unwrap();

        let paths = PathsConfig {
            servers_dir: base.join("servers"),
            base_template_dir: base.join("commons"),
            type_template_dir: base.join("servertypes"),
            stale_archive_dir: base.join("tmp"),
            plugin_library_dir: base.join("library"),
            global_asset_dir: base.join("global"),
        };

        let repo = MockServerRepository::new();
        let presence_repo = MockPresenceRepository::new();
        let server_files = MockBlobStore::new();
        let global_files = MockBlobStore::new();
        let bus = InMemoryMessageBus::new();
        let backends = Arc::new(MockBackendFactory::new());
        let memory = Arc::new(FixedMemoryProbe::new(64 * 1024));
        let installer = Arc::new(FakeWorldInstaller::new());

        let context = Arc::new(NodeContext {
            identity: NodeIdentity::new(NODE_ADDRESS, 8484),
            servers: Arc::new(repo.clone()),
            presence: Arc::new(presence_repo.clone()),
            server_files: Arc::new(server_files.clone()),
            global_files: Arc::new(global_files.clone()),
            bus: Arc::new(bus.clone()),
            backends: backends.clone(),
            memory: memory.clone(),
            world_installer: installer.clone(),
            workspace: Workspace::new(paths, ArchiveConfig::default(), WorldConfig::default()),
            channels: ChannelConfig::default(),
            timings,
            admission_margin_mb: 8192,
        });
        let presence = Arc::new(PresencePublisher::new(context.clone(), true));
        let registry = Arc::new(FleetRegistry::new(context.clone(), presence.clone()));

        Self {
            root,
            context,
            repo,
            presence_repo,
            server_files,
            global_files,
            bus,
            backends,
            memory,
            installer,
            presence,
            registry,
        }
    }

    pub fn server_dir(&self, name: &str) -> PathBuf {
        self.root.path().join("servers").join(name)
    }

    pub fn insert(&self, record: ServerRecord) {
        self.repo.put(record);
    }

    pub async fn updates(&self) -> Vec<String> {
        self.bus.published("manager_update").await
    }
}
