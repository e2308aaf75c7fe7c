//! 使用真实 SQLite 仓储和存储桶跑一遍完整的服务器生命周期

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use fleet_core::{
    config::models::{ArchiveConfig, ChannelConfig, PathsConfig, WorldConfig},
    metadata_keys,
    traits::{BlobStore, PresenceRepository, ServerRepository},
    CommandResponse, NodeIdentity, ResponseCode, ServerStatus,
};
use fleet_dispatcher::CommandDispatcher;
use fleet_infrastructure::{
    BlobBucket, DatabaseManager, SqliteBlobStore, SqlitePresenceRepository,
    SqliteServerRepository,
};
use fleet_node::{
    FleetRegistry, FleetTimings, GlobalAssetSync, NodeContext, PresencePublisher, Workspace,
};
use fleet_testing_utils::{
    FakeWorldInstaller, FixedMemoryProbe, InMemoryMessageBus, MockBackendFactory,
    RecordingAllowList,
};
use tempfile::TempDir;

struct Node {
    _root: TempDir,
    servers: Arc<SqliteServerRepository>,
    presence_repo: Arc<SqlitePresenceRepository>,
    server_files: Arc<SqliteBlobStore>,
    bus: InMemoryMessageBus,
    presence: Arc<PresencePublisher>,
    dispatcher: Arc<CommandDispatcher>,
}

impl Node {
    async fn new() -> Self {
        let root = TempDir::new().unwrap();
        let base = root.path();
        fs::create_dir_all(base.join("commons")).unwrap();
        fs::write(base.join("commons/server.properties"), "motd=fleet").unwrap();
        fs::create_dir_all(base.join("servertypes/vanilla")).unwrap();

        let database = DatabaseManager::in_memory().await.unwrap();
        database.migrate().await.unwrap();
        let pool = database.pool().clone();

        let servers = Arc::new(SqliteServerRepository::new(pool.clone()));
        let presence_repo = Arc::new(SqlitePresenceRepository::new(pool.clone()));
        let server_files = Arc::new(SqliteBlobStore::new(pool.clone(), BlobBucket::ServerFiles));
        let bus = InMemoryMessageBus::new();

        let context = Arc::new(NodeContext {
            identity: NodeIdentity::new("10.0.0.1", 8484),
            servers: servers.clone(),
            presence: presence_repo.clone(),
            server_files: server_files.clone(),
            global_files: Arc::new(SqliteBlobStore::new(pool, BlobBucket::GlobalFiles)),
            bus: Arc::new(bus.clone()),
            backends: Arc::new(MockBackendFactory::new()),
            memory: Arc::new(FixedMemoryProbe::new(64 * 1024)),
            world_installer: Arc::new(FakeWorldInstaller::new()),
            workspace: Workspace::new(
                PathsConfig {
                    servers_dir: base.join("servers"),
                    base_template_dir: base.join("commons"),
                    type_template_dir: base.join("servertypes"),
                    stale_archive_dir: base.join("tmp"),
                    plugin_library_dir: base.join("library"),
                    global_asset_dir: base.join("global"),
                },
                ArchiveConfig::default(),
                WorldConfig::default(),
            ),
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
        let assets = Arc::new(GlobalAssetSync::new(context));
        let dispatcher =
            CommandDispatcher::new(registry, assets, Arc::new(RecordingAllowList::new()));

        Self {
            _root: root,
            servers,
            presence_repo,
            server_files,
            bus,
            presence,
            dispatcher,
        }
    }

    async fn send(&self, payload: &str) -> Vec<ResponseCode> {
        if let Some(handle) = self.dispatcher.handle_message(payload).await {
            handle.await.unwrap();
        }
        let request_id = payload.split_whitespace().nth(1).unwrap_or_default();
        self.bus
            .published("manager_response")
            .await
            .iter()
            .filter_map(|p| CommandResponse::parse(p))
            .filter(|r| r.request_id == request_id)
            .map(|r| r.code)
            .collect()
    }

    async fn status(&self, name: &str) -> Option<ServerStatus> {
        self.servers
            .find_by_name(name)
            .await
            .unwrap()
            .map(|record| record.status())
    }
}

#[tokio::test]
async fn test_lifecycle_against_sqlite() {
    let node = Node::new().await;
    node.presence.heartbeat().await.unwrap();

    assert_eq!(
        node.send("CREATE r1 alpha vanilla").await,
        vec![ResponseCode::ServerCreated]
    );
    assert_eq!(node.status("ALPHA").await, Some(ServerStatus::Offline));

    assert_eq!(
        node.send("START r2 alpha").await,
        vec![ResponseCode::ServerStarting]
    );
    let record = node.servers.find_by_name("alpha").await.unwrap().unwrap();
    assert_eq!(record.status(), ServerStatus::Starting);
    assert!(record
        .get(metadata_keys::SOURCE)
        .unwrap()
        .starts_with("10.0.0.1:"));

    assert_eq!(
        node.send("STOP r3 alpha false").await,
        vec![ResponseCode::ServerStopped]
    );
    assert_eq!(node.status("alpha").await, Some(ServerStatus::Offline));
    assert!(node.server_files.download("alpha.zip").await.unwrap().is_some());

    assert_eq!(
        node.send("RENAME r4 alpha omega").await,
        vec![ResponseCode::ServerRenamed]
    );
    assert_eq!(node.status("alpha").await, None);
    assert!(node.server_files.download("omega.zip").await.unwrap().is_some());
    assert!(node.server_files.download("alpha.zip").await.unwrap().is_none());

    assert_eq!(
        node.send("DELETE r5 omega").await,
        vec![ResponseCode::ServerRemoved]
    );
    assert_eq!(node.status("omega").await, None);
    assert!(node.server_files.download("omega.zip").await.unwrap().is_none());
}

#[tokio::test]
async fn test_presence_row_tracks_accepting_flag() {
    let node = Node::new().await;
    node.presence.heartbeat().await.unwrap();

    let row = node.presence_repo.find("10.0.0.1").await.unwrap().unwrap();
    assert!(row.accepting);
    assert_eq!(row.port, 8484);

    node.presence.set_accepting(false).await.unwrap();
    node.presence.heartbeat().await.unwrap();
    let row = node.presence_repo.find("10.0.0.1").await.unwrap().unwrap();
    assert!(!row.accepting);

    assert_eq!(
        node.send("CREATE r1 alpha vanilla").await,
        vec![ResponseCode::ServerCreated]
    );
    assert_eq!(
        node.send("START r2 alpha").await,
        vec![ResponseCode::MemoryLimitReached]
    );

    node.presence.remove().await.unwrap();
    assert!(node.presence_repo.find("10.0.0.1").await.unwrap().is_none());
}
