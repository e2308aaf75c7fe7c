mod common;

use std::time::Duration;

use common::{Harness, NODE_ADDRESS};
use fleet_core::{metadata_keys, Command, ResponseCode, ServerStatus};
use fleet_testing_utils::ServerRecordBuilder;
use tokio::sync::{broadcast, oneshot};

use ResponseCode::*;

/// 占住某个键，直到返回的发送端被触发或丢弃
async fn occupy(h: &Harness, key: &str) -> oneshot::Sender<()> {
    let (release_tx, release_rx) = oneshot::channel::<()>();
    h.dispatcher
        .serializer()
        .submit(
            key,
            async move {
                let _ = release_rx.await;
            },
            async {},
        )
        .await
        .unwrap();
    release_tx
}

#[tokio::test]
async fn test_create_validates_and_detects_duplicates() {
    let h = Harness::new();
    assert_eq!(h.send("CREATE r1 alpha vanilla").await, vec![ServerCreated]);
    assert_eq!(h.send("CREATE r2 ALPHA vanilla").await, vec![ServerNameTaken]);
    assert_eq!(h.send("CREATE r3 ba vanilla").await, vec![ServerNameInvalid]);
    assert_eq!(h.send("CREATE r4 this#is$ vanilla").await, vec![ServerNameInvalid]);
    assert_eq!(h.repo.count(), 1);
}

#[tokio::test]
async fn test_start_and_stop_outcomes() {
    let h = Harness::new();
    assert_eq!(h.send("START r0 ghost").await, vec![UnknownServer]);

    h.send("CREATE r1 alpha vanilla").await;
    assert_eq!(h.send("START r2 alpha").await, vec![ServerStarting]);
    assert_eq!(
        h.repo.get("alpha").unwrap().status(),
        ServerStatus::Starting
    );
    assert_eq!(h.send("START r3 alpha").await, vec![ServerAlreadyRunning]);
    assert_eq!(h.backends.created_count(), 1);

    assert_eq!(h.send("STOP r4 alpha false").await, vec![ServerStopped]);
    assert_eq!(h.repo.get("alpha").unwrap().status(), ServerStatus::Offline);
    assert!(h.server_files.contains("alpha.zip"));
    assert_eq!(h.send("STOP r5 alpha false").await, vec![ServerNotRunning]);
    assert_eq!(h.send("STOP r6 nobody true").await, vec![UnknownServer]);

    assert_eq!(h.send("START r7 alpha").await, vec![ServerStarting]);
    assert_eq!(h.send("STOP r8 alpha true").await, vec![ServerForceStopped]);
    assert_eq!(
        h.backends.backend("alpha").unwrap().stop_calls(),
        vec![true]
    );
}

#[tokio::test]
async fn test_start_rejected_when_not_accepting() {
    let h = Harness::new();
    h.send("CREATE r1 alpha vanilla").await;
    h.presence.set_accepting(false).await.unwrap();

    assert_eq!(h.send("START r2 alpha").await, vec![MemoryLimitReached]);
    assert_eq!(h.backends.created_count(), 0);
}

#[tokio::test]
async fn test_start_without_capacity_is_unknown_error() {
    let h = Harness::new();
    h.send("CREATE r1 alpha vanilla").await;
    h.memory.set(1000);

    assert_eq!(h.send("START r2 alpha").await, vec![UnknownError]);
    assert_eq!(h.repo.get("alpha").unwrap().status(), ServerStatus::Offline);
}

#[tokio::test]
async fn test_start_with_huge_memory_override_answers_once() {
    let h = Harness::new();
    h.repo.put(
        ServerRecordBuilder::new("alpha")
            .with_metadata(metadata_keys::MEMORY_OVERRIDE, &u64::MAX.to_string())
            .build(),
    );

    assert_eq!(h.send("START r1 alpha").await, vec![UnknownError]);
    assert_eq!(h.repo.get("alpha").unwrap().status(), ServerStatus::Offline);
    assert_eq!(h.backends.created_count(), 0);
    assert!(!h.dispatcher.serializer().is_busy("alpha").await);
}

#[tokio::test]
async fn test_busy_responses_per_verb() {
    let h = Harness::new();
    h.send("CREATE r0 alpha vanilla").await;
    let _guard = occupy(&h, "ALPHA").await;

    assert_eq!(h.send("START b1 alpha").await, vec![ServerAlreadyRunning]);
    assert_eq!(h.send("STOP b2 alpha true").await, vec![ServerStopped]);
    assert_eq!(h.send("DELETE b3 alpha").await, vec![ServerAlreadyRunning]);
    assert_eq!(h.send("DELETE_DATA b4 alpha").await, vec![ServerAlreadyRunning]);
    assert_eq!(h.send("RESTART b5 alpha").await, vec![ServerNotRunning]);
    assert_eq!(h.send("CREATE b6 alpha vanilla").await, vec![ServerNameTaken]);
    assert_eq!(h.send("RENAME b7 alpha omega").await, vec![UnknownError]);

    // 未串行化的命令不受影响
    assert_eq!(h.send("SET_METADATA b8 alpha motd hi").await, vec![UnknownServer]);
    assert_eq!(h.backends.created_count(), 0);
    assert!(h.repo.get("alpha").is_some());
}

#[tokio::test]
async fn test_concurrent_starts_launch_once() {
    let h = Harness::new();
    h.send("CREATE r0 alpha vanilla").await;

    let first = h.dispatcher.handle_message("START s1 alpha").await;
    let second = h.dispatcher.handle_message("START s2 alpha").await;
    assert!(second.is_none());
    first.unwrap().await.unwrap();

    assert_eq!(h.responses_for("s1").await, vec![ServerStarting]);
    assert_eq!(h.responses_for("s2").await, vec![ServerAlreadyRunning]);
    assert_eq!(h.backends.created_count(), 1);
}

#[tokio::test]
async fn test_delete_outcomes() {
    let h = Harness::new();
    assert_eq!(h.send("DELETE d0 ghost").await, vec![UnknownServer]);

    h.repo.put(
        ServerRecordBuilder::new("remote")
            .with_status(ServerStatus::Starting)
            .with_source("10.0.0.2:30000")
            .build(),
    );
    assert_eq!(h.send("DELETE d1 remote").await, vec![ServerAlreadyRunning]);

    h.send("CREATE d2 alpha vanilla").await;
    h.server_files.insert("alpha.zip", vec![1]);
    assert_eq!(h.send("DELETE_DATA d3 alpha").await, vec![ServerRemoved]);
    assert!(h.repo.get("alpha").is_some());
    assert!(!h.server_files.contains("alpha.zip"));

    h.send("START d4 alpha").await;
    assert_eq!(h.send("DELETE d5 alpha").await, vec![ServerRemoved]);
    assert!(h.repo.get("alpha").is_none());
    assert!(!h.server_dir("alpha").exists());
}

#[tokio::test]
async fn test_restart_outcomes() {
    let h = Harness::new();
    h.send("CREATE r0 alpha vanilla").await;
    assert_eq!(h.send("RESTART r1 alpha").await, vec![UnknownServer]);

    h.send("START r2 alpha").await;
    assert_eq!(h.send("RESTART r3 alpha").await, vec![ServerRestarting]);
    assert_eq!(h.backends.backend("alpha").unwrap().restart_count(), 1);

    h.send("STOP r4 alpha false").await;
    assert_eq!(h.send("RESTART r5 alpha").await, vec![ServerNotRunning]);
}

#[tokio::test]
async fn test_rename_outcomes() {
    let h = Harness::new();
    h.send("CREATE r0 alpha vanilla").await;
    h.send("CREATE r1 beta vanilla").await;

    assert_eq!(h.send("RENAME r2 alpha b#d").await, vec![ServerNameInvalid]);
    assert_eq!(h.send("RENAME r3 alpha beta").await, vec![ServerNameTaken]);
    assert_eq!(h.send("RENAME r4 ghost gamma").await, vec![UnknownServer]);

    h.send("START r5 beta").await;
    assert_eq!(h.send("RENAME r6 beta delta").await, vec![UnknownError]);

    assert_eq!(h.send("RENAME r7 alpha omega").await, vec![ServerRenamed]);
    assert!(h.repo.get("alpha").is_none());
    assert!(h.repo.get("omega").is_some());
    assert_eq!(h.send("START r8 alpha").await, vec![UnknownServer]);
}

#[tokio::test]
async fn test_metadata_and_console_commands() {
    let h = Harness::new();
    h.send("CREATE r0 alpha vanilla").await;
    assert_eq!(h.send("SET_METADATA r1 alpha motd hi").await, vec![UnknownServer]);
    assert_eq!(h.send("COMMAND r2 alpha say hi").await, vec![UnknownServer]);

    h.send("START r3 alpha").await;
    assert_eq!(
        h.send("SET_METADATA r4 alpha motd Welcome to  my realm").await,
        vec![MetadataSet]
    );
    assert_eq!(
        h.repo.get("alpha").unwrap().get("motd"),
        Some("Welcome to my realm")
    );
    assert_eq!(h.send("SET_METADATA r5 alpha motd").await, vec![MetadataSet]);
    assert_eq!(h.repo.get("alpha").unwrap().get("motd"), None);

    assert_eq!(h.send("COMMAND r6 alpha say hello world").await, vec![MetadataSet]);
    assert_eq!(
        h.backends.backend("alpha").unwrap().commands(),
        vec!["say hello world".to_string()]
    );

    h.send("STOP r7 alpha true").await;
    assert_eq!(h.send("COMMAND r8 alpha say hi").await, vec![ServerNotRunning]);
}

#[tokio::test]
async fn test_malformed_messages() {
    let h = Harness::new();
    assert_eq!(h.send("START m1").await, vec![UnknownError]);
    assert!(h.dispatcher.handle_message("").await.is_none());
    assert!(h.dispatcher.handle_message("EXPLODE m2 alpha").await.is_none());
    assert_eq!(h.responses().await.len(), 1);
}

#[tokio::test]
async fn test_register_and_global_file() {
    let h = Harness::new();
    h.send("REGISTER 203.0.113.7").await;
    assert_eq!(h.allow_list.addresses(), vec!["203.0.113.7".to_string()]);

    h.global_files.insert("empty.zip", b"not a zip".to_vec());
    h.send("NEW_GLOBAL_FILE 0").await;
    assert!(h.root.path().join("global/empty.zip").is_file());
    assert!(h.responses().await.is_empty());
}

#[tokio::test]
async fn test_run_loop_answers_over_the_bus() {
    let h = Harness::new();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(h.dispatcher.clone().run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let bus = h.context.bus.clone();
    let request_channel = format!("manager_request_{NODE_ADDRESS}");
    bus.publish(
        &request_channel,
        &Command::Create {
            request_id: "c1".to_string(),
            name: "alpha".to_string(),
            server_type: "vanilla".to_string(),
        }
        .encode(),
    )
    .await
    .unwrap();
    assert_eq!(h.wait_response("c1").await, Some(ServerCreated));

    // 其他节点的请求频道不会被处理
    bus.publish("manager_request_10.0.0.2", "CREATE c2 beta vanilla")
        .await
        .unwrap();
    bus.publish(&request_channel, "START c3 alpha").await.unwrap();
    assert_eq!(h.wait_response("c3").await, Some(ServerStarting));
    assert!(h.responses_for("c2").await.is_empty());
    assert!(h.repo.get("beta").is_none());
    assert_eq!(
        h.repo.get("alpha").unwrap().get(metadata_keys::STATUS),
        Some("STARTING")
    );

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
