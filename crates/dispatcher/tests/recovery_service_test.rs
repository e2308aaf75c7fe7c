mod common;

use std::fs;

use common::Harness;
use fleet_core::{metadata_keys, ServerStatus};
use fleet_dispatcher::{CrashRecoveryService, RecoveryService};
use fleet_testing_utils::ServerRecordBuilder;

#[tokio::test]
async fn test_recovery_clears_only_local_records() {
    let h = Harness::new();
    h.repo.put(
        ServerRecordBuilder::new("mine")
            .with_status(ServerStatus::Starting)
            .with_source("10.0.0.1:30001")
            .build(),
    );
    h.repo.put(
        ServerRecordBuilder::new("theirs")
            .with_status(ServerStatus::Online)
            .with_source("10.0.0.2:30001")
            .build(),
    );
    h.repo.put(ServerRecordBuilder::new("idle").build());

    let service = CrashRecoveryService::new(h.context.clone());
    let report = service.recover_node_state().await.unwrap();

    assert_eq!(report.reconciled, vec!["mine".to_string()]);
    assert!(report.uploaded.is_empty());
    assert_eq!(report.foreign, 1);
    assert!(report.errors.is_empty());

    let mine = h.repo.get("mine").unwrap();
    assert_eq!(mine.get(metadata_keys::SOURCE), None);
    assert_eq!(mine.get(metadata_keys::STATUS), None);
    assert_eq!(mine.status(), ServerStatus::Offline);

    let theirs = h.repo.get("theirs").unwrap();
    assert_eq!(theirs.get(metadata_keys::SOURCE), Some("10.0.0.2:30001"));
    assert_eq!(theirs.status(), ServerStatus::Online);
    assert!(!h.server_files.contains("mine.zip"));
}

#[tokio::test]
async fn test_recovery_uploads_leftover_directory() {
    let h = Harness::new();
    h.repo.put(
        ServerRecordBuilder::new("mine")
            .with_status(ServerStatus::Online)
            .with_source("10.0.0.1:30001")
            .build(),
    );
    let dir = h.server_dir("mine");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("world.dat"), "progress").unwrap();

    let service = CrashRecoveryService::new(h.context.clone());
    let report = service.recover_node_state().await.unwrap();

    assert_eq!(report.uploaded, vec!["mine".to_string()]);
    assert!(h.server_files.contains("mine.zip"));
    assert!(!dir.exists());

    // 之后可以正常启动，并从补传的存档恢复
    h.registry.start_server("mine").await.unwrap();
    assert_eq!(
        fs::read_to_string(h.server_dir("mine").join("world.dat")).unwrap(),
        "progress"
    );
}

#[tokio::test]
async fn test_recovery_upload_failure_is_reported_not_raised() {
    let h = Harness::new();
    h.repo.put(
        ServerRecordBuilder::new("mine")
            .with_source("10.0.0.1:30001")
            .build(),
    );
    fs::create_dir_all(h.server_dir("mine")).unwrap();
    h.server_files.fail_uploads(true);

    let service = CrashRecoveryService::new(h.context.clone());
    let report = service.recover_node_state().await.unwrap();

    assert_eq!(report.reconciled, vec!["mine".to_string()]);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(h.repo.get("mine").unwrap().get(metadata_keys::SOURCE), None);
}
