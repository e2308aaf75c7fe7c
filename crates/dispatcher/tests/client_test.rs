mod common;

use std::time::Duration;

use common::{Harness, NODE_ADDRESS};
use fleet_core::{config::models::ChannelConfig, Command, FleetError, ResponseCode};
use fleet_dispatcher::CommandClient;
use tokio::sync::broadcast;

#[tokio::test]
async fn test_client_round_trip_through_dispatcher() {
    let h = Harness::new();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(h.dispatcher.clone().run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = CommandClient::new(
        h.context.bus.clone(),
        ChannelConfig::default(),
        Duration::from_secs(5),
    );

    let code = client
        .request(NODE_ADDRESS, |request_id| Command::Create {
            request_id,
            name: "alpha".to_string(),
            server_type: "vanilla".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(code, ResponseCode::ServerCreated);

    let code = client
        .request(NODE_ADDRESS, |request_id| Command::Start {
            request_id,
            name: "alpha".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(code, ResponseCode::ServerStarting);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_client_times_out_without_responder() {
    let h = Harness::new();
    let client = CommandClient::new(
        h.context.bus.clone(),
        ChannelConfig::default(),
        Duration::from_millis(100),
    );

    let err = client
        .request("10.9.9.9", |request_id| Command::Start {
            request_id,
            name: "alpha".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::MessageBus(_)));
    assert_eq!(h.bus.published("manager_request_10.9.9.9").await.len(), 1);
}

#[tokio::test]
async fn test_client_rejects_commands_without_generated_id() {
    let h = Harness::new();
    let client = CommandClient::new(
        h.context.bus.clone(),
        ChannelConfig::default(),
        Duration::from_millis(100),
    );

    let err = client
        .request(NODE_ADDRESS, |_| Command::NewGlobalFile)
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Internal(_)));
}

#[test]
fn test_request_ids_are_unique_tokens() {
    let a = CommandClient::new_request_id();
    let b = CommandClient::new_request_id();
    assert_ne!(a, b);
    assert!(!a.contains(' '));
}
