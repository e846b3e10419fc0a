//! Exercises the `/ws` bearer-token check against a real bound socket.

use conductor_core::agent::AgentCapabilities;
use conductor_core::protocol::{AgentMessage, ControlMessage};
use conductor_transport::ControlPlaneConnection;
use std::time::Duration;

#[tokio::test]
async fn connect_without_token_is_rejected_when_one_is_required() {
    let (addr, _handle) = conductor_testkit::start_test_server_with_token(Some("s3cret")).await.unwrap();
    let url = format!("ws://{addr}/ws");

    let result = ControlPlaneConnection::connect(&url, None).await;
    assert!(result.is_err(), "expected handshake without a token to fail");
}

#[tokio::test]
async fn connect_with_wrong_token_is_rejected() {
    let (addr, _handle) = conductor_testkit::start_test_server_with_token(Some("s3cret")).await.unwrap();
    let url = format!("ws://{addr}/ws");

    let result = ControlPlaneConnection::connect(&url, Some("wrong")).await;
    assert!(result.is_err(), "expected handshake with a wrong token to fail");
}

#[tokio::test]
async fn connect_with_correct_token_succeeds() {
    let (addr, _handle) = conductor_testkit::start_test_server_with_token(Some("s3cret")).await.unwrap();
    let url = format!("ws://{addr}/ws");

    let mut connection = ControlPlaneConnection::connect(&url, Some("s3cret"))
        .await
        .expect("handshake with the correct token should succeed");

    connection
        .send(&AgentMessage::Register {
            capabilities: AgentCapabilities { max_parallel: 1, network_zones: vec![], docker_available: false },
            labels: vec![],
            version: "0.1.0".to_string(),
        })
        .await
        .unwrap();

    let ack = tokio::time::timeout(Duration::from_secs(5), connection.recv())
        .await
        .expect("timed out waiting for register ack")
        .expect("connection closed before a reply arrived");
    match ack {
        Some(ControlMessage::RegisterAck { success, heartbeat_interval_seconds, .. }) => {
            assert!(success);
            assert_eq!(heartbeat_interval_seconds, 30);
        }
        other => panic!("expected RegisterAck, got {other:?}"),
    }
}
