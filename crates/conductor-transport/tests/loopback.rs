//! Round-trips a `Register`/`RegisterAck` exchange over a real TCP
//! WebSocket between the server and client halves of this crate.

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use conductor_core::agent::AgentCapabilities;
use conductor_core::ids::{AgentId, SessionId};
use conductor_core::protocol::{AgentMessage, ControlMessage};
use conductor_pool::AgentSession;
use conductor_transport::{run_agent_connection, run_control_plane_connection, ControlPlaneConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

async fn ws_handler(ws: WebSocketUpgrade, State(session): State<Arc<AgentSession>>) -> Response {
    ws.on_upgrade(move |socket: WebSocket| async move {
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<AgentMessage>(16);
        let connection = tokio::spawn(run_agent_connection(socket, session.clone(), inbound_tx));
        if let Some(AgentMessage::Register { .. }) = inbound_rx.recv().await {
            let _ = session
                .enqueue(ControlMessage::RegisterAck {
                    agent_id: session.agent_id,
                    success: true,
                    server_version: "0.1.0".to_string(),
                    heartbeat_interval_seconds: 30,
                    error_message: None,
                })
                .await;
        }
        let _ = connection.await;
    })
}

#[tokio::test]
async fn register_round_trips_to_register_ack() {
    let agent_id = AgentId::new();
    let session = AgentSession::new(agent_id, SessionId::new(), 16, Duration::from_secs(5));

    let router = Router::new().route("/ws", get(ws_handler)).with_state(session);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let connection = ControlPlaneConnection::connect(&format!("ws://{addr}/ws"), None).await.unwrap();
    let (outbound_tx, outbound_rx) = mpsc::channel::<AgentMessage>(16);
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<ControlMessage>(16);
    tokio::spawn(run_control_plane_connection(connection, outbound_rx, inbound_tx));

    outbound_tx
        .send(AgentMessage::Register {
            capabilities: AgentCapabilities { max_parallel: 2, network_zones: vec![], docker_available: false },
            labels: vec![],
            version: "0.1.0".to_string(),
        })
        .await
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), inbound_rx.recv())
        .await
        .expect("timed out waiting for register ack")
        .expect("channel closed before a reply arrived");

    assert_eq!(
        reply,
        ControlMessage::RegisterAck {
            agent_id,
            success: true,
            server_version: "0.1.0".to_string(),
            heartbeat_interval_seconds: 30,
            error_message: None,
        }
    );
}
