//! WebSocket endpoint agents dial into. One connection lives exactly as
//! long as one `AgentSession`: a handshake registers the agent, then
//! every subsequent frame is routed to the scheduler or manager until
//! the socket closes.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use conductor_core::agent::{AgentRegistration, DisconnectReason};
use conductor_core::ids::SessionId;
use conductor_core::protocol::AgentMessage;
use conductor_pool::AgentSession;
use futures::sink::SinkExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::state::AppState;

const OUTBOUND_QUEUE_CAPACITY: usize = 256;
const CRITICAL_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let registration = match await_registration(&mut socket).await {
        Some(registration) => registration,
        None => return,
    };

    let agent = match state.manager.register_agent(conductor_core::ids::AgentId::new(), registration).await {
        Ok(agent) => agent,
        Err(e) => {
            warn!(error = %e, "failed to register agent");
            let rejection = conductor_core::protocol::ControlMessage::RegisterAck {
                agent_id: conductor_core::ids::AgentId::new(),
                success: false,
                server_version: env!("CARGO_PKG_VERSION").to_string(),
                heartbeat_interval_seconds: 0,
                error_message: Some(e.to_string()),
            };
            if let Ok(text) = serde_json::to_string(&rejection) {
                let _ = socket.send(Message::Text(text.into())).await;
            }
            let _ = socket.close().await;
            return;
        }
    };

    let session_id = SessionId::new();
    let session = AgentSession::new(agent.id, session_id, OUTBOUND_QUEUE_CAPACITY, CRITICAL_SEND_TIMEOUT);
    session.transition(conductor_core::agent::SessionState::Connected);
    state.pool.add(agent.id, session.clone()).await;

    if session
        .enqueue(conductor_core::protocol::ControlMessage::RegisterAck {
            agent_id: agent.id,
            success: true,
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            heartbeat_interval_seconds: state.heartbeat_interval_seconds,
            error_message: None,
        })
        .await
        .is_err()
    {
        warn!(agent_id = %agent.id, "failed to enqueue register ack");
    }

    info!(agent_id = %agent.id, "agent connected");

    let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
    let connection = conductor_transport::run_agent_connection(socket, session.clone(), inbound_tx);
    let connection_handle = tokio::spawn(connection);

    while let Some(message) = inbound_rx.recv().await {
        if let Err(e) = handle_agent_message(&state, agent.id, message).await {
            warn!(agent_id = %agent.id, error = %e, "error handling agent message");
        }
    }

    let _ = connection_handle.await;
    state.pool.remove_if_current(agent.id, session_id).await;
    let affected = agent.active_run_ids.clone();
    if let Err(e) = state.scheduler.handle_agent_disconnected(agent.id, &affected).await {
        warn!(agent_id = %agent.id, error = %e, "failed to requeue runs after disconnect");
    }
    let _ = state.manager.remove_agent(agent.id).await;
    info!(agent_id = %agent.id, "agent disconnected");
}

async fn await_registration(socket: &mut WebSocket) -> Option<AgentRegistration> {
    while let Some(Ok(frame)) = socket.recv().await {
        if let Message::Text(text) = frame {
            match serde_json::from_str::<AgentMessage>(&text) {
                Ok(AgentMessage::Register { capabilities, labels, version }) => {
                    return Some(AgentRegistration { labels, version, capabilities });
                }
                Ok(_) => {
                    warn!("first frame on a new connection was not Register, closing");
                    return None;
                }
                Err(e) => {
                    warn!(error = %e, "malformed registration frame");
                    return None;
                }
            }
        }
    }
    None
}

async fn handle_agent_message(
    state: &Arc<AppState>,
    agent_id: conductor_core::ids::AgentId,
    message: AgentMessage,
) -> conductor_core::Result<()> {
    match message {
        AgentMessage::Register { .. } => {
            warn!(%agent_id, "ignoring duplicate Register on an already-established session");
            Ok(())
        }
        AgentMessage::Heartbeat { active_run_ids, metrics } => {
            state.manager.handle_heartbeat(agent_id, active_run_ids, metrics).await
        }
        AgentMessage::WorkAck { run_id } => {
            info!(%agent_id, %run_id, "agent acknowledged work");
            Ok(())
        }
        AgentMessage::WorkRejected { run_id, reason } => {
            state.scheduler.handle_work_rejected(run_id, &reason).await
        }
        AgentMessage::LogChunk { .. } => Ok(()),
        AgentMessage::Progress { run_id, phase, percent, tests_completed, tests_total, .. } => {
            info!(%agent_id, %run_id, ?phase, percent, tests_completed, tests_total, "run progress");
            Ok(())
        }
        AgentMessage::TestResultEvent { run_id, result } => state.results.record(run_id, &result).await,
        AgentMessage::RunComplete { run_id, summary } => state.scheduler.handle_run_complete(run_id, summary).await,
        AgentMessage::Disconnecting { reason } => {
            info!(%agent_id, ?reason, "agent announced disconnect");
            if reason == DisconnectReason::Error {
                warn!(%agent_id, "agent disconnected after an error");
            }
            Ok(())
        }
    }
}
