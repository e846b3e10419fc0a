//! Control-plane side of the agent connection: drains a session's
//! outbound queue onto the socket and forwards inbound frames to the
//! caller. One call to `run_agent_connection` owns one live agent
//! connection for its whole lifetime; it returns once either direction
//! closes.

use crate::codec::{decode, encode};
use axum::extract::ws::{Message, WebSocket};
use conductor_core::protocol::AgentMessage;
use conductor_pool::AgentSession;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Runs the full duplex of one agent's WebSocket connection. `inbound`
/// receives every successfully decoded `AgentMessage`; malformed frames
/// are logged and skipped rather than closing the connection.
pub async fn run_agent_connection(socket: WebSocket, session: Arc<AgentSession>, inbound: mpsc::Sender<AgentMessage>) {
    let (mut sink, mut stream) = socket.split();

    let send_session = session.clone();
    let send_task = tokio::spawn(async move {
        while let Some(message) = send_session.next_outbound().await {
            let text = match encode(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode control message");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, agent_id = %session.agent_id, "agent socket read error");
                break;
            }
        };
        match frame {
            Message::Text(text) => match decode::<AgentMessage>(&text) {
                Ok(message) => {
                    if inbound.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, agent_id = %session.agent_id, "dropping malformed agent frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    session.close_fire_and_forget();
    send_task.abort();
}
