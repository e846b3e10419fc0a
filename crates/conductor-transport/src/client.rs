//! Agent side of the connection: the agent dials out to the control
//! plane and keeps the socket open for the life of the process.

use crate::codec::{decode, encode};
use conductor_core::protocol::{AgentMessage, ControlMessage};
use conductor_core::{Error, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::warn;

pub struct ControlPlaneConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ControlPlaneConnection {
    /// Dials the control plane's `/ws` endpoint, optionally presenting a
    /// bearer token via the `authorization` header on the upgrade request.
    pub async fn connect(url: &str, token: Option<&str>) -> Result<Self> {
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::Network(e.to_string()))?;
        if let Some(token) = token {
            let value = format!("Bearer {token}")
                .parse()
                .map_err(|_| Error::Network("token is not a valid header value".to_string()))?;
            request.headers_mut().insert("authorization", value);
        }
        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { socket })
    }

    pub async fn send(&mut self, message: &AgentMessage) -> Result<()> {
        let text = encode(message)?;
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::Network(e.to_string()))
    }

    /// Reads the next control frame, skipping and logging malformed
    /// ones rather than treating them as a connection failure. Returns
    /// `Ok(None)` once the control plane closes the socket.
    pub async fn recv(&mut self) -> Result<Option<ControlMessage>> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => return decode(&text).map(Some),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(Error::Network(e.to_string())),
            }
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        self.socket
            .close(None)
            .await
            .map_err(|e| Error::Network(e.to_string()))
    }
}

/// Drives one connection for its whole lifetime: forwards everything
/// sent on `outbound` to the socket, and everything decoded from the
/// socket to `inbound`. Returns once either direction closes.
pub async fn run_control_plane_connection(
    connection: ControlPlaneConnection,
    mut outbound: mpsc::Receiver<AgentMessage>,
    inbound: mpsc::Sender<ControlMessage>,
) {
    let (mut sink, mut stream) = connection.socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match encode(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode agent message");
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
                warn!(error = %e, "control-plane socket read error");
                break;
            }
        };
        match frame {
            Message::Text(text) => match decode::<ControlMessage>(&text) {
                Ok(message) => {
                    if inbound.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "dropping malformed control frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    send_task.abort();
}
