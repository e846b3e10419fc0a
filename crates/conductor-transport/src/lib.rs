//! Wire transport for the agent/control-plane protocol: a server-side
//! adapter over axum WebSockets and a client-side adapter over
//! tokio-tungstenite, both framing `AgentMessage`/`ControlMessage` as
//! JSON text frames.

mod codec;
mod client;
mod server;

pub use client::{run_control_plane_connection, ControlPlaneConnection};
pub use server::run_agent_connection;
