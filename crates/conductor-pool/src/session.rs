use crate::queue::OutboundQueue;
use conductor_core::agent::SessionState;
use conductor_core::ids::{AgentId, SessionId};
use conductor_core::protocol::ControlMessage;
use conductor_core::Result;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn state_to_u8(s: SessionState) -> u8 {
    match s {
        SessionState::Connecting => 0,
        SessionState::Connected => 1,
        SessionState::Disconnecting => 2,
        SessionState::Disconnected => 3,
    }
}

fn u8_to_state(v: u8) -> SessionState {
    match v {
        0 => SessionState::Connecting,
        1 => SessionState::Connected,
        2 => SessionState::Disconnecting,
        _ => SessionState::Disconnected,
    }
}

/// One agent's live connection: its outbound queue plus lifecycle state.
/// The actual socket read/write tasks live in `conductor-transport`; this
/// struct is the pool's handle onto them.
pub struct AgentSession {
    pub agent_id: AgentId,
    pub session_id: SessionId,
    state: AtomicU8,
    queue: OutboundQueue,
}

impl AgentSession {
    pub fn new(
        agent_id: AgentId,
        session_id: SessionId,
        queue_capacity: usize,
        send_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            agent_id,
            session_id,
            state: AtomicU8::new(state_to_u8(SessionState::Connecting)),
            queue: OutboundQueue::new(queue_capacity, send_timeout),
        })
    }

    /// Pops the next outbound frame. The transport layer's send task
    /// calls this in a loop and writes each frame to the socket.
    pub async fn next_outbound(&self) -> Option<ControlMessage> {
        self.queue.dequeue().await
    }

    pub fn state(&self) -> SessionState {
        u8_to_state(self.state.load(Ordering::SeqCst))
    }

    /// Transitions the session's state if the move is legal per
    /// `SessionState::can_transition_to`; returns whether it took effect.
    pub fn transition(&self, next: SessionState) -> bool {
        let current = self.state();
        if !current.can_transition_to(next) {
            return false;
        }
        self.state.store(state_to_u8(next), Ordering::SeqCst);
        true
    }

    pub async fn enqueue(&self, message: ControlMessage) -> Result<()> {
        self.queue.enqueue(message).await
    }

    pub fn dropped_count(&self) -> u64 {
        self.queue.dropped_count()
    }

    /// Marks the session disconnected without waiting for the transport
    /// layer to acknowledge — used when the pool displaces or force-closes
    /// a session it no longer trusts to drain cleanly.
    pub fn close_fire_and_forget(&self) {
        self.state.store(state_to_u8(SessionState::Disconnected), Ordering::SeqCst);
        self.queue.close();
    }
}
