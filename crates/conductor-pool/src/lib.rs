//! Connection pool: the single source of truth for which agents are live
//! right now and how to reach them.
//!
//! The pool never holds its lock across session I/O — every session gets
//! its own bounded outbound queue and a dedicated sender task, so a slow
//! or wedged agent can never block a lookup for any other agent.

mod queue;
mod session;
mod sweeper;

pub use queue::OutboundQueue;
pub use session::AgentSession;
pub use sweeper::spawn_heartbeat_sweeper;

use conductor_core::agent::SessionState;
use conductor_core::ids::AgentId;
use conductor_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct ConnectionPool {
    sessions: Arc<RwLock<HashMap<AgentId, Arc<AgentSession>>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new session for `agent_id`, displacing and closing
    /// whatever session currently occupies that slot. Displacement, not
    /// merge: the old session's queue is dropped and its socket closed.
    pub async fn add(&self, agent_id: AgentId, session: Arc<AgentSession>) -> Option<Arc<AgentSession>> {
        let mut sessions = self.sessions.write().await;
        let previous = sessions.insert(agent_id, session);
        if let Some(prev) = &previous {
            warn!(%agent_id, "displacing existing agent session on reregister");
            prev.close_fire_and_forget();
        }
        previous
    }

    pub async fn get(&self, agent_id: AgentId) -> Option<Arc<AgentSession>> {
        self.sessions.read().await.get(&agent_id).cloned()
    }

    /// Removes a session only if it is still the one identified by
    /// `session_id` — avoids removing a session that has already been
    /// displaced by a newer reconnect.
    pub async fn remove_if_current(&self, agent_id: AgentId, session_id: conductor_core::ids::SessionId) {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&agent_id) {
            if existing.session_id == session_id {
                sessions.remove(&agent_id);
                info!(%agent_id, "removed agent session");
            }
        }
    }

    pub async fn close_all(&self) {
        let sessions = self.sessions.write().await;
        for session in sessions.values() {
            session.close_fire_and_forget();
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn all_agent_ids(&self) -> Vec<AgentId> {
        self.sessions.read().await.keys().copied().collect()
    }

    pub async fn send_control(
        &self,
        agent_id: AgentId,
        message: conductor_core::protocol::ControlMessage,
    ) -> Result<()> {
        let session = self
            .get(agent_id)
            .await
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;
        session.enqueue(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::ids::SessionId;
    use std::time::Duration;

    fn make_session(agent_id: AgentId) -> Arc<AgentSession> {
        let session = AgentSession::new(agent_id, SessionId::new(), 16, Duration::from_millis(50));
        let drain = session.clone();
        tokio::spawn(async move { while drain.next_outbound().await.is_some() {} });
        session
    }

    #[tokio::test]
    async fn add_displaces_previous_session() {
        let pool = ConnectionPool::new();
        let agent_id = AgentId::new();
        let first = make_session(agent_id);
        let first_handle = first.clone();
        pool.add(agent_id, first).await;
        let second = make_session(agent_id);
        pool.add(agent_id, second.clone()).await;

        assert_eq!(pool.len().await, 1);
        assert_eq!(pool.get(agent_id).await.unwrap().session_id, second.session_id);
        assert_eq!(first_handle.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn remove_if_current_ignores_stale_session_id() {
        let pool = ConnectionPool::new();
        let agent_id = AgentId::new();
        let session = make_session(agent_id);
        let stale_id = session.session_id;
        pool.add(agent_id, session).await;

        let other = make_session(agent_id);
        pool.add(agent_id, other.clone()).await;

        pool.remove_if_current(agent_id, stale_id).await;
        assert_eq!(pool.len().await, 1);
        assert_eq!(pool.get(agent_id).await.unwrap().session_id, other.session_id);
    }
}
