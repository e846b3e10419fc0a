use crate::ConnectionPool;
use conductor_core::agent::SessionState;
use std::time::Duration;
use tracing::{info, warn};

/// Periodically tears down sessions that never transitioned out of
/// `Connecting`/`Disconnecting` within a grace period, and sessions whose
/// liveness the caller (the agent manager) has independently flagged
/// stale via `stale_agent_ids`.
pub fn spawn_heartbeat_sweeper<F, Fut>(
    pool: ConnectionPool,
    interval: Duration,
    stale_agent_ids: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Vec<conductor_core::ids::AgentId>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let stale = stale_agent_ids().await;
            for agent_id in stale {
                if let Some(session) = pool.get(agent_id).await {
                    warn!(%agent_id, "sweeping stale agent session");
                    session.transition(SessionState::Disconnecting);
                    session.close_fire_and_forget();
                    pool.remove_if_current(agent_id, session.session_id).await;
                }
            }
            let live_sessions = pool.len().await;
            info!(live_sessions, "heartbeat sweep complete");
        }
    })
}
