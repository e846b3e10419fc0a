//! Application state shared across handlers.

use conductor_core::ports::ResultRepository;
use conductor_manager::AgentManager;
use conductor_pool::ConnectionPool;
use conductor_scheduler::Scheduler;
use std::sync::Arc;

/// State shared across the `/ws` handler and any inline HTTP endpoints.
#[derive(Clone)]
pub struct AppState {
    pub pool: ConnectionPool,
    pub manager: Arc<AgentManager>,
    pub scheduler: Arc<Scheduler>,
    pub results: Arc<dyn ResultRepository>,
    /// Shared bearer token agents must present on `/ws`. `None` disables
    /// the check, for loopback tests that never set one.
    pub auth_token: Option<Arc<str>>,
    /// Cadence suggested to agents in `RegisterAck`, normally
    /// `HeartbeatTimeout / 3`.
    pub heartbeat_interval_seconds: u64,
}

impl AppState {
    pub fn new(
        pool: ConnectionPool,
        manager: Arc<AgentManager>,
        scheduler: Arc<Scheduler>,
        results: Arc<dyn ResultRepository>,
    ) -> Self {
        Self {
            pool,
            manager,
            scheduler,
            results,
            auth_token: None,
            heartbeat_interval_seconds: 30,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<Arc<str>>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_heartbeat_interval_seconds(mut self, seconds: u64) -> Self {
        self.heartbeat_interval_seconds = seconds;
        self
    }
}
