//! Helpers for spinning up a control-plane server backed entirely by
//! in-memory doubles, for loopback integration tests.

use crate::doubles::{InMemoryAgentRepository, InMemoryResultRepository, InMemoryRunRepository};
use conductor_manager::AgentManager;
use conductor_pool::ConnectionPool;
use conductor_scheduler::Scheduler;
use conductor_server::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Boots a `conductor-server` router against fresh in-memory repositories
/// and returns its bound address plus the task driving it.
pub async fn start_test_server() -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    start_test_server_with_token(None).await
}

/// Like `start_test_server`, but optionally requires a bearer token on
/// `/ws`, for exercising `require_agent_token`.
pub async fn start_test_server_with_token(token: Option<&str>) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let pool = ConnectionPool::new();
    let agents = Arc::new(InMemoryAgentRepository::default());
    let runs = Arc::new(InMemoryRunRepository::default());
    let results: Arc<dyn conductor_core::ports::ResultRepository> = Arc::new(InMemoryResultRepository::default());

    let manager = Arc::new(AgentManager::new(agents));
    let scheduler = Arc::new(Scheduler::new(runs, results.clone(), manager.clone(), pool.clone()));
    let mut state = AppState::new(pool, manager, scheduler, results);
    if let Some(token) = token {
        state = state.with_auth_token(token.to_string());
    }
    let state = Arc::new(state);

    let router = conductor_server::create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    Ok((addr, handle))
}

/// Polls `condition` until it returns true or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: std::time::Duration, interval: std::time::Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_returns_true_immediately() {
        assert!(wait_for(std::time::Duration::from_secs(1), std::time::Duration::from_millis(10), || async { true }).await);
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        assert!(!wait_for(std::time::Duration::from_millis(50), std::time::Duration::from_millis(10), || async { false }).await);
    }
}
