//! Control-plane process: terminates agent WebSocket connections, runs
//! the dispatch loop, and persists run/result state to Postgres.

use clap::Parser;
use conductor_db::{Database, PgAgentRepository, PgResultRepository, PgRunRepository};
use conductor_manager::AgentManager;
use conductor_pool::{spawn_heartbeat_sweeper, ConnectionPool};
use conductor_scheduler::Scheduler;
use conductor_server::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "conductor-server", about = "Conductor control-plane server")]
struct Cli {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "CONDUCTOR_SERVER_BIND_ADDR", default_value = "0.0.0.0:7420")]
    bind_addr: SocketAddr,

    /// Postgres connection string.
    #[arg(long, env = "CONDUCTOR_SERVER_DATABASE_URL")]
    database_url: String,

    /// Seconds of silence before an agent is considered stale and swept.
    #[arg(long, env = "CONDUCTOR_SERVER_HEARTBEAT_TIMEOUT_SECONDS", default_value_t = 90)]
    heartbeat_timeout_seconds: u64,

    /// Interval between heartbeat sweeps, in milliseconds.
    #[arg(long, env = "CONDUCTOR_SERVER_SWEEP_INTERVAL_MS", default_value_t = 15_000)]
    sweep_interval_ms: u64,

    /// Interval between scheduler dispatch ticks, in milliseconds.
    #[arg(long, env = "CONDUCTOR_SERVER_TICK_INTERVAL_MS", default_value_t = 500)]
    tick_interval_ms: u64,

    /// Maximum number of runs dispatched per scheduler tick.
    #[arg(long, env = "CONDUCTOR_SERVER_MAX_DISPATCH_PER_TICK", default_value_t = 50)]
    max_dispatch_per_tick: u32,

    /// Shared bearer token agents must present on `/ws`. Unset disables
    /// the check, which is only acceptable behind a trusted network.
    #[arg(long, env = "CONDUCTOR_SERVER_AGENT_TOKEN")]
    agent_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    let db = Database::connect(&cli.database_url).await?;
    db.migrate().await?;

    let agents = Arc::new(PgAgentRepository::new(db.pool().clone()));
    let runs = Arc::new(PgRunRepository::new(db.pool().clone()));
    let results: Arc<dyn conductor_core::ports::ResultRepository> = Arc::new(PgResultRepository::new(db.pool().clone()));

    let pool = ConnectionPool::new();
    let manager = Arc::new(AgentManager::new(agents));
    let scheduler = Arc::new(Scheduler::new(runs, results.clone(), manager.clone(), pool.clone()));

    let mut state = AppState::new(pool.clone(), manager.clone(), scheduler.clone(), results)
        .with_heartbeat_interval_seconds(cli.heartbeat_timeout_seconds / 3);
    if let Some(token) = cli.agent_token.clone() {
        state = state.with_auth_token(token);
    }
    let state = Arc::new(state);

    let sweep_manager = manager.clone();
    let heartbeat_timeout_seconds = cli.heartbeat_timeout_seconds;
    spawn_heartbeat_sweeper(pool.clone(), Duration::from_millis(cli.sweep_interval_ms), move || {
        let manager = sweep_manager.clone();
        async move {
            manager
                .get_stale_agents(heartbeat_timeout_seconds)
                .await
                .unwrap_or_default()
                .into_iter()
                .map(|a| a.id)
                .collect()
        }
    });

    let tick_scheduler = scheduler.clone();
    let max_dispatch_per_tick = cli.max_dispatch_per_tick;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(cli.tick_interval_ms));
        loop {
            ticker.tick().await;
            if let Err(e) = tick_scheduler.tick(max_dispatch_per_tick).await {
                tracing::warn!(error = %e, "scheduler tick failed");
            }
        }
    });

    let router = conductor_server::create_router(state);
    let listener = tokio::net::TcpListener::bind(cli.bind_addr).await?;
    info!(addr = %cli.bind_addr, "conductor-server listening");
    axum::serve(listener, router).await?;

    Ok(())
}
