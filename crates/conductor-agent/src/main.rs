//! Agent process entrypoint: reads its configuration entirely from the
//! environment and reconnects to the control plane with backoff when
//! the connection drops.

use conductor_agent::{Agent, AgentConfig};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

const MIN_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = AgentConfig::from_env()?;
    let docker_daemon_reachable = config.docker_enabled && bollard::Docker::connect_with_local_defaults().is_ok();
    let agent = Agent::new(config, docker_daemon_reachable);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut delay = MIN_RECONNECT_DELAY;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        match agent.run(shutdown_rx.clone()).await {
            Ok(()) => {
                if *shutdown_rx.borrow() {
                    info!("agent shut down gracefully");
                    break;
                }
                warn!("connection to control plane ended, reconnecting");
                tokio::time::sleep(MIN_RECONNECT_DELAY).await;
                delay = MIN_RECONNECT_DELAY;
            }
            Err(e) => {
                error!(error = %e, delay_secs = delay.as_secs(), "connection attempt failed, backing off");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RECONNECT_DELAY);
            }
        }
    }

    Ok(())
}
