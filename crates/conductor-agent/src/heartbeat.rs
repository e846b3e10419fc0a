//! Heartbeat loop: periodically reports this agent's liveness and
//! active-run set to the control plane.

use conductor_core::agent::SystemMetrics;
use conductor_core::ids::RunId;
use conductor_core::protocol::AgentMessage;
use sysinfo::System;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration};
use tracing::{debug, warn};

pub struct HeartbeatService {
    interval_secs: u64,
    active_runs: watch::Receiver<Vec<RunId>>,
}

impl HeartbeatService {
    pub fn new(interval_secs: u64, active_runs: watch::Receiver<Vec<RunId>>) -> Self {
        Self { interval_secs, active_runs }
    }

    /// Runs until `shutdown` fires, sending one heartbeat per tick.
    pub async fn run(mut self, outbound: mpsc::Sender<AgentMessage>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        let mut sys = System::new_all();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sys.refresh_all();
                    let metrics = SystemMetrics {
                        cpu_percent: sys.global_cpu_usage() as f64,
                        memory_used_bytes: sys.used_memory(),
                        memory_total_bytes: sys.total_memory(),
                    };
                    let active_run_ids = self.active_runs.borrow().clone();
                    let message = AgentMessage::Heartbeat { active_run_ids, metrics: Some(metrics) };
                    if outbound.send(message).await.is_err() {
                        warn!("failed to queue heartbeat, control-plane channel closed");
                        break;
                    }
                    debug!("heartbeat sent");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
