//! Top-level agent loop: connects to the control plane, registers, and
//! dispatches assigned work to the executor while reporting heartbeats
//! on a separate cadence.

use crate::config::AgentConfig;
use crate::executor::{Job, JobExecutor};
use crate::heartbeat::HeartbeatService;
use conductor_core::agent::DisconnectReason;
use conductor_core::ids::RunId;
use conductor_core::protocol::{AgentMessage, ControlMessage};
use conductor_core::run::{ExecutionType, TestToRun, Variables};
use conductor_core::{Error, Result};
use conductor_executor::{DriverConfig, DriverRegistry};
use conductor_transport::{run_control_plane_connection, ControlPlaneConnection};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tracing::{error, info, warn};

pub struct Agent {
    config: AgentConfig,
    executor: Arc<JobExecutor>,
    job_semaphore: Arc<Semaphore>,
}

impl Agent {
    pub fn new(config: AgentConfig, docker_daemon_reachable: bool) -> Self {
        let drivers = Arc::new(DriverRegistry::new(
            DriverConfig::default(),
            config.docker_enabled && docker_daemon_reachable,
        ));
        let executor = Arc::new(JobExecutor::new(drivers, config.workspace_dir.clone()));
        let job_semaphore = Arc::new(Semaphore::new(config.max_parallel.max(1) as usize));
        Self { config, executor, job_semaphore }
    }

    /// Connects, registers, and runs until the connection closes or
    /// `shutdown` fires. Returns once the connection drops; the caller
    /// decides whether to reconnect.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let connection =
            ControlPlaneConnection::connect(&self.config.control_plane_url, self.config.token.as_deref()).await?;

        let (outbound_tx, outbound_rx) = mpsc::channel::<AgentMessage>(256);
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<ControlMessage>(256);
        let connection_handle = tokio::spawn(run_control_plane_connection(connection, outbound_rx, inbound_tx));

        outbound_tx
            .send(AgentMessage::Register {
                capabilities: self.config.capabilities(),
                labels: self.config.labels.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
            .await
            .map_err(|_| Error::Network("control-plane channel closed before registration".to_string()))?;

        let heartbeat_interval_secs = match tokio::time::timeout(
            std::time::Duration::from_secs(10),
            inbound_rx.recv(),
        )
        .await
        {
            Ok(Some(ControlMessage::RegisterAck { success, heartbeat_interval_seconds, error_message, .. })) => {
                if !success {
                    return Err(Error::Network(format!(
                        "registration rejected: {}",
                        error_message.unwrap_or_default()
                    )));
                }
                info!("registered with control plane");
                if heartbeat_interval_seconds > 0 {
                    heartbeat_interval_seconds
                } else {
                    self.config.heartbeat_interval_secs
                }
            }
            Ok(Some(other)) => {
                warn!(?other, "expected RegisterAck as the first frame, proceeding with local heartbeat cadence");
                self.config.heartbeat_interval_secs
            }
            Ok(None) => return Err(Error::Network("control-plane channel closed before registration ack".to_string())),
            Err(_) => return Err(Error::Network("timed out waiting for registration ack".to_string())),
        };

        let (active_runs_tx, active_runs_rx) = watch::channel(Vec::new());
        let active_runs: Arc<Mutex<Vec<RunId>>> = Arc::new(Mutex::new(Vec::new()));
        let heartbeat = HeartbeatService::new(heartbeat_interval_secs, active_runs_rx);
        let heartbeat_handle = tokio::spawn(heartbeat.run(outbound_tx.clone(), shutdown.clone()));

        loop {
            tokio::select! {
                message = inbound_rx.recv() => {
                    let Some(message) = message else {
                        info!("control-plane connection closed");
                        break;
                    };
                    self.handle_control_message(message, &outbound_tx, &active_runs, &active_runs_tx).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = outbound_tx
                            .send(AgentMessage::Disconnecting { reason: DisconnectReason::Graceful })
                            .await;
                        break;
                    }
                }
            }
        }

        heartbeat_handle.abort();
        connection_handle.abort();
        Ok(())
    }

    async fn handle_control_message(
        &self,
        message: ControlMessage,
        outbound: &mpsc::Sender<AgentMessage>,
        active_runs: &Arc<Mutex<Vec<RunId>>>,
        active_runs_tx: &watch::Sender<Vec<RunId>>,
    ) {
        match message {
            ControlMessage::RegisterAck { .. } => {
                warn!("ignoring unexpected RegisterAck on an already-established session");
            }
            ControlMessage::AssignWork {
                run_id,
                execution_type,
                tests,
                setup_commands,
                teardown_commands,
                environment,
                ..
            } => {
                self.spawn_job(
                    run_id,
                    execution_type,
                    tests,
                    setup_commands,
                    teardown_commands,
                    environment,
                    outbound.clone(),
                    active_runs.clone(),
                    active_runs_tx.clone(),
                )
                .await;
            }
            ControlMessage::CancelWork { run_id, .. } => {
                warn!(%run_id, "cancellation requested; in-flight tests run to completion");
            }
            ControlMessage::Drain => info!("control plane requested drain"),
            ControlMessage::Undrain => info!("control plane lifted drain"),
            ControlMessage::Close { reason } => warn!(%reason, "control plane is closing the connection"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn spawn_job(
        &self,
        run_id: RunId,
        execution_type: ExecutionType,
        tests: Vec<TestToRun>,
        setup_commands: Vec<String>,
        teardown_commands: Vec<String>,
        environment: Variables,
        outbound: mpsc::Sender<AgentMessage>,
        active_runs: Arc<Mutex<Vec<RunId>>>,
        active_runs_tx: watch::Sender<Vec<RunId>>,
    ) {
        let Ok(permit) = self.job_semaphore.clone().acquire_owned().await else {
            warn!(%run_id, "job semaphore closed, rejecting work");
            let _ = outbound
                .send(AgentMessage::WorkRejected { run_id, reason: "agent shutting down".to_string() })
                .await;
            return;
        };

        {
            let mut runs = active_runs.lock().await;
            runs.push(run_id);
            let _ = active_runs_tx.send(runs.clone());
        }
        let _ = outbound.send(AgentMessage::WorkAck { run_id }).await;

        let executor = self.executor.clone();
        tokio::spawn(async move {
            let job = Job { run_id, execution_type, tests, setup_commands, teardown_commands, environment };
            let outcome = executor.execute(job, outbound.clone()).await;
            drop(permit);

            {
                let mut runs = active_runs.lock().await;
                runs.retain(|id| *id != run_id);
                let _ = active_runs_tx.send(runs.clone());
            }

            let summary = match outcome {
                Ok(summary) => summary,
                Err(e) => {
                    error!(%run_id, error = %e, "job execution failed");
                    conductor_core::run::RunSummary { errored: 1, ..Default::default() }
                }
            };
            let _ = outbound.send(AgentMessage::RunComplete { run_id, summary }).await;
        });
    }
}
