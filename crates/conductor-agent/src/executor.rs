//! Runs the tests assigned in one `AssignWork` frame against this
//! agent's driver registry, streaming log and result frames back as
//! they complete.

use conductor_core::ids::RunId;
use conductor_core::protocol::AgentMessage;
use conductor_core::run::{
    ExecutionType, LogStream, ProgressMeta, ProgressPhase, RunSummary, TestResult, TestToRun, Variables,
};
use conductor_core::{Error, Result};
use conductor_executor::{DriverRegistry, OutputLine, OutputStream, TestContext};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One `AssignWork` frame translated into the tests this agent must run.
#[derive(Debug, Clone)]
pub struct Job {
    pub run_id: RunId,
    pub execution_type: ExecutionType,
    pub tests: Vec<TestToRun>,
    /// Commands run sequentially before any test; a non-zero exit aborts
    /// the run with an infra error rather than a test failure.
    pub setup_commands: Vec<String>,
    /// Commands run after all tests; failures are logged, not fatal.
    pub teardown_commands: Vec<String>,
    /// Extra variables layered onto the host environment and
    /// `CONDUCTOR_RUN_ID`/`CONDUCTOR_WORKSPACE` for every test.
    pub environment: Variables,
}

pub struct JobExecutor {
    drivers: Arc<DriverRegistry>,
    workspace_root: PathBuf,
}

impl JobExecutor {
    pub fn new(drivers: Arc<DriverRegistry>, workspace_root: PathBuf) -> Self {
        Self { drivers, workspace_root }
    }

    /// Runs every test in `job` sequentially, streaming `Progress`,
    /// `LogChunk` and `TestResultEvent` frames on `outbound`, and returns
    /// the aggregate summary for the closing `RunComplete`.
    pub async fn execute(&self, job: Job, outbound: mpsc::Sender<AgentMessage>) -> Result<RunSummary> {
        let workspace = self.workspace_root.join(job.run_id.to_string());
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| Error::Internal(format!("failed to create workspace: {e}")))?;

        let driver = self
            .drivers
            .for_execution_type(job.execution_type)
            .ok_or_else(|| Error::NoDriverAvailable(format!("{:?}", job.execution_type)))?;

        let variables = build_environment(job.run_id, &workspace, &job.environment);

        self.send_progress(&outbound, job.run_id, ProgressPhase::Setup, "running setup commands", 5, 0, job.tests.len() as u32)
            .await;
        if let Err(e) = run_commands(&job.setup_commands, &workspace, &variables).await {
            let _ = tokio::fs::remove_dir_all(&workspace).await;
            return Err(Error::InfraFailure(format!("setup command failed: {e}")));
        }
        self.send_progress(&outbound, job.run_id, ProgressPhase::Setup, "setup complete", 15, 0, job.tests.len() as u32)
            .await;

        let mut summary = RunSummary::default();
        let total = job.tests.len() as u32;

        for (completed, test) in job.tests.iter().enumerate() {
            let ctx = TestContext {
                workspace: workspace.clone(),
                variables: variables.clone(),
                test: test.clone(),
            };

            let (line_tx, mut line_rx) = mpsc::channel::<OutputLine>(256);
            let run_id = job.run_id;
            let test_id = test.id.clone();
            let outbound_lines = outbound.clone();
            let forward_lines = tokio::spawn(async move {
                while let Some(line) = line_rx.recv().await {
                    let stream = match line.stream {
                        OutputStream::Stdout => LogStream::Stdout,
                        OutputStream::Stderr => LogStream::Stderr,
                    };
                    let frame = AgentMessage::LogChunk {
                        run_id,
                        test_id: test_id.clone(),
                        stream,
                        content: line.content,
                        sequence: line.sequence,
                    };
                    if outbound_lines.send(frame).await.is_err() {
                        break;
                    }
                }
            });

            let (results_tx, mut results_rx) = mpsc::channel::<TestResult>(16);
            let outbound_results = outbound.clone();
            let forward_results = tokio::spawn(async move {
                while let Some(result) = results_rx.recv().await {
                    if outbound_results
                        .send(AgentMessage::TestResultEvent { run_id, result })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });

            let outcome = driver.execute(&ctx, line_tx, results_tx).await;
            let _ = forward_lines.await;
            let _ = forward_results.await;

            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    warn!(run_id = %job.run_id, test = %test.name, error = %e, "driver execution error");
                    continue;
                }
            };

            summary.record(&result, test.allow_failure);
            info!(run_id = %job.run_id, test = %test.name, status = ?result.status, "test finished");

            let completed = completed as u32 + 1;
            let percent = 20 + (completed.saturating_mul(70) / total.max(1)).min(70) as u8;
            self.send_progress(
                &outbound,
                job.run_id,
                ProgressPhase::Testing,
                &format!("ran {}", test.name),
                percent,
                completed,
                total,
            )
            .await;
        }

        self.send_progress(&outbound, job.run_id, ProgressPhase::Teardown, "running teardown commands", 95, total, total)
            .await;
        if let Err(e) = run_commands(&job.teardown_commands, &workspace, &variables).await {
            warn!(run_id = %job.run_id, error = %e, "teardown command failed, ignoring");
        }

        let _ = tokio::fs::remove_dir_all(&workspace).await;
        Ok(summary)
    }

    async fn send_progress(
        &self,
        outbound: &mpsc::Sender<AgentMessage>,
        run_id: RunId,
        phase: ProgressPhase,
        message: &str,
        percent: u8,
        tests_completed: u32,
        tests_total: u32,
    ) {
        let _ = outbound
            .send(AgentMessage::Progress {
                run_id,
                phase,
                message: message.to_string(),
                percent,
                tests_completed,
                tests_total,
                meta: ProgressMeta::default(),
            })
            .await;
    }
}

/// Host environment, overlaid with run identity variables, overlaid with
/// the run's requested environment (later layers win on conflicts).
fn build_environment(run_id: RunId, workspace: &std::path::Path, requested: &Variables) -> Variables {
    let mut variables: Variables = std::env::vars().collect();
    variables.insert("CONDUCTOR_RUN_ID".to_string(), run_id.to_string());
    variables.insert("CONDUCTOR_WORKSPACE".to_string(), workspace.display().to_string());
    variables.extend(requested.clone());
    variables
}

/// Runs each command in sequence via a shell, aborting at the first
/// non-zero exit.
async fn run_commands(commands: &[String], workspace: &std::path::Path, variables: &Variables) -> Result<()> {
    for command in commands {
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .envs(variables)
            .current_dir(workspace)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| Error::Internal(format!("failed to spawn command `{command}`: {e}")))?;

        if !status.success() {
            return Err(Error::Internal(format!(
                "command `{command}` exited with status {status}"
            )));
        }
    }
    Ok(())
}
