//! Container-based test execution using Docker.

use crate::runner::{Driver, DriverConfig, OutputLine, OutputStream, TestContext};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use conductor_core::run::{ExecutionType, TestStatus};
use conductor_core::{Error, Result};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

const DEFAULT_IMAGE: &str = "alpine:latest";
const IMAGE_VARIABLE: &str = "CONDUCTOR_CONTAINER_IMAGE";

pub struct ContainerDriver {
    docker: Docker,
    config: DriverConfig,
}

impl ContainerDriver {
    pub fn new(config: DriverConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Internal(format!("failed to connect to Docker: {e}")))?;
        Ok(Self { docker, config })
    }

    pub fn with_docker(docker: Docker, config: DriverConfig) -> Self {
        Self { docker, config }
    }

    async fn run_once(
        &self,
        image: &str,
        ctx: &TestContext,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<(i32, u64, String)> {
        let start = std::time::Instant::now();
        let container_name = format!("conductor-{}", uuid::Uuid::new_v4());

        info!(image, container = %container_name, test = %ctx.test.name, "starting container execution");

        let env: Vec<String> = ctx
            .variables
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let container_config = Config {
            image: Some(image.to_string()),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), ctx.test.command.clone()]),
            env: Some(env),
            working_dir: Some("/workspace".to_string()),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(vec![format!("{}:/workspace", ctx.workspace.display())]),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: &container_name,
            platform: None,
        };

        self.docker
            .create_container(Some(create_options), container_config)
            .await
            .map_err(|e| Error::Internal(format!("failed to create container: {e}")))?;

        self.docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Internal(format!("failed to start container: {e}")))?;

        let log_options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut log_stream = self.docker.logs(&container_name, Some(log_options));
        let mut sequence = 0u64;
        let mut stderr_tail = String::new();
        let max_line = self.config.max_line_bytes;
        let mut sent_bytes = 0usize;

        while let Some(log_result) = log_stream.next().await {
            match log_result {
                Ok(LogOutput::StdOut { message }) => {
                    let mut content = String::from_utf8_lossy(&message).trim_end().to_string();
                    if content.len() > max_line {
                        content.truncate(max_line);
                    }
                    sent_bytes += content.len();
                    sequence += 1;
                    if sent_bytes <= self.config.max_total_bytes
                        && output_tx
                            .send(OutputLine { stream: OutputStream::Stdout, content, sequence })
                            .await
                            .is_err()
                    {
                        break;
                    }
                }
                Ok(LogOutput::StdErr { message }) => {
                    let mut content = String::from_utf8_lossy(&message).trim_end().to_string();
                    if content.len() > max_line {
                        content.truncate(max_line);
                    }
                    stderr_tail.push_str(&content);
                    stderr_tail.push('\n');
                    if stderr_tail.len() > self.config.stack_trace_bytes {
                        let excess = stderr_tail.len() - self.config.stack_trace_bytes;
                        stderr_tail.drain(0..excess);
                    }
                    sent_bytes += content.len();
                    sequence += 1;
                    if sent_bytes <= self.config.max_total_bytes
                        && output_tx
                            .send(OutputLine { stream: OutputStream::Stderr, content, sequence })
                            .await
                            .is_err()
                    {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "error reading container logs");
                    break;
                }
            }
        }

        let wait_options = WaitContainerOptions { condition: "not-running" };
        let wait_result = match timeout(
            Duration::from_secs(ctx.test.timeout_seconds),
            self.docker.wait_container(&container_name, Some(wait_options)).next(),
        )
        .await
        {
            Ok(Some(result)) => result,
            Ok(None) => {
                return Err(Error::Internal("container wait returned no result".into()));
            }
            Err(_) => {
                warn!(timeout_secs = ctx.test.timeout_seconds, "container execution timed out");
                let _ = self.docker.kill_container::<String>(&container_name, None).await;
                self.cleanup(&container_name).await;
                return Err(Error::TestTimeout { seconds: ctx.test.timeout_seconds });
            }
        };

        let exit_code = wait_result
            .map_err(|e| Error::Internal(format!("container wait failed: {e}")))?
            .status_code as i32;

        self.cleanup(&container_name).await;

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(container = %container_name, exit_code, duration_ms, "container execution completed");
        Ok((exit_code, duration_ms, stderr_tail.trim_end().to_string()))
    }

    async fn cleanup(&self, container_name: &str) {
        let remove_options = RemoveContainerOptions { force: true, ..Default::default() };
        if let Err(e) = self.docker.remove_container(container_name, Some(remove_options)).await {
            warn!(container = container_name, error = %e, "failed to remove container");
        }
    }
}

#[async_trait]
impl Driver for ContainerDriver {
    async fn execute(
        &self,
        ctx: &TestContext,
        output_tx: mpsc::Sender<OutputLine>,
        results_tx: mpsc::Sender<conductor_core::run::TestResult>,
    ) -> Result<conductor_core::run::TestResult> {
        let image = ctx
            .variables
            .get(IMAGE_VARIABLE)
            .cloned()
            .unwrap_or_else(|| DEFAULT_IMAGE.to_string());

        let max_attempts = ctx.test.retry_count + 1;
        let mut attempt = 0u32;
        loop {
            let is_last_attempt = attempt + 1 >= max_attempts;
            let result = match self.run_once(&image, ctx, output_tx.clone()).await {
                Ok((exit_code, duration_ms, stack_trace)) => {
                    let status = if exit_code == 0 { TestStatus::Passed } else { TestStatus::Failed };
                    debug!(test = %ctx.test.name, exit_code, duration_ms, attempt, "container attempt completed");
                    conductor_core::run::TestResult {
                        test_id: ctx.test.id.clone(),
                        status,
                        exit_code: Some(exit_code),
                        duration_ms,
                        stack_trace: if stack_trace.is_empty() { None } else { Some(stack_trace) },
                        artifact_ids: vec![],
                        retry_attempt: attempt,
                    }
                }
                Err(Error::TestTimeout { seconds }) => conductor_core::run::TestResult {
                    test_id: ctx.test.id.clone(),
                    status: TestStatus::TimedOut,
                    exit_code: None,
                    duration_ms: seconds * 1000,
                    stack_trace: None,
                    artifact_ids: vec![],
                    retry_attempt: attempt,
                },
                Err(e) => conductor_core::run::TestResult {
                    test_id: ctx.test.id.clone(),
                    status: TestStatus::Errored,
                    exit_code: None,
                    duration_ms: 0,
                    stack_trace: Some(e.to_string()),
                    artifact_ids: vec![],
                    retry_attempt: attempt,
                },
            };

            let _ = results_tx.send(result.clone()).await;

            if result.status == TestStatus::Passed || is_last_attempt {
                return Ok(result);
            }
            attempt += 1;
            info!(test = %ctx.test.name, attempt, "container test failed, retrying");
            tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
        }
    }

    fn can_handle(&self, execution_type: ExecutionType) -> bool {
        execution_type == ExecutionType::Container
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_driver() -> ContainerDriver {
        ContainerDriver::with_docker(
            Docker::connect_with_local_defaults().expect("docker client construction never dials out"),
            DriverConfig::default(),
        )
    }

    #[test]
    fn only_handles_container_execution_type() {
        let driver = make_driver();
        assert!(driver.can_handle(ExecutionType::Container));
        assert!(!driver.can_handle(ExecutionType::Subprocess));
    }

    #[test]
    fn image_variable_overrides_default() {
        let mut variables = std::collections::HashMap::new();
        variables.insert(IMAGE_VARIABLE.to_string(), "ubuntu:22.04".to_string());
        let image = variables.get(IMAGE_VARIABLE).cloned().unwrap_or_else(|| DEFAULT_IMAGE.to_string());
        assert_eq!(image, "ubuntu:22.04");

        let empty: std::collections::HashMap<String, String> = std::collections::HashMap::new();
        let image = empty.get(IMAGE_VARIABLE).cloned().unwrap_or_else(|| DEFAULT_IMAGE.to_string());
        assert_eq!(image, DEFAULT_IMAGE);
    }
}
