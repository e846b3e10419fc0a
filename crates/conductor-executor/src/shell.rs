//! Subprocess-based test execution on the host.

use crate::runner::{Driver, DriverConfig, OutputLine, OutputStream, TestContext};
use async_trait::async_trait;
use conductor_core::run::{ExecutionType, TestStatus};
use conductor_core::{Error, Result};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

pub struct SubprocessDriver {
    config: DriverConfig,
}

impl SubprocessDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    async fn run_once(
        &self,
        ctx: &TestContext,
        output_tx: mpsc::Sender<OutputLine>,
        sequence: Arc<AtomicU64>,
    ) -> Result<(i32, u64, String)> {
        let start = std::time::Instant::now();
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&ctx.test.command)
            .envs(&ctx.variables)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &ctx.test.working_directory {
            command.current_dir(ctx.workspace.join(dir));
        } else {
            command.current_dir(&ctx.workspace);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn test process: {e}")))?;

        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();

        let max_line = self.config.max_line_bytes;
        let max_total = self.config.max_total_bytes;

        let stdout_tx = output_tx.clone();
        let stdout_seq = sequence.clone();
        let stdout_handle = tokio::spawn(stream_lines(stdout, OutputStream::Stdout, stdout_tx, stdout_seq, max_line, max_total));

        let stderr_tx = output_tx;
        let stderr_seq = sequence;
        let stack_trace_bytes = self.config.stack_trace_bytes;
        let stderr_handle = tokio::spawn(async move {
            let mut tail = VecDeque::new();
            let mut tail_len = 0usize;
            let lines = stream_lines_collecting(stderr, OutputStream::Stderr, stderr_tx, stderr_seq, max_line, max_total).await;
            for line in lines {
                tail_len += line.len() + 1;
                tail.push_back(line);
                while tail_len > stack_trace_bytes {
                    if let Some(front) = tail.pop_front() {
                        tail_len -= front.len() + 1;
                    } else {
                        break;
                    }
                }
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let timeout_secs = ctx.test.timeout_seconds;
        let wait_result = match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
            Ok(r) => r,
            Err(_) => {
                warn!(test = %ctx.test.name, timeout_secs, "test timed out, killing process");
                let _ = child.kill().await;
                let _ = stdout_handle.await;
                let _ = stderr_handle.await;
                return Err(Error::TestTimeout { seconds: timeout_secs });
            }
        };

        let _ = stdout_handle.await;
        let stack_trace = stderr_handle.await.unwrap_or_default();

        let status = wait_result.map_err(|e| Error::Internal(format!("failed to wait for test process: {e}")))?;
        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;
        Ok((exit_code, duration_ms, stack_trace))
    }
}

async fn stream_lines(
    reader: impl tokio::io::AsyncRead + Unpin,
    stream: OutputStream,
    tx: mpsc::Sender<OutputLine>,
    sequence: Arc<AtomicU64>,
    max_line: usize,
    max_total: usize,
) {
    let mut lines = BufReader::new(reader).lines();
    let mut sent_bytes = 0usize;
    while let Ok(Some(mut line)) = lines.next_line().await {
        if line.len() > max_line {
            line.truncate(max_line);
        }
        sent_bytes += line.len();
        if sent_bytes > max_total {
            break;
        }
        let seq = sequence.fetch_add(1, Ordering::Relaxed);
        if tx.send(OutputLine { stream, content: line, sequence: seq }).await.is_err() {
            break;
        }
    }
}

async fn stream_lines_collecting(
    reader: impl tokio::io::AsyncRead + Unpin,
    stream: OutputStream,
    tx: mpsc::Sender<OutputLine>,
    sequence: Arc<AtomicU64>,
    max_line: usize,
    max_total: usize,
) -> Vec<String> {
    let mut lines = BufReader::new(reader).lines();
    let mut sent_bytes = 0usize;
    let mut collected = Vec::new();
    while let Ok(Some(mut line)) = lines.next_line().await {
        if line.len() > max_line {
            line.truncate(max_line);
        }
        collected.push(line.clone());
        sent_bytes += line.len();
        if sent_bytes <= max_total {
            let seq = sequence.fetch_add(1, Ordering::Relaxed);
            if tx.send(OutputLine { stream, content: line, sequence: seq }).await.is_err() {
                break;
            }
        }
    }
    collected
}

#[async_trait]
impl Driver for SubprocessDriver {
    async fn execute(
        &self,
        ctx: &TestContext,
        output_tx: mpsc::Sender<OutputLine>,
        results_tx: mpsc::Sender<conductor_core::run::TestResult>,
    ) -> Result<conductor_core::run::TestResult> {
        let sequence = Arc::new(AtomicU64::new(0));
        let max_attempts = ctx.test.retry_count + 1;
        let mut attempt = 0u32;
        loop {
            let is_last_attempt = attempt + 1 >= max_attempts;
            let result = match self.run_once(ctx, output_tx.clone(), sequence.clone()).await {
                Ok((exit_code, duration_ms, stack_trace)) => {
                    let status = if exit_code == 0 { TestStatus::Passed } else { TestStatus::Failed };
                    debug!(test = %ctx.test.name, exit_code, duration_ms, attempt, "attempt completed");
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
            info!(test = %ctx.test.name, attempt, "test failed, retrying");
            tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
        }
    }

    fn can_handle(&self, execution_type: ExecutionType) -> bool {
        execution_type == ExecutionType::Subprocess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::ids::TestId;
    use conductor_core::run::TestToRun;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn make_test(command: &str) -> TestToRun {
        TestToRun {
            id: TestId::new("t1"),
            name: "t1".into(),
            command: command.into(),
            working_directory: None,
            timeout_seconds: 5,
            retry_count: 0,
            allow_failure: false,
        }
    }

    #[tokio::test]
    async fn successful_command_reports_passed() {
        let driver = SubprocessDriver::new(DriverConfig::default());
        let (tx, mut rx) = mpsc::channel(100);
        let (results_tx, mut results_rx) = mpsc::channel(100);
        let ctx = TestContext {
            workspace: PathBuf::from("/tmp"),
            variables: HashMap::new(),
            test: make_test("echo hello"),
        };
        let result = driver.execute(&ctx, tx, results_tx).await.unwrap();
        assert_eq!(result.status, TestStatus::Passed);
        let line = rx.recv().await.unwrap();
        assert_eq!(line.content, "hello");
        let reported = results_rx.recv().await.unwrap();
        assert_eq!(reported.retry_attempt, 0);
    }

    #[tokio::test]
    async fn failing_command_reports_failed_with_exit_code() {
        let driver = SubprocessDriver::new(DriverConfig::default());
        let (tx, _rx) = mpsc::channel(100);
        let (results_tx, _results_rx) = mpsc::channel(100);
        let ctx = TestContext {
            workspace: PathBuf::from("/tmp"),
            variables: HashMap::new(),
            test: make_test("exit 7"),
        };
        let result = driver.execute(&ctx, tx, results_tx).await.unwrap();
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.exit_code, Some(7));
    }

    #[tokio::test]
    async fn retries_are_exhausted_before_reporting_failure() {
        let driver = SubprocessDriver::new(DriverConfig {
            retry_delay_ms: 1,
            ..Default::default()
        });
        let (tx, _rx) = mpsc::channel(100);
        let (results_tx, mut results_rx) = mpsc::channel(100);
        let mut test = make_test("exit 1");
        test.retry_count = 2;
        let ctx = TestContext {
            workspace: PathBuf::from("/tmp"),
            variables: HashMap::new(),
            test,
        };
        let result = driver.execute(&ctx, tx, results_tx).await.unwrap();
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.retry_attempt, 2);

        let mut attempts = Vec::new();
        while let Ok(r) = results_rx.try_recv() {
            attempts.push(r.retry_attempt);
        }
        assert_eq!(attempts, vec![0, 1, 2]);
    }
}
