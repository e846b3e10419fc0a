//! Core driver trait and shared execution types.

use async_trait::async_trait;
use conductor_core::run::{TestResult, TestToRun};
use conductor_core::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// A line of captured process output, ready to become a `LogChunk` frame.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Context for running a single test.
#[derive(Debug, Clone)]
pub struct TestContext {
    pub workspace: PathBuf,
    pub variables: HashMap<String, String>,
    pub test: TestToRun,
}

/// Trait for driving one test to completion, streaming its output.
///
/// `results_tx` receives one `TestResult` per attempt (including the
/// final one carried in the return value), so a retried test is visible
/// to callers attempt-by-attempt, not just as a single terminal result.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn execute(
        &self,
        ctx: &TestContext,
        output_tx: mpsc::Sender<OutputLine>,
        results_tx: mpsc::Sender<TestResult>,
    ) -> Result<TestResult>;

    fn can_handle(&self, execution_type: conductor_core::run::ExecutionType) -> bool;
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub retry_delay_ms: u64,
    /// Longest single output line kept before truncation.
    pub max_line_bytes: usize,
    /// Total bytes of output captured per test before further lines are dropped.
    pub max_total_bytes: usize,
    /// Bytes of stderr kept as the result's stack trace.
    pub stack_trace_bytes: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1000,
            max_line_bytes: 64 * 1024,
            max_total_bytes: 1024 * 1024,
            stack_trace_bytes: 4 * 1024,
        }
    }
}
