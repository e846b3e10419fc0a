//! Run, shard, and test-result types.

use crate::ids::{AgentId, ArtifactId, RunId, ShardId, TestId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A unit of scheduling: one checkout, run against one or more tests, on
/// one agent at a time.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TestRun {
    pub id: RunId,
    pub priority: i32,
    pub status: RunStatus,
    pub git_url: String,
    pub git_ref: String,
    pub git_sha: String,
    pub execution_type: ExecutionType,
    pub selection: SelectionCriteria,
    pub tests: Vec<TestToRun>,
    /// Commands run sequentially before any test; a non-zero exit aborts
    /// the run with an infra error rather than a test failure.
    pub setup_commands: Vec<String>,
    /// Commands run after all tests; failures are logged, not fatal.
    pub teardown_commands: Vec<String>,
    /// Extra variables layered onto the host environment and
    /// `CONDUCTOR_RUN_ID`/`CONDUCTOR_WORKSPACE` for every test.
    pub environment: Variables,
    pub shard: RunShard,
    pub assigned_agent_id: Option<AgentId>,
    pub retryable: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub overall_timeout_seconds: u64,
}

impl TestRun {
    pub fn dispatch_key(&self) -> (i32, DateTime<Utc>) {
        (self.priority, self.created_at)
    }

    pub fn has_retries_remaining(&self) -> bool {
        self.retryable && self.retry_count < self.max_retries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    Subprocess,
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Cancelled,
    Errored,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Passed | RunStatus::Failed | RunStatus::Cancelled | RunStatus::Errored
        )
    }
}

/// Filters a run uses to narrow which agents it may dispatch to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SelectionCriteria {
    pub required_labels: Vec<String>,
    pub network_zones: Vec<String>,
    pub requires_docker: bool,
}

impl SelectionCriteria {
    pub fn matches(&self, capabilities: &crate::agent::AgentCapabilities, labels: &[String]) -> bool {
        if self.requires_docker && !capabilities.docker_available {
            return false;
        }
        if !self
            .network_zones
            .iter()
            .all(|z| capabilities.network_zones.contains(z))
        {
            return false;
        }
        self.required_labels.iter().all(|l| labels.contains(l))
    }
}

/// One test to execute as part of a `TestRun`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestToRun {
    pub id: TestId,
    pub name: String,
    pub command: String,
    pub working_directory: Option<String>,
    pub timeout_seconds: u64,
    pub retry_count: u32,
    pub allow_failure: bool,
}

/// Which slice of the full test set this run covers. Defaults to the
/// whole run (shard 0 of 1) — multi-shard splitting is not performed by
/// the scheduler itself yet, but every run carries the field so a future
/// splitter needs no schema change.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunShard {
    pub id: ShardId,
    pub index: u32,
    pub total: u32,
}

impl Default for RunShard {
    fn default() -> Self {
        Self {
            id: ShardId::new(),
            index: 0,
            total: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestResult {
    pub test_id: TestId,
    pub status: TestStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub stack_trace: Option<String>,
    pub artifact_ids: Vec<ArtifactId>,
    /// 0-indexed attempt number this result is for. A retried test
    /// reports one `TestResult` per attempt, all sharing a `test_id`.
    pub retry_attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Errored,
    TimedOut,
    Skipped,
}

impl TestStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::Errored | TestStatus::TimedOut)
    }
}

/// Aggregate counts reported in a run's final summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunSummary {
    pub passed: u32,
    /// All failures, including `allow_failure` ones — kept for visibility.
    pub failed: u32,
    /// Subset of `failed` where `allow_failure` was false. Drives
    /// `aggregate_status`; an allowed failure is never counted here.
    pub hard_failed: u32,
    pub errored: u32,
    pub skipped: u32,
}

impl RunSummary {
    /// Folds one result in, honoring `allow_failure`: an allowed failure
    /// is still counted in `failed` for visibility but never flips the
    /// run's overall status by itself.
    pub fn record(&mut self, result: &TestResult, allow_failure: bool) {
        match result.status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Skipped => self.skipped += 1,
            TestStatus::Failed => {
                self.failed += 1;
                if !allow_failure {
                    self.hard_failed += 1;
                }
            }
            TestStatus::Errored | TestStatus::TimedOut => self.errored += 1,
        }
    }

    pub fn aggregate_status(&self) -> RunStatus {
        if self.errored > 0 {
            RunStatus::Errored
        } else if self.hard_failed > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CancelReason {
    pub reason: CancelReasonType,
    pub cancelled_by: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CancelReasonType {
    UserRequested,
    OverallTimeout,
    Superseded,
}

/// Chunk of process output streamed from an agent.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogChunk {
    pub test_id: TestId,
    pub stream: LogStream,
    pub content: String,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Extra context carried in a `Progress` frame, independent of the wire
/// message count — used to surface a dropped-log-frame counter without
/// adding a new message variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressMeta {
    pub dropped_log_count: u64,
}

/// Which stage of a run a `Progress` frame describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Setup,
    Testing,
    Teardown,
}

pub type Variables = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentCapabilities;

    #[test]
    fn selection_criteria_requires_docker() {
        let criteria = SelectionCriteria {
            required_labels: vec![],
            network_zones: vec![],
            requires_docker: true,
        };
        let caps = AgentCapabilities {
            max_parallel: 1,
            network_zones: vec![],
            docker_available: false,
        };
        assert!(!criteria.matches(&caps, &[]));
    }

    #[test]
    fn run_summary_allow_failure_still_counted_but_not_fatal() {
        let mut summary = RunSummary::default();
        let result = TestResult {
            test_id: TestId::new("t1"),
            status: TestStatus::Failed,
            exit_code: Some(1),
            duration_ms: 10,
            stack_trace: None,
            artifact_ids: vec![],
            retry_attempt: 0,
        };
        summary.record(&result, true);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.hard_failed, 0);
        assert_eq!(summary.aggregate_status(), RunStatus::Passed);
    }

    #[test]
    fn run_summary_hard_failure_flips_status() {
        let mut summary = RunSummary::default();
        let result = TestResult {
            test_id: TestId::new("t1"),
            status: TestStatus::Failed,
            exit_code: Some(1),
            duration_ms: 10,
            stack_trace: None,
            artifact_ids: vec![],
            retry_attempt: 0,
        };
        summary.record(&result, false);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.hard_failed, 1);
        assert_eq!(summary.aggregate_status(), RunStatus::Failed);
    }

    #[test]
    fn default_shard_is_whole_run() {
        let shard = RunShard::default();
        assert_eq!(shard.index, 0);
        assert_eq!(shard.total, 1);
    }
}
