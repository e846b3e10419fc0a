//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the core domain and external
//! adapters (Postgres, object storage, in-memory test doubles).

use crate::agent::Agent;
use crate::ids::*;
use crate::run::{RunStatus, TestResult, TestRun};
use crate::{Error, Result};
use async_trait::async_trait;

/// Repository for agents known to the control plane.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn register(&self, agent: &Agent) -> Result<AgentId>;

    async fn get(&self, id: AgentId) -> Result<Option<Agent>>;

    async fn list(&self) -> Result<Vec<Agent>>;

    /// List agents currently eligible for dispatch, pre-filtered to those
    /// carrying every label requested.
    async fn list_available(&self, labels: &[String]) -> Result<Vec<Agent>>;

    async fn update(&self, agent: &Agent) -> Result<()>;

    async fn heartbeat(&self, id: AgentId) -> Result<()>;

    async fn deregister(&self, id: AgentId) -> Result<()>;

    /// Agents whose last heartbeat predates `threshold_seconds` ago.
    async fn get_stale(&self, threshold_seconds: u64) -> Result<Vec<Agent>>;
}

/// Repository for test runs.
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn create(&self, run: &TestRun) -> Result<RunId>;

    async fn get(&self, id: RunId) -> Result<Option<TestRun>>;

    async fn update(&self, run: &TestRun) -> Result<()>;

    /// Pending runs ordered priority DESC, created_at ASC — the order the
    /// scheduler must dispatch in.
    async fn get_pending(&self, limit: u32) -> Result<Vec<TestRun>>;

    /// Atomically transitions a run from `expected` to `next`, failing
    /// with [`Error::DispatchConflict`] if another dispatcher already
    /// moved it. This is the sole mechanism by which a run may leave
    /// `Pending`, guaranteeing at-most-once dispatch.
    async fn try_transition(&self, id: RunId, expected: RunStatus, next: RunStatus) -> Result<()>;
}

/// Repository for per-test results.
#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn record(&self, run_id: RunId, result: &TestResult) -> Result<()>;

    async fn get_for_run(&self, run_id: RunId) -> Result<Vec<TestResult>>;
}

/// Object storage for artifacts a test run produces (logs, screenshots,
/// coverage reports). Referenced only by `ArtifactId`; the storage
/// backend and bucket layout are out of scope.
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    async fn put(&self, id: ArtifactId, bytes: Vec<u8>) -> Result<()>;

    async fn get(&self, id: ArtifactId) -> Result<Vec<u8>>;
}
