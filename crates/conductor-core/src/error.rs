//! Error types for Conductor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Run errors
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run already completed")]
    RunAlreadyCompleted,

    #[error("run cancelled: {reason}")]
    RunCancelled { reason: String },

    #[error("run timed out after {seconds}s")]
    RunTimeout { seconds: u64 },

    #[error("dispatch race lost: run {0} was no longer pending")]
    DispatchConflict(String),

    // Agent / session errors
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("no available agents matching criteria: {0:?}")]
    NoAvailableAgents(Vec<String>),

    #[error("agent disconnected: {0}")]
    AgentDisconnected(String),

    #[error("agent session already exists for agent {0}, displacing previous session")]
    SessionDisplaced(String),

    #[error("agent rejected work: {0}")]
    WorkRejected(String),

    #[error("send queue full and frame is critical: {0}")]
    SendTimeout(String),

    // Test / executor errors
    #[error("test failed with exit code {exit_code}: {message}")]
    TestFailed { exit_code: i32, message: String },

    #[error("test timed out after {seconds}s")]
    TestTimeout { seconds: u64 },

    #[error("no driver available for execution type {0}")]
    NoDriverAvailable(String),

    #[error("infrastructure failure: {0}")]
    InfraFailure(String),

    // Protocol errors
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("malformed frame: {0}")]
    Malformed(String),

    // Infrastructure errors
    #[error("database error: {0}")]
    Database(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
