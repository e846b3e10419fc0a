//! Wire protocol exchanged over the agent/control-plane `WorkStream`.
//!
//! Both directions share one long-lived connection; messages are tagged
//! sum types so either side can demultiplex a single `recv` loop.

use crate::agent::{AgentCapabilities, DisconnectReason, SystemMetrics};
use crate::ids::{AgentId, RunId, TestId};
use crate::run::{ExecutionType, LogStream, ProgressMeta, ProgressPhase, TestResult, TestToRun, Variables};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Frames an agent sends to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Register {
        capabilities: AgentCapabilities,
        labels: Vec<String>,
        version: String,
    },
    Heartbeat {
        active_run_ids: Vec<RunId>,
        metrics: Option<SystemMetrics>,
    },
    WorkAck {
        run_id: RunId,
    },
    WorkRejected {
        run_id: RunId,
        reason: String,
    },
    Progress {
        run_id: RunId,
        phase: ProgressPhase,
        message: String,
        /// 0-100.
        percent: u8,
        tests_completed: u32,
        tests_total: u32,
        meta: ProgressMeta,
    },
    LogChunk {
        run_id: RunId,
        test_id: TestId,
        stream: LogStream,
        content: String,
        sequence: u64,
    },
    TestResultEvent {
        run_id: RunId,
        result: TestResult,
    },
    RunComplete {
        run_id: RunId,
        summary: crate::run::RunSummary,
    },
    Disconnecting {
        reason: DisconnectReason,
    },
}

/// Frames the control plane sends to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    RegisterAck {
        agent_id: AgentId,
        success: bool,
        server_version: String,
        /// Server-suggested cadence for this agent's `Heartbeat` frames,
        /// computed as `HeartbeatTimeout / 3`.
        heartbeat_interval_seconds: u64,
        error_message: Option<String>,
    },
    AssignWork {
        run_id: RunId,
        execution_type: ExecutionType,
        git_url: String,
        git_ref: String,
        git_sha: String,
        tests: Vec<TestToRun>,
        setup_commands: Vec<String>,
        teardown_commands: Vec<String>,
        environment: Variables,
        overall_timeout_seconds: u64,
    },
    CancelWork {
        run_id: RunId,
        reason: crate::run::CancelReasonType,
    },
    Drain,
    Undrain,
    Close {
        reason: String,
    },
}

impl AgentMessage {
    /// Frames that must never be silently dropped by a bounded send
    /// queue: they carry state transitions the scheduler is waiting on.
    pub fn is_critical(&self) -> bool {
        !matches!(self, AgentMessage::LogChunk { .. } | AgentMessage::Heartbeat { .. })
    }
}

impl ControlMessage {
    pub fn is_critical(&self) -> bool {
        !matches!(self, ControlMessage::Drain | ControlMessage::Undrain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_message_round_trips_through_json() {
        let msg = AgentMessage::WorkAck { run_id: RunId::new() };
        let json = serde_json::to_string(&msg).unwrap();
        let back: AgentMessage = serde_json::from_str(&json).unwrap();
        matches!(back, AgentMessage::WorkAck { .. });
    }

    #[test]
    fn log_chunk_and_heartbeat_are_not_critical() {
        let heartbeat = AgentMessage::Heartbeat {
            active_run_ids: vec![],
            metrics: None,
        };
        assert!(!heartbeat.is_critical());
        let log = AgentMessage::LogChunk {
            run_id: RunId::new(),
            test_id: TestId::new("t"),
            stream: LogStream::Stdout,
            content: String::new(),
            sequence: 0,
        };
        assert!(!log.is_critical());
        let ack = AgentMessage::WorkAck { run_id: RunId::new() };
        assert!(ack.is_critical());
    }
}
