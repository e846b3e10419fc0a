//! Agent and agent-session types.

use crate::ids::{AgentId, RunId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What an agent is and what it can run, as declared at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub labels: Vec<String>,
    pub version: Option<String>,
    pub capabilities: AgentCapabilities,
    pub status: AgentStatus,
    pub active_run_ids: Vec<RunId>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// Slots not currently occupied by an active run.
    pub fn available_slots(&self) -> u32 {
        self.capabilities
            .max_parallel
            .saturating_sub(self.active_run_ids.len() as u32)
    }

    pub fn can_accept_more_work(&self) -> bool {
        self.status.is_dispatch_eligible() && self.available_slots() > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentCapabilities {
    pub max_parallel: u32,
    pub network_zones: Vec<String>,
    pub docker_available: bool,
}

/// Liveness/acceptance state of an agent as tracked by the manager.
///
/// Distinct from `AgentSession::state`, which tracks the transport-level
/// connection lifecycle of a single socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Draining,
    Offline,
}

impl AgentStatus {
    pub fn is_dispatch_eligible(&self) -> bool {
        matches!(self, AgentStatus::Idle | AgentStatus::Busy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SystemMetrics {
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

/// Payload an agent sends on first connecting, before it has an `AgentId`
/// assigned by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub labels: Vec<String>,
    pub version: String,
    pub capabilities: AgentCapabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Error,
}

/// Transport-level connection lifecycle of a single agent socket.
///
/// `Connecting -> Connected -> Disconnecting -> Disconnected`. A new
/// connection from the same agent id displaces whatever session currently
/// holds that slot in the pool rather than merging with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl SessionState {
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Disconnecting)
                | (Connected, Disconnecting)
                | (Disconnecting, Disconnected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_slots_never_underflows() {
        let agent = Agent {
            id: AgentId::new(),
            labels: vec![],
            version: None,
            capabilities: AgentCapabilities {
                max_parallel: 1,
                network_zones: vec![],
                docker_available: false,
            },
            status: AgentStatus::Idle,
            active_run_ids: vec![RunId::new(), RunId::new()],
            registered_at: Utc::now(),
            last_heartbeat_at: None,
        };
        assert_eq!(agent.available_slots(), 0);
        assert!(!agent.can_accept_more_work());
    }

    #[test]
    fn session_state_rejects_backward_transitions() {
        assert!(!SessionState::Connected.can_transition_to(SessionState::Connecting));
        assert!(SessionState::Connecting.can_transition_to(SessionState::Connected));
    }
}
