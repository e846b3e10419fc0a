//! Builders for sample domain data used across unit and integration
//! tests.

use chrono::Utc;
use conductor_core::agent::{Agent, AgentCapabilities, AgentStatus};
use conductor_core::ids::{RunId, TestId};
use conductor_core::run::{ExecutionType, RunShard, RunStatus, SelectionCriteria, TestRun, TestToRun};

/// Factory for sample agents.
pub struct AgentFixture;

impl AgentFixture {
    /// A freshly registered, fully idle agent.
    pub fn connected() -> Agent {
        Agent {
            id: Default::default(),
            labels: vec!["default".to_string()],
            version: Some("0.1.0".to_string()),
            capabilities: AgentCapabilities { max_parallel: 4, network_zones: vec!["default".to_string()], docker_available: true },
            status: AgentStatus::Idle,
            active_run_ids: vec![],
            registered_at: Utc::now(),
            last_heartbeat_at: Some(Utc::now()),
        }
    }

    /// An agent with no free capacity.
    pub fn saturated() -> Agent {
        let mut agent = Self::connected();
        agent.capabilities.max_parallel = 1;
        agent.active_run_ids = vec![RunId::new()];
        agent
    }
}

/// Factory for sample test runs.
pub struct RunFixture;

impl RunFixture {
    /// A pending run with three simple subprocess tests.
    pub fn pending() -> TestRun {
        TestRun {
            id: RunId::new(),
            priority: 0,
            status: RunStatus::Pending,
            git_url: "https://example.com/repo.git".to_string(),
            git_ref: "refs/heads/main".to_string(),
            git_sha: "abc123".to_string(),
            execution_type: ExecutionType::Subprocess,
            selection: SelectionCriteria::default(),
            tests: vec![
                TestFixture::passing("t1"),
                TestFixture::passing("t2"),
                TestFixture::failing("t3"),
            ],
            setup_commands: vec![],
            teardown_commands: vec![],
            environment: Default::default(),
            shard: RunShard::default(),
            assigned_agent_id: None,
            retryable: true,
            retry_count: 0,
            max_retries: 1,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            overall_timeout_seconds: 300,
        }
    }

    pub fn requiring_docker() -> TestRun {
        let mut run = Self::pending();
        run.execution_type = ExecutionType::Container;
        run.selection.requires_docker = true;
        run
    }
}

/// Factory for sample tests-to-run.
pub struct TestFixture;

impl TestFixture {
    pub fn passing(id: &str) -> TestToRun {
        TestToRun {
            id: TestId::new(id),
            name: id.to_string(),
            command: "true".to_string(),
            working_directory: None,
            timeout_seconds: 30,
            retry_count: 0,
            allow_failure: false,
        }
    }

    pub fn failing(id: &str) -> TestToRun {
        TestToRun {
            id: TestId::new(id),
            name: id.to_string(),
            command: "false".to_string(),
            working_directory: None,
            timeout_seconds: 30,
            retry_count: 0,
            allow_failure: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_agent_has_free_capacity() {
        let agent = AgentFixture::connected();
        assert!(agent.can_accept_more_work());
    }

    #[test]
    fn saturated_agent_has_no_free_capacity() {
        let agent = AgentFixture::saturated();
        assert!(!agent.can_accept_more_work());
    }

    #[test]
    fn pending_run_has_three_tests() {
        let run = RunFixture::pending();
        assert_eq!(run.tests.len(), 3);
        assert_eq!(run.status, RunStatus::Pending);
    }
}
