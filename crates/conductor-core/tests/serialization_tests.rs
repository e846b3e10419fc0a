//! Serialization roundtrip tests for wire-facing domain types.

use chrono::Utc;
use conductor_core::agent::{AgentCapabilities, DisconnectReason, SystemMetrics};
use conductor_core::ids::*;
use conductor_core::protocol::*;
use conductor_core::run::*;

#[test]
fn test_run_roundtrips_through_json() {
    let run = TestRun {
        id: RunId::new(),
        priority: 10,
        status: RunStatus::Pending,
        git_url: "https://example.com/repo.git".to_string(),
        git_ref: "refs/heads/main".to_string(),
        git_sha: "abc123".to_string(),
        execution_type: ExecutionType::Subprocess,
        selection: SelectionCriteria::default(),
        tests: vec![TestToRun {
            id: TestId::new("suite::case"),
            name: "suite::case".to_string(),
            command: "cargo test suite::case".to_string(),
            working_directory: None,
            timeout_seconds: 60,
            retry_count: 0,
            allow_failure: false,
        }],
        setup_commands: vec!["./ci/setup.sh".to_string()],
        teardown_commands: vec!["./ci/teardown.sh".to_string()],
        environment: [("CI".to_string(), "true".to_string())].into_iter().collect(),
        shard: RunShard::default(),
        assigned_agent_id: None,
        retryable: true,
        retry_count: 0,
        max_retries: 2,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        overall_timeout_seconds: 600,
    };

    let json = serde_json::to_string(&run).expect("serialize");
    let parsed: TestRun = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(run.id, parsed.id);
    assert_eq!(run.git_sha, parsed.git_sha);
    assert_eq!(run.tests.len(), parsed.tests.len());
}

#[test]
fn test_result_roundtrip() {
    let result = TestResult {
        test_id: TestId::new("suite::case"),
        status: TestStatus::Failed,
        exit_code: Some(1),
        duration_ms: 4200,
        stack_trace: Some("panicked at ...".to_string()),
        artifact_ids: vec![ArtifactId::new()],
        retry_attempt: 1,
    };

    let json = serde_json::to_string(&result).expect("serialize");
    let parsed: TestResult = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(result.status, parsed.status);
    assert_eq!(result.duration_ms, parsed.duration_ms);
}

#[test]
fn register_message_roundtrip() {
    let msg = AgentMessage::Register {
        capabilities: AgentCapabilities {
            max_parallel: 4,
            network_zones: vec!["us-east".to_string()],
            docker_available: true,
        },
        labels: vec!["linux".to_string(), "x86_64".to_string()],
        version: "0.1.0".to_string(),
    };

    let json = serde_json::to_string(&msg).expect("serialize");
    let parsed: AgentMessage = serde_json::from_str(&json).expect("deserialize");

    match parsed {
        AgentMessage::Register { labels, version, .. } => {
            assert_eq!(labels, vec!["linux", "x86_64"]);
            assert_eq!(version, "0.1.0");
        }
        other => panic!("wrong variant: {other:?}"),
    }
}

#[test]
fn assign_work_message_roundtrip() {
    let msg = ControlMessage::AssignWork {
        run_id: RunId::new(),
        execution_type: ExecutionType::Container,
        git_url: "https://example.com/repo.git".to_string(),
        git_ref: "refs/heads/main".to_string(),
        git_sha: "deadbeef".to_string(),
        tests: vec![],
        setup_commands: vec![],
        teardown_commands: vec![],
        environment: Default::default(),
        overall_timeout_seconds: 300,
    };

    let json = serde_json::to_string(&msg).expect("serialize");
    let parsed: ControlMessage = serde_json::from_str(&json).expect("deserialize");

    match parsed {
        ControlMessage::AssignWork { execution_type, overall_timeout_seconds, .. } => {
            assert_eq!(execution_type, ExecutionType::Container);
            assert_eq!(overall_timeout_seconds, 300);
        }
        other => panic!("wrong variant: {other:?}"),
    }
}

#[test]
fn disconnecting_message_roundtrip() {
    let msg = AgentMessage::Disconnecting {
        reason: DisconnectReason::Graceful,
    };
    let json = serde_json::to_string(&msg).expect("serialize");
    let parsed: AgentMessage = serde_json::from_str(&json).expect("deserialize");
    assert!(matches!(parsed, AgentMessage::Disconnecting { reason: DisconnectReason::Graceful }));
}

#[test]
fn heartbeat_with_metrics_roundtrip() {
    let msg = AgentMessage::Heartbeat {
        active_run_ids: vec![RunId::new(), RunId::new()],
        metrics: Some(SystemMetrics {
            cpu_percent: 42.5,
            memory_used_bytes: 512 * 1024 * 1024,
            memory_total_bytes: 2 * 1024 * 1024 * 1024,
        }),
    };
    let json = serde_json::to_string(&msg).expect("serialize");
    let parsed: AgentMessage = serde_json::from_str(&json).expect("deserialize");
    match parsed {
        AgentMessage::Heartbeat { active_run_ids, metrics } => {
            assert_eq!(active_run_ids.len(), 2);
            assert!(metrics.is_some());
        }
        other => panic!("wrong variant: {other:?}"),
    }
}

#[test]
fn run_status_serializes_snake_case() {
    assert_eq!(serde_json::to_string(&RunStatus::Pending).unwrap(), "\"pending\"");
    assert_eq!(serde_json::to_string(&RunStatus::Running).unwrap(), "\"running\"");
    assert_eq!(serde_json::to_string(&RunStatus::Passed).unwrap(), "\"passed\"");
    assert_eq!(serde_json::to_string(&RunStatus::Failed).unwrap(), "\"failed\"");
}
