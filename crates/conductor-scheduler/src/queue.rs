//! In-memory priority ordering for pending runs.
//!
//! The repository's `get_pending` already returns runs ordered priority
//! DESC, created_at ASC; this type exists for callers (tests, and the
//! scheduler's own tie-breaking among runs pulled in a single tick) that
//! want the same ordering without round-tripping to storage.

use conductor_core::run::TestRun;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Ranked(TestRun);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earlier created_at first.
        match self.0.priority.cmp(&other.0.priority) {
            Ordering::Equal => other.0.created_at.cmp(&self.0.created_at),
            ord => ord,
        }
    }
}

#[derive(Default)]
pub struct PendingQueue {
    heap: BinaryHeap<Ranked>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, run: TestRun) {
        self.heap.push(Ranked(run));
    }

    pub fn pop(&mut self) -> Option<TestRun> {
        self.heap.pop().map(|r| r.0)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::ids::RunId;
    use conductor_core::run::{ExecutionType, RunShard, RunStatus, SelectionCriteria};

    fn run(priority: i32, created_offset_secs: i64) -> TestRun {
        TestRun {
            id: RunId::new(),
            priority,
            status: RunStatus::Pending,
            git_url: "git://example".into(),
            git_ref: "main".into(),
            git_sha: "deadbeef".into(),
            execution_type: ExecutionType::Subprocess,
            selection: SelectionCriteria::default(),
            tests: vec![],
            setup_commands: vec![],
            teardown_commands: vec![],
            environment: Default::default(),
            shard: RunShard::default(),
            assigned_agent_id: None,
            retryable: true,
            retry_count: 0,
            max_retries: 3,
            created_at: chrono::Utc::now() + chrono::Duration::seconds(created_offset_secs),
            started_at: None,
            completed_at: None,
            overall_timeout_seconds: 3600,
        }
    }

    #[test]
    fn higher_priority_dequeues_first() {
        let mut queue = PendingQueue::new();
        queue.push(run(1, 0));
        queue.push(run(5, 0));
        assert_eq!(queue.pop().unwrap().priority, 5);
    }

    #[test]
    fn equal_priority_breaks_tie_by_earlier_created_at() {
        let mut queue = PendingQueue::new();
        let older = run(1, -60);
        let newer = run(1, 0);
        let older_id = older.id;
        queue.push(newer);
        queue.push(older);
        assert_eq!(queue.pop().unwrap().id, older_id);
    }
}
