//! Tick-based dispatch loop.

use crate::queue::PendingQueue;
use conductor_core::agent::Agent;
use conductor_core::ids::{AgentId, RunId};
use conductor_core::ports::{ResultRepository, RunRepository};
use conductor_core::protocol::ControlMessage;
use conductor_core::run::{CancelReasonType, RunStatus, TestRun};
use conductor_core::{Error, Result};
use conductor_manager::AgentManager;
use conductor_pool::ConnectionPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Scheduler {
    runs: Arc<dyn RunRepository>,
    results: Arc<dyn ResultRepository>,
    manager: Arc<AgentManager>,
    pool: ConnectionPool,
    watchdogs: Mutex<HashMap<RunId, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        runs: Arc<dyn RunRepository>,
        results: Arc<dyn ResultRepository>,
        manager: Arc<AgentManager>,
        pool: ConnectionPool,
    ) -> Self {
        Self {
            runs,
            results,
            manager,
            pool,
            watchdogs: Mutex::new(HashMap::new()),
        }
    }

    /// One scheduler tick: pull pending runs in priority order, dispatch
    /// each to the best matching available agent. Runs with no matching
    /// agent this tick are simply left pending for the next one.
    pub async fn tick(&self, max_runs: u32) -> Result<u32> {
        let pending = self.runs.get_pending(max_runs).await?;
        let mut queue = PendingQueue::new();
        for run in pending {
            queue.push(run);
        }

        let mut dispatched = 0u32;
        while let Some(run) = queue.pop() {
            match self.try_dispatch(&run).await {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(e) => warn!(run_id = %run.id, error = %e, "dispatch attempt failed"),
            }
        }
        Ok(dispatched)
    }

    async fn try_dispatch(&self, run: &TestRun) -> Result<bool> {
        let candidates = self.manager.get_available_agents(&run.selection).await?;
        let Some(agent) = pick_best_agent(&candidates) else {
            return Ok(false);
        };

        match self
            .runs
            .try_transition(run.id, RunStatus::Pending, RunStatus::Running)
            .await
        {
            Ok(()) => {}
            Err(Error::DispatchConflict(_)) => return Ok(false),
            Err(e) => return Err(e),
        }

        let assign = ControlMessage::AssignWork {
            run_id: run.id,
            execution_type: run.execution_type,
            git_url: run.git_url.clone(),
            git_ref: run.git_ref.clone(),
            git_sha: run.git_sha.clone(),
            tests: run.tests.clone(),
            setup_commands: run.setup_commands.clone(),
            teardown_commands: run.teardown_commands.clone(),
            environment: run.environment.clone(),
            overall_timeout_seconds: run.overall_timeout_seconds,
        };

        if let Err(e) = self.pool.send_control(agent.id, assign).await {
            warn!(run_id = %run.id, agent_id = %agent.id, error = %e, "failed to deliver AssignWork, reverting to pending");
            self.runs
                .try_transition(run.id, RunStatus::Running, RunStatus::Pending)
                .await?;
            return Ok(false);
        }

        let mut assigned = run.clone();
        assigned.assigned_agent_id = Some(agent.id);
        assigned.started_at = Some(chrono::Utc::now());
        self.runs.update(&assigned).await?;
        self.spawn_watchdog(run.id, run.overall_timeout_seconds).await;
        info!(run_id = %run.id, agent_id = %agent.id, "dispatched run");
        Ok(true)
    }

    async fn spawn_watchdog(&self, run_id: RunId, timeout_seconds: u64) {
        let runs = self.runs.clone();
        let pool = self.pool.clone();
        let manager = self.manager.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(timeout_seconds)).await;
            if let Ok(Some(run)) = runs.get(run_id).await {
                if run.status == RunStatus::Running {
                    warn!(%run_id, "run exceeded overall timeout, quarantining agent");
                    if let Some(agent_id) = run.assigned_agent_id {
                        let _ = pool
                            .send_control(
                                agent_id,
                                ControlMessage::CancelWork {
                                    run_id,
                                    reason: CancelReasonType::OverallTimeout,
                                },
                            )
                            .await;
                        let _ = manager.drain_agent(agent_id).await;
                    }
                    let _ = runs
                        .try_transition(run_id, RunStatus::Running, RunStatus::Errored)
                        .await;
                }
            }
        });
        self.watchdogs.lock().await.insert(run_id, handle);
    }

    async fn clear_watchdog(&self, run_id: RunId) {
        if let Some(handle) = self.watchdogs.lock().await.remove(&run_id) {
            handle.abort();
        }
    }

    pub async fn handle_work_rejected(&self, run_id: RunId, reason: &str) -> Result<()> {
        warn!(%run_id, reason, "agent rejected work");
        self.clear_watchdog(run_id).await;
        self.requeue_or_fail(run_id).await
    }

    pub async fn handle_agent_disconnected(&self, agent_id: AgentId, affected_run_ids: &[RunId]) -> Result<()> {
        for run_id in affected_run_ids {
            self.clear_watchdog(*run_id).await;
            self.requeue_or_fail(*run_id).await?;
        }
        let _ = agent_id;
        Ok(())
    }

    async fn requeue_or_fail(&self, run_id: RunId) -> Result<()> {
        let Some(mut run) = self.runs.get(run_id).await? else {
            return Ok(());
        };
        self.runs
            .try_transition(run_id, RunStatus::Running, RunStatus::Pending)
            .await
            .or_else(|e| match e {
                Error::DispatchConflict(_) => Ok(()),
                e => Err(e),
            })?;

        if run.has_retries_remaining() {
            run.retry_count += 1;
            run.assigned_agent_id = None;
            self.runs.update(&run).await?;
        } else {
            self.runs
                .try_transition(run_id, RunStatus::Pending, RunStatus::Errored)
                .await?;
        }
        Ok(())
    }

    pub async fn handle_run_complete(&self, run_id: RunId, summary: conductor_core::run::RunSummary) -> Result<()> {
        self.clear_watchdog(run_id).await;
        let Some(mut run) = self.runs.get(run_id).await? else {
            return Err(Error::RunNotFound(run_id.to_string()));
        };
        let status = summary.aggregate_status();
        self.runs.try_transition(run_id, RunStatus::Running, status).await?;
        run.status = status;
        run.completed_at = Some(chrono::Utc::now());
        self.runs.update(&run).await
    }

    pub fn results(&self) -> &Arc<dyn ResultRepository> {
        &self.results
    }
}

/// Tie-break among agents that all match a run's selection criteria:
/// most free slots first, then earliest heartbeat (load balancing: the
/// agent that's gone longest since last being picked gets first crack
/// at new work), then lowest id for a fully deterministic order.
fn pick_best_agent(candidates: &[Agent]) -> Option<&Agent> {
    candidates.iter().max_by(|a, b| {
        a.available_slots()
            .cmp(&b.available_slots())
            .then_with(|| b.last_heartbeat_at.cmp(&a.last_heartbeat_at))
            .then_with(|| b.id.to_string().cmp(&a.id.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use conductor_core::agent::{AgentCapabilities, AgentStatus};

    fn agent(slots_used: usize, heartbeat_secs_ago: i64) -> Agent {
        Agent {
            id: AgentId::new(),
            labels: vec![],
            version: None,
            capabilities: AgentCapabilities {
                max_parallel: 4,
                network_zones: vec![],
                docker_available: true,
            },
            status: AgentStatus::Idle,
            active_run_ids: (0..slots_used).map(|_| RunId::new()).collect(),
            registered_at: Utc::now(),
            last_heartbeat_at: Some(Utc::now() - chrono::Duration::seconds(heartbeat_secs_ago)),
        }
    }

    #[test]
    fn picks_agent_with_most_free_slots() {
        let busy = agent(3, 0);
        let idle = agent(0, 0);
        let agents = [busy, idle.clone()];
        let best = pick_best_agent(&agents).unwrap();
        assert_eq!(best.id, idle.id);
    }

    #[test]
    fn ties_on_slots_broken_by_earliest_heartbeat() {
        let stale = agent(0, 120);
        let fresh = agent(0, 1);
        let agents = [stale.clone(), fresh];
        let best = pick_best_agent(&agents).unwrap();
        assert_eq!(best.id, stale.id);
    }
}
