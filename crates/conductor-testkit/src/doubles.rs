//! In-memory port implementations for tests that need a working
//! repository without a database.

use async_trait::async_trait;
use chrono::Utc;
use conductor_core::agent::Agent;
use conductor_core::ids::{AgentId, ArtifactId, RunId};
use conductor_core::ports::{AgentRepository, ArtifactStorage, ResultRepository, RunRepository};
use conductor_core::run::{RunStatus, TestResult, TestRun};
use conductor_core::{Error, Result};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: Mutex<HashMap<AgentId, Agent>>,
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn register(&self, agent: &Agent) -> Result<AgentId> {
        self.agents.lock().await.insert(agent.id, agent.clone());
        Ok(agent.id)
    }

    async fn get(&self, id: AgentId) -> Result<Option<Agent>> {
        Ok(self.agents.lock().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Agent>> {
        Ok(self.agents.lock().await.values().cloned().collect())
    }

    async fn list_available(&self, labels: &[String]) -> Result<Vec<Agent>> {
        Ok(self
            .agents
            .lock()
            .await
            .values()
            .filter(|a| labels.iter().all(|l| a.labels.contains(l)))
            .cloned()
            .collect())
    }

    async fn update(&self, agent: &Agent) -> Result<()> {
        self.agents.lock().await.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn heartbeat(&self, id: AgentId) -> Result<()> {
        let mut agents = self.agents.lock().await;
        let agent = agents.get_mut(&id).ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        agent.last_heartbeat_at = Some(Utc::now());
        Ok(())
    }

    async fn deregister(&self, id: AgentId) -> Result<()> {
        self.agents.lock().await.remove(&id);
        Ok(())
    }

    async fn get_stale(&self, threshold_seconds: u64) -> Result<Vec<Agent>> {
        let now = Utc::now();
        Ok(self
            .agents
            .lock()
            .await
            .values()
            .filter(|a| match a.last_heartbeat_at {
                Some(at) => (now - at).num_seconds() as u64 > threshold_seconds,
                None => true,
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: Mutex<HashMap<RunId, TestRun>>,
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn create(&self, run: &TestRun) -> Result<RunId> {
        self.runs.lock().await.insert(run.id, run.clone());
        Ok(run.id)
    }

    async fn get(&self, id: RunId) -> Result<Option<TestRun>> {
        Ok(self.runs.lock().await.get(&id).cloned())
    }

    async fn update(&self, run: &TestRun) -> Result<()> {
        self.runs.lock().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_pending(&self, limit: u32) -> Result<Vec<TestRun>> {
        let runs = self.runs.lock().await;
        let mut pending: Vec<TestRun> = runs.values().filter(|r| r.status == RunStatus::Pending).cloned().collect();
        pending.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.created_at.cmp(&b.created_at)));
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn try_transition(&self, id: RunId, expected: RunStatus, next: RunStatus) -> Result<()> {
        let mut runs = self.runs.lock().await;
        let run = runs.get_mut(&id).ok_or_else(|| Error::RunNotFound(id.to_string()))?;
        if run.status != expected {
            return Err(Error::DispatchConflict(id.to_string()));
        }
        run.status = next;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryResultRepository {
    results: Mutex<HashMap<RunId, Vec<TestResult>>>,
}

#[async_trait]
impl ResultRepository for InMemoryResultRepository {
    async fn record(&self, run_id: RunId, result: &TestResult) -> Result<()> {
        self.results.lock().await.entry(run_id).or_default().push(result.clone());
        Ok(())
    }

    async fn get_for_run(&self, run_id: RunId) -> Result<Vec<TestResult>> {
        Ok(self.results.lock().await.get(&run_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryArtifactStorage {
    artifacts: Mutex<HashMap<ArtifactId, Vec<u8>>>,
}

#[async_trait]
impl ArtifactStorage for InMemoryArtifactStorage {
    async fn put(&self, id: ArtifactId, bytes: Vec<u8>) -> Result<()> {
        self.artifacts.lock().await.insert(id, bytes);
        Ok(())
    }

    async fn get(&self, id: ArtifactId) -> Result<Vec<u8>> {
        self.artifacts
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Other(format!("artifact not found: {id}")))
    }
}
