//! Agent Manager: registration, heartbeat, and drain lifecycle layered
//! over an [`AgentRepository`].

use chrono::Utc;
use conductor_core::agent::{Agent, AgentRegistration, AgentStatus, SystemMetrics};
use conductor_core::ids::{AgentId, RunId};
use conductor_core::ports::AgentRepository;
use conductor_core::run::SelectionCriteria;
use conductor_core::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

pub struct AgentManager {
    repository: Arc<dyn AgentRepository>,
}

impl AgentManager {
    pub fn new(repository: Arc<dyn AgentRepository>) -> Self {
        Self { repository }
    }

    pub async fn register_agent(&self, id: AgentId, registration: AgentRegistration) -> Result<Agent> {
        let agent = Agent {
            id,
            labels: registration.labels,
            version: Some(registration.version),
            capabilities: registration.capabilities,
            status: AgentStatus::Idle,
            active_run_ids: Vec::new(),
            registered_at: Utc::now(),
            last_heartbeat_at: Some(Utc::now()),
        };
        self.repository.register(&agent).await?;
        info!(%id, "agent registered");
        Ok(agent)
    }

    /// Applies a heartbeat's reported active-run set. The set *replaces*
    /// whatever the manager previously believed, it never merges — a run
    /// the agent no longer reports is no longer active from the control
    /// plane's point of view, regardless of what the scheduler last
    /// assigned.
    pub async fn handle_heartbeat(
        &self,
        id: AgentId,
        active_run_ids: Vec<RunId>,
        metrics: Option<SystemMetrics>,
    ) -> Result<()> {
        let mut agent = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        agent.active_run_ids = active_run_ids;
        agent.last_heartbeat_at = Some(Utc::now());
        // The wire heartbeat carries no declared status, so idle/busy is
        // derived from the reported run set; draining is left alone until
        // an explicit undrain.
        if agent.status != AgentStatus::Draining {
            agent.status = if agent.active_run_ids.is_empty() {
                AgentStatus::Idle
            } else {
                AgentStatus::Busy
            };
        }
        let _ = metrics;
        self.repository.update(&agent).await?;
        self.repository.heartbeat(id).await
    }

    pub async fn drain_agent(&self, id: AgentId) -> Result<()> {
        self.set_status(id, AgentStatus::Draining).await
    }

    /// Only valid while the agent is Draining; resumes as Busy if it's
    /// still carrying active runs, else Idle.
    pub async fn undrain_agent(&self, id: AgentId) -> Result<()> {
        let mut agent = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        if agent.status != AgentStatus::Draining {
            return Err(Error::Other(format!("agent {id} is not draining")));
        }
        agent.status = if agent.active_run_ids.is_empty() {
            AgentStatus::Idle
        } else {
            AgentStatus::Busy
        };
        self.repository.update(&agent).await
    }

    async fn set_status(&self, id: AgentId, status: AgentStatus) -> Result<()> {
        let mut agent = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| Error::AgentNotFound(id.to_string()))?;
        agent.status = status;
        self.repository.update(&agent).await
    }

    pub async fn remove_agent(&self, id: AgentId) -> Result<()> {
        warn!(%id, "removing agent");
        self.repository.deregister(id).await
    }

    /// Agents eligible for dispatch against `criteria`: connected, with a
    /// free slot, and matching labels/zones/docker requirement.
    pub async fn get_available_agents(&self, criteria: &SelectionCriteria) -> Result<Vec<Agent>> {
        let candidates = self.repository.list_available(&criteria.required_labels).await?;
        Ok(candidates
            .into_iter()
            .filter(|a| a.can_accept_more_work())
            .filter(|a| criteria.matches(&a.capabilities, &a.labels))
            .collect())
    }

    pub async fn get_stale_agents(&self, threshold_seconds: u64) -> Result<Vec<Agent>> {
        self.repository.get_stale(threshold_seconds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conductor_core::agent::AgentCapabilities;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MockAgentRepository {
        agents: Mutex<Vec<Agent>>,
    }

    #[async_trait]
    impl AgentRepository for MockAgentRepository {
        async fn register(&self, agent: &Agent) -> Result<AgentId> {
            self.agents.lock().await.push(agent.clone());
            Ok(agent.id)
        }

        async fn get(&self, id: AgentId) -> Result<Option<Agent>> {
            Ok(self.agents.lock().await.iter().find(|a| a.id == id).cloned())
        }

        async fn list(&self) -> Result<Vec<Agent>> {
            Ok(self.agents.lock().await.clone())
        }

        async fn list_available(&self, labels: &[String]) -> Result<Vec<Agent>> {
            Ok(self
                .agents
                .lock()
                .await
                .iter()
                .filter(|a| labels.iter().all(|l| a.labels.contains(l)))
                .cloned()
                .collect())
        }

        async fn update(&self, agent: &Agent) -> Result<()> {
            let mut agents = self.agents.lock().await;
            if let Some(existing) = agents.iter_mut().find(|a| a.id == agent.id) {
                *existing = agent.clone();
            }
            Ok(())
        }

        async fn heartbeat(&self, _id: AgentId) -> Result<()> {
            Ok(())
        }

        async fn deregister(&self, id: AgentId) -> Result<()> {
            self.agents.lock().await.retain(|a| a.id != id);
            Ok(())
        }

        async fn get_stale(&self, _threshold_seconds: u64) -> Result<Vec<Agent>> {
            Ok(vec![])
        }
    }

    fn registration(labels: &[&str]) -> AgentRegistration {
        AgentRegistration {
            labels: labels.iter().map(|s| s.to_string()).collect(),
            version: "1.0.0".into(),
            capabilities: AgentCapabilities {
                max_parallel: 2,
                network_zones: vec!["default".into()],
                docker_available: true,
            },
        }
    }

    #[tokio::test]
    async fn heartbeat_replaces_not_merges_active_runs() {
        let repo = Arc::new(MockAgentRepository::default());
        let manager = AgentManager::new(repo.clone());
        let id = AgentId::new();
        manager.register_agent(id, registration(&["linux"])).await.unwrap();

        let run_a = RunId::new();
        manager.handle_heartbeat(id, vec![run_a], None).await.unwrap();
        let agent = repo.get(id).await.unwrap().unwrap();
        assert_eq!(agent.active_run_ids, vec![run_a]);

        let run_b = RunId::new();
        manager.handle_heartbeat(id, vec![run_b], None).await.unwrap();
        let agent = repo.get(id).await.unwrap().unwrap();
        assert_eq!(agent.active_run_ids, vec![run_b]);
    }

    #[tokio::test]
    async fn draining_agent_is_excluded_from_available() {
        let repo = Arc::new(MockAgentRepository::default());
        let manager = AgentManager::new(repo.clone());
        let id = AgentId::new();
        manager.register_agent(id, registration(&["linux"])).await.unwrap();
        manager.drain_agent(id).await.unwrap();

        let criteria = SelectionCriteria::default();
        let available = manager.get_available_agents(&criteria).await.unwrap();
        assert!(available.is_empty());
    }

    #[tokio::test]
    async fn undrain_rejects_agent_that_is_not_draining() {
        let repo = Arc::new(MockAgentRepository::default());
        let manager = AgentManager::new(repo.clone());
        let id = AgentId::new();
        manager.register_agent(id, registration(&["linux"])).await.unwrap();

        assert!(manager.undrain_agent(id).await.is_err());
        let agent = repo.get(id).await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn undrain_resumes_idle_with_no_active_runs() {
        let repo = Arc::new(MockAgentRepository::default());
        let manager = AgentManager::new(repo.clone());
        let id = AgentId::new();
        manager.register_agent(id, registration(&["linux"])).await.unwrap();
        manager.drain_agent(id).await.unwrap();

        manager.undrain_agent(id).await.unwrap();
        let agent = repo.get(id).await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn undrain_resumes_busy_with_active_runs() {
        let repo = Arc::new(MockAgentRepository::default());
        let manager = AgentManager::new(repo.clone());
        let id = AgentId::new();
        manager.register_agent(id, registration(&["linux"])).await.unwrap();
        manager.handle_heartbeat(id, vec![RunId::new()], None).await.unwrap();
        manager.drain_agent(id).await.unwrap();

        manager.undrain_agent(id).await.unwrap();
        let agent = repo.get(id).await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Busy);
    }

    #[tokio::test]
    async fn docker_requirement_filters_non_docker_agents() {
        let repo = Arc::new(MockAgentRepository::default());
        let manager = AgentManager::new(repo.clone());
        let id = AgentId::new();
        let mut reg = registration(&[]);
        reg.capabilities.docker_available = false;
        manager.register_agent(id, reg).await.unwrap();

        let criteria = SelectionCriteria {
            requires_docker: true,
            ..Default::default()
        };
        assert!(manager.get_available_agents(&criteria).await.unwrap().is_empty());
    }
}
