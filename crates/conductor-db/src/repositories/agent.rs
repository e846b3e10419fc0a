//! PostgreSQL implementation of `AgentRepository`.

use async_trait::async_trait;
use conductor_core::agent::{Agent, AgentCapabilities, AgentStatus};
use conductor_core::ids::{AgentId, RunId};
use conductor_core::ports::AgentRepository;
use conductor_core::{Error, Result};
use sqlx::{PgPool, Row};

pub struct PgAgentRepository {
    pool: PgPool,
}

impl PgAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn status_to_str(status: &AgentStatus) -> &'static str {
        match status {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Draining => "draining",
            AgentStatus::Offline => "offline",
        }
    }

    fn str_to_status(s: &str) -> AgentStatus {
        match s {
            "idle" => AgentStatus::Idle,
            "busy" => AgentStatus::Busy,
            "draining" => AgentStatus::Draining,
            _ => AgentStatus::Offline,
        }
    }

    fn row_to_agent(&self, r: &sqlx::postgres::PgRow) -> Result<Agent> {
        let capabilities: AgentCapabilities = serde_json::from_value(r.get("capabilities"))
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let active_run_ids: Vec<uuid::Uuid> = r.get("active_run_ids");
        let status_str: String = r.get("status");
        Ok(Agent {
            id: AgentId::from_uuid(r.get::<uuid::Uuid, _>("id")),
            labels: r.get("labels"),
            version: r.get("version"),
            capabilities,
            status: Self::str_to_status(&status_str),
            active_run_ids: active_run_ids.into_iter().map(RunId::from_uuid).collect(),
            registered_at: r.get("registered_at"),
            last_heartbeat_at: r.get("last_heartbeat_at"),
        })
    }
}

#[async_trait]
impl AgentRepository for PgAgentRepository {
    async fn register(&self, agent: &Agent) -> Result<AgentId> {
        let capabilities_json = serde_json::to_value(&agent.capabilities)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let active_run_ids: Vec<uuid::Uuid> =
            agent.active_run_ids.iter().map(|id| *id.as_uuid()).collect();
        sqlx::query(
            r#"INSERT INTO agents (id, labels, version, capabilities, status, active_run_ids, registered_at, last_heartbeat_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (id) DO UPDATE SET
                 labels = EXCLUDED.labels,
                 version = EXCLUDED.version,
                 capabilities = EXCLUDED.capabilities,
                 status = EXCLUDED.status,
                 active_run_ids = EXCLUDED.active_run_ids,
                 last_heartbeat_at = EXCLUDED.last_heartbeat_at"#,
        )
        .bind(agent.id.as_uuid())
        .bind(&agent.labels)
        .bind(&agent.version)
        .bind(&capabilities_json)
        .bind(Self::status_to_str(&agent.status))
        .bind(&active_run_ids)
        .bind(agent.registered_at)
        .bind(agent.last_heartbeat_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(agent.id)
    }

    async fn get(&self, id: AgentId) -> Result<Option<Agent>> {
        let row = sqlx::query(
            "SELECT id, labels, version, capabilities, status, active_run_ids, registered_at, last_heartbeat_at FROM agents WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        row.as_ref().map(|r| self.row_to_agent(r)).transpose()
    }

    async fn list(&self) -> Result<Vec<Agent>> {
        let rows = sqlx::query(
            "SELECT id, labels, version, capabilities, status, active_run_ids, registered_at, last_heartbeat_at FROM agents ORDER BY registered_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        rows.iter().map(|r| self.row_to_agent(r)).collect()
    }

    async fn list_available(&self, labels: &[String]) -> Result<Vec<Agent>> {
        let rows = sqlx::query(
            "SELECT id, labels, version, capabilities, status, active_run_ids, registered_at, last_heartbeat_at FROM agents WHERE status IN ('idle', 'busy') AND labels @> $1",
        )
        .bind(labels)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        rows.iter().map(|r| self.row_to_agent(r)).collect()
    }

    async fn update(&self, agent: &Agent) -> Result<()> {
        let capabilities_json = serde_json::to_value(&agent.capabilities)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let active_run_ids: Vec<uuid::Uuid> =
            agent.active_run_ids.iter().map(|id| *id.as_uuid()).collect();
        sqlx::query(
            "UPDATE agents SET labels = $2, version = $3, capabilities = $4, status = $5, active_run_ids = $6, last_heartbeat_at = $7 WHERE id = $1",
        )
        .bind(agent.id.as_uuid())
        .bind(&agent.labels)
        .bind(&agent.version)
        .bind(&capabilities_json)
        .bind(Self::status_to_str(&agent.status))
        .bind(&active_run_ids)
        .bind(agent.last_heartbeat_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn heartbeat(&self, id: AgentId) -> Result<()> {
        sqlx::query("UPDATE agents SET last_heartbeat_at = NOW() WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn deregister(&self, id: AgentId) -> Result<()> {
        sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_stale(&self, threshold_seconds: u64) -> Result<Vec<Agent>> {
        let threshold = chrono::Utc::now() - chrono::Duration::seconds(threshold_seconds as i64);
        let rows = sqlx::query(
            "SELECT id, labels, version, capabilities, status, active_run_ids, registered_at, last_heartbeat_at FROM agents WHERE last_heartbeat_at < $1 AND status != 'offline'",
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        rows.iter().map(|r| self.row_to_agent(r)).collect()
    }
}
