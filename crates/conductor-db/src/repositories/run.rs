//! PostgreSQL implementation of `RunRepository`.

use async_trait::async_trait;
use conductor_core::ids::{AgentId, RunId, ShardId};
use conductor_core::ports::RunRepository;
use conductor_core::run::{
    ExecutionType, RunShard, RunStatus, SelectionCriteria, TestRun, TestToRun, Variables,
};
use conductor_core::{Error, Result};
use sqlx::{PgPool, Row};

pub struct PgRunRepository {
    pool: PgPool,
}

impl PgRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn execution_type_to_str(t: &ExecutionType) -> &'static str {
        match t {
            ExecutionType::Subprocess => "subprocess",
            ExecutionType::Container => "container",
        }
    }

    fn str_to_execution_type(s: &str) -> ExecutionType {
        match s {
            "container" => ExecutionType::Container,
            _ => ExecutionType::Subprocess,
        }
    }

    fn status_to_str(status: &RunStatus) -> &'static str {
        match status {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Errored => "errored",
        }
    }

    fn str_to_status(s: &str) -> RunStatus {
        match s {
            "running" => RunStatus::Running,
            "passed" => RunStatus::Passed,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            "errored" => RunStatus::Errored,
            _ => RunStatus::Pending,
        }
    }

    fn row_to_run(&self, r: &sqlx::postgres::PgRow) -> Result<TestRun> {
        let selection: SelectionCriteria = serde_json::from_value(r.get("selection"))
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let tests: Vec<TestToRun> = serde_json::from_value(r.get("tests"))
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let setup_commands: Vec<String> = serde_json::from_value(r.get("setup_commands"))
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let teardown_commands: Vec<String> = serde_json::from_value(r.get("teardown_commands"))
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let environment: Variables = serde_json::from_value(r.get("environment"))
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let status_str: String = r.get("status");
        let execution_type_str: String = r.get("execution_type");
        Ok(TestRun {
            id: RunId::from_uuid(r.get::<uuid::Uuid, _>("id")),
            priority: r.get("priority"),
            status: Self::str_to_status(&status_str),
            git_url: r.get("git_url"),
            git_ref: r.get("git_ref"),
            git_sha: r.get("git_sha"),
            execution_type: Self::str_to_execution_type(&execution_type_str),
            selection,
            tests,
            setup_commands,
            teardown_commands,
            environment,
            shard: RunShard {
                id: r
                    .get::<uuid::Uuid, _>("shard_id")
                    .to_string()
                    .parse()
                    .unwrap_or_else(|_| ShardId::new()),
                index: r.get::<i32, _>("shard_index") as u32,
                total: r.get::<i32, _>("shard_total") as u32,
            },
            assigned_agent_id: r
                .get::<Option<uuid::Uuid>, _>("assigned_agent_id")
                .map(AgentId::from_uuid),
            retryable: r.get("retryable"),
            retry_count: r.get::<i32, _>("retry_count") as u32,
            max_retries: r.get::<i32, _>("max_retries") as u32,
            created_at: r.get("created_at"),
            started_at: r.get("started_at"),
            completed_at: r.get("completed_at"),
            overall_timeout_seconds: r.get::<i64, _>("overall_timeout_seconds") as u64,
        })
    }
}

#[async_trait]
impl RunRepository for PgRunRepository {
    async fn create(&self, run: &TestRun) -> Result<RunId> {
        let selection_json =
            serde_json::to_value(&run.selection).map_err(|e| Error::Serialization(e.to_string()))?;
        let tests_json =
            serde_json::to_value(&run.tests).map_err(|e| Error::Serialization(e.to_string()))?;
        let setup_json = serde_json::to_value(&run.setup_commands)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let teardown_json = serde_json::to_value(&run.teardown_commands)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        let environment_json =
            serde_json::to_value(&run.environment).map_err(|e| Error::Serialization(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO runs (id, priority, status, git_url, git_ref, git_sha, execution_type, selection, tests,
                                  setup_commands, teardown_commands, environment,
                                  shard_id, shard_index, shard_total, assigned_agent_id, retryable, retry_count,
                                  max_retries, created_at, started_at, completed_at, overall_timeout_seconds)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)"#,
        )
        .bind(run.id.as_uuid())
        .bind(run.priority)
        .bind(Self::status_to_str(&run.status))
        .bind(&run.git_url)
        .bind(&run.git_ref)
        .bind(&run.git_sha)
        .bind(Self::execution_type_to_str(&run.execution_type))
        .bind(&selection_json)
        .bind(&tests_json)
        .bind(&setup_json)
        .bind(&teardown_json)
        .bind(&environment_json)
        .bind(run.shard.id.as_uuid())
        .bind(run.shard.index as i32)
        .bind(run.shard.total as i32)
        .bind(run.assigned_agent_id.map(|id| *id.as_uuid()))
        .bind(run.retryable)
        .bind(run.retry_count as i32)
        .bind(run.max_retries as i32)
        .bind(run.created_at)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.overall_timeout_seconds as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(run.id)
    }

    async fn get(&self, id: RunId) -> Result<Option<TestRun>> {
        let row = sqlx::query(
            "SELECT id, priority, status, git_url, git_ref, git_sha, execution_type, selection, tests, setup_commands, teardown_commands, environment, shard_id, shard_index, shard_total, assigned_agent_id, retryable, retry_count, max_retries, created_at, started_at, completed_at, overall_timeout_seconds FROM runs WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        row.as_ref().map(|r| self.row_to_run(r)).transpose()
    }

    async fn update(&self, run: &TestRun) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET status = $2, assigned_agent_id = $3, retry_count = $4, started_at = $5, completed_at = $6 WHERE id = $1",
        )
        .bind(run.id.as_uuid())
        .bind(Self::status_to_str(&run.status))
        .bind(run.assigned_agent_id.map(|id| *id.as_uuid()))
        .bind(run.retry_count as i32)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_pending(&self, limit: u32) -> Result<Vec<TestRun>> {
        let rows = sqlx::query(
            "SELECT id, priority, status, git_url, git_ref, git_sha, execution_type, selection, tests, setup_commands, teardown_commands, environment, shard_id, shard_index, shard_total, assigned_agent_id, retryable, retry_count, max_retries, created_at, started_at, completed_at, overall_timeout_seconds FROM runs WHERE status = 'pending' ORDER BY priority DESC, created_at ASC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        rows.iter().map(|r| self.row_to_run(r)).collect()
    }

    /// The compare-and-set at the heart of at-most-once dispatch: the
    /// `WHERE status = $2` makes this a no-op unless the run is still in
    /// the expected state, so two dispatchers racing on the same run can
    /// never both succeed.
    async fn try_transition(&self, id: RunId, expected: RunStatus, next: RunStatus) -> Result<()> {
        let result = sqlx::query("UPDATE runs SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id.as_uuid())
            .bind(Self::status_to_str(&expected))
            .bind(Self::status_to_str(&next))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::DispatchConflict(id.to_string()));
        }
        Ok(())
    }
}

