//! PostgreSQL implementation of `ResultRepository`.

use async_trait::async_trait;
use conductor_core::ids::{RunId, TestId};
use conductor_core::ports::ResultRepository;
use conductor_core::run::{TestResult, TestStatus};
use conductor_core::{Error, Result};
use sqlx::{PgPool, Row};

pub struct PgResultRepository {
    pool: PgPool,
}

impl PgResultRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn status_to_str(status: &TestStatus) -> &'static str {
        match status {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Errored => "errored",
            TestStatus::TimedOut => "timed_out",
            TestStatus::Skipped => "skipped",
        }
    }

    fn str_to_status(s: &str) -> TestStatus {
        match s {
            "passed" => TestStatus::Passed,
            "errored" => TestStatus::Errored,
            "timed_out" => TestStatus::TimedOut,
            "skipped" => TestStatus::Skipped,
            _ => TestStatus::Failed,
        }
    }
}

#[async_trait]
impl ResultRepository for PgResultRepository {
    async fn record(&self, run_id: RunId, result: &TestResult) -> Result<()> {
        let artifact_ids: Vec<uuid::Uuid> =
            result.artifact_ids.iter().map(|id| *id.as_uuid()).collect();
        sqlx::query(
            r#"INSERT INTO test_results (run_id, test_id, status, exit_code, duration_ms, stack_trace, artifact_ids, retry_attempt)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (run_id, test_id) DO UPDATE SET
                 status = EXCLUDED.status,
                 exit_code = EXCLUDED.exit_code,
                 duration_ms = EXCLUDED.duration_ms,
                 stack_trace = EXCLUDED.stack_trace,
                 artifact_ids = EXCLUDED.artifact_ids,
                 retry_attempt = EXCLUDED.retry_attempt
               WHERE test_results.retry_attempt <= EXCLUDED.retry_attempt"#,
        )
        .bind(run_id.as_uuid())
        .bind(result.test_id.as_str())
        .bind(Self::status_to_str(&result.status))
        .bind(result.exit_code)
        .bind(result.duration_ms as i64)
        .bind(&result.stack_trace)
        .bind(&artifact_ids)
        .bind(result.retry_attempt as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_for_run(&self, run_id: RunId) -> Result<Vec<TestResult>> {
        let rows = sqlx::query(
            "SELECT test_id, status, exit_code, duration_ms, stack_trace, artifact_ids, retry_attempt FROM test_results WHERE run_id = $1",
        )
        .bind(run_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter()
            .map(|r| {
                let artifact_ids: Vec<uuid::Uuid> = r.get("artifact_ids");
                let status_str: String = r.get("status");
                Ok(TestResult {
                    test_id: TestId::new(r.get::<String, _>("test_id")),
                    status: Self::str_to_status(&status_str),
                    exit_code: r.get("exit_code"),
                    duration_ms: r.get::<i64, _>("duration_ms") as u64,
                    stack_trace: r.get("stack_trace"),
                    artifact_ids: artifact_ids
                        .into_iter()
                        .map(conductor_core::ids::ArtifactId::from_uuid)
                        .collect(),
                    retry_attempt: r.get::<i32, _>("retry_attempt") as u32,
                })
            })
            .collect()
    }
}
