//! PostgreSQL implementation of `ArtifactStorage`.
//!
//! Backs artifacts with a `bytea` column rather than an object store —
//! the bucket/presigned-URL layout a production deployment would want is
//! explicitly out of scope; this satisfies the `put`/`get` contract so
//! the rest of the system never depends on the storage backend.

use async_trait::async_trait;
use conductor_core::ids::ArtifactId;
use conductor_core::ports::ArtifactStorage;
use conductor_core::{Error, Result};
use sqlx::{PgPool, Row};

pub struct PgArtifactStorage {
    pool: PgPool,
}

impl PgArtifactStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactStorage for PgArtifactStorage {
    async fn put(&self, id: ArtifactId, bytes: Vec<u8>) -> Result<()> {
        sqlx::query(
            "INSERT INTO artifacts (id, bytes) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET bytes = EXCLUDED.bytes",
        )
        .bind(id.as_uuid())
        .bind(&bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: ArtifactId) -> Result<Vec<u8>> {
        let row = sqlx::query("SELECT bytes FROM artifacts WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::Other(format!("artifact not found: {id}")))?;
        Ok(row.get("bytes"))
    }
}
