//! SQLite-backed checkpoint store.
//!
//! One row per thread, upserted on save. Uses runtime queries rather than
//! compile-time checked macros so the crate builds without a prepared
//! database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore, PersistedCheckpoint};

/// Checkpoint store on a SQLite database.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Connects and ensures the schema exists. `url` accepts any sqlx SQLite
    /// URL, including `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self, CheckpointError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(url)
            .await
            .map_err(backend)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Wraps an existing pool, ensuring the schema exists.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, CheckpointError> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), CheckpointError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id      TEXT PRIMARY KEY,
                message_id     TEXT NOT NULL,
                next_stage     TEXT NOT NULL,
                state_json     TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                created_at     TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

fn backend(err: sqlx::Error) -> CheckpointError {
    CheckpointError::Backend(err.to_string())
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let row = PersistedCheckpoint::try_from(&checkpoint)?;
        sqlx::query(
            "INSERT INTO checkpoints
                (thread_id, message_id, next_stage, state_json, schema_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(thread_id) DO UPDATE SET
                message_id = excluded.message_id,
                next_stage = excluded.next_stage,
                state_json = excluded.state_json,
                schema_version = excluded.schema_version,
                created_at = excluded.created_at",
        )
        .bind(&row.thread_id)
        .bind(&row.message_id)
        .bind(&row.next_stage)
        .bind(&row.state_json)
        .bind(row.schema_version as i64)
        .bind(row.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = sqlx::query(
            "SELECT thread_id, message_id, next_stage, state_json, schema_version, created_at
             FROM checkpoints WHERE thread_id = ?1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created_at: String = row.get("created_at");
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| CheckpointError::Backend(format!("bad created_at: {e}")))?
            .with_timezone(&Utc);
        let persisted = PersistedCheckpoint {
            thread_id: row.get("thread_id"),
            message_id: row.get("message_id"),
            next_stage: row.get("next_stage"),
            state_json: row.get("state_json"),
            schema_version: row.get::<i64, _>("schema_version") as u32,
            created_at,
        };
        Checkpoint::try_from(persisted).map(Some)
    }

    async fn delete(&self, thread_id: &str) -> Result<(), CheckpointError> {
        sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?1")
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn list_threads(&self) -> Result<Vec<String>, CheckpointError> {
        let rows = sqlx::query("SELECT thread_id FROM checkpoints ORDER BY thread_id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().map(|row| row.get("thread_id")).collect())
    }
}
