//! Checkpoint persistence.
//!
//! A checkpoint is an opaque per-source cursor marking the last durably
//! committed data point. The runner advances it strictly after the
//! corresponding batch commit is acknowledged — never before — so a crash
//! between commit and advance replays data the upsert then absorbs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::error::{classify, StoreError};

/// Row from the `checkpoints` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CheckpointRow {
    pub source_id: String,
    pub cursor: String,
    pub updated_at: DateTime<Utc>,
}

/// Stateless store for the `checkpoints` table.
pub struct CheckpointStore;

impl CheckpointStore {
    /// Current cursor for a source, if one has ever been committed.
    pub async fn get(pool: &PgPool, source_id: &str) -> Result<Option<CheckpointRow>, StoreError> {
        sqlx::query_as::<_, CheckpointRow>(
            "SELECT source_id, cursor, updated_at FROM checkpoints WHERE source_id = $1",
        )
        .bind(source_id)
        .fetch_optional(pool)
        .await
        .map_err(classify)
    }

    /// Advance the cursor past durably committed data.
    pub async fn advance(pool: &PgPool, source_id: &str, cursor: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO checkpoints (source_id, cursor, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (source_id) DO UPDATE SET
                cursor = EXCLUDED.cursor,
                updated_at = now()",
        )
        .bind(source_id)
        .bind(cursor)
        .execute(pool)
        .await
        .map_err(classify)?;

        Ok(())
    }
}
