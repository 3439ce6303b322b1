//! Run history persistence.
//!
//! [`RunStore`] is a stateless struct with async methods taking a `&PgPool`.
//! Failures are recorded here and surfaced to operators; the dashboard only
//! ever reads committed entity rows and this table's timestamps.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use cadence_core::run::{RunCounts, RunStatus, RunTrigger};

use crate::error::{classify, StoreError};

/// Row from the `runs` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub source_id: String,
    pub status: String,
    pub trigger_type: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub fetched: i64,
    pub transformed: i64,
    pub loaded: i64,
    pub rejected: i64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

const RUN_COLUMNS: &str = "id, source_id, status, trigger_type, started_at, finished_at, \
                           fetched, transformed, loaded, rejected, error, created_at";

/// Stateless store for the `runs` table.
pub struct RunStore;

impl RunStore {
    /// Insert a new `pending` run and return the row.
    pub async fn create(
        pool: &PgPool,
        source_id: &str,
        trigger: RunTrigger,
    ) -> Result<RunRow, StoreError> {
        let sql = format!(
            "INSERT INTO runs (source_id, trigger_type) VALUES ($1, $2) RETURNING {}",
            RUN_COLUMNS
        );
        sqlx::query_as::<_, RunRow>(&sql)
            .bind(source_id)
            .bind(trigger.as_str())
            .fetch_one(pool)
            .await
            .map_err(classify)
    }

    /// Transition `pending → running` and stamp `started_at`.
    ///
    /// Returns false when the row was not in `pending` — the state machine
    /// never moves a run backwards.
    pub async fn mark_running(pool: &PgPool, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE runs SET status = 'running', started_at = now()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(pool)
        .await
        .map_err(classify)?;

        Ok(result.rows_affected() > 0)
    }

    /// Finalize a running run with its terminal status and counts.
    ///
    /// Guarded on `status = 'running'` so terminal states stay immutable even
    /// if finalize is called twice.
    pub async fn finalize(
        pool: &PgPool,
        id: Uuid,
        status: RunStatus,
        counts: &RunCounts,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        debug_assert!(status.is_terminal());

        let result = sqlx::query(
            "UPDATE runs SET
                status = $2,
                finished_at = now(),
                fetched = $3,
                transformed = $4,
                loaded = $5,
                rejected = $6,
                error = $7
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(counts.fetched as i64)
        .bind(counts.transformed as i64)
        .bind(counts.loaded as i64)
        .bind(counts.rejected as i64)
        .bind(error)
        .execute(pool)
        .await
        .map_err(classify)?;

        Ok(result.rows_affected() > 0)
    }

    /// Most recent run start for a source, if any.
    ///
    /// Used on startup so interval cadences resume from durable history
    /// instead of re-triggering immediately after every restart.
    pub async fn latest_started_at(
        pool: &PgPool,
        source_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT max(started_at) FROM runs WHERE source_id = $1",
        )
        .bind(source_id)
        .fetch_one(pool)
        .await
        .map_err(classify)
    }

    /// Recent runs for a source, newest first.
    pub async fn list_recent(
        pool: &PgPool,
        source_id: &str,
        limit: i64,
    ) -> Result<Vec<RunRow>, StoreError> {
        let sql = format!(
            "SELECT {} FROM runs WHERE source_id = $1 ORDER BY created_at DESC LIMIT $2",
            RUN_COLUMNS
        );
        sqlx::query_as::<_, RunRow>(&sql)
            .bind(source_id)
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(classify)
    }
}
