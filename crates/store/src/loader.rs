//! Batch loader: version-gated upserts, one transaction per batch.
//!
//! Re-applying an identical batch changes nothing — the upsert only updates
//! when the incoming version is newer than or equal to the stored one, and
//! ties go to the incoming row so replays converge. A batch is visible to
//! readers all at once or not at all.

use std::time::Duration;

use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use tracing::warn;

use cadence_core::record::{NormalizedRecord, TypedValue};
use cadence_core::source::{ColumnType, EntitySchema};

use crate::error::{classify, StoreError};
use crate::schema::check_identifiers;

/// Outcome of applying one batch.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Records committed (insert or update).
    pub loaded: u64,
    /// Records that still violated a constraint after isolated retry.
    pub rejected: Vec<LoadReject>,
}

#[derive(Debug, Clone)]
pub struct LoadReject {
    /// Natural-key rendering of the record, for operator logs.
    pub key: String,
    pub reason: String,
}

/// Build the upsert statement for one entity schema.
///
/// Placeholders follow column declaration order, with `record_version` last.
pub fn build_upsert(schema: &EntitySchema) -> Result<String, StoreError> {
    check_identifiers(schema)?;

    let mut insert_cols: Vec<&str> = schema.columns.keys().map(|s| s.as_str()).collect();
    insert_cols.push("record_version");

    let placeholders: Vec<String> = (1..=insert_cols.len()).map(|i| format!("${}", i)).collect();

    let mut set_clauses: Vec<String> = schema
        .columns
        .keys()
        .filter(|c| !schema.natural_key.iter().any(|k| k == *c))
        .map(|c| format!("{} = EXCLUDED.{}", c, c))
        .collect();
    set_clauses.push("record_version = EXCLUDED.record_version".to_string());
    set_clauses.push("loaded_at = now()".to_string());

    Ok(format!(
        "INSERT INTO {table} ({cols}) VALUES ({vals}) \
         ON CONFLICT ({key}) DO UPDATE SET {set} \
         WHERE {table}.record_version <= EXCLUDED.record_version",
        table = schema.table,
        cols = insert_cols.join(", "),
        vals = placeholders.join(", "),
        key = schema.natural_key.join(", "),
        set = set_clauses.join(", "),
    ))
}

/// Bind one typed value, using the declared column type for NULLs so the
/// parameter is typed correctly on the wire.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &TypedValue,
    ty: ColumnType,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        TypedValue::Text(s) => query.bind(s.clone()),
        TypedValue::Integer(i) => query.bind(*i),
        TypedValue::Float(f) => query.bind(*f),
        TypedValue::Boolean(b) => query.bind(*b),
        TypedValue::Timestamp(ts) => query.bind(*ts),
        TypedValue::Null => match ty {
            ColumnType::Text => query.bind(Option::<String>::None),
            ColumnType::Integer => query.bind(Option::<i64>::None),
            ColumnType::Float => query.bind(Option::<f64>::None),
            ColumnType::Boolean => query.bind(Option::<bool>::None),
            ColumnType::Timestamp => {
                query.bind(Option::<chrono::DateTime<chrono::Utc>>::None)
            }
        },
    }
}

pub struct Loader {
    pool: PgPool,
    /// Attempts for a connection-level failure before the batch fails.
    max_attempts: u32,
    base_delay: Duration,
}

impl Loader {
    pub fn new(pool: PgPool, max_attempts: u32, base_delay: Duration) -> Self {
        Self { pool, max_attempts, base_delay }
    }

    /// Apply a batch of normalized records atomically.
    ///
    /// A record that violates a constraint is removed, the rest of the batch
    /// is retried in a fresh transaction, and the offender is retried once in
    /// isolation before being reported rejected. Connection failures are
    /// retried with backoff up to the configured bound, then fail the batch.
    pub async fn apply_batch(
        &self,
        schema: &EntitySchema,
        records: &[NormalizedRecord],
    ) -> Result<LoadReport, StoreError> {
        let mut report = LoadReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let sql = build_upsert(schema)?;

        let mut remaining: Vec<&NormalizedRecord> = records.iter().collect();
        let mut isolated: Vec<&NormalizedRecord> = Vec::new();

        // Each pass either commits the batch or removes one offender, so this
        // terminates within records.len() passes.
        while !remaining.is_empty() {
            match self.commit_with_retry(&sql, schema, &remaining).await {
                Ok(()) => break,
                Err((Some(index), e)) if e.is_constraint_violation() => {
                    let offender = remaining.remove(index);
                    warn!(
                        table = %schema.table,
                        key = %offender.key_display(),
                        error = %e,
                        "record violated a constraint — isolating and retrying batch"
                    );
                    isolated.push(offender);
                }
                Err((_, e)) => return Err(e),
            }
        }
        report.loaded += remaining.len() as u64;

        for record in isolated {
            match self.commit_with_retry(&sql, schema, &[record]).await {
                Ok(()) => report.loaded += 1,
                Err((_, e)) if e.is_constraint_violation() => {
                    report.rejected.push(LoadReject {
                        key: record.key_display(),
                        reason: e.to_string(),
                    });
                }
                Err((_, e)) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Commit one transaction, retrying connection-level failures.
    async fn commit_with_retry(
        &self,
        sql: &str,
        schema: &EntitySchema,
        records: &[&NormalizedRecord],
    ) -> Result<(), (Option<usize>, StoreError)> {
        let mut attempt = 0u32;
        loop {
            match self.try_commit(sql, schema, records).await {
                Ok(()) => return Ok(()),
                Err((index, e)) if e.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err((index, e));
                    }
                    // Exponential backoff, capped at 30s.
                    let delay = self
                        .base_delay
                        .saturating_mul(2u32.saturating_pow(attempt.min(5)))
                        .min(Duration::from_secs(30));
                    warn!(
                        table = %schema.table,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "store connection failure — retrying commit"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// One transaction over the given records. Any error before commit rolls
    /// the whole transaction back (dropped transactions roll back), so a
    /// concurrent reader never observes part of a batch.
    async fn try_commit(
        &self,
        sql: &str,
        schema: &EntitySchema,
        records: &[&NormalizedRecord],
    ) -> Result<(), (Option<usize>, StoreError)> {
        let mut tx = self.pool.begin().await.map_err(|e| (None, classify(e)))?;

        for (i, record) in records.iter().enumerate() {
            let mut query = sqlx::query(sql);
            for (name, ty) in &schema.columns {
                let value = record.columns.get(name).unwrap_or(&TypedValue::Null);
                query = bind_value(query, value, *ty);
            }
            query = query.bind(record.version);
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| (Some(i), classify(e)))?;
        }

        tx.commit().await.map_err(|e| (None, classify(e)))?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
