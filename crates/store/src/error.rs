//! Store error types and sqlx error classification.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection-level failure — worth retrying with backoff.
    #[error("store connection error: {0}")]
    Connection(sqlx::Error),

    /// Record-level constraint violation (SQLSTATE class 23).
    #[error("constraint violation: {detail}")]
    ConstraintViolation { detail: String },

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An identifier from configuration failed the `[a-z_][a-z0-9_]*` check
    /// or collides with a store-owned column.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    /// Whether another attempt could succeed after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::ConstraintViolation { .. })
    }
}

/// Sort a sqlx error into the taxonomy the loader acts on.
///
/// SQLSTATE class 23 (integrity constraint violations) is record-level;
/// transport-ish failures are retryable; the rest is surfaced as-is.
pub fn classify(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            if code.starts_with("23") {
                StoreError::ConstraintViolation {
                    detail: format!("{} ({})", db_err.message(), code),
                }
            } else {
                StoreError::Database(e)
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => StoreError::Connection(e),
        _ => StoreError::Database(e),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
