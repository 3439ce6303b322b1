//! Fetch error taxonomy.
//!
//! Transient failures (timeouts, 5xx, connection resets) are retried with
//! backoff; permanent failures (auth, bad config) fail the call immediately.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient fetch error for '{source_id}': {reason}")]
    Transient { source_id: String, reason: String },

    #[error("permanent fetch error for '{source_id}': {reason}")]
    Permanent { source_id: String, reason: String },

    #[error("fetch for '{source_id}' exhausted {attempts} attempts: {reason}")]
    RetriesExhausted {
        source_id: String,
        attempts: u32,
        reason: String,
    },
}

impl FetchError {
    pub fn transient(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    pub fn permanent(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Permanent {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

// ── Tests ────────────────────────────────────────────────────────────
