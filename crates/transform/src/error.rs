//! Transform error types.

use thiserror::Error;

/// A payload unusable as a whole. Carries enough context to find the
/// offending fetch in logs without reproducing it.
///
/// Per-record problems are not errors — they are rejects inside
/// [`crate::mapper::TransformOutput`], so one bad record never blocks
/// its siblings.
#[derive(Debug, Error)]
#[error("malformed payload from '{source_id}' (fingerprint {fingerprint}): {reason}")]
pub struct TransformError {
    pub source_id: String,
    pub fingerprint: String,
    pub reason: String,
}

impl TransformError {
    pub fn malformed(
        source_id: impl Into<String>,
        fingerprint: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            fingerprint: fingerprint.into(),
            reason: reason.into(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_carries_context() {
        let e = TransformError::malformed("activities", "abc123", "not valid JSON");
        let msg = e.to_string();
        assert!(msg.contains("activities"));
        assert!(msg.contains("abc123"));
        assert!(msg.contains("not valid JSON"));
    }
}
