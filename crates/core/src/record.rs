//! Payload and record types flowing through the pipeline.
//!
//! A fetch call produces a [`RawPayload`]; the transformer turns each payload
//! into zero or more [`NormalizedRecord`]s which the loader commits.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifier of a configured source (the `id` slug from the sources file).
pub type SourceId = String;

/// Typed column values — sources deliver JSON but the store needs SQL types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TypedValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Null,
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// Extract as string, returning None for anything but Text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Coerce to a record version number.
    ///
    /// Integers pass through, timestamps become epoch seconds, and numeric
    /// text is parsed. Anything else has no version interpretation.
    pub fn as_version(&self) -> Option<i64> {
        match self {
            TypedValue::Integer(i) => Some(*i),
            TypedValue::Timestamp(ts) => Some(ts.timestamp()),
            TypedValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Render the value as an opaque cursor string for checkpointing.
    pub fn to_cursor(&self) -> Option<String> {
        match self {
            TypedValue::Text(s) => Some(s.clone()),
            TypedValue::Integer(i) => Some(i.to_string()),
            TypedValue::Float(f) => Some(f.to_string()),
            TypedValue::Timestamp(ts) => Some(ts.to_rfc3339()),
            TypedValue::Boolean(_) | TypedValue::Null => None,
        }
    }
}

/// Lowercase hex SHA-256 of a payload body.
pub fn fingerprint(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// One raw response from a single fetch call, tagged with its origin.
///
/// Transient — exists only within a run.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub source_id: SourceId,
    /// 1-based page number within the fetch sequence.
    pub page: u32,
    pub fetched_at: DateTime<Utc>,
    pub body: Vec<u8>,
    /// Content fingerprint (hex SHA-256 of `body`).
    pub fingerprint: String,
}

impl RawPayload {
    pub fn new(source_id: impl Into<SourceId>, page: u32, body: Vec<u8>) -> Self {
        let fingerprint = fingerprint(&body);
        Self {
            source_id: source_id.into(),
            page,
            fetched_at: Utc::now(),
            body,
            fingerprint,
        }
    }
}

/// The canonical row shape produced by the transformer.
///
/// `columns` preserves the declaration order from the source's entity schema
/// so generated SQL is stable. The natural key names a subset of `columns`
/// that identifies the logical entity across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub table: String,
    pub columns: IndexMap<String, TypedValue>,
    pub natural_key: Vec<String>,
    pub version: i64,
}

impl NormalizedRecord {
    /// Human-readable natural key rendering for logs and reject reasons.
    pub fn key_display(&self) -> String {
        self.natural_key
            .iter()
            .map(|k| {
                let v = self.columns.get(k).map(|v| match v {
                    TypedValue::Text(s) => s.clone(),
                    TypedValue::Integer(i) => i.to_string(),
                    TypedValue::Float(f) => f.to_string(),
                    TypedValue::Boolean(b) => b.to_string(),
                    TypedValue::Timestamp(ts) => ts.to_rfc3339(),
                    TypedValue::Null => "null".to_string(),
                });
                format!("{}={}", k, v.unwrap_or_else(|| "?".to_string()))
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ── Tests ────────────────────────────────────────────────────────────
