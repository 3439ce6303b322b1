//! Payload decoding and per-record mapping.
//!
//! [`transform`] is the whole transformer surface: it decodes the payload
//! according to the source's shape, maps each record object onto the entity
//! schema, and splits the outcome into records and rejects. One bad record
//! never aborts its siblings; an undecodable payload is the only hard error.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

use cadence_core::record::{NormalizedRecord, RawPayload, TypedValue};
use cadence_core::source::{PayloadShape, SourceDescriptor};

use crate::error::TransformError;
use crate::value::coerce;

/// A record that could not be mapped, counted but not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    /// Position of the record within its payload.
    pub index: usize,
    pub reason: String,
}

/// Result of transforming one payload.
#[derive(Debug, Default)]
pub struct TransformOutput {
    pub records: Vec<NormalizedRecord>,
    pub rejects: Vec<Reject>,
}

impl TransformOutput {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.rejects.is_empty()
    }
}

/// Transform a raw payload into normalized records.
///
/// Pure: the only inputs are the payload and the descriptor.
pub fn transform(
    payload: &RawPayload,
    descriptor: &SourceDescriptor,
) -> Result<TransformOutput, TransformError> {
    let malformed = |reason: String| {
        TransformError::malformed(&payload.source_id, &payload.fingerprint, reason)
    };

    let text = std::str::from_utf8(&payload.body)
        .map_err(|e| malformed(format!("payload is not UTF-8: {}", e)))?;

    let objects: Vec<(usize, Result<Map<String, Value>, String>)> = match &descriptor.shape {
        PayloadShape::Json(shape) => {
            let doc: Value = serde_json::from_str(text)
                .map_err(|e| malformed(format!("payload is not valid JSON: {}", e)))?;
            let array = navigate(&doc, &shape.record_path)
                .map_err(malformed)?;
            array
                .iter()
                .enumerate()
                .map(|(i, v)| (i, as_object(v)))
                .collect()
        }
        PayloadShape::JsonLines(_) => text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                let parsed = serde_json::from_str::<Value>(line)
                    .map_err(|e| format!("invalid JSON line: {}", e))
                    .and_then(|v| as_object(&v));
                (i, parsed)
            })
            .collect(),
    };

    let ts_format = descriptor.shape.timestamp_format();
    let mut out = TransformOutput::default();

    for (index, object) in objects {
        let obj = match object {
            Ok(o) => o,
            Err(reason) => {
                out.rejects.push(Reject { index, reason });
                continue;
            }
        };
        match map_record(&obj, descriptor, payload, ts_format) {
            Ok(record) => out.records.push(record),
            Err(reason) => {
                debug!(
                    source_id = %payload.source_id,
                    index = index,
                    reason = %reason,
                    "record rejected"
                );
                out.rejects.push(Reject { index, reason });
            }
        }
    }

    Ok(out)
}

/// Walk a `/`-separated path into the document and expect an array there.
fn navigate<'a>(doc: &'a Value, record_path: &str) -> Result<&'a Vec<Value>, String> {
    let mut current = doc;
    for segment in record_path.split('/').filter(|s| !s.is_empty()) {
        current = current
            .get(segment)
            .ok_or_else(|| format!("record path segment '{}' not found", segment))?;
    }
    current
        .as_array()
        .ok_or_else(|| format!("record path '{}' is not an array", record_path))
}

fn as_object(value: &Value) -> Result<Map<String, Value>, String> {
    value
        .as_object()
        .cloned()
        .ok_or_else(|| "record is not a JSON object".to_string())
}

/// Map one source object onto the entity schema.
///
/// Undeclared source fields are ignored; declared columns missing from the
/// object become `Null`. A null or missing natural-key column rejects the
/// record, as does a version column that cannot coerce to an integer.
fn map_record(
    obj: &Map<String, Value>,
    descriptor: &SourceDescriptor,
    payload: &RawPayload,
    ts_format: Option<&str>,
) -> Result<NormalizedRecord, String> {
    let entity = &descriptor.entity;
    let mut columns = IndexMap::with_capacity(entity.columns.len());

    for (name, ty) in &entity.columns {
        let value = match obj.get(name) {
            Some(v) => coerce(v, *ty, ts_format)
                .map_err(|reason| format!("column '{}': {}", name, reason))?,
            None => TypedValue::Null,
        };
        columns.insert(name.clone(), value);
    }

    for key in &entity.natural_key {
        if columns.get(key).map(TypedValue::is_null).unwrap_or(true) {
            return Err(format!("missing natural key column '{}'", key));
        }
    }

    let version = match &entity.version_column {
        Some(vc) => {
            let value = columns.get(vc).unwrap_or(&TypedValue::Null);
            value
                .as_version()
                .ok_or_else(|| format!("version column '{}' has no integer interpretation", vc))?
        }
        None => payload.fetched_at.timestamp(),
    };

    Ok(NormalizedRecord {
        table: entity.table.clone(),
        columns,
        natural_key: entity.natural_key.clone(),
        version,
    })
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::source::{
        Cadence, ColumnType, EntitySchema, IntervalCadence, JsonLinesShape, JsonShape, PageConfig,
        RetryConfig,
    };

    fn descriptor(shape: PayloadShape) -> SourceDescriptor {
        let mut columns = IndexMap::new();
        columns.insert("activity_id".to_string(), ColumnType::Integer);
        columns.insert("sport".to_string(), ColumnType::Text);
        columns.insert("distance_m".to_string(), ColumnType::Float);
        columns.insert("version".to_string(), ColumnType::Integer);
        SourceDescriptor {
            id: "activities".to_string(),
            name: String::new(),
            endpoint: "https://api.example.com/activities".to_string(),
            credentials_env: None,
            shape,
            cadence: Cadence::Interval(IntervalCadence { secs: 60 }),
            rate_limit_ms: 1000,
            timeout_secs: 30,
            retry: RetryConfig::default(),
            page: PageConfig::default(),
            entity: EntitySchema {
                table: "activities".to_string(),
                columns,
                natural_key: vec!["activity_id".to_string()],
                version_column: Some("version".to_string()),
            },
        }
    }

    fn json_descriptor(record_path: &str) -> SourceDescriptor {
        descriptor(PayloadShape::Json(JsonShape {
            record_path: record_path.to_string(),
            timestamp_format: None,
        }))
    }

    fn payload(body: &str) -> RawPayload {
        RawPayload::new("activities", 1, body.as_bytes().to_vec())
    }

    #[test]
    fn test_root_array_maps_all_records() {
        let body = r#"[
            {"activity_id": 1, "sport": "ride", "distance_m": 1000.5, "version": 1},
            {"activity_id": 2, "sport": "run", "distance_m": 5000.0, "version": 1},
            {"activity_id": 3, "sport": "swim", "distance_m": 750.0, "version": 1}
        ]"#;
        let out = transform(&payload(body), &json_descriptor("")).unwrap();
        assert_eq!(out.records.len(), 3);
        assert!(out.rejects.is_empty());

        let first = &out.records[0];
        assert_eq!(first.table, "activities");
        assert_eq!(first.version, 1);
        assert_eq!(first.columns["activity_id"], TypedValue::Integer(1));
        assert_eq!(first.columns["sport"], TypedValue::Text("ride".to_string()));
        assert_eq!(first.columns["distance_m"], TypedValue::Float(1000.5));
    }

    #[test]
    fn test_record_path_navigation() {
        let body = r#"{"data": {"items": [{"activity_id": 9, "sport": "row", "version": 2}]}}"#;
        let out = transform(&payload(body), &json_descriptor("data/items")).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].version, 2);
        // Declared but absent column becomes Null.
        assert_eq!(out.records[0].columns["distance_m"], TypedValue::Null);
    }

    #[test]
    fn test_missing_natural_key_rejects_without_blocking_siblings() {
        // Spec scenario: 5 records, 1 with a malformed natural key.
        let body = r#"[
            {"activity_id": 1, "version": 1},
            {"activity_id": 2, "version": 1},
            {"sport": "ride", "version": 1},
            {"activity_id": 4, "version": 1},
            {"activity_id": 5, "version": 1}
        ]"#;
        let out = transform(&payload(body), &json_descriptor("")).unwrap();
        assert_eq!(out.records.len(), 4);
        assert_eq!(out.rejects.len(), 1);
        assert_eq!(out.rejects[0].index, 2);
        assert!(out.rejects[0].reason.contains("natural key"));
    }

    #[test]
    fn test_null_natural_key_rejects() {
        let body = r#"[{"activity_id": null, "version": 1}]"#;
        let out = transform(&payload(body), &json_descriptor("")).unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.rejects.len(), 1);
    }

    #[test]
    fn test_uncoercible_column_rejects_record() {
        let body = r#"[
            {"activity_id": 1, "distance_m": "not a number", "version": 1},
            {"activity_id": 2, "distance_m": 3.5, "version": 1}
        ]"#;
        let out = transform(&payload(body), &json_descriptor("")).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].columns["activity_id"], TypedValue::Integer(2));
        assert_eq!(out.rejects.len(), 1);
        assert!(out.rejects[0].reason.contains("distance_m"));
    }

    #[test]
    fn test_bad_version_rejects_record() {
        let body = r#"[{"activity_id": 1, "version": "not a version"}]"#;
        let out = transform(&payload(body), &json_descriptor("")).unwrap();
        assert!(out.records.is_empty());
        assert!(out.rejects[0].reason.contains("version"));
    }

    #[test]
    fn test_version_falls_back_to_fetch_time() {
        let mut d = json_descriptor("");
        d.entity.version_column = None;
        let p = payload(r#"[{"activity_id": 1}]"#);
        let out = transform(&p, &d).unwrap();
        assert_eq!(out.records[0].version, p.fetched_at.timestamp());
    }

    #[test]
    fn test_invalid_json_is_malformed_payload() {
        let p = payload("{not json");
        let err = transform(&p, &json_descriptor("")).unwrap_err();
        assert_eq!(err.source_id, "activities");
        assert_eq!(err.fingerprint, p.fingerprint);
        assert!(err.reason.contains("not valid JSON"));
    }

    #[test]
    fn test_missing_record_path_is_malformed_payload() {
        let err = transform(&payload(r#"{"other": []}"#), &json_descriptor("data")).unwrap_err();
        assert!(err.reason.contains("'data' not found"));
    }

    #[test]
    fn test_record_path_to_non_array_is_malformed_payload() {
        let err = transform(&payload(r#"{"data": 5}"#), &json_descriptor("data")).unwrap_err();
        assert!(err.reason.contains("not an array"));
    }

    #[test]
    fn test_non_object_element_rejects() {
        let body = r#"[{"activity_id": 1, "version": 1}, 42]"#;
        let out = transform(&payload(body), &json_descriptor("")).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.rejects.len(), 1);
        assert!(out.rejects[0].reason.contains("not a JSON object"));
    }

    #[test]
    fn test_json_lines_shape() {
        let d = descriptor(PayloadShape::JsonLines(JsonLinesShape { timestamp_format: None }));
        let body = "{\"activity_id\": 1, \"version\": 1}\n\n{\"activity_id\": 2, \"version\": 1}\nnot json\n";
        let out = transform(&payload(body), &d).unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.rejects.len(), 1);
        assert!(out.rejects[0].reason.contains("invalid JSON line"));
    }

    #[test]
    fn test_undeclared_fields_ignored() {
        let body = r#"[{"activity_id": 1, "version": 1, "extra": {"deep": true}}]"#;
        let out = transform(&payload(body), &json_descriptor("")).unwrap();
        assert_eq!(out.records.len(), 1);
        assert!(!out.records[0].columns.contains_key("extra"));
    }

    #[test]
    fn test_explicit_timestamp_format_applies() {
        let mut d = json_descriptor("");
        d.shape = PayloadShape::Json(JsonShape {
            record_path: String::new(),
            timestamp_format: Some("%Y-%m-%dT%H:%M:%SZ".to_string()),
        });
        d.entity.columns.insert("start_date".to_string(), ColumnType::Timestamp);
        let body = r#"[{"activity_id": 1, "version": 1, "start_date": "2024-06-01T10:30:00Z"}]"#;
        let out = transform(&payload(body), &d).unwrap();
        assert_eq!(out.records.len(), 1);
        assert!(matches!(
            out.records[0].columns["start_date"],
            TypedValue::Timestamp(_)
        ));
    }
}
