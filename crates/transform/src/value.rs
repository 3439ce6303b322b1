//! JSON → typed value coercion, driven by the declared column type.
//!
//! Timestamps parse only via the source's explicit chrono format, or RFC 3339
//! when no format is configured. No locale-dependent inference.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use cadence_core::record::TypedValue;
use cadence_core::source::ColumnType;

/// Coerce a JSON value into the declared column type.
///
/// Returns a human-readable reason on failure; callers turn that into a
/// record-level reject.
pub fn coerce(value: &Value, ty: ColumnType, ts_format: Option<&str>) -> Result<TypedValue, String> {
    if value.is_null() {
        return Ok(TypedValue::Null);
    }

    match ty {
        ColumnType::Text => coerce_text(value),
        ColumnType::Integer => coerce_integer(value),
        ColumnType::Float => coerce_float(value),
        ColumnType::Boolean => coerce_boolean(value),
        ColumnType::Timestamp => coerce_timestamp(value, ts_format),
    }
}

fn coerce_text(value: &Value) -> Result<TypedValue, String> {
    match value {
        Value::String(s) => Ok(TypedValue::Text(s.clone())),
        Value::Number(n) => Ok(TypedValue::Text(n.to_string())),
        Value::Bool(b) => Ok(TypedValue::Text(b.to_string())),
        other => Err(format!("expected text, got {}", kind(other))),
    }
}

fn coerce_integer(value: &Value) -> Result<TypedValue, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(TypedValue::Integer)
            .ok_or_else(|| format!("number {} is not an integer", n)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(TypedValue::Integer)
            .map_err(|_| format!("'{}' is not an integer", s)),
        other => Err(format!("expected integer, got {}", kind(other))),
    }
}

fn coerce_float(value: &Value) -> Result<TypedValue, String> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(TypedValue::Float)
            .ok_or_else(|| format!("number {} is not representable as f64", n)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(TypedValue::Float)
            .map_err(|_| format!("'{}' is not a float", s)),
        other => Err(format!("expected float, got {}", kind(other))),
    }
}

fn coerce_boolean(value: &Value) -> Result<TypedValue, String> {
    match value {
        Value::Bool(b) => Ok(TypedValue::Boolean(*b)),
        Value::String(s) => match s.trim() {
            "true" => Ok(TypedValue::Boolean(true)),
            "false" => Ok(TypedValue::Boolean(false)),
            other => Err(format!("'{}' is not a boolean", other)),
        },
        other => Err(format!("expected boolean, got {}", kind(other))),
    }
}

fn coerce_timestamp(value: &Value, ts_format: Option<&str>) -> Result<TypedValue, String> {
    match value {
        Value::String(s) => parse_timestamp(s.trim(), ts_format).map(TypedValue::Timestamp),
        // Bare numbers are epoch seconds.
        Value::Number(n) => {
            let secs = n
                .as_i64()
                .ok_or_else(|| format!("number {} is not an epoch timestamp", n))?;
            match Utc.timestamp_opt(secs, 0) {
                chrono::LocalResult::Single(ts) => Ok(TypedValue::Timestamp(ts)),
                _ => Err(format!("{} is out of timestamp range", secs)),
            }
        }
        other => Err(format!("expected timestamp, got {}", kind(other))),
    }
}

fn parse_timestamp(s: &str, ts_format: Option<&str>) -> Result<DateTime<Utc>, String> {
    match ts_format {
        Some(fmt) => NaiveDateTime::parse_from_str(s, fmt)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .map_err(|e| format!("'{}' does not match format '{}': {}", s, fmt, e)),
        None => DateTime::parse_from_rfc3339(s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| format!("'{}' is not RFC 3339: {}", s, e)),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ── Tests ────────────────────────────────────────────────────────────
