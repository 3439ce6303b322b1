//! Source descriptor configuration.
//!
//! Descriptors are parsed from the sources TOML file at startup, validated,
//! and immutable thereafter. Everything deployment-specific about a source —
//! endpoint, payload shape, cadence, rate limit, retry budget, entity schema —
//! lives here rather than in code.

use std::str::FromStr;

use cron::Schedule;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── Entity schema ────────────────────────────────────────────────────

/// Declared store-facing type of an entity column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
}

/// Target table layout for one source's records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Table name (one table per entity type).
    pub table: String,
    /// Column name → declared type, in declaration order.
    pub columns: IndexMap<String, ColumnType>,
    /// Columns that uniquely identify the logical entity across runs.
    pub natural_key: Vec<String>,
    /// Source field providing the record version; fetch time when absent.
    pub version_column: Option<String>,
}

// ── Payload shape (tagged union) ─────────────────────────────────────

/// How a raw payload decodes into records, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayloadShape {
    Json(JsonShape),
    JsonLines(JsonLinesShape),
}

/// A JSON document carrying an array of record objects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonShape {
    /// `/`-separated path to the record array; empty = document root.
    #[serde(default)]
    pub record_path: String,
    /// chrono format string for timestamp columns (RFC 3339 when omitted).
    pub timestamp_format: Option<String>,
}

/// One JSON record object per non-empty line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonLinesShape {
    pub timestamp_format: Option<String>,
}

impl PayloadShape {
    pub fn timestamp_format(&self) -> Option<&str> {
        match self {
            PayloadShape::Json(s) => s.timestamp_format.as_deref(),
            PayloadShape::JsonLines(s) => s.timestamp_format.as_deref(),
        }
    }
}

// ── Cadence ──────────────────────────────────────────────────────────

/// When the scheduler triggers a run for this source, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cadence {
    Interval(IntervalCadence),
    Cron(CronCadence),
}

/// Fixed delay between run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalCadence {
    pub secs: u64,
}

/// Cron expression, evaluated in UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronCadence {
    pub expr: String,
}

impl Cadence {
    /// Parse a cron cadence into a [`Schedule`]; `None` for interval cadences.
    pub fn cron_schedule(&self) -> Option<Result<Schedule, cron::error::Error>> {
        match self {
            Cadence::Cron(c) => Some(parse_cron(&c.expr)),
            Cadence::Interval(_) => None,
        }
    }
}

/// Parse a cron expression, auto-prepending "0 " for 5-field expressions.
///
/// The `cron` crate requires 6 fields (sec min hr dom mon dow) but operators
/// typically write 5-field cron (min hr dom mon dow). We detect and adapt.
pub fn parse_cron(expr: &str) -> Result<Schedule, cron::error::Error> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() == 5 {
        let six_field = format!("0 {}", expr);
        Schedule::from_str(&six_field)
    } else {
        Schedule::from_str(expr)
    }
}

// ── Retry / pagination knobs ─────────────────────────────────────────

/// Retry budget for transient failures (fetch calls, store commits).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts before giving up (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Pagination parameters for a page-numbered REST endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConfig {
    #[serde(default = "default_page_param")]
    pub page_param: String,
    #[serde(default = "default_per_page_param")]
    pub per_page_param: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Query param carrying the checkpoint cursor for incremental fetch.
    pub since_param: Option<String>,
    /// Record field whose value becomes the next checkpoint cursor.
    /// When absent, the fingerprint of the last committed payload is used.
    pub cursor_field: Option<String>,
    /// Hard page cap so a misbehaving source stays a finite sequence.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            page_param: default_page_param(),
            per_page_param: default_per_page_param(),
            per_page: default_per_page(),
            since_param: None,
            cursor_field: None,
            max_pages: default_max_pages(),
        }
    }
}

// ── Default value functions ──────────────────────────────────────────

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_per_page_param() -> String {
    "per_page".to_string()
}

fn default_per_page() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    1000
}

fn default_rate_limit_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

// ── Descriptor ───────────────────────────────────────────────────────

/// One external data origin. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Stable slug, also the checkpoint and run key (`[a-z_][a-z0-9_]*`).
    pub id: String,
    /// Display name; defaults to `id`.
    #[serde(default)]
    pub name: String,
    /// Base URL of the endpoint serving records.
    pub endpoint: String,
    /// Name of the env var holding a bearer token. The credential itself
    /// never appears in the sources file.
    pub credentials_env: Option<String>,
    pub shape: PayloadShape,
    pub cadence: Cadence,
    /// Minimum delay between HTTP calls to this source.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    /// Per-call timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub page: PageConfig,
    pub entity: EntitySchema,
}

/// Whether `s` is a safe SQL identifier: `[a-z_][a-z0-9_]*`, ≤ 63 bytes.
///
/// Identifiers from configuration are interpolated into generated DDL and
/// upserts, so this is the only spelling the store accepts.
pub fn is_sql_ident(s: &str) -> bool {
    if s.is_empty() || s.len() > 63 {
        return false;
    }
    let mut chars = s.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_lowercase() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl SourceDescriptor {
    /// Validate the descriptor; called for every source at load time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |reason: String| Err(ConfigError::invalid_source(self.id.as_str(), reason));

        if !is_sql_ident(&self.id) {
            return Err(ConfigError::invalid_source(
                if self.id.is_empty() { "(empty)" } else { self.id.as_str() },
                "id must match [a-z_][a-z0-9_]*",
            ));
        }
        if url::Url::parse(&self.endpoint).is_err() {
            return fail(format!("endpoint is not a valid URL: {}", self.endpoint));
        }
        if let Some(env) = &self.credentials_env {
            if env.is_empty() {
                return fail("credentials_env must not be empty when set".to_string());
            }
        }

        match &self.cadence {
            Cadence::Interval(i) if i.secs == 0 => {
                return fail("interval cadence must be at least 1 second".to_string());
            }
            Cadence::Cron(c) => {
                if let Err(e) = parse_cron(&c.expr) {
                    return fail(format!("invalid cron expression '{}': {}", c.expr, e));
                }
            }
            _ => {}
        }

        let entity = &self.entity;
        if !is_sql_ident(&entity.table) {
            return fail(format!("table '{}' must match [a-z_][a-z0-9_]*", entity.table));
        }
        if entity.columns.is_empty() {
            return fail("entity must declare at least one column".to_string());
        }
        for col in entity.columns.keys() {
            if !is_sql_ident(col) {
                return fail(format!("column '{}' must match [a-z_][a-z0-9_]*", col));
            }
        }
        if entity.natural_key.is_empty() {
            return fail("natural_key must name at least one column".to_string());
        }
        for key in &entity.natural_key {
            if !entity.columns.contains_key(key) {
                return fail(format!("natural_key column '{}' is not declared", key));
            }
        }
        if let Some(vc) = &entity.version_column {
            if !entity.columns.contains_key(vc) {
                return fail(format!("version_column '{}' is not declared", vc));
            }
        }
        if let Some(cf) = &self.page.cursor_field {
            if !entity.columns.contains_key(cf) {
                return fail(format!("page.cursor_field '{}' is not declared", cf));
            }
        }
        Ok(())
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

// ── Sources file ─────────────────────────────────────────────────────

/// The sources TOML file: a list of `[[source]]` tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesFile {
    #[serde(rename = "source", default)]
    pub sources: Vec<SourceDescriptor>,
}

impl SourcesFile {
    /// Parse and validate a sources file from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let file: Self = toml::from_str(toml_str)?;
        file.validate()?;
        Ok(file)
    }

    /// Load a sources file from disk.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Validate every descriptor and reject duplicate ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::BTreeSet::new();
        for source in &self.sources {
            source.validate()?;
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::DuplicateSourceId(source.id.clone()));
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.id == id)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const MINIMAL: &str = r#"
        [[source]]
        id = "activities"
        endpoint = "https://api.example.com/v3/athlete/activities"
        credentials_env = "ACTIVITIES_TOKEN"

        [source.shape]
        type = "json"

        [source.cadence]
        type = "interval"
        secs = 60

        [source.entity]
        table = "activities"
        natural_key = ["activity_id"]
        version_column = "start_date"

        [source.entity.columns]
        activity_id = "integer"
        sport = "text"
        distance_m = "float"
        start_date = "timestamp"
    "#;

    #[test]
    fn test_minimal_sources_file_parses() {
        let file = SourcesFile::from_toml(MINIMAL).unwrap();
        assert_eq!(file.sources.len(), 1);
        let s = &file.sources[0];
        assert_eq!(s.id, "activities");
        assert_eq!(s.display_name(), "activities");
        assert!(matches!(s.shape, PayloadShape::Json(_)));
        assert!(matches!(s.cadence, Cadence::Interval(IntervalCadence { secs: 60 })));
        assert_eq!(s.entity.columns.len(), 4);
        assert_eq!(s.entity.version_column.as_deref(), Some("start_date"));
    }

    #[test]
    fn test_defaults_applied() {
        let file = SourcesFile::from_toml(MINIMAL).unwrap();
        let s = &file.sources[0];
        assert_eq!(s.rate_limit_ms, 1000);
        assert_eq!(s.timeout_secs, 30);
        assert_eq!(s.retry.max_attempts, 5);
        assert_eq!(s.retry.base_delay_ms, 500);
        assert_eq!(s.retry.max_delay_ms, 30_000);
        assert_eq!(s.page.page_param, "page");
        assert_eq!(s.page.per_page, 100);
        assert!(s.page.since_param.is_none());
    }

    #[test]
    fn test_column_order_preserved() {
        let file = SourcesFile::from_toml(MINIMAL).unwrap();
        let cols: Vec<&str> = file.sources[0].entity.columns.keys().map(|s| s.as_str()).collect();
        assert_eq!(cols, vec!["activity_id", "sport", "distance_m", "start_date"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let doubled = format!("{}\n{}", MINIMAL, MINIMAL);
        let err = SourcesFile::from_toml(&doubled).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSourceId(_)));
    }

    #[test]
    fn test_natural_key_must_be_declared() {
        let bad = MINIMAL.replace("natural_key = [\"activity_id\"]", "natural_key = [\"nope\"]");
        let err = SourcesFile::from_toml(&bad).unwrap_err();
        assert!(err.to_string().contains("natural_key column 'nope'"));
    }

    #[test]
    fn test_bad_table_ident_rejected() {
        let bad = MINIMAL.replace("table = \"activities\"", "table = \"Activities; DROP\"");
        assert!(SourcesFile::from_toml(&bad).is_err());
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let bad = MINIMAL.replace("https://api.example.com/v3/athlete/activities", "not a url");
        let err = SourcesFile::from_toml(&bad).unwrap_err();
        assert!(err.to_string().contains("not a valid URL"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let bad = MINIMAL.replace("secs = 60", "secs = 0");
        assert!(SourcesFile::from_toml(&bad).is_err());
    }

    #[test]
    fn test_cron_cadence_validates() {
        let cron_src = MINIMAL
            .replace("type = \"interval\"", "type = \"cron\"")
            .replace("secs = 60", "expr = \"*/5 * * * *\"");
        let file = SourcesFile::from_toml(&cron_src).unwrap();
        let schedule = file.sources[0].cadence.cron_schedule().unwrap().unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let bad = MINIMAL
            .replace("type = \"interval\"", "type = \"cron\"")
            .replace("secs = 60", "expr = \"not a cron\"");
        let err = SourcesFile::from_toml(&bad).unwrap_err();
        assert!(err.to_string().contains("invalid cron expression"));
    }

    #[test]
    fn test_parse_cron_six_field() {
        let schedule = parse_cron("0 */5 * * * *").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }

    #[test]
    fn test_parse_cron_five_field_auto_prefix() {
        let schedule = parse_cron("0 * * * *").unwrap();
        assert!(schedule.upcoming(Utc).next().is_some());
    }

    #[test]
    fn test_parse_cron_next_fire_is_future() {
        let schedule = parse_cron("0 */5 * * * *").unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert!(next > Utc::now());
    }

    #[test]
    fn test_is_sql_ident() {
        assert!(is_sql_ident("activities"));
        assert!(is_sql_ident("_private"));
        assert!(is_sql_ident("col_2"));
        assert!(!is_sql_ident(""));
        assert!(!is_sql_ident("2col"));
        assert!(!is_sql_ident("Upper"));
        assert!(!is_sql_ident("has space"));
        assert!(!is_sql_ident("semi;colon"));
        assert!(!is_sql_ident(&"x".repeat(64)));
    }

    #[test]
    fn test_shape_roundtrip() {
        let shape = PayloadShape::Json(JsonShape {
            record_path: "data/items".to_string(),
            timestamp_format: Some("%Y-%m-%dT%H:%M:%SZ".to_string()),
        });
        let json = serde_json::to_string(&shape).unwrap();
        let parsed: PayloadShape = serde_json::from_str(&json).unwrap();
        if let PayloadShape::Json(s) = parsed {
            assert_eq!(s.record_path, "data/items");
            assert_eq!(s.timestamp_format.as_deref(), Some("%Y-%m-%dT%H:%M:%SZ"));
        } else {
            panic!("expected Json variant");
        }
    }

    #[test]
    fn test_cursor_field_must_be_declared() {
        let bad = MINIMAL.replace(
            "[source.entity]",
            "[source.page]\ncursor_field = \"missing\"\n\n[source.entity]",
        );
        let err = SourcesFile::from_toml(&bad).unwrap_err();
        assert!(err.to_string().contains("cursor_field 'missing'"));
    }
}
