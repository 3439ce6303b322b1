//! Due-time bookkeeping for source cadences.
//!
//! Interval sources are due a fixed delay after their last run start; cron
//! sources at the expression's next fire time (UTC). All state is in-memory
//! and rebuilt at startup from the durable `runs` table, so restarts don't
//! re-trigger interval sources early.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use cadence_core::source::{Cadence, SourceDescriptor};

/// Sentinel distance for cron expressions with no future fire time.
const NEVER_DAYS: i64 = 3650;

/// Tracks when each source is next due.
#[derive(Debug, Default)]
pub struct DueTracker {
    next_due: HashMap<String, DateTime<Utc>>,
}

impl DueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a source's first due time.
    ///
    /// Interval sources resume from `last_started` when history exists and
    /// are immediately due otherwise; cron sources always wait for the next
    /// fire so a restart does not fire off-schedule.
    pub fn initialize(
        &mut self,
        source: &SourceDescriptor,
        last_started: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let due = match &source.cadence {
            Cadence::Interval(i) => match last_started {
                Some(started) => started + Duration::seconds(i.secs as i64),
                None => now,
            },
            Cadence::Cron(_) => self.next_cron_fire(source, now),
        };
        self.next_due.insert(source.id.clone(), due);
    }

    /// Whether the source is due at `now`. Unknown sources are never due.
    pub fn is_due(&self, source_id: &str, now: DateTime<Utc>) -> bool {
        self.next_due.get(source_id).map(|due| *due <= now).unwrap_or(false)
    }

    /// Record that a run started now and schedule the next fire.
    pub fn advance(&mut self, source: &SourceDescriptor, now: DateTime<Utc>) {
        let due = match &source.cadence {
            Cadence::Interval(i) => now + Duration::seconds(i.secs as i64),
            Cadence::Cron(_) => self.next_cron_fire(source, now),
        };
        self.next_due.insert(source.id.clone(), due);
    }

    pub fn next_due(&self, source_id: &str) -> Option<DateTime<Utc>> {
        self.next_due.get(source_id).copied()
    }

    fn next_cron_fire(&self, source: &SourceDescriptor, now: DateTime<Utc>) -> DateTime<Utc> {
        // Validation at load guarantees the expression parses.
        let schedule = match source.cadence.cron_schedule() {
            Some(Ok(s)) => s,
            _ => {
                warn!(source_id = %source.id, "cron schedule unavailable — disabling source");
                return now + Duration::days(NEVER_DAYS);
            }
        };
        match schedule.after(&now).next() {
            Some(fire) => fire,
            None => {
                warn!(source_id = %source.id, "cron expression has no future fire time");
                now + Duration::days(NEVER_DAYS)
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::source::{
        ColumnType, CronCadence, EntitySchema, IntervalCadence, JsonShape, PageConfig,
        PayloadShape, RetryConfig,
    };
    use indexmap::IndexMap;

    fn source(id: &str, cadence: Cadence) -> SourceDescriptor {
        let mut columns = IndexMap::new();
        columns.insert("k".to_string(), ColumnType::Integer);
        SourceDescriptor {
            id: id.to_string(),
            name: String::new(),
            endpoint: "https://api.example.com/data".to_string(),
            credentials_env: None,
            shape: PayloadShape::Json(JsonShape {
                record_path: String::new(),
                timestamp_format: None,
            }),
            cadence,
            rate_limit_ms: 1000,
            timeout_secs: 30,
            retry: RetryConfig::default(),
            page: PageConfig::default(),
            entity: EntitySchema {
                table: "t".to_string(),
                columns,
                natural_key: vec!["k".to_string()],
                version_column: None,
            },
        }
    }

    fn interval(secs: u64) -> Cadence {
        Cadence::Interval(IntervalCadence { secs })
    }

    #[test]
    fn test_interval_without_history_is_immediately_due() {
        let mut tracker = DueTracker::new();
        let s = source("a", interval(60));
        let now = Utc::now();
        tracker.initialize(&s, None, now);
        assert!(tracker.is_due("a", now));
    }

    #[test]
    fn test_interval_resumes_from_history() {
        let mut tracker = DueTracker::new();
        let s = source("a", interval(60));
        let now = Utc::now();

        // Last run started 30s ago — not due for another 30s.
        tracker.initialize(&s, Some(now - Duration::seconds(30)), now);
        assert!(!tracker.is_due("a", now));
        assert!(tracker.is_due("a", now + Duration::seconds(31)));

        // Last run started 90s ago — overdue.
        tracker.initialize(&s, Some(now - Duration::seconds(90)), now);
        assert!(tracker.is_due("a", now));
    }

    #[test]
    fn test_advance_pushes_next_due_out() {
        let mut tracker = DueTracker::new();
        let s = source("a", interval(60));
        let now = Utc::now();
        tracker.initialize(&s, None, now);
        tracker.advance(&s, now);
        assert!(!tracker.is_due("a", now));
        assert_eq!(tracker.next_due("a").unwrap(), now + Duration::seconds(60));
    }

    #[test]
    fn test_unknown_source_never_due() {
        let tracker = DueTracker::new();
        assert!(!tracker.is_due("ghost", Utc::now()));
    }

    #[test]
    fn test_cron_waits_for_next_fire() {
        let mut tracker = DueTracker::new();
        let s = source("c", Cadence::Cron(CronCadence { expr: "*/5 * * * *".to_string() }));
        let now = Utc::now();
        tracker.initialize(&s, None, now);
        // Next fire is strictly in the future.
        assert!(!tracker.is_due("c", now));
        let due = tracker.next_due("c").unwrap();
        assert!(due > now);
        assert!(due <= now + Duration::minutes(5));
        assert!(tracker.is_due("c", due));
    }

    #[test]
    fn test_cron_advance_moves_past_now() {
        let mut tracker = DueTracker::new();
        let s = source("c", Cadence::Cron(CronCadence { expr: "0 * * * *".to_string() }));
        let now = Utc::now();
        tracker.initialize(&s, None, now);
        tracker.advance(&s, now);
        assert!(tracker.next_due("c").unwrap() > now);
    }
}
