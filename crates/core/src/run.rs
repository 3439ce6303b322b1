//! Run lifecycle: status state machine, counters, and finalization.
//!
//! A run moves `pending → running → {succeeded, partial, failed}`. Terminal
//! states are final; the transition check below is the single authority and
//! the store's SQL only finalizes rows still in `running`.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Partial | RunStatus::Failed)
    }

    /// Whether `self → next` is a legal (monotonic) transition.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match self {
            RunStatus::Pending => next == RunStatus::Running,
            RunStatus::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// How a run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// Fired by the source's configured cadence.
    Scheduled,
    /// Requested explicitly (CLI one-shot).
    Manual,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Manual => "manual",
        }
    }
}

/// Counters accumulated while a run executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    /// Raw payloads (pages) fetched.
    pub fetched: u64,
    /// Normalized records produced by the transformer.
    pub transformed: u64,
    /// Records committed to the store.
    pub loaded: u64,
    /// Records rejected (transform- or load-time).
    pub rejected: u64,
    /// Batches whose transaction committed.
    pub batches_committed: u64,
}

/// Decide the terminal status for a finished run.
///
/// `page_failed` is true when the fetch sequence ended in an error or a
/// payload was malformed beyond record-level recovery. A run that fetched
/// nothing and failed nothing succeeded: the source is simply up to date.
pub fn finalize_status(counts: &RunCounts, page_failed: bool) -> RunStatus {
    if counts.batches_committed == 0 {
        if page_failed || counts.rejected > 0 {
            return RunStatus::Failed;
        }
        return RunStatus::Succeeded;
    }
    if page_failed || counts.rejected > 0 {
        RunStatus::Partial
    } else {
        RunStatus::Succeeded
    }
}

// ── Tests ────────────────────────────────────────────────────────────
