//! Micro-batch accumulator for normalized records.
//!
//! Collects records and flushes when either the size threshold or time
//! window is reached, whichever comes first. This bounds loader transaction
//! size without materializing an entire source's data in memory.
//!
//! The runner pushes a whole payload's records at once and flushes the full
//! buffer, so every flush lands on a payload boundary — which is what lets
//! the checkpoint advance to the last fully committed payload.

use std::time::{Duration, Instant};

use cadence_core::record::NormalizedRecord;

/// Accumulates records into loader batches.
///
/// Flushes when either the size threshold OR time window is reached,
/// whichever comes first.
pub struct RecordBatcher {
    buffer: Vec<NormalizedRecord>,
    max_size: usize,
    max_wait: Duration,
    batch_started: Option<Instant>,
}

impl RecordBatcher {
    /// Create a new batcher with the given size and time thresholds.
    ///
    /// - `max_size`: flush when this many records are buffered.
    /// - `max_wait`: flush when this duration has elapsed since the first
    ///   record in the current batch was pushed.
    pub fn new(max_size: usize, max_wait: Duration) -> Self {
        Self {
            buffer: Vec::with_capacity(max_size),
            max_size,
            max_wait,
            batch_started: None,
        }
    }

    /// Add records to the current batch.
    ///
    /// Starts the batch timer on the first non-empty push.
    pub fn push(&mut self, records: Vec<NormalizedRecord>) {
        if self.batch_started.is_none() && !records.is_empty() {
            self.batch_started = Some(Instant::now());
        }
        self.buffer.extend(records);
    }

    /// Check if the batch should be flushed.
    pub fn should_flush(&self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        if self.buffer.len() >= self.max_size {
            return true;
        }
        if let Some(started) = self.batch_started {
            if started.elapsed() >= self.max_wait {
                return true;
            }
        }
        false
    }

    /// Flush the current batch, returning all accumulated records.
    ///
    /// Resets the batcher for the next batch.
    pub fn flush(&mut self) -> Vec<NormalizedRecord> {
        self.batch_started = None;
        std::mem::take(&mut self.buffer)
    }

    /// Number of records currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
