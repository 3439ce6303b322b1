//! One end-to-end run: fetch → transform → load → checkpoint.
//!
//! Payloads stream through in bounded batches; the checkpoint advances only
//! after the batch holding a payload's records has durably committed. Errors
//! are recorded on the run row and in logs — never raised past the scheduler.

use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use cadence_core::record::{RawPayload, NormalizedRecord, TypedValue};
use cadence_core::run::{finalize_status, RunCounts, RunStatus, RunTrigger};
use cadence_core::source::SourceDescriptor;
use cadence_fetch::SourceClient;
use cadence_store::checkpoints::CheckpointStore;
use cadence_store::error::StoreError;
use cadence_store::loader::Loader;
use cadence_store::runs::RunStore;
use cadence_transform::transform;

use crate::batcher::RecordBatcher;

/// Shared handles a run needs; one per process, cloned per run task.
pub struct PipelineContext {
    pub pool: PgPool,
    pub loader: Loader,
    pub batch_size: usize,
    pub batch_max_wait: Duration,
}

/// Execute one run for a source. Returns the terminal status.
///
/// Only failures to create or finalize the run row escape as errors; pipeline
/// failures finalize the run as `failed`/`partial` and return normally.
pub async fn run_source(
    ctx: &PipelineContext,
    client: &SourceClient,
    trigger: RunTrigger,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<RunStatus> {
    let descriptor = client.descriptor();
    let start = Instant::now();

    let run = RunStore::create(&ctx.pool, &descriptor.id, trigger).await?;
    if !RunStore::mark_running(&ctx.pool, run.id).await? {
        warn!(run_id = %run.id, "run was not pending at start — continuing");
    }

    let since = CheckpointStore::get(&ctx.pool, &descriptor.id)
        .await?
        .map(|cp| cp.cursor);
    info!(
        run_id = %run.id,
        source_id = %descriptor.id,
        trigger = trigger.as_str(),
        checkpoint = since.as_deref().unwrap_or("(none)"),
        "run started"
    );

    let mut pager = client.pager(since);
    let mut batcher = RecordBatcher::new(ctx.batch_size, ctx.batch_max_wait);
    let mut counts = RunCounts::default();
    let mut cursor_pending: Option<String> = None;
    let mut page_failed = false;
    let mut store_failed = false;
    let mut cancelled = false;
    let mut last_error: Option<String> = None;

    loop {
        // Cancellation is only honored between payloads; an in-flight batch
        // commit always completes so the checkpoint never runs ahead.
        if *shutdown.borrow() {
            cancelled = true;
            break;
        }

        let payload = match pager.next().await {
            Ok(Some(p)) => p,
            Ok(None) => break,
            Err(e) => {
                warn!(run_id = %run.id, source_id = %descriptor.id, error = %e, "fetch failed");
                page_failed = true;
                last_error = Some(e.to_string());
                break;
            }
        };
        counts.fetched += 1;

        let output = match transform(&payload, descriptor) {
            Ok(out) => out,
            Err(e) => {
                warn!(run_id = %run.id, source_id = %descriptor.id, error = %e, "malformed payload — ending fetch sequence");
                page_failed = true;
                last_error = Some(e.to_string());
                break;
            }
        };

        if output.is_empty() {
            // Page decoded to nothing: the source is exhausted.
            pager.finish();
            continue;
        }

        counts.transformed += output.records.len() as u64;
        counts.rejected += output.rejects.len() as u64;
        for reject in &output.rejects {
            warn!(
                run_id = %run.id,
                source_id = %descriptor.id,
                page = payload.page,
                index = reject.index,
                reason = %reject.reason,
                "record rejected"
            );
        }

        if !output.records.is_empty() {
            if let Some(cursor) = payload_cursor(&payload, &output.records, descriptor) {
                cursor_pending = Some(cursor);
            }
            batcher.push(output.records);
        }

        if batcher.should_flush() {
            if let Err(e) =
                flush_to_store(ctx, descriptor, &mut batcher, &mut cursor_pending, &mut counts).await
            {
                warn!(run_id = %run.id, source_id = %descriptor.id, error = %e, "batch failed");
                page_failed = true;
                store_failed = true;
                last_error = Some(e.to_string());
                break;
            }
        }
    }

    // Trailing flush: records buffered before a fetch or transform failure
    // still commit. Skipped after a store failure (the loader already spent
    // its retry budget) and on cancellation, so shutdown stays prompt.
    if !cancelled && !store_failed && !batcher.is_empty() {
        if let Err(e) =
            flush_to_store(ctx, descriptor, &mut batcher, &mut cursor_pending, &mut counts).await
        {
            warn!(run_id = %run.id, source_id = %descriptor.id, error = %e, "final batch failed");
            page_failed = true;
            last_error = Some(e.to_string());
        }
    }
    if cancelled {
        last_error.get_or_insert_with(|| "cancelled by shutdown".to_string());
    }

    let status = finalize_status(&counts, page_failed || cancelled);
    if !RunStore::finalize(&ctx.pool, run.id, status, &counts, last_error.as_deref()).await? {
        warn!(run_id = %run.id, "run already finalized — terminal status is immutable");
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    match status {
        RunStatus::Failed => error!(
            run_id = %run.id,
            source_id = %descriptor.id,
            error = last_error.as_deref().unwrap_or(""),
            duration_ms = duration_ms,
            "run failed"
        ),
        _ => info!(
            run_id = %run.id,
            source_id = %descriptor.id,
            status = status.as_str(),
            fetched = counts.fetched,
            transformed = counts.transformed,
            loaded = counts.loaded,
            rejected = counts.rejected,
            duration_ms = duration_ms,
            "run finished"
        ),
    }

    Ok(status)
}

/// Commit the buffered batch, then advance the checkpoint past it.
async fn flush_to_store(
    ctx: &PipelineContext,
    descriptor: &SourceDescriptor,
    batcher: &mut RecordBatcher,
    cursor_pending: &mut Option<String>,
    counts: &mut RunCounts,
) -> Result<(), StoreError> {
    let records = batcher.flush();
    if records.is_empty() {
        return Ok(());
    }

    let report = ctx.loader.apply_batch(&descriptor.entity, &records).await?;
    counts.loaded += report.loaded;
    counts.rejected += report.rejected.len() as u64;
    counts.batches_committed += 1;
    for reject in &report.rejected {
        warn!(
            source_id = %descriptor.id,
            key = %reject.key,
            reason = %reject.reason,
            "record rejected by store"
        );
    }

    // Checkpoint moves strictly after the commit above is acknowledged.
    if let Some(cursor) = cursor_pending.take() {
        CheckpointStore::advance(&ctx.pool, &descriptor.id, &cursor).await?;
    }
    Ok(())
}

/// Cursor the checkpoint should advance to once this payload's records are
/// committed: the configured cursor field of the last record in fetch order,
/// falling back to the payload fingerprint.
fn payload_cursor(
    payload: &RawPayload,
    records: &[NormalizedRecord],
    descriptor: &SourceDescriptor,
) -> Option<String> {
    if let Some(field) = &descriptor.page.cursor_field {
        records
            .iter()
            .rev()
            .find_map(|r| r.columns.get(field).and_then(TypedValue::to_cursor))
    } else {
        Some(payload.fingerprint.clone())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
