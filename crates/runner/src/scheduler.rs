//! Cadence-driven scheduler loop.
//!
//! Every tick, due sources are triggered — unless a run for that source is
//! already in flight (skipped, logged, never queued) or the global
//! concurrency cap is exhausted (left due for the next tick). Runs execute
//! as spawned tasks tracked in a [`tokio::task::JoinSet`], which the
//! shutdown path drains before exiting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use cadence_core::config::EtlConfig;
use cadence_core::run::RunTrigger;
use cadence_fetch::SourceClient;
use cadence_store::runs::RunStore;

use crate::pipeline::{run_source, PipelineContext};
use crate::schedule::DueTracker;
use crate::single_flight::InFlight;

pub struct Scheduler {
    ctx: Arc<PipelineContext>,
    clients: HashMap<String, Arc<SourceClient>>,
    in_flight: InFlight,
    permits: Arc<Semaphore>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        ctx: Arc<PipelineContext>,
        clients: HashMap<String, Arc<SourceClient>>,
        etl: &EtlConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ctx,
            clients,
            in_flight: InFlight::new(),
            permits: Arc::new(Semaphore::new(etl.max_concurrent_runs)),
            poll_interval: Duration::from_secs(etl.poll_interval_secs),
            shutdown,
        }
    }

    /// Run the scheduler until shutdown, then drain in-flight runs.
    pub async fn run(mut self) -> anyhow::Result<()> {
        // Seed due times from durable run history so a restart resumes the
        // cadence instead of re-triggering every interval source at once.
        let mut tracker = DueTracker::new();
        let now = Utc::now();
        for client in self.clients.values() {
            let descriptor = client.descriptor();
            let last_started = match RunStore::latest_started_at(&self.ctx.pool, &descriptor.id).await {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(source_id = %descriptor.id, error = %e, "failed to read run history — treating as never run");
                    None
                }
            };
            tracker.initialize(descriptor, last_started, now);
        }

        info!(
            sources = self.clients.len(),
            poll_interval_secs = self.poll_interval.as_secs(),
            "scheduler started"
        );

        let mut runs: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = self.shutdown.changed() => {
                    // A closed channel means the process is going down too.
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *self.shutdown.borrow() {
                break;
            }

            // Reap finished run tasks so the set stays small.
            while let Some(result) = runs.try_join_next() {
                if let Err(e) = result {
                    warn!(error = %e, "run task panicked");
                }
            }

            let now = Utc::now();
            for (source_id, client) in &self.clients {
                if !tracker.is_due(source_id, now) {
                    continue;
                }

                let Some(guard) = self.in_flight.try_claim(source_id) else {
                    info!(source_id = %source_id, "previous run still in flight — skipping trigger");
                    tracker.advance(client.descriptor(), now);
                    continue;
                };

                let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                    // Leave the source due; a permit may free up next tick.
                    info!(source_id = %source_id, "concurrency limit reached — deferring trigger");
                    drop(guard);
                    continue;
                };

                tracker.advance(client.descriptor(), now);
                info!(source_id = %source_id, trigger = "scheduled", "triggering run");

                let ctx = self.ctx.clone();
                let client = client.clone();
                let shutdown = self.shutdown.clone();
                runs.spawn(async move {
                    let _guard = guard;
                    let _permit = permit;
                    if let Err(e) = run_source(&ctx, &client, RunTrigger::Scheduled, &shutdown).await {
                        warn!(source_id = %client.descriptor().id, error = %e, "run could not be recorded");
                    }
                });
            }
        }

        info!(in_flight = self.in_flight.count(), "scheduler stopping — draining in-flight runs");
        while let Some(result) = runs.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "run task panicked during drain");
            }
        }
        info!("scheduler stopped");
        Ok(())
    }
}
