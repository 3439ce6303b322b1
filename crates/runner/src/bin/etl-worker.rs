//! etl-worker — scheduled fetch→transform→load daemon.
//!
//! Startup order: tracing → env config → sources file → store pool +
//! migrations → entity tables → source clients (credentials resolved, fail
//! fast) → scheduler. `--once <source-id>` runs a single source and exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use cadence_core::config::{load_dotenv, Config};
use cadence_core::run::RunTrigger;
use cadence_core::source::SourcesFile;
use cadence_fetch::SourceClient;
use cadence_runner::pipeline::{run_source, PipelineContext};
use cadence_runner::Scheduler;
use cadence_store::loader::Loader;
use cadence_store::pool::init_pg_pool;
use cadence_store::schema::ensure_entity_table;

// ── CLI ─────────────────────────────────────────────────────────────

/// Scheduled ETL worker: pulls external sources into the relational store.
#[derive(Parser, Debug)]
#[command(name = "etl-worker", version, about)]
struct Cli {
    /// Path to the sources TOML file.
    #[arg(long, env = "ETL_SOURCES", default_value = "config/sources.toml")]
    sources: String,

    /// Run a single source once and exit (skips the scheduler).
    #[arg(long)]
    once: Option<String>,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let sources = SourcesFile::from_file(&cli.sources)?;
    if sources.sources.is_empty() {
        anyhow::bail!("no sources configured in {}", cli.sources);
    }
    info!(path = %cli.sources, count = sources.sources.len(), "sources loaded");

    let pool = init_pg_pool(&config.postgres).await?;

    for source in &sources.sources {
        ensure_entity_table(&pool, &source.entity).await?;
    }

    // Resolve credentials up front: a misconfigured source is a permanent
    // failure and should stop the process before the first run.
    let mut clients: HashMap<String, Arc<SourceClient>> = HashMap::new();
    for source in &sources.sources {
        let client = SourceClient::new(source.clone())?;
        clients.insert(source.id.clone(), Arc::new(client));
    }

    let loader = Loader::new(
        pool.clone(),
        config.etl.store_max_attempts,
        Duration::from_millis(config.etl.store_base_delay_ms),
    );
    let ctx = Arc::new(PipelineContext {
        pool: pool.clone(),
        loader,
        batch_size: config.etl.batch_size,
        batch_max_wait: Duration::from_millis(config.etl.batch_max_wait_ms),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Some(source_id) = cli.once {
        let client = clients
            .get(&source_id)
            .ok_or_else(|| anyhow::anyhow!("unknown source '{}'", source_id))?;
        let status = run_source(&ctx, client, RunTrigger::Manual, &shutdown_rx).await?;
        info!(source_id = %source_id, status = status.as_str(), "one-shot run complete");
        return Ok(());
    }

    let scheduler = Scheduler::new(ctx, clients, &config.etl, shutdown_rx);
    let scheduler_handle = tokio::spawn(scheduler.run());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received — draining in-flight runs");
    let _ = shutdown_tx.send(true);
    scheduler_handle.await??;

    info!("etl-worker exited cleanly");
    Ok(())
}
