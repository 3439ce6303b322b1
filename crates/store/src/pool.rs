//! Connection pool initialization and migrations.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use cadence_core::config::PostgresConfig;

use crate::error::{classify, StoreError};

/// Create the PostgreSQL connection pool and run migrations.
///
/// The pool is shared by every worker; sizing comes from configuration.
/// A store that cannot be reached is fatal — the pipeline has no purpose
/// without it.
pub async fn init_pg_pool(config: &PostgresConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await
        .map_err(classify)?;

    info!("PostgreSQL connected: {}:{}/{}", config.host, config.port, config.database);

    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("Database migrations applied");

    Ok(pool)
}
