//! Store: Postgres-backed loader plus run and checkpoint persistence.
//!
//! Owns the schema — system tables via `migrations/`, entity tables generated
//! from source descriptors at startup. All SQL lives in this crate.

pub mod checkpoints;
pub mod error;
pub mod loader;
pub mod pool;
pub mod runs;
pub mod schema;

pub use checkpoints::CheckpointStore;
pub use error::StoreError;
pub use loader::{LoadReport, Loader};
pub use pool::init_pg_pool;
pub use runs::RunStore;
