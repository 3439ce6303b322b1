//! Scheduler/Runner: drives fetch → transform → load on each source's
//! cadence, one run in flight per source, bounded concurrency overall.

pub mod batcher;
pub mod pipeline;
pub mod schedule;
pub mod scheduler;
pub mod single_flight;

pub use batcher::RecordBatcher;
pub use pipeline::{run_source, PipelineContext};
pub use schedule::DueTracker;
pub use scheduler::Scheduler;
pub use single_flight::InFlight;
