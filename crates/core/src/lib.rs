pub mod config;
pub mod error;
pub mod record;
pub mod run;
pub mod source;

pub use config::Config;
pub use error::ConfigError;
pub use record::{NormalizedRecord, RawPayload, TypedValue};
pub use run::{RunCounts, RunStatus, RunTrigger};
pub use source::{Cadence, EntitySchema, PayloadShape, SourceDescriptor, SourcesFile};
