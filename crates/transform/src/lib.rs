//! Transformer: pure conversion from raw payloads to normalized records.
//!
//! No network, no store, no clock beyond the payload's own fetch timestamp —
//! everything here is a function of its inputs so it tests in isolation.

pub mod error;
pub mod mapper;
pub mod value;

pub use error::TransformError;
pub use mapper::{transform, Reject, TransformOutput};
