//! Fetcher: rate-limited, retrying HTTP client for configured sources.
//!
//! A [`PayloadPager`] is the unit of work handed to the runner: a lazy,
//! finite sequence of raw payloads for one source since a checkpoint.

pub mod backoff;
pub mod client;
pub mod error;

pub use backoff::Backoff;
pub use client::{PayloadPager, SourceClient};
pub use error::FetchError;
