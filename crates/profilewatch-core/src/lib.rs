//! Core library for the profilewatch tracking engine.
//!
//! This crate contains the cookie pool, scraper client contract, job queue,
//! cron scheduler, tracking pipeline, and storage layer shared by the CLI
//! and HTTP server binaries.
pub mod config;
pub mod cookiepool;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod redact;
pub mod scheduler;
pub mod scraper;
pub mod storage;

pub use error::*;

/// Returns the version of the profilewatch-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
