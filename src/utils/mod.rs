//! Shared utilities: error types, logging setup, progress reporting.

pub mod errors;
pub mod logger;
pub mod progress;
