//! Simple Backup
//!
//! Unattended periodic backup daemon: a daily compress task stages full or
//! differential archives of the configured source roots, a durable history
//! ledger records every attempt, and a storage task uploads staged archives
//! over SFTP with byte-offset resume.

pub mod compress;
pub mod config;
pub mod daemon;
pub mod fs;
pub mod history;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
