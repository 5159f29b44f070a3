//! Configuration management for the backup daemon.
//!
//! Loads configuration from a TOML file; every section has usable defaults so
//! a partial file is enough to get started.

use crate::utils::errors::{BackupError, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directories to back up, one staged archive per root
    #[serde(default)]
    pub source_roots: Vec<PathBuf>,

    /// Files under any of these directory prefixes are never archived
    #[serde(default)]
    pub excluded_paths: Vec<PathBuf>,

    /// File extensions (without the leading dot) to skip
    #[serde(default)]
    pub excluded_extensions: Vec<String>,

    /// A new full backup is forced once the last one is at least this old
    #[serde(default = "default_minimum_days_between_full_backups")]
    pub minimum_days_between_full_backups: i64,

    /// Where staged archives wait for upload
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Local time of day for the daily compress run, "HH:MM" or "HH:MM:SS"
    #[serde(default = "default_daily_compress_time")]
    pub daily_compress_time: String,

    /// Interval between storage (upload) cycles in seconds
    #[serde(default = "default_storage_interval_secs")]
    pub storage_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Durable ledger of backup attempts
    #[serde(default = "default_ledger_file")]
    pub ledger_file: PathBuf,

    /// Flat file holding every path known to be archived
    #[serde(default = "default_path_index_file")]
    pub path_index_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_host")]
    pub host: String,

    #[serde(default = "default_remote_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Remote directory that per-run backup directories are created under
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// zstd compression level (1-22)
    #[serde(default = "default_compression_level")]
    pub level: i32,

    /// Upload chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_minimum_days_between_full_backups() -> i64 {
    7
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("/var/lib/simple-backup/staging")
}

fn default_daily_compress_time() -> String {
    "03:30".to_string()
}

fn default_storage_interval_secs() -> u64 {
    300
}

fn default_ledger_file() -> PathBuf {
    PathBuf::from("/var/lib/simple-backup/history.json")
}

fn default_path_index_file() -> PathBuf {
    PathBuf::from("/var/lib/simple-backup/backup-log.txt")
}

fn default_remote_host() -> String {
    "localhost".to_string()
}

fn default_remote_port() -> u16 {
    22
}

fn default_remote_dir() -> String {
    "backups".to_string()
}

fn default_compression_level() -> i32 {
    3
}

fn default_chunk_size() -> usize {
    64 * 1024 // 64 KiB
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            source_roots: Vec::new(),
            excluded_paths: Vec::new(),
            excluded_extensions: Vec::new(),
            minimum_days_between_full_backups: default_minimum_days_between_full_backups(),
            staging_dir: default_staging_dir(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_compress_time: default_daily_compress_time(),
            storage_interval_secs: default_storage_interval_secs(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            ledger_file: default_ledger_file(),
            path_index_file: default_path_index_file(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_remote_host(),
            port: default_remote_port(),
            username: String::new(),
            password: String::new(),
            remote_dir: default_remote_dir(),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: default_compression_level(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup: BackupConfig::default(),
            schedule: ScheduleConfig::default(),
            history: HistoryConfig::default(),
            remote: RemoteConfig::default(),
            compression: CompressionConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl ScheduleConfig {
    /// Parse the configured daily compress time of day
    pub fn compress_time(&self) -> Result<NaiveTime> {
        let raw = self.daily_compress_time.trim();
        NaiveTime::parse_from_str(raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
            .map_err(|_| {
                BackupError::Config(format!("invalid daily_compress_time: {raw:?}"))
            })
    }
}
