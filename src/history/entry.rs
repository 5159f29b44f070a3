//! Backup ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupType {
    Full,
    Differential,
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupType::Full => write!(f, "Full"),
            BackupType::Differential => write!(f, "Differential"),
        }
    }
}

/// Lifecycle state of a backup attempt.
///
/// `FileCompressFailed` and `Success` are terminal; `FileCompressSuccess` and
/// `StorageFailed` are both eligible for (re-)upload on the next store cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupState {
    FileCompressFailed,
    FileCompressSuccess,
    StorageFailed,
    Success,
}

impl BackupState {
    pub fn is_pending_storage(self) -> bool {
        matches!(
            self,
            BackupState::FileCompressSuccess | BackupState::StorageFailed
        )
    }
}

impl fmt::Display for BackupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupState::FileCompressFailed => "FileCompressFailed",
            BackupState::FileCompressSuccess => "FileCompressSuccess",
            BackupState::StorageFailed => "StorageFailed",
            BackupState::Success => "Success",
        };
        write!(f, "{name}")
    }
}

/// One record per compress attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub id: u64,
    pub backup_type: BackupType,
    pub compress_started: DateTime<Utc>,
    pub compress_ended: DateTime<Utc>,

    /// Accumulated seconds spent uploading across all store cycles
    #[serde(default)]
    pub total_storage_time: i64,

    /// Set only on terminal upload success
    #[serde(default)]
    pub storage_ended: Option<DateTime<Utc>>,

    pub number_of_backed_up_files: u64,
    pub state: BackupState,

    /// Staged archives awaiting upload; cleared on terminal success
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage_pending_file_paths: Vec<PathBuf>,
}
