//! Durable ledger of backup attempts plus the archived-path index.
//!
//! The ledger is a JSON document rooted at a backup collection; the path index
//! is a sibling newline-delimited list of absolute file paths. Every mutation
//! rewrites the affected file through a temp-file-and-rename so a crash leaves
//! either the old or the new contents on disk, never a truncated document.
//! Reads go through lazily built in-memory caches that are invalidated on
//! every mutation.

pub mod entry;

pub use entry::{BackupEntry, BackupState, BackupType};

use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerDocument {
    backups: Vec<BackupEntry>,
}

#[derive(Default)]
struct Caches {
    entries: Option<Vec<BackupEntry>>,
    path_index: Option<HashSet<PathBuf>>,
}

pub struct BackupHistory {
    ledger_path: PathBuf,
    index_path: PathBuf,
    caches: Mutex<Caches>,
}

impl BackupHistory {
    /// Open (or initialize) the ledger and path-index files.
    pub fn open(ledger_path: &Path, index_path: &Path) -> Result<Self> {
        for path in [ledger_path, index_path] {
            if let Some(dir) = path.parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)?;
                }
            }
        }

        if !ledger_path.exists() {
            let empty = serde_json::to_vec_pretty(&LedgerDocument::default())?;
            atomic_replace(ledger_path, &empty)?;
        }
        if !index_path.exists() {
            atomic_replace(index_path, b"")?;
        }

        Ok(Self {
            ledger_path: ledger_path.to_path_buf(),
            index_path: index_path.to_path_buf(),
            caches: Mutex::new(Caches::default()),
        })
    }

    /// Max `compress_started` among full backups whose compression succeeded.
    pub fn latest_successful_full_backup_date(&self) -> Result<Option<DateTime<Utc>>> {
        let entries = self.entries_snapshot()?;
        Ok(entries
            .iter()
            .filter(|e| {
                e.backup_type == BackupType::Full && e.state != BackupState::FileCompressFailed
            })
            .map(|e| e.compress_started)
            .max())
    }

    /// Max `compress_started` among fully stored backups of any type.
    pub fn latest_successful_backup_date(&self) -> Result<Option<DateTime<Utc>>> {
        let entries = self.entries_snapshot()?;
        Ok(entries
            .iter()
            .filter(|e| e.state == BackupState::Success)
            .map(|e| e.compress_started)
            .max())
    }

    /// Entries whose staged archives still await a (re-)upload.
    pub fn entries_pending_storage(&self) -> Result<Vec<BackupEntry>> {
        let entries = self.entries_snapshot()?;
        Ok(entries
            .into_iter()
            .filter(|e| e.state.is_pending_storage())
            .collect())
    }

    /// Record a completed compress attempt and return the stored entry.
    ///
    /// On `FileCompressSuccess` the path index is updated first: reseeded from
    /// scratch for a full backup, appended with not-yet-indexed paths for a
    /// differential one.
    pub fn record_compress_completed(
        &self,
        backup_type: BackupType,
        compress_started: DateTime<Utc>,
        compress_ended: DateTime<Utc>,
        state: BackupState,
        backed_up_paths: &[PathBuf],
        staged_paths: Vec<PathBuf>,
    ) -> Result<BackupEntry> {
        let mut caches = self.caches.lock();

        if state == BackupState::FileCompressSuccess {
            self.update_path_index(
                &mut caches,
                backed_up_paths,
                backup_type == BackupType::Full,
            )?;
        }

        let mut entries = self.load_entries(&mut caches)?;
        let id = entries.iter().map(|e| e.id + 1).max().unwrap_or(0);

        let entry = BackupEntry {
            id,
            backup_type,
            compress_started,
            compress_ended,
            total_storage_time: 0,
            storage_ended: None,
            number_of_backed_up_files: backed_up_paths.len() as u64,
            state,
            storage_pending_file_paths: if state == BackupState::FileCompressSuccess {
                staged_paths
            } else {
                Vec::new()
            },
        };

        entries.push(entry.clone());
        self.persist_entries(&mut caches, entries)?;

        debug!(id, %backup_type, %state, "recorded backup history entry");
        Ok(entry)
    }

    /// Replace a stored entry with the given one, matched by id.
    pub fn update_entry(&self, updated: &BackupEntry) -> Result<()> {
        let mut caches = self.caches.lock();
        let mut entries = self.load_entries(&mut caches)?;

        let slot = entries
            .iter_mut()
            .find(|e| e.id == updated.id)
            .ok_or_else(|| {
                BackupError::NotFound(format!("backup history entry #{}", updated.id))
            })?;
        *slot = updated.clone();

        self.persist_entries(&mut caches, entries)?;
        debug!(id = updated.id, state = %updated.state, "updated backup history entry");
        Ok(())
    }

    /// Membership test against the archived-path index.
    pub fn is_already_archived(&self, path: &Path) -> Result<bool> {
        let mut caches = self.caches.lock();
        let index = self.load_path_index(&mut caches)?;
        Ok(index.contains(path))
    }

    fn entries_snapshot(&self) -> Result<Vec<BackupEntry>> {
        let mut caches = self.caches.lock();
        self.load_entries(&mut caches)
    }

    fn load_entries(&self, caches: &mut Caches) -> Result<Vec<BackupEntry>> {
        match &caches.entries {
            Some(entries) => Ok(entries.clone()),
            None => {
                let content = std::fs::read_to_string(&self.ledger_path)?;
                let document: LedgerDocument = serde_json::from_str(&content)?;
                caches.entries = Some(document.backups.clone());
                Ok(document.backups)
            }
        }
    }

    /// Writes the full collection durably, then invalidates the read cache so
    /// the next read reloads from disk. The cache is invalidated even when the
    /// write fails, so it can never serve unpersisted state.
    fn persist_entries(&self, caches: &mut Caches, entries: Vec<BackupEntry>) -> Result<()> {
        let document = LedgerDocument { backups: entries };
        let bytes = serde_json::to_vec_pretty(&document)?;
        let result = atomic_replace(&self.ledger_path, &bytes);
        caches.entries = None;
        result
    }

    fn load_path_index<'a>(&self, caches: &'a mut Caches) -> Result<&'a HashSet<PathBuf>> {
        if caches.path_index.is_none() {
            let content = std::fs::read_to_string(&self.index_path)?;
            let index = content
                .lines()
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect();
            caches.path_index = Some(index);
        }
        Ok(caches.path_index.get_or_insert_with(HashSet::new))
    }

    fn update_path_index(
        &self,
        caches: &mut Caches,
        backed_up_paths: &[PathBuf],
        reseed: bool,
    ) -> Result<()> {
        let mut lines: Vec<String>;

        if reseed {
            // A full backup replaces the index with exactly this run's paths
            lines = backed_up_paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
        } else {
            let existing = self.load_path_index(caches)?;
            let new_paths: Vec<String> = backed_up_paths
                .iter()
                .filter(|p| !existing.contains(*p))
                .map(|p| p.to_string_lossy().into_owned())
                .collect();

            if new_paths.is_empty() {
                return Ok(());
            }

            lines = std::fs::read_to_string(&self.index_path)?
                .lines()
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect();
            lines.extend(new_paths);
        }

        let result = atomic_replace(&self.index_path, lines.join("\n").as_bytes());
        caches.path_index = None;
        result
    }
}

/// Write `contents` to a temp file in the target's directory, then rename it
/// over the target. In-place truncate-and-rewrite could leave a corrupt file
/// if the process dies mid-write; the rename makes the swap atomic.
fn atomic_replace(path: &Path, contents: &[u8]) -> Result<()> {
    let staged = stage_replacement(path, contents)?;
    commit_replacement(staged, path)
}

/// Step one: write and sync the full new contents to a temp file next to the
/// target. The target itself is untouched until the commit step renames over
/// it, so dying between the two steps leaves the old contents intact.
fn stage_replacement(path: &Path, contents: &[u8]) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Step two: atomically rename the staged file over the target.
fn commit_replacement(staged: NamedTempFile, path: &Path) -> Result<()> {
    staged.persist(path).map_err(|e| BackupError::Io(e.error))?;
    Ok(())
}
