//! Backup orchestrator: wires the scheduler's compress and store tasks to the
//! archive builder, the history ledger, and the remote uploader, and drives
//! each entry through its lifecycle states.

use crate::compress::BackupCompressor;
use crate::history::{BackupHistory, BackupState};
use crate::scheduler::{Scheduler, TaskAction, TaskPolicy};
use crate::storage::BackupStorageService;
use crate::utils::errors::Result;
use chrono::{NaiveTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub const COMPRESS_TASK: &str = "backup-compress";
pub const STORAGE_TASK: &str = "backup-storage";

pub struct BackupService {
    scheduler: Arc<Scheduler>,
    history: Arc<BackupHistory>,
    compressor: Arc<BackupCompressor>,
    storage: Arc<BackupStorageService>,
    compress_time: NaiveTime,
    storage_interval: Duration,
}

impl BackupService {
    pub fn new(
        scheduler: Arc<Scheduler>,
        history: Arc<BackupHistory>,
        compressor: Arc<BackupCompressor>,
        storage: Arc<BackupStorageService>,
        compress_time: NaiveTime,
        storage_interval: Duration,
    ) -> Self {
        Self {
            scheduler,
            history,
            compressor,
            storage,
            compress_time,
            storage_interval,
        }
    }

    /// Register both periodic tasks. Each runs under the Skip policy: an
    /// overrunning cycle drops the next firing of that same task instead of
    /// queueing it.
    pub fn start(&self) -> Result<()> {
        info!("starting backup tasks");

        let compress_action: TaskAction = {
            let compressor = Arc::clone(&self.compressor);
            let history = Arc::clone(&self.history);
            Arc::new(move || run_compress_cycle(&compressor, &history))
        };
        self.scheduler.add_daily_task(
            COMPRESS_TASK,
            compress_action,
            self.compress_time,
            TaskPolicy::Skip,
        )?;

        let storage_action: TaskAction = {
            let history = Arc::clone(&self.history);
            let storage = Arc::clone(&self.storage);
            Arc::new(move || run_storage_cycle(&history, &storage))
        };
        self.scheduler.add_task(
            STORAGE_TASK,
            storage_action,
            Duration::ZERO,
            self.storage_interval,
            TaskPolicy::Skip,
        )?;

        Ok(())
    }

    pub fn stop(&self) {
        info!("stopping backup tasks");
        self.scheduler.remove_all();
    }
}

/// One compress cycle: build staged archives, then record the attempt.
///
/// An empty successful run records nothing (no point polluting history); a
/// failed run is recorded as `FileCompressFailed`. Ledger write errors
/// propagate so the scheduler logs the cycle as failed.
pub fn run_compress_cycle(
    compressor: &BackupCompressor,
    history: &BackupHistory,
) -> anyhow::Result<()> {
    debug!("backup compress cycle started");

    let compress_started = Utc::now();

    match compressor.create_backup_archives(compress_started) {
        Ok(outcome) => {
            if outcome.backed_up_paths.is_empty() {
                info!("no files were backed up, skipping history entry");
                return Ok(());
            }

            let entry = history.record_compress_completed(
                outcome.backup_type,
                compress_started,
                Utc::now(),
                BackupState::FileCompressSuccess,
                &outcome.backed_up_paths,
                outcome.staged_paths,
            )?;

            info!(
                id = entry.id,
                files = entry.number_of_backed_up_files,
                archives = entry.storage_pending_file_paths.len(),
                "backup compress cycle completed"
            );
        }
        Err(e) => {
            error!(error = %e, "backup compression failed");

            let backup_type = compressor.current_backup_type()?;
            history.record_compress_completed(
                backup_type,
                compress_started,
                Utc::now(),
                BackupState::FileCompressFailed,
                &[],
                Vec::new(),
            )?;
        }
    }

    debug!("backup compress cycle ended");
    Ok(())
}

/// One store cycle: upload every entry still pending storage, timing each
/// attempt and advancing its lifecycle state.
pub fn run_storage_cycle(
    history: &BackupHistory,
    storage: &BackupStorageService,
) -> anyhow::Result<()> {
    debug!("backup storage cycle started");

    for mut entry in history.entries_pending_storage()? {
        debug!(id = entry.id, "storing entry");

        let upload_started = Instant::now();
        let stored = storage.store(&entry);
        entry.total_storage_time += upload_started.elapsed().as_secs() as i64;

        if stored {
            entry.state = BackupState::Success;
            entry.storage_ended = Some(Utc::now());
            entry.storage_pending_file_paths.clear();
        } else {
            entry.state = BackupState::StorageFailed;
        }

        history.update_entry(&entry)?;
    }

    debug!("backup storage cycle ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::codec::TarZstdCodec;
    use crate::config::{BackupConfig, RemoteConfig};
    use crate::storage::{RemoteClient, RemoteSession};
    use crate::utils::errors::BackupError;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct NullClient {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        fail: Arc<Mutex<bool>>,
    }

    impl NullClient {
        fn new() -> Self {
            Self {
                files: Arc::new(Mutex::new(HashMap::new())),
                fail: Arc::new(Mutex::new(false)),
            }
        }
    }

    impl RemoteClient for NullClient {
        fn connect(&self) -> crate::utils::errors::Result<Box<dyn RemoteSession>> {
            if *self.fail.lock() {
                return Err(BackupError::Remote("connection refused".to_string()));
            }
            Ok(Box::new(NullSession {
                files: Arc::clone(&self.files),
            }))
        }
    }

    struct NullSession {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    struct NullWriter {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        path: String,
    }

    impl Write for NullWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.files
                .lock()
                .entry(self.path.clone())
                .or_default()
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl RemoteSession for NullSession {
        fn create_directory(&mut self, _path: &str) -> crate::utils::errors::Result<()> {
            Ok(())
        }

        fn file_exists(&mut self, path: &str) -> crate::utils::errors::Result<bool> {
            Ok(self.files.lock().contains_key(path))
        }

        fn file_size(&mut self, path: &str) -> crate::utils::errors::Result<u64> {
            Ok(self.files.lock().get(path).map_or(0, |f| f.len() as u64))
        }

        fn open_write<'a>(
            &'a mut self,
            path: &str,
        ) -> crate::utils::errors::Result<Box<dyn Write + 'a>> {
            self.files.lock().insert(path.to_string(), Vec::new());
            Ok(Box::new(NullWriter {
                files: Arc::clone(&self.files),
                path: path.to_string(),
            }))
        }

        fn open_append<'a>(
            &'a mut self,
            path: &str,
        ) -> crate::utils::errors::Result<Box<dyn Write + 'a>> {
            Ok(Box::new(NullWriter {
                files: Arc::clone(&self.files),
                path: path.to_string(),
            }))
        }
    }

    struct Fixture {
        _dir: TempDir,
        history: Arc<BackupHistory>,
        compressor: Arc<BackupCompressor>,
        storage: Arc<BackupStorageService>,
        client: Arc<NullClient>,
        root: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir_all(&root).unwrap();

        let history = Arc::new(
            BackupHistory::open(
                &dir.path().join("history.json"),
                &dir.path().join("backup-log.txt"),
            )
            .unwrap(),
        );

        let config = BackupConfig {
            source_roots: vec![root.clone()],
            excluded_paths: Vec::new(),
            excluded_extensions: Vec::new(),
            minimum_days_between_full_backups: 7,
            staging_dir: dir.path().join("staging"),
        };
        let compressor = Arc::new(
            BackupCompressor::new(
                &config,
                Arc::clone(&history),
                Arc::new(TarZstdCodec::new(1)),
            )
            .unwrap(),
        );

        let client = Arc::new(NullClient::new());
        let storage = Arc::new(BackupStorageService::new(
            Arc::clone(&client) as Arc<dyn RemoteClient>,
            &RemoteConfig::default(),
            1024,
        ));

        Fixture {
            _dir: dir,
            history,
            compressor,
            storage,
            client,
            root,
        }
    }

    #[test]
    fn test_empty_compress_cycle_records_nothing() {
        let f = fixture();

        run_compress_cycle(&f.compressor, &f.history).unwrap();

        assert!(f.history.entries_pending_storage().unwrap().is_empty());
        assert_eq!(
            f.history.latest_successful_full_backup_date().unwrap(),
            None
        );
    }

    #[test]
    fn test_compress_cycle_records_success_entry() {
        let f = fixture();
        std::fs::write(f.root.join("data.txt"), b"data").unwrap();

        run_compress_cycle(&f.compressor, &f.history).unwrap();

        let pending = f.history.entries_pending_storage().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].state, BackupState::FileCompressSuccess);
        assert_eq!(pending[0].number_of_backed_up_files, 1);
        assert_eq!(pending[0].storage_pending_file_paths.len(), 1);
    }

    #[test]
    fn test_failed_compress_cycle_records_failure_entry() {
        let f = fixture();
        std::fs::write(f.root.join("data.txt"), b"data").unwrap();
        // Sabotage the run: swap the root out from under the compressor
        std::fs::remove_dir_all(&f.root).unwrap();

        run_compress_cycle(&f.compressor, &f.history).unwrap();

        // The failed attempt is on record but not eligible for storage
        assert!(f.history.entries_pending_storage().unwrap().is_empty());
        assert_eq!(
            f.history.latest_successful_full_backup_date().unwrap(),
            None
        );
    }

    #[test]
    fn test_storage_cycle_success_path() {
        let f = fixture();
        std::fs::write(f.root.join("data.txt"), b"data").unwrap();
        run_compress_cycle(&f.compressor, &f.history).unwrap();

        run_storage_cycle(&f.history, &f.storage).unwrap();

        assert!(f.history.entries_pending_storage().unwrap().is_empty());
        assert!(f.history.latest_successful_backup_date().unwrap().is_some());
        assert!(!f.client.files.lock().is_empty());
    }

    #[test]
    fn test_storage_cycle_failure_keeps_entry_retryable() {
        let f = fixture();
        std::fs::write(f.root.join("data.txt"), b"data").unwrap();
        run_compress_cycle(&f.compressor, &f.history).unwrap();

        *f.client.fail.lock() = true;
        run_storage_cycle(&f.history, &f.storage).unwrap();

        let pending = f.history.entries_pending_storage().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].state, BackupState::StorageFailed);
        assert_eq!(pending[0].storage_pending_file_paths.len(), 1);
        assert!(pending[0].storage_ended.is_none());

        // Next cycle succeeds and finishes the entry
        *f.client.fail.lock() = false;
        run_storage_cycle(&f.history, &f.storage).unwrap();

        assert!(f.history.entries_pending_storage().unwrap().is_empty());
        let latest = f.history.latest_successful_backup_date().unwrap();
        assert!(latest.is_some());
    }
}
