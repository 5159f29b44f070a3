//! Remote uploader: transfers staged archives, resuming partial uploads by
//! byte offset, and deletes the local copies only after everything landed.

pub mod sftp;

use crate::config::RemoteConfig;
use crate::history::BackupEntry;
use crate::utils::errors::{BackupError, Result};
use crate::utils::progress::ProgressPoints;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Remote transfer collaborator: hands out connected sessions.
pub trait RemoteClient: Send + Sync {
    fn connect(&self) -> Result<Box<dyn RemoteSession>>;
}

/// One connection to remote storage.
pub trait RemoteSession {
    fn create_directory(&mut self, path: &str) -> Result<()>;

    fn file_exists(&mut self, path: &str) -> Result<bool>;

    fn file_size(&mut self, path: &str) -> Result<u64>;

    /// Open a fresh remote file, truncating anything already there
    fn open_write<'a>(&'a mut self, path: &str) -> Result<Box<dyn Write + 'a>>;

    /// Open an existing remote file positioned at its current end
    fn open_append<'a>(&'a mut self, path: &str) -> Result<Box<dyn Write + 'a>>;
}

pub struct BackupStorageService {
    client: Arc<dyn RemoteClient>,
    remote_dir: String,
    chunk_size: usize,
}

impl BackupStorageService {
    pub fn new(client: Arc<dyn RemoteClient>, config: &RemoteConfig, chunk_size: usize) -> Self {
        Self {
            client,
            remote_dir: config.remote_dir.trim_end_matches('/').to_string(),
            chunk_size,
        }
    }

    /// Upload every staged archive of `entry`. Returns true only when all of
    /// them transferred completely and the local copies were removed; on any
    /// failure nothing is deleted and the entry stays retryable.
    pub fn store(&self, entry: &BackupEntry) -> bool {
        if entry.storage_pending_file_paths.is_empty() {
            info!(id = entry.id, "no staged files to upload");
            return true;
        }

        match self.upload_entry(entry) {
            Ok(()) => {
                for staged in &entry.storage_pending_file_paths {
                    if let Err(e) = std::fs::remove_file(staged) {
                        warn!(
                            file = %staged.display(),
                            error = %e,
                            "could not remove staged file after upload"
                        );
                    }
                }
                info!(id = entry.id, "finished uploading staged files");
                true
            }
            Err(e) => {
                error!(id = entry.id, error = %e, "failed to upload staged backup files");
                false
            }
        }
    }

    fn upload_entry(&self, entry: &BackupEntry) -> Result<()> {
        let mut session = self.client.connect()?;

        let run_dir = format!(
            "{}/{} {} Backup",
            self.remote_dir,
            entry.compress_started.format("%Y%m%d_%H%M"),
            entry.backup_type
        );
        session.create_directory(&run_dir)?;

        for staged in &entry.storage_pending_file_paths {
            self.upload_file(session.as_mut(), &run_dir, staged)?;
        }

        Ok(())
    }

    fn upload_file(
        &self,
        session: &mut dyn RemoteSession,
        run_dir: &str,
        local: &Path,
    ) -> Result<()> {
        let file_name = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                BackupError::Remote(format!("invalid staged file name: {}", local.display()))
            })?;
        let remote_path = format!("{run_dir}/{file_name}");

        let mut file = File::open(local)?;
        let total = file.metadata()?.len();

        // A remote object left by an interrupted run is continued from its
        // current length instead of re-sending what already arrived.
        let offset = if session.file_exists(&remote_path)? {
            session.file_size(&remote_path)?
        } else {
            0
        };

        let mut writer = if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
            info!(file = %file_name, offset, total, "resuming interrupted upload");
            session.open_append(&remote_path)?
        } else {
            info!(file = %file_name, total, "uploading");
            session.open_write(&remote_path)?
        };

        let mut buffer = vec![0u8; self.chunk_size];
        let mut written = offset;
        let mut points = ProgressPoints::new(0.1);

        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buffer[..n])?;
            written += n as u64;

            if total > 0 {
                if let Some(percent) = points.crossed(written as f64 / total as f64) {
                    info!(
                        file = %file_name,
                        percent,
                        written,
                        "upload progress"
                    );
                }
            }
        }

        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{BackupState, BackupType};
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    type RemoteFiles = Arc<Mutex<HashMap<String, Vec<u8>>>>;

    struct MockClient {
        files: RemoteFiles,
        dirs: Arc<Mutex<Vec<String>>>,
        /// Fail each upload after this many bytes were accepted, once
        fail_after: Arc<Mutex<Option<u64>>>,
    }

    impl MockClient {
        fn new() -> Self {
            Self {
                files: Arc::new(Mutex::new(HashMap::new())),
                dirs: Arc::new(Mutex::new(Vec::new())),
                fail_after: Arc::new(Mutex::new(None)),
            }
        }
    }

    impl RemoteClient for MockClient {
        fn connect(&self) -> Result<Box<dyn RemoteSession>> {
            Ok(Box::new(MockSession {
                files: Arc::clone(&self.files),
                dirs: Arc::clone(&self.dirs),
                fail_after: Arc::clone(&self.fail_after),
            }))
        }
    }

    struct MockSession {
        files: RemoteFiles,
        dirs: Arc<Mutex<Vec<String>>>,
        fail_after: Arc<Mutex<Option<u64>>>,
    }

    impl RemoteSession for MockSession {
        fn create_directory(&mut self, path: &str) -> Result<()> {
            self.dirs.lock().push(path.to_string());
            Ok(())
        }

        fn file_exists(&mut self, path: &str) -> Result<bool> {
            Ok(self.files.lock().contains_key(path))
        }

        fn file_size(&mut self, path: &str) -> Result<u64> {
            Ok(self.files.lock().get(path).map_or(0, |f| f.len() as u64))
        }

        fn open_write<'a>(&'a mut self, path: &str) -> Result<Box<dyn Write + 'a>> {
            self.files.lock().insert(path.to_string(), Vec::new());
            Ok(Box::new(MockWriter {
                files: Arc::clone(&self.files),
                path: path.to_string(),
                fail_after: Arc::clone(&self.fail_after),
            }))
        }

        fn open_append<'a>(&'a mut self, path: &str) -> Result<Box<dyn Write + 'a>> {
            Ok(Box::new(MockWriter {
                files: Arc::clone(&self.files),
                path: path.to_string(),
                fail_after: Arc::clone(&self.fail_after),
            }))
        }
    }

    struct MockWriter {
        files: RemoteFiles,
        path: String,
        fail_after: Arc<Mutex<Option<u64>>>,
    }

    impl Write for MockWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut fail_after = self.fail_after.lock();
            let mut accepted = buf.len();

            if let Some(limit) = *fail_after {
                if (buf.len() as u64) > limit {
                    accepted = limit as usize;
                    *fail_after = None;
                    let mut files = self.files.lock();
                    files
                        .entry(self.path.clone())
                        .or_default()
                        .extend_from_slice(&buf[..accepted]);
                    return Err(std::io::Error::other("simulated network failure"));
                }
                *fail_after = Some(limit - buf.len() as u64);
            }

            let mut files = self.files.lock();
            files
                .entry(self.path.clone())
                .or_default()
                .extend_from_slice(&buf[..accepted]);
            Ok(accepted)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn entry_with(staged: Vec<PathBuf>) -> BackupEntry {
        BackupEntry {
            id: 0,
            backup_type: BackupType::Full,
            compress_started: Utc::now(),
            compress_ended: Utc::now(),
            total_storage_time: 0,
            storage_ended: None,
            number_of_backed_up_files: 1,
            state: BackupState::FileCompressSuccess,
            storage_pending_file_paths: staged,
        }
    }

    fn service(client: &Arc<MockClient>, chunk: usize) -> BackupStorageService {
        let config = RemoteConfig {
            remote_dir: "backups".to_string(),
            ..RemoteConfig::default()
        };
        BackupStorageService::new(
            Arc::clone(client) as Arc<dyn RemoteClient>,
            &config,
            chunk,
        )
    }

    #[test]
    fn test_empty_pending_list_succeeds_trivially() {
        let client = Arc::new(MockClient::new());
        let storage = service(&client, 16);

        assert!(storage.store(&entry_with(Vec::new())));
        assert!(client.dirs.lock().is_empty());
    }

    #[test]
    fn test_successful_upload_deletes_staged_files() {
        let dir = TempDir::new().unwrap();
        let staged = dir.path().join("backup1.tar.zst");
        std::fs::write(&staged, b"0123456789").unwrap();

        let client = Arc::new(MockClient::new());
        let storage = service(&client, 4);
        let entry = entry_with(vec![staged.clone()]);

        assert!(storage.store(&entry));
        assert!(!staged.exists());

        let files = client.files.lock();
        let (path, body) = files.iter().next().unwrap();
        assert!(path.starts_with("backups/"));
        assert!(path.ends_with("Full Backup/backup1.tar.zst"));
        assert_eq!(body, b"0123456789");
    }

    #[test]
    fn test_failed_upload_keeps_staged_files() {
        let dir = TempDir::new().unwrap();
        let staged = dir.path().join("backup1.tar.zst");
        std::fs::write(&staged, b"0123456789abcdef").unwrap();

        let client = Arc::new(MockClient::new());
        *client.fail_after.lock() = Some(6);
        let storage = service(&client, 4);
        let entry = entry_with(vec![staged.clone()]);

        assert!(!storage.store(&entry));
        assert!(staged.exists());
    }

    #[test]
    fn test_retry_resumes_from_remote_size() {
        let dir = TempDir::new().unwrap();
        let staged = dir.path().join("backup1.tar.zst");
        std::fs::write(&staged, b"0123456789abcdef").unwrap();

        let client = Arc::new(MockClient::new());
        *client.fail_after.lock() = Some(8);
        let storage = service(&client, 4);
        let entry = entry_with(vec![staged.clone()]);

        // First attempt dies mid-transfer, leaving a partial remote object
        assert!(!storage.store(&entry));
        let partial_len = client.files.lock().values().next().unwrap().len();
        assert!(partial_len < 16);

        // The retry appends only the remainder and completes
        assert!(storage.store(&entry));
        assert!(!staged.exists());

        let files = client.files.lock();
        assert_eq!(files.values().next().unwrap(), b"0123456789abcdef");
    }

    #[test]
    fn test_second_file_failure_leaves_both_staged() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("backup1.tar.zst");
        let second = dir.path().join("backup2.tar.zst");
        std::fs::write(&first, b"aaaa").unwrap();
        std::fs::write(&second, b"bbbbbbbbbbbb").unwrap();

        let client = Arc::new(MockClient::new());
        // First file (4 bytes) passes, second fails partway
        *client.fail_after.lock() = Some(8);
        let storage = service(&client, 4);
        let entry = entry_with(vec![first.clone(), second.clone()]);

        assert!(!storage.store(&entry));
        assert!(first.exists());
        assert!(second.exists());
    }
}
