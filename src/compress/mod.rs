//! Archive builder: decides full vs. differential, filters the source trees,
//! and stages one compressed archive per source root.

pub mod codec;

use crate::config::BackupConfig;
use crate::fs::walker::{walk_source_root, SourceFile};
use crate::history::{BackupHistory, BackupType};
use crate::utils::errors::{BackupError, Result};
use crate::utils::progress::ProgressPoints;
use chrono::{DateTime, Duration, Utc};
use codec::{ArchiveCodec, ArchiveEntry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of a successful compress run
#[derive(Debug)]
pub struct CompressOutcome {
    pub backup_type: BackupType,

    /// Absolute paths of every file captured across all roots
    pub backed_up_paths: Vec<PathBuf>,

    /// Staged archive files awaiting upload, one per non-empty root
    pub staged_paths: Vec<PathBuf>,
}

pub struct BackupCompressor {
    source_roots: Vec<PathBuf>,
    excluded_paths: Vec<PathBuf>,
    excluded_extensions: Vec<String>,
    minimum_days_between_full_backups: i64,
    staging_dir: PathBuf,
    history: Arc<BackupHistory>,
    codec: Arc<dyn ArchiveCodec>,
}

impl BackupCompressor {
    /// Fails fast when no source roots are configured.
    pub fn new(
        config: &BackupConfig,
        history: Arc<BackupHistory>,
        codec: Arc<dyn ArchiveCodec>,
    ) -> Result<Self> {
        if config.source_roots.is_empty() {
            return Err(BackupError::Config(
                "no backup source roots configured".to_string(),
            ));
        }

        let excluded_extensions = config
            .excluded_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        Ok(Self {
            source_roots: config.source_roots.clone(),
            excluded_paths: config.excluded_paths.clone(),
            excluded_extensions,
            minimum_days_between_full_backups: config.minimum_days_between_full_backups,
            staging_dir: config.staging_dir.clone(),
            history,
            codec,
        })
    }

    /// Full when no successful full backup exists or the most recent one is
    /// older than the configured minimum; otherwise differential.
    pub fn current_backup_type(&self) -> Result<BackupType> {
        let latest_full = self.history.latest_successful_full_backup_date()?;

        match latest_full {
            Some(date)
                if date + Duration::days(self.minimum_days_between_full_backups)
                    > Utc::now() =>
            {
                Ok(BackupType::Differential)
            }
            _ => Ok(BackupType::Full),
        }
    }

    /// Stage compressed archives for every configured source root.
    ///
    /// `compress_started` names the staged archives, so the filenames agree
    /// with the ledger entry and the remote run directory for this run.
    /// A failure on any root fails the whole run; archives already staged for
    /// earlier roots are left on disk for inspection.
    pub fn create_backup_archives(
        &self,
        compress_started: DateTime<Utc>,
    ) -> Result<CompressOutcome> {
        let backup_type = self.current_backup_type()?;

        info!(%backup_type, "starting backup");

        self.validate_source_roots()?;
        std::fs::create_dir_all(&self.staging_dir)?;

        let latest_backup = match backup_type {
            BackupType::Differential => self.history.latest_successful_backup_date()?,
            BackupType::Full => None,
        };

        let stamp = compress_started.format("%Y%m%d_%H%M%S").to_string();
        let mut backed_up_paths = Vec::new();
        let mut staged_paths = Vec::new();

        for (index, root) in self.source_roots.iter().enumerate() {
            info!(root = %root.display(), "searching files to back up");

            match self.archive_root(index, root, backup_type, latest_backup, &stamp) {
                Ok(Some((paths, archive))) => {
                    backed_up_paths.extend(paths);
                    staged_paths.push(archive);
                }
                Ok(None) => {
                    info!(root = %root.display(), "no files needed to back up");
                }
                Err(e) => {
                    error!(root = %root.display(), error = %e, "failed to back up source root");
                    return Err(e);
                }
            }
        }

        Ok(CompressOutcome {
            backup_type,
            backed_up_paths,
            staged_paths,
        })
    }

    fn validate_source_roots(&self) -> Result<()> {
        let missing: Vec<String> = self
            .source_roots
            .iter()
            .filter(|root| !root.is_dir())
            .map(|root| root.display().to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BackupError::NotFound(format!(
                "missing source roots: {}",
                missing.join(", ")
            )))
        }
    }

    fn archive_root(
        &self,
        index: usize,
        root: &PathBuf,
        backup_type: BackupType,
        latest_backup: Option<DateTime<Utc>>,
        stamp: &str,
    ) -> Result<Option<(Vec<PathBuf>, PathBuf)>> {
        let files = walk_source_root(root)?;

        let mut selected = Vec::new();
        for file in files {
            if self.is_excluded(&file) {
                continue;
            }
            if backup_type == BackupType::Differential
                && !self.differential_keep(&file, latest_backup)?
            {
                continue;
            }
            debug!(file = %file.path.display(), bytes = file.size, "adding file to backup");
            selected.push(file);
        }

        if selected.is_empty() {
            return Ok(None);
        }

        let archive_path = self
            .staging_dir
            .join(format!("backup{}_{stamp}.tar.zst", index + 1));

        let entries: Vec<ArchiveEntry> = selected
            .iter()
            .map(|f| ArchiveEntry {
                source: f.path.clone(),
                archive_dir: f.relative_dir.clone(),
            })
            .collect();

        let total = entries.len();
        let total_bytes: u64 = selected.iter().map(|f| f.size).sum();
        info!(files = total, bytes = total_bytes, "compressing");

        let mut points = ProgressPoints::new(0.1);
        let mut on_entry_saved = |saved: usize| {
            if let Some(percent) = points.crossed(saved as f64 / total as f64) {
                info!(
                    saved,
                    total,
                    percent,
                    archive = %archive_path.display(),
                    "compress progress"
                );
            }
        };

        let stored = self
            .codec
            .write_archive(&archive_path, &entries, &mut on_entry_saved)?;

        info!(stored, archive = %archive_path.display(), "compressing completed");

        let paths = selected.into_iter().map(|f| f.path).collect();
        Ok(Some((paths, archive_path)))
    }

    fn is_excluded(&self, file: &SourceFile) -> bool {
        if let Some(dir) = file.path.parent() {
            if self.excluded_paths.iter().any(|e| dir.starts_with(e)) {
                return true;
            }
        }

        if let Some(ext) = file.path.extension().and_then(|e| e.to_str()) {
            if self
                .excluded_extensions
                .iter()
                .any(|x| x.eq_ignore_ascii_case(ext))
            {
                return true;
            }
        }

        false
    }

    /// A file survives the differential filter when it was modified after the
    /// last fully stored backup OR was never recorded as archived. The union
    /// of both signals catches files a failed or partial prior run missed.
    fn differential_keep(
        &self,
        file: &SourceFile,
        latest_backup: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        if let Some(latest) = latest_backup {
            if file.modified > latest {
                return Ok(true);
            }
        }

        Ok(!self.history.is_already_archived(&file.path)?)
    }
}
