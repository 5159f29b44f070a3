//! Archive codec boundary.
//!
//! The builder hands the codec a list of source files and an output path; the
//! codec produces the compressed container and reports back after each stored
//! entry. A source file that cannot be read is skipped with an error log and
//! the rest of the archive is still written.

use crate::utils::errors::Result;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::error;

/// One file to store in an archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Absolute path of the source file
    pub source: PathBuf,

    /// Directory inside the archive (relative to the archive root)
    pub archive_dir: PathBuf,
}

pub trait ArchiveCodec: Send + Sync {
    /// Write `entries` into a compressed archive at `archive_path`.
    ///
    /// `on_entry_saved` is invoked with the running count after each stored
    /// entry. Returns the number of entries actually stored (unreadable
    /// sources are skipped).
    fn write_archive(
        &self,
        archive_path: &Path,
        entries: &[ArchiveEntry],
        on_entry_saved: &mut dyn FnMut(usize),
    ) -> Result<usize>;
}

/// Production codec: tar container over a zstd stream.
pub struct TarZstdCodec {
    level: i32,
}

impl TarZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl ArchiveCodec for TarZstdCodec {
    fn write_archive(
        &self,
        archive_path: &Path,
        entries: &[ArchiveEntry],
        on_entry_saved: &mut dyn FnMut(usize),
    ) -> Result<usize> {
        let file = File::create(archive_path)?;
        let encoder = zstd::Encoder::new(file, self.level)?;
        let mut builder = tar::Builder::new(encoder);
        let mut stored = 0;

        for entry in entries {
            let file_name = match entry.source.file_name() {
                Some(name) => name,
                None => continue,
            };
            let archive_name = entry.archive_dir.join(file_name);

            let mut source = match File::open(&entry.source) {
                Ok(f) => f,
                Err(e) => {
                    error!(
                        file = %entry.source.display(),
                        error = %e,
                        "could not read file, skipping archive entry"
                    );
                    continue;
                }
            };

            if let Err(e) = builder.append_file(&archive_name, &mut source) {
                error!(
                    file = %entry.source.display(),
                    error = %e,
                    "could not store file, skipping archive entry"
                );
                continue;
            }

            stored += 1;
            on_entry_saved(stored);
        }

        let encoder = builder.into_inner()?;
        let file = encoder.finish()?;
        file.sync_all()?;

        Ok(stored)
    }
}
