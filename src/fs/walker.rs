//! Directory traversal for backup source roots.
//!
//! Symlinks are never followed: a symlinked directory is not descended into
//! (avoids cycles and cross-volume recursion) and symlink files are skipped.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// A regular file discovered under a source root
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Absolute path to the file
    pub path: PathBuf,

    /// Directory of the file relative to the root (archive layout)
    pub relative_dir: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Last modification time
    pub modified: DateTime<Utc>,
}

/// Walk a source root and collect every regular file under it.
pub fn walk_source_root(root: &Path) -> std::io::Result<Vec<SourceFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        let file_type = entry.file_type();

        if file_type.is_dir() || file_type.is_symlink() {
            continue;
        }

        let metadata = entry.metadata().map_err(std::io::Error::from)?;
        let modified = metadata
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .into();

        let path = entry.into_path();
        let relative_dir = path
            .parent()
            .and_then(|dir| dir.strip_prefix(root).ok())
            .unwrap_or_else(|| Path::new(""))
            .to_path_buf();

        files.push(SourceFile {
            path,
            relative_dir,
            size: metadata.len(),
            modified,
        });
    }

    Ok(files)
}
