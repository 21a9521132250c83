//! Directory traversal for backup.
//!
//! Yields every regular file under a root, lazily and in the order the
//! filesystem lists directory entries. Directories are descended into but not
//! emitted; symlinks and special files are skipped. Any listing failure is
//! returned to the caller.

use crate::fs::metadata::FileMetadata;
use crate::utils::errors::{BackupError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// Size, mode and mtime captured at discovery
    pub metadata: FileMetadata,
}

/// Lazy iterator over the regular files below a root.
pub struct FileWalker {
    root: PathBuf,
    inner: walkdir::IntoIter,
}

/// Walk a directory tree, yielding regular files only
///
/// # Arguments
/// * `root` - Root directory to start walking from
///
/// # Returns
/// * `Ok(FileWalker)` - Iterator over the files found
/// * `Err(BackupError::Io)` - If the root is missing or not a directory
///
/// # Example
/// ```no_run
/// use hot_backup::fs::walker::walk_files;
/// use std::path::Path;
///
/// for file in walk_files(Path::new("/data")).unwrap() {
///     println!("{}", file.unwrap().relative_path.display());
/// }
/// ```
pub fn walk_files(root: &Path) -> Result<FileWalker> {
    let meta = std::fs::metadata(root).map_err(|e| BackupError::io(root, e))?;
    if !meta.is_dir() {
        return Err(BackupError::io(
            root,
            std::io::Error::other("backup root is not a directory"),
        ));
    }

    Ok(FileWalker {
        root: root.to_path_buf(),
        inner: WalkDir::new(root).follow_links(false).into_iter(),
    })
}

impl Iterator for FileWalker {
    type Item = Result<FileInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    return Some(Err(BackupError::io(path, err.into())));
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }
            if !file_type.is_file() {
                debug!("Skipping non-regular file {}", entry.path().display());
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(meta) => FileMetadata::from_metadata(&meta),
                Err(err) => return Some(Err(BackupError::io(entry.path(), err.into()))),
            };

            let path = entry.path().to_path_buf();
            let relative_path = path
                .strip_prefix(&self.root)
                .unwrap_or(&path)
                .to_path_buf();

            return Some(Ok(FileInfo {
                path,
                relative_path,
                metadata,
            }));
        }
    }
}
