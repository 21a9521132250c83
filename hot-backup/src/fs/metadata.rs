//! File metadata carried through the archive.
//!
//! Only what the archive header records is kept: size, permission bits and
//! modification time.

use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};

/// File metadata for backup/restore operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Last modified time (seconds since Unix epoch)
    pub modified: u64,

    /// Permission bits (`mode & 0o7777`); zero where the platform has none
    pub mode: u32,
}

impl FileMetadata {
    /// Extract metadata from a file path
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self::from_metadata(&metadata))
    }

    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .unwrap_or_default()
            .as_secs();

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o7777
        };

        #[cfg(not(unix))]
        let mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };

        Self {
            size: metadata.len(),
            modified,
            mode,
        }
    }

    /// Apply permission bits and mtime to an open file.
    pub fn apply_to_file(&self, file: &File) -> std::io::Result<()> {
        #[cfg(unix)]
        if self.mode != 0 {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(self.mode))?;
        }

        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(self.modified))?;
        Ok(())
    }
}
