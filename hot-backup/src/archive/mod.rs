//! Tar container for snapshot streams.
//!
//! Layout on the wire is plain ustar/GNU tar as produced by the `tar` crate:
//! a 512-byte header per entry (path, mode, size, mtime, type, checksum),
//! the content zero-padded to the next 512-byte boundary, and two zero blocks
//! at the end. Paths longer than 100 bytes get a GNU long-name record in
//! front of their header. Only regular files are written; directories are
//! implied by the paths.

pub mod decoder;
pub mod encoder;
mod exact;

pub use decoder::{ArchiveReader, DecodedEntry, Entries};
pub use encoder::ArchiveWriter;

use std::path::PathBuf;

/// Header fields of one archived file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path relative to the backup root, `/`-separated in the archive
    pub path: PathBuf,
    /// Permission bits
    pub mode: u32,
    /// Content length in bytes
    pub size: u64,
    /// Modification time, seconds since the epoch
    pub mtime: u64,
}
