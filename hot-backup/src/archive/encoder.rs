//! Streaming tar writer.

use super::exact::ExactReader;
use super::ArchiveEntry;
use std::io::{self, Read, Write};
use tar::{Builder, EntryType, Header, HeaderMode};

/// Writes archive entries straight through to `W`; at most one entry's
/// content is in flight, read in small chunks.
pub struct ArchiveWriter<W: Write> {
    builder: Builder<W>,
    entries: u64,
    bytes: u64,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(inner: W) -> Self {
        let mut builder = Builder::new(inner);
        builder.mode(HeaderMode::Complete);
        Self {
            builder,
            entries: 0,
            bytes: 0,
        }
    }

    /// Append one regular file.
    ///
    /// `content` must yield exactly `entry.size` bytes. Anything else is an
    /// `ArchiveCorrupt` error and the stream must be abandoned: the header has
    /// already been written.
    pub fn append<R: Read>(&mut self, entry: &ArchiveEntry, content: R) -> io::Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(entry.size);
        header.set_mode(entry.mode & 0o7777);
        header.set_mtime(entry.mtime);
        header.set_uid(0);
        header.set_gid(0);

        let content = ExactReader::new(content, entry.size, &entry.path);
        self.builder.append_data(&mut header, &entry.path, content)?;

        self.entries += 1;
        self.bytes += entry.size;
        Ok(())
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Write the end-of-archive blocks and hand back the inner writer.
    pub fn finish(self) -> io::Result<W> {
        self.builder.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::BackupError;
    use std::path::PathBuf;

    fn entry(path: &str, size: u64) -> ArchiveEntry {
        ArchiveEntry {
            path: PathBuf::from(path),
            mode: 0o644,
            size,
            mtime: 1_700_000_000,
        }
    }

    #[test]
    fn test_empty_archive_is_two_zero_blocks() {
        let bytes = ArchiveWriter::new(Vec::new()).finish().unwrap();
        assert_eq!(bytes.len(), 1024);
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_header_layout() {
        let mut writer = ArchiveWriter::new(Vec::new());
        writer.append(&entry("a.txt", 5), &b"hello"[..]).unwrap();
        assert_eq!(writer.entries(), 1);
        assert_eq!(writer.bytes(), 5);
        let bytes = writer.finish().unwrap();

        // header + one padded content block + terminator
        assert_eq!(bytes.len(), 512 + 512 + 1024);
        assert_eq!(&bytes[..5], b"a.txt");
        assert_eq!(&bytes[512..517], b"hello");
        assert!(bytes[517..1024].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_long_path() {
        let long = format!("{}/file.dat", "d".repeat(150));
        let mut writer = ArchiveWriter::new(Vec::new());
        writer.append(&entry(&long, 1), &b"x"[..]).unwrap();
        let bytes = writer.finish().unwrap();

        let mut archive = tar::Archive::new(&bytes[..]);
        let first = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(first.path().unwrap().to_str().unwrap(), long);
    }

    #[test]
    fn test_shrunk_content_is_fatal() {
        let mut writer = ArchiveWriter::new(Vec::new());
        let err = writer.append(&entry("db.log", 10), &b"short"[..]).unwrap_err();
        let err = BackupError::from_io(err, |s| BackupError::io("db.log", s));
        assert_eq!(err.kind(), "ArchiveCorrupt");
    }

    #[test]
    fn test_grown_content_is_fatal() {
        let mut writer = ArchiveWriter::new(Vec::new());
        let err = writer
            .append(&entry("db.log", 2), &b"longer"[..])
            .unwrap_err();
        let err = BackupError::from_io(err, |s| BackupError::io("db.log", s));
        assert_eq!(err.kind(), "ArchiveCorrupt");
    }
}
