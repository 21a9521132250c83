//! Streaming tar reader.
//!
//! Entries are strictly sequential: an entry's content has to be read (or is
//! skipped automatically) before the next header can be decoded.
//!
//! The archive must end with its zero-block marker. Compressed framing has no
//! end-of-stream marker of its own, so a stream that simply stops at a header
//! boundary is a cut-off snapshot and fails with `ArchiveCorrupt`.

use super::exact::ExactReader;
use super::ArchiveEntry;
use crate::utils::errors::{tag_io, BackupError, Result};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tar::EntryType;
use tracing::{debug, warn};

fn corrupt(err: io::Error) -> BackupError {
    BackupError::from_io(err, |e| BackupError::ArchiveCorrupt(e.to_string()))
}

/// Notes when the wrapped stream reports end of file.
struct EndTracker<R> {
    inner: R,
    ended: Arc<AtomicBool>,
}

impl<R: Read> Read for EndTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.ended.store(true, Ordering::Relaxed);
        }
        Ok(n)
    }
}

pub struct ArchiveReader<R: Read> {
    archive: tar::Archive<EndTracker<R>>,
    ended: Arc<AtomicBool>,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(inner: R) -> Self {
        let ended = Arc::new(AtomicBool::new(false));
        Self {
            archive: tar::Archive::new(EndTracker {
                inner,
                ended: Arc::clone(&ended),
            }),
            ended,
        }
    }

    /// Lazily decode the regular-file entries of the stream.
    pub fn entries(&mut self) -> Result<Entries<'_, R>> {
        let inner = self.archive.entries().map_err(corrupt)?;
        Ok(Entries {
            inner,
            ended: Arc::clone(&self.ended),
            done: false,
            skipped: 0,
        })
    }

    pub fn into_inner(self) -> R {
        self.archive.into_inner().inner
    }
}

/// Iterator over the regular files of an archive.
///
/// Directory markers and other entry types are consumed and counted but not
/// yielded. The first error ends the iteration.
pub struct Entries<'a, R: 'a + Read> {
    inner: tar::Entries<'a, EndTracker<R>>,
    ended: Arc<AtomicBool>,
    done: bool,
    skipped: u64,
}

impl<'a, R: 'a + Read> Entries<'a, R> {
    /// Number of non-file entries passed over so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl<'a, R: 'a + Read> Iterator for Entries<'a, R> {
    type Item = Result<DecodedEntry<'a, R>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let entry = match self.inner.next() {
                None => {
                    self.done = true;
                    // tar stops at the first zero block without reading past it.
                    if self.ended.load(Ordering::Relaxed) {
                        return Some(Err(BackupError::ArchiveCorrupt(
                            "stream ended before the end-of-archive marker".into(),
                        )));
                    }
                    return None;
                }
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(corrupt(err)));
                }
            };

            let entry_type = entry.header().entry_type();
            if entry_type.is_file() {
                let decoded = DecodedEntry::new(entry);
                if decoded.is_err() {
                    self.done = true;
                }
                return Some(decoded);
            }

            self.skipped += 1;
            let path = entry.path().map(|p| p.display().to_string()).unwrap_or_default();
            match entry_type {
                EntryType::Directory | EntryType::XGlobalHeader => {
                    debug!("Skipping {:?} entry {}", entry_type, path)
                }
                other => warn!("Skipping unsupported {:?} entry {}", other, path),
            }
        }
    }
}

/// One regular file from the archive; reading it yields exactly
/// `entry().size` bytes or fails with `ArchiveCorrupt`.
pub struct DecodedEntry<'a, R: 'a + Read> {
    entry: ArchiveEntry,
    content: ExactReader<tar::Entry<'a, EndTracker<R>>>,
}

impl<'a, R: 'a + Read> DecodedEntry<'a, R> {
    fn new(raw: tar::Entry<'a, EndTracker<R>>) -> Result<Self> {
        let header = raw.header();
        let entry = ArchiveEntry {
            path: raw.path().map_err(corrupt)?.into_owned(),
            mode: header.mode().map_err(corrupt)? & 0o7777,
            size: raw.size(),
            mtime: header.mtime().map_err(corrupt)?,
        };
        let content = ExactReader::new(raw, entry.size, &entry.path);
        Ok(Self { entry, content })
    }

    pub fn entry(&self) -> &ArchiveEntry {
        &self.entry
    }
}

impl<'a, R: 'a + Read> Read for DecodedEntry<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.content
            .read(buf)
            .map_err(|e| tag_io(e, |e| BackupError::ArchiveCorrupt(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveWriter;
    use std::path::PathBuf;

    fn entry(path: &str, size: u64) -> ArchiveEntry {
        ArchiveEntry {
            path: PathBuf::from(path),
            mode: 0o640,
            size,
            mtime: 1_700_000_000,
        }
    }

    fn archive_of(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ArchiveWriter::new(Vec::new());
        for (path, data) in files {
            writer.append(&entry(path, data.len() as u64), *data).unwrap();
        }
        writer.finish().unwrap()
    }

    fn read_all(bytes: &[u8]) -> Result<Vec<(ArchiveEntry, Vec<u8>)>> {
        let mut reader = ArchiveReader::new(bytes);
        let mut out = Vec::new();
        for decoded in reader.entries()? {
            let mut decoded = decoded?;
            let mut data = Vec::new();
            decoded
                .read_to_end(&mut data)
                .map_err(|e| BackupError::from_io(e, |s| BackupError::io("test", s)))?;
            out.push((decoded.entry().clone(), data));
        }
        Ok(out)
    }

    #[test]
    fn test_decode_fixed_scenario() -> Result<()> {
        let bytes = archive_of(&[("a.txt", b"hello"), ("b/c.txt", b"world")]);
        let decoded = read_all(&bytes)?;

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].0, entry("a.txt", 5));
        assert_eq!(decoded[0].1, b"hello");
        assert_eq!(decoded[1].0, entry("b/c.txt", 5));
        assert_eq!(decoded[1].1, b"world");
        Ok(())
    }

    #[test]
    fn test_empty_archive() -> Result<()> {
        assert!(read_all(&archive_of(&[]))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_stream_is_corrupt() {
        let err = read_all(&[]).unwrap_err();
        assert_eq!(err.kind(), "ArchiveCorrupt");
    }

    #[test]
    fn test_unread_content_is_skipped() -> Result<()> {
        let bytes = archive_of(&[("big.bin", &[7u8; 3000]), ("small.txt", b"ok")]);
        let mut reader = ArchiveReader::new(&bytes[..]);
        let paths: Vec<PathBuf> = reader
            .entries()?
            .map(|e| e.map(|e| e.entry().path.clone()))
            .collect::<Result<_>>()?;

        assert_eq!(paths, vec![PathBuf::from("big.bin"), PathBuf::from("small.txt")]);
        Ok(())
    }

    #[test]
    fn test_directory_markers_are_skipped() -> Result<()> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder.append_data(&mut dir, "b/", io::empty()).unwrap();

        let mut file = tar::Header::new_gnu();
        file.set_entry_type(EntryType::Regular);
        file.set_size(5);
        file.set_mode(0o644);
        builder.append_data(&mut file, "b/c.txt", &b"world"[..]).unwrap();
        let bytes = builder.into_inner().unwrap();

        let mut reader = ArchiveReader::new(&bytes[..]);
        let mut entries = reader.entries()?;
        let first = entries.next().expect("one file")?;
        assert_eq!(first.entry().path, PathBuf::from("b/c.txt"));
        drop(first);
        assert!(entries.next().is_none());
        assert_eq!(entries.skipped(), 1);
        Ok(())
    }

    #[test]
    fn test_truncated_content_is_corrupt() {
        let bytes = archive_of(&[("db.store", &[1u8; 10_000])]);
        let truncated = &bytes[..512 + 5_000];

        let err = read_all(truncated).unwrap_err();
        assert_eq!(err.kind(), "ArchiveCorrupt");
    }

    #[test]
    fn test_partial_header_is_corrupt() {
        let bytes = archive_of(&[("a.txt", b"hello")]);
        let err = read_all(&bytes[..100]).unwrap_err();
        assert_eq!(err.kind(), "ArchiveCorrupt");
    }

    #[test]
    fn test_bad_checksum_is_corrupt() {
        let mut bytes = archive_of(&[("a.txt", b"hello")]);
        bytes[0] = b'z';
        let err = read_all(&bytes).unwrap_err();
        assert_eq!(err.kind(), "ArchiveCorrupt");
    }

    #[test]
    fn test_missing_terminator_is_corrupt() {
        let bytes = archive_of(&[("a.txt", b"hello"), ("b.txt", b"world")]);
        let err = read_all(&bytes[..1024]).unwrap_err();
        assert_eq!(err.kind(), "ArchiveCorrupt");
    }

    #[test]
    fn test_file_type_bits_are_masked() -> Result<()> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_size(2);
        header.set_mode(0o100644);
        builder.append_data(&mut header, "legacy.db", &b"ok"[..]).unwrap();
        let bytes = builder.into_inner().unwrap();

        let decoded = read_all(&bytes)?;
        assert_eq!(decoded[0].0.mode, 0o644);
        Ok(())
    }
}
