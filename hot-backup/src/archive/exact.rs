//! Exact-length content reader.
//!
//! Tar headers declare a size up front and the decoder finds the next header
//! by trusting it, so content that comes up short or runs long must fail the
//! stream instead of being padded or cut.

use crate::utils::errors::BackupError;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

pub(crate) struct ExactReader<R> {
    inner: R,
    declared: u64,
    remaining: u64,
    path: PathBuf,
}

impl<R: Read> ExactReader<R> {
    pub(crate) fn new(inner: R, declared: u64, path: &Path) -> Self {
        Self {
            inner,
            declared,
            remaining: declared,
            path: path.to_path_buf(),
        }
    }

    fn short(&self) -> io::Error {
        BackupError::ArchiveCorrupt(format!(
            "{}: content ended after {} of {} declared bytes",
            self.path.display(),
            self.declared - self.remaining,
            self.declared
        ))
        .into_io()
    }

    fn long(&self) -> io::Error {
        BackupError::ArchiveCorrupt(format!(
            "{}: content continues past {} declared bytes",
            self.path.display(),
            self.declared
        ))
        .into_io()
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.remaining == 0 {
            let mut probe = [0u8; 1];
            return match self.inner.read(&mut probe)? {
                0 => Ok(0),
                _ => Err(self.long()),
            };
        }

        let limit = usize::try_from(self.remaining)
            .unwrap_or(usize::MAX)
            .min(buf.len());
        let n = self.inner.read(&mut buf[..limit])?;
        if n == 0 {
            return Err(self.short());
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(declared: u64, data: &[u8]) -> Result<Vec<u8>, BackupError> {
        let mut reader = ExactReader::new(data, declared, Path::new("f"));
        let mut out = Vec::new();
        reader
            .read_to_end(&mut out)
            .map_err(|e| BackupError::from_io(e, |s| BackupError::io("f", s)))?;
        Ok(out)
    }

    #[test]
    fn test_exact_length() {
        assert_eq!(drain(5, b"hello").unwrap(), b"hello");
        assert_eq!(drain(0, b"").unwrap(), b"");
    }

    #[test]
    fn test_short_content() {
        let err = drain(10, b"hello").unwrap_err();
        assert!(matches!(err, BackupError::ArchiveCorrupt(ref m) if m.contains("5 of 10")));
    }

    #[test]
    fn test_long_content() {
        let err = drain(3, b"hello").unwrap_err();
        assert!(matches!(err, BackupError::ArchiveCorrupt(ref m) if m.contains("past 3")));
    }
}
