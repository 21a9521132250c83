//! Stream adapters shared by the backup and restore pipelines.

pub mod progress;

use crate::utils::errors::BackupError;
use std::io::{self, Read, Write};
use tokio_util::sync::CancellationToken;

/// Counts the bytes passing through a reader or writer.
pub struct Metered<T> {
    inner: T,
    bytes: u64,
}

impl<T> Metered<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, bytes: 0 }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<W: Write> Write for Metered<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<R: Read> Read for Metered<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }
}

/// Fails every read with `Cancelled` once the token fires.
pub struct Cancellable<R> {
    inner: R,
    token: CancellationToken,
}

impl<R> Cancellable<R> {
    pub fn new(inner: R, token: CancellationToken) -> Self {
        Self { inner, token }
    }
}

impl<R: Read> Read for Cancellable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.token.is_cancelled() {
            return Err(BackupError::Cancelled.into_io());
        }
        self.inner.read(buf)
    }
}
