//! Object transport: where snapshot streams are written to and read from.
//!
//! Both directions are synchronous `std::io` streams so they can sit at the
//! end of the blocking pipeline. A write is not visible under its key until
//! the sink is committed; dropping an uncommitted sink abandons the object.

pub mod fixture;
pub mod s3;

pub use fixture::FixtureTransport;
pub use s3::S3Transport;

use crate::utils::errors::{tag_io, BackupError, Result};
use std::io::{self, Read, Write};

/// What the store reports about an object opened for reading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_length: Option<u64>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Write half of an upload.
pub trait ObjectSink: Write + Send {
    /// Make the written bytes visible under the key.
    fn commit(self: Box<Self>) -> Result<()>;
}

pub trait Transport: Send + Sync {
    /// Start writing `key`. Nothing is visible until the sink is committed.
    fn open_write(&self, bucket: &str, key: &str) -> Result<Box<dyn ObjectSink>>;

    /// Open `key` for streaming. A missing key is `NotFound`.
    fn open_read(&self, bucket: &str, key: &str)
        -> Result<(Box<dyn Read + Send>, ObjectMetadata)>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn open_write(&self, bucket: &str, key: &str) -> Result<Box<dyn ObjectSink>> {
        (**self).open_write(bucket, key)
    }

    fn open_read(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(Box<dyn Read + Send>, ObjectMetadata)> {
        (**self).open_read(bucket, key)
    }
}

fn transport_error(key: &str, err: io::Error) -> io::Error {
    tag_io(err, |e| BackupError::Transport {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Tags untagged errors of a transport's read stream as `Transport`.
pub struct TransportReader {
    inner: Box<dyn Read + Send>,
    key: String,
}

impl TransportReader {
    pub fn new(inner: Box<dyn Read + Send>, key: &str) -> Self {
        Self {
            inner,
            key: key.to_string(),
        }
    }
}

impl Read for TransportReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner
            .read(buf)
            .map_err(|e| transport_error(&self.key, e))
    }
}

/// Tags untagged errors of a sink as `Transport`.
pub struct TransportWriter {
    inner: Box<dyn ObjectSink>,
    key: String,
}

impl TransportWriter {
    pub fn new(inner: Box<dyn ObjectSink>, key: &str) -> Self {
        Self {
            inner,
            key: key.to_string(),
        }
    }

    pub fn commit(self) -> Result<()> {
        let key = self.key;
        self.inner.commit().map_err(|e| match e {
            BackupError::Io { source, .. } => BackupError::Transport {
                key,
                message: source.to_string(),
            },
            other => other,
        })
    }
}

impl Write for TransportWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .write(buf)
            .map_err(|e| transport_error(&self.key, e))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().map_err(|e| transport_error(&self.key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
        }
    }

    #[test]
    fn test_reader_tags_untagged_errors() {
        let mut reader = TransportReader::new(Box::new(Broken), "backups/x.tar.snappy");
        let err = reader.read(&mut [0u8; 8]).unwrap_err();
        let err = BackupError::from_io(err, |e| BackupError::io("unused", e));
        assert!(
            matches!(err, BackupError::Transport { ref key, .. } if key == "backups/x.tar.snappy")
        );
    }

    #[test]
    fn test_reader_keeps_existing_tag() {
        struct Denied;
        impl Read for Denied {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(BackupError::Auth {
                    key: "k".into(),
                    message: "403".into(),
                }
                .into_io())
            }
        }

        let mut reader = TransportReader::new(Box::new(Denied), "k");
        let err = reader.read(&mut [0u8; 8]).unwrap_err();
        let err = BackupError::from_io(err, |e| BackupError::io("unused", e));
        assert_eq!(err.kind(), "AuthError");
    }
}
