//! Filesystem-backed object store.
//!
//! Objects live at `{root}/{bucket}/{key}`. Uploads are staged in a
//! `.partial` file next to the final path and renamed on commit, so a key
//! never holds a half-written object.

use super::{ObjectMetadata, ObjectSink, Transport};
use crate::utils::errors::{BackupError, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct FixtureTransport {
    root: PathBuf,
}

impl FixtureTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Where `bucket/key` is stored on disk.
    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }

    /// Committed object keys of `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        let base = self.root.join(bucket);
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in walkdir::WalkDir::new(&base).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(base.as_path()).to_path_buf();
                BackupError::io(path, io::Error::from(e))
            })?;
            if !entry.file_type().is_file() || is_partial(entry.path()) {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&base) {
                keys.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(keys)
    }
}

fn is_partial(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "partial")
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

impl Transport for FixtureTransport {
    fn open_write(&self, bucket: &str, key: &str) -> Result<Box<dyn ObjectSink>> {
        let target = self.object_path(bucket, key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::io(parent, e))?;
        }

        let partial = partial_path(&target);
        let file = File::create(&partial).map_err(|e| BackupError::io(&partial, e))?;
        debug!("Staging upload of {} at {}", key, partial.display());

        Ok(Box::new(FixtureSink {
            file: Some(BufWriter::new(file)),
            partial,
            target,
        }))
    }

    fn open_read(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(Box<dyn Read + Send>, ObjectMetadata)> {
        let path = self.object_path(bucket, key);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(BackupError::io(&path, e)),
        };

        let meta = file.metadata().map_err(|e| BackupError::io(&path, e))?;
        let metadata = ObjectMetadata {
            content_length: Some(meta.len()),
            etag: None,
            last_modified: None,
        };
        Ok((Box::new(file), metadata))
    }
}

struct FixtureSink {
    file: Option<BufWriter<File>>,
    partial: PathBuf,
    target: PathBuf,
}

impl FixtureSink {
    fn file(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("upload already finished"))
    }
}

impl Write for FixtureSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl ObjectSink for FixtureSink {
    fn commit(mut self: Box<Self>) -> Result<()> {
        let file = self.file.take().ok_or_else(|| {
            BackupError::io(&self.partial, io::Error::other("upload already finished"))
        })?;
        let file = file.into_inner().map_err(|e| {
            let source = io::Error::new(e.error().kind(), e.error().to_string());
            BackupError::io(&self.partial, source)
        })?;
        file.sync_all().map_err(|e| BackupError::io(&self.partial, e))?;
        drop(file);

        fs::rename(&self.partial, &self.target).map_err(|e| BackupError::io(&self.target, e))?;
        debug!("Committed {}", self.target.display());
        Ok(())
    }
}

impl Drop for FixtureSink {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            if let Err(e) = fs::remove_file(&self.partial) {
                warn!("Failed to remove abandoned upload {}: {}", self.partial.display(), e);
            } else {
                debug!("Abandoned upload {}", self.partial.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_commit_makes_object_visible() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let transport = FixtureTransport::new(temp_dir.path());

        let mut sink = transport.open_write("bucket", "backups/one.tar.snappy")?;
        sink.write_all(b"payload").unwrap();
        assert!(transport.keys("bucket")?.is_empty());
        sink.commit()?;

        assert_eq!(transport.keys("bucket")?, vec!["backups/one.tar.snappy"]);
        let (mut reader, metadata) = transport.open_read("bucket", "backups/one.tar.snappy")?;
        let mut body = Vec::new();
        reader.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"payload");
        assert_eq!(metadata.content_length, Some(7));
        Ok(())
    }

    #[test]
    fn test_dropped_sink_leaves_nothing() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let transport = FixtureTransport::new(temp_dir.path());

        let mut sink = transport.open_write("bucket", "x.tar.snappy")?;
        sink.write_all(b"half an archive").unwrap();
        drop(sink);

        assert!(transport.keys("bucket")?.is_empty());
        assert!(!partial_path(&transport.object_path("bucket", "x.tar.snappy")).exists());
        Ok(())
    }

    #[test]
    fn test_missing_object_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let transport = FixtureTransport::new(temp_dir.path());

        let err = transport.open_read("bucket", "nope.tar.snappy").err().unwrap();
        assert!(matches!(err, BackupError::NotFound { ref key, .. } if key == "nope.tar.snappy"));
    }
}
