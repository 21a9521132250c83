//! Configuration management for hot-backup.
//!
//! Loads configuration from an optional TOML file; the CLI layers environment
//! variables and flags on top.

use crate::compress::Codec;
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Smallest part S3 accepts for any but the last part of a multipart upload.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub backup: BackupConfig,
    pub log: LogConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Object store domain, or a full endpoint URL
    pub domain: String,

    /// Signing region
    pub region: String,

    /// Bucket holding the snapshots
    pub bucket: String,

    /// Key prefix under which snapshots are stored
    pub base_dir: String,

    pub access_key: Option<String>,

    pub secret_key: Option<String>,

    /// Multipart upload part size in bytes (default: 8MB)
    pub part_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Local directory to back up, and default restore destination
    pub dir: PathBuf,

    /// Compression codec (snappy, zstd)
    pub compression: Codec,

    /// Compression level (1-22 for zstd, ignored for snappy)
    pub compression_level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            domain: "s3-eu-west-1.amazonaws.com".to_string(),
            region: "eu-west-1".to_string(),
            bucket: "com.ft.coco-neo4j-backup".to_string(),
            base_dir: "/backups/".to_string(),
            access_key: None,
            secret_key: None,
            part_size: 8 * 1024 * 1024,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/backup"),
            compression: Codec::Snappy,
            compression_level: 3,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("domain", &self.domain)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("base_dir", &self.base_dir)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("part_size", &self.part_size)
            .finish()
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(BackupError::Config("bucket name is empty".into()));
        }
        if self.domain.is_empty() {
            return Err(BackupError::Config("object store domain is empty".into()));
        }
        if self.part_size < MIN_PART_SIZE {
            return Err(BackupError::Config(format!(
                "part size {} is below the {} byte minimum",
                self.part_size, MIN_PART_SIZE
            )));
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(BackupError::Config(
                "access key and secret key must be given together".into(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
