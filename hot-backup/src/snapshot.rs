//! Snapshot identifiers and their object keys.
//!
//! A snapshot is named after its UTC capture time at one-second resolution,
//! formatted so that names sort lexically in capture order.

use crate::compress::Codec;
use crate::utils::errors::{BackupError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// `chrono` format of snapshot names, e.g. `2016-09-14T17-03-59`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Self(time.format(TIMESTAMP_FORMAT).to_string())
    }

    /// Accept only canonical names: zero-padded fields, nothing trailing.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = || {
            BackupError::Config(format!(
                "invalid snapshot '{name}': expected UTC timestamp like 2016-09-14T17-03-59"
            ))
        };

        let parsed = NaiveDateTime::parse_from_str(name, TIMESTAMP_FORMAT).map_err(|_| invalid())?;
        let id = Self::at(parsed.and_utc());
        if id.0 != name {
            return Err(invalid());
        }
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.0, TIMESTAMP_FORMAT)
            .ok()
            .map(|t| t.and_utc())
    }

    /// Remote key: `{base_dir}/{id}.tar.{ext}`.
    ///
    /// Leading and trailing slashes of `base_dir` are dropped; an empty base
    /// directory puts the snapshot at the bucket root.
    pub fn object_key(&self, base_dir: &str, codec: Codec) -> String {
        let file = format!("{}.tar.{}", self.0, codec.extension());
        match base_dir.trim_matches('/') {
            "" => file,
            dir => format!("{dir}/{file}"),
        }
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SnapshotId {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
