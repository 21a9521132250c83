//! Hot Backup Library
//!
//! Streams a directory tree into one compressed tar object in S3-compatible
//! storage, and restores such snapshots back onto disk, without staging the
//! archive locally in either direction.

pub mod archive;
pub mod compress;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod snapshot;
pub mod transfer;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use compress::Codec;
pub use config::Config;
pub use executor::{BackupReport, Executor, PipelineSettings, RestoreReport};
pub use snapshot::SnapshotId;
pub use transport::{FixtureTransport, ObjectMetadata, ObjectSink, S3Transport, Transport};
pub use utils::errors::{BackupError, Result};
