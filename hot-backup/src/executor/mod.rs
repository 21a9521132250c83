//! Backup and restore executor - runs one pipeline per call.
//!
//! The archive and compression stages are synchronous `std::io` code, so each
//! run happens on a blocking thread; the async entry points hand the work to
//! `tokio::task::spawn_blocking`. Runs are cancelled through the executor's
//! `CancellationToken`, which is checked before every file and on every
//! content read.

mod backup;
mod restore;
pub mod stage;

use crate::compress::Codec;
use crate::config::Config;
use crate::snapshot::SnapshotId;
use crate::transfer::progress::{average_speed, format_bytes, format_duration, format_speed};
use crate::transport::Transport;
use crate::utils::errors::{BackupError, Result};
use stage::{BackupStage, RestoreStage, StageTracker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How often a running pipeline logs its throughput.
const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Where snapshots go and how they are encoded.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub bucket: String,
    pub base_dir: String,
    pub codec: Codec,
    pub compression_level: i32,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bucket: config.store.bucket.clone(),
            base_dir: config.store.base_dir.clone(),
            codec: config.backup.compression,
            compression_level: config.backup.compression_level,
        }
    }
}

/// Backup execution result
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub snapshot: SnapshotId,
    pub key: String,
    pub files: u64,
    /// Uncompressed content bytes
    pub bytes: u64,
    /// Bytes handed to the transport
    pub compressed_bytes: u64,
    pub duration: Duration,
}

/// Restore execution result
#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub key: String,
    pub files: u64,
    pub bytes: u64,
    /// Non-file entries passed over
    pub skipped: u64,
    pub duration: Duration,
}

pub struct Executor<T: Transport + ?Sized> {
    transport: Arc<T>,
    settings: Arc<PipelineSettings>,
    cancel_token: CancellationToken,
}

impl<T: Transport + ?Sized> Clone for Executor<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            settings: Arc::clone(&self.settings),
            cancel_token: self.cancel_token.clone(),
        }
    }
}

impl<T: Transport + ?Sized + 'static> Executor<T> {
    /// Create an executor with its own cancellation token
    pub fn new(transport: Arc<T>, settings: PipelineSettings) -> Self {
        Self::with_cancel(transport, settings, CancellationToken::new())
    }

    /// Create an executor cancelled through `cancel_token`
    pub fn with_cancel(
        transport: Arc<T>,
        settings: PipelineSettings,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            transport,
            settings: Arc::new(settings),
            cancel_token,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Back up `dir` as a snapshot named after the current time.
    pub fn backup_blocking(&self, dir: &Path) -> Result<BackupReport> {
        self.backup_as(dir, SnapshotId::now())
    }

    /// Back up `dir` under an explicit snapshot id.
    pub fn backup_as(&self, dir: &Path, snapshot: SnapshotId) -> Result<BackupReport> {
        let mut stages = StageTracker::new("backup", BackupStage::Idle);
        let result = backup::run(
            self.transport.as_ref(),
            &self.settings,
            &self.cancel_token,
            dir,
            snapshot,
            &mut stages,
        );

        match &result {
            Ok(report) => info!(
                "Backup {} completed: {} files, {} compressed to {}, {} ({})",
                report.snapshot,
                report.files,
                format_bytes(report.bytes),
                format_bytes(report.compressed_bytes),
                format_duration(report.duration),
                format_speed(average_speed(report.bytes, report.duration))
            ),
            Err(e) => warn!(
                "Backup of {} failed while {}: {} ({})",
                dir.display(),
                stages.current(),
                e,
                e.kind()
            ),
        }
        result
    }

    /// Restore `snapshot` into `dest`, creating it if needed.
    pub fn restore_blocking(&self, snapshot: &SnapshotId, dest: &Path) -> Result<RestoreReport> {
        let mut stages = StageTracker::new("restore", RestoreStage::Idle);
        let result = restore::run(
            self.transport.as_ref(),
            &self.settings,
            &self.cancel_token,
            snapshot,
            dest,
            &mut stages,
        );

        match &result {
            Ok(report) => info!(
                "Restore of {} completed: {} files, {} ({} entries skipped), {} ({})",
                snapshot,
                report.files,
                format_bytes(report.bytes),
                report.skipped,
                format_duration(report.duration),
                format_speed(average_speed(report.bytes, report.duration))
            ),
            Err(e) => warn!(
                "Restore of {} failed while {}: {} ({})",
                snapshot,
                stages.current(),
                e,
                e.kind()
            ),
        }
        result
    }

    /// Run [`Executor::backup_blocking`] on the blocking pool.
    pub async fn backup(&self, dir: PathBuf) -> Result<BackupReport> {
        let executor = self.clone();
        tokio::task::spawn_blocking(move || executor.backup_blocking(&dir))
            .await
            .map_err(join_error)?
    }

    /// Run [`Executor::restore_blocking`] on the blocking pool.
    pub async fn restore(&self, snapshot: SnapshotId, dest: PathBuf) -> Result<RestoreReport> {
        let executor = self.clone();
        tokio::task::spawn_blocking(move || executor.restore_blocking(&snapshot, &dest))
            .await
            .map_err(join_error)?
    }
}

fn join_error(err: JoinError) -> BackupError {
    if err.is_panic() {
        std::panic::resume_unwind(err.into_panic());
    }
    BackupError::Cancelled
}
