//! Restore pipeline: transport source → decompressor → tar decoder → files.

use super::stage::{RestoreStage, StageTracker};
use super::{PipelineSettings, RestoreReport, REPORT_INTERVAL};
use crate::archive::ArchiveReader;
use crate::compress::Decompressor;
use crate::fs::RestoreTarget;
use crate::snapshot::SnapshotId;
use crate::transfer::progress::{format_bytes, ProgressTracker};
use crate::transfer::Cancellable;
use crate::transport::{Transport, TransportReader};
use crate::utils::errors::{BackupError, Result};
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub(super) fn run<T: Transport + ?Sized>(
    transport: &T,
    settings: &PipelineSettings,
    cancel: &CancellationToken,
    snapshot: &SnapshotId,
    dest: &Path,
    stages: &mut StageTracker<RestoreStage>,
) -> Result<RestoreReport> {
    let start_time = Instant::now();
    let key = snapshot.object_key(&settings.base_dir, settings.codec);

    stages.advance(RestoreStage::Fetching);
    let (source, metadata) = transport.open_read(&settings.bucket, &key)?;
    info!(
        "Restoring {}/{} ({}) into {}",
        settings.bucket,
        key,
        metadata
            .content_length
            .map_or_else(|| "unknown size".to_string(), format_bytes),
        dest.display()
    );

    stages.advance(RestoreStage::Streaming);
    let source = Cancellable::new(TransportReader::new(source, &key), cancel.clone());
    let decompressor = Decompressor::new(settings.codec, source)
        .map_err(|e| BackupError::from_io(e, |e| BackupError::Compression(e.to_string())))?;
    let mut archive = ArchiveReader::new(decompressor);
    let target = RestoreTarget::create(dest)?;
    let mut entries = archive.entries()?;

    stages.advance(RestoreStage::Writing);
    let mut progress = ProgressTracker::new("Restore", REPORT_INTERVAL);
    let mut files = 0u64;
    let mut bytes = 0u64;

    for decoded in entries.by_ref() {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        let mut decoded = decoded?;
        let entry = decoded.entry().clone();

        let written = target.write_file(&entry, &mut decoded)?;
        debug!("Restored {} ({} bytes)", entry.path.display(), written);

        files += 1;
        bytes += written;
        progress.record_and_log(written);
    }
    let skipped = entries.skipped();

    stages.advance(RestoreStage::Done);
    Ok(RestoreReport {
        key,
        files,
        bytes,
        skipped,
        duration: start_time.elapsed(),
    })
}
