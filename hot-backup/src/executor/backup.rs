//! Backup pipeline: walker → tar encoder → compressor → transport sink.

use super::stage::{BackupStage, StageTracker};
use super::{BackupReport, PipelineSettings, REPORT_INTERVAL};
use crate::archive::{ArchiveEntry, ArchiveWriter};
use crate::compress::Compressor;
use crate::fs::walk_files;
use crate::snapshot::SnapshotId;
use crate::transfer::progress::ProgressTracker;
use crate::transfer::{Cancellable, Metered};
use crate::transport::{Transport, TransportWriter};
use crate::utils::errors::{BackupError, Result};
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub(super) fn run<T: Transport + ?Sized>(
    transport: &T,
    settings: &PipelineSettings,
    cancel: &CancellationToken,
    dir: &Path,
    snapshot: SnapshotId,
    stages: &mut StageTracker<BackupStage>,
) -> Result<BackupReport> {
    let start_time = Instant::now();

    stages.advance(BackupStage::Walking);
    let walker = walk_files(dir)?;
    let key = snapshot.object_key(&settings.base_dir, settings.codec);

    stages.advance(BackupStage::Streaming);
    info!(
        "Backing up {} to {}/{} ({})",
        dir.display(),
        settings.bucket,
        key,
        settings.codec
    );
    let sink = TransportWriter::new(transport.open_write(&settings.bucket, &key)?, &key);
    let compressor = Compressor::new(settings.codec, settings.compression_level, Metered::new(sink))
        .map_err(|e| BackupError::from_io(e, |e| BackupError::Compression(e.to_string())))?;
    let mut archive = ArchiveWriter::new(compressor);
    let mut progress = ProgressTracker::new("Backup", REPORT_INTERVAL);

    for file in walker {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        let file = file?;

        let content = File::open(&file.path).map_err(|e| BackupError::io(&file.path, e))?;
        let entry = ArchiveEntry {
            path: file.relative_path,
            mode: file.metadata.mode,
            size: file.metadata.size,
            mtime: file.metadata.modified,
        };
        archive
            .append(&entry, Cancellable::new(content, cancel.clone()))
            .map_err(|e| BackupError::from_io(e, |source| BackupError::io(&file.path, source)))?;

        debug!("Archived {} ({} bytes)", entry.path.display(), entry.size);
        progress.record_and_log(entry.size);
    }

    stages.advance(BackupStage::Finalizing);
    let files = archive.entries();
    let bytes = archive.bytes();
    let compressor = archive
        .finish()
        .map_err(|e| BackupError::from_io(e, |e| BackupError::ArchiveCorrupt(e.to_string())))?;
    let metered = compressor
        .finish()
        .map_err(|e| BackupError::from_io(e, |e| BackupError::Compression(e.to_string())))?;
    let compressed_bytes = metered.bytes();
    metered.into_inner().commit()?;

    stages.advance(BackupStage::Done);
    Ok(BackupReport {
        snapshot,
        key,
        files,
        bytes,
        compressed_bytes,
        duration: start_time.elapsed(),
    })
}
