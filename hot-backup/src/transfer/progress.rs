//! Throughput tracking for long-running pipelines.
//!
//! The pipelines run on a blocking thread without a progress consumer, so
//! progress is reported by logging a line at most once per interval.

use std::time::{Duration, Instant};
use tracing::info;

/// Progress of a running pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Files processed so far
    pub files: u64,

    /// Uncompressed bytes processed so far
    pub bytes: u64,

    /// Throughput since the previous report, in bytes/second
    pub bytes_per_second: u64,
}

/// Progress tracker with time-based speed calculation
pub struct ProgressTracker {
    operation: &'static str,
    last_report: Instant,
    last_bytes: u64,
    interval: Duration,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(operation: &'static str, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            operation,
            last_report: now,
            last_bytes: 0,
            interval,
            progress: TransferProgress {
                files: 0,
                bytes: 0,
                bytes_per_second: 0,
            },
        }
    }

    /// Count one finished file; returns a snapshot when a report is due.
    pub fn record_file(&mut self, size: u64) -> Option<TransferProgress> {
        self.progress.files += 1;
        self.progress.bytes += size;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_report);
        if elapsed < self.interval {
            return None;
        }

        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            let bytes_diff = self.progress.bytes.saturating_sub(self.last_bytes);
            self.progress.bytes_per_second = (bytes_diff as f64 / secs) as u64;
        }
        self.last_report = now;
        self.last_bytes = self.progress.bytes;
        Some(self.progress)
    }

    /// `record_file`, logging the report if one is due.
    pub fn record_and_log(&mut self, size: u64) {
        if let Some(progress) = self.record_file(size) {
            info!(
                "{}: {} files, {} ({})",
                self.operation,
                progress.files,
                format_bytes(progress.bytes),
                format_speed(progress.bytes_per_second)
            );
        }
    }

    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }
}

/// Bytes per second over `elapsed`; zero for an instant run.
pub fn average_speed(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / secs) as u64
    } else {
        0
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format a duration as e.g. `1m 30s`; sub-minute runs keep millisecond detail.
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_tracker_counts_files() {
        let mut tracker = ProgressTracker::new("Backup", Duration::from_secs(3600));
        assert!(tracker.record_file(100).is_none());
        assert!(tracker.record_file(400).is_none());

        assert_eq!(tracker.progress().files, 2);
        assert_eq!(tracker.progress().bytes, 500);
    }

    #[test]
    fn test_tracker_reports_after_interval() {
        let mut tracker = ProgressTracker::new("Restore", Duration::from_millis(50));
        tracker.record_file(10);

        thread::sleep(Duration::from_millis(100));
        let progress = tracker.record_file(1000).expect("report due");
        assert_eq!(progress.files, 2);
        assert!(progress.bytes_per_second > 0);

        assert!(tracker.record_file(1).is_none());
    }

    #[test]
    fn test_average_speed() {
        assert_eq!(average_speed(2048, Duration::from_secs(2)), 1024);
        assert_eq!(average_speed(2048, Duration::ZERO), 0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1024), "1.00 KB/s");
        assert_eq!(format_speed(1024 * 1024), "1.00 MB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(2500)), "2.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m");
    }
}
