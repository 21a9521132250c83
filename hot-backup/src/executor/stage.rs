//! Pipeline stages.
//!
//! Both pipelines only move forward: a stage is never re-entered and nothing
//! is retried, so the stage a failure happened in identifies the failing
//! component.

use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackupStage {
    Idle,
    Walking,
    Streaming,
    Finalizing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RestoreStage {
    Idle,
    Fetching,
    Streaming,
    Writing,
    Done,
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackupStage::Idle => "idle",
            BackupStage::Walking => "walking",
            BackupStage::Streaming => "streaming",
            BackupStage::Finalizing => "finalizing",
            BackupStage::Done => "done",
        })
    }
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RestoreStage::Idle => "idle",
            RestoreStage::Fetching => "fetching",
            RestoreStage::Streaming => "streaming",
            RestoreStage::Writing => "writing",
            RestoreStage::Done => "done",
        })
    }
}

/// Current stage of one pipeline run.
pub(crate) struct StageTracker<S> {
    operation: &'static str,
    current: S,
}

impl<S: Copy + Ord + fmt::Display> StageTracker<S> {
    pub(crate) fn new(operation: &'static str, initial: S) -> Self {
        Self {
            operation,
            current: initial,
        }
    }

    pub(crate) fn current(&self) -> S {
        self.current
    }

    /// Move to `next`. Moving backwards or staying put is refused.
    pub(crate) fn advance(&mut self, next: S) -> bool {
        if next <= self.current {
            warn!(
                "{}: refusing stage transition {} -> {}",
                self.operation, self.current, next
            );
            return false;
        }
        debug!("{}: {} -> {}", self.operation, self.current, next);
        self.current = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let mut stages = StageTracker::new("backup", BackupStage::Idle);
        assert!(stages.advance(BackupStage::Walking));
        assert!(stages.advance(BackupStage::Streaming));
        assert!(stages.advance(BackupStage::Finalizing));
        assert!(stages.advance(BackupStage::Done));
        assert_eq!(stages.current(), BackupStage::Done);
    }

    #[test]
    fn test_no_stage_is_reentered() {
        let mut stages = StageTracker::new("restore", RestoreStage::Idle);
        assert!(stages.advance(RestoreStage::Streaming));
        assert!(!stages.advance(RestoreStage::Streaming));
        assert!(!stages.advance(RestoreStage::Fetching));
        assert_eq!(stages.current(), RestoreStage::Streaming);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(BackupStage::Finalizing.to_string(), "finalizing");
        assert_eq!(RestoreStage::Fetching.to_string(), "fetching");
    }
}
