//! Local filesystem stages: walking the backup root and writing restored files.

pub mod metadata;
pub mod restore;
pub mod walker;

pub use restore::RestoreTarget;
pub use walker::{walk_files, FileInfo, FileWalker};
