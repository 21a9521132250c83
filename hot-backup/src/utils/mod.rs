//! Utility modules shared by the pipelines and the CLI.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result};
