//! Error taxonomy for the backup and restore pipelines.
//!
//! Stages run behind `std::io::Read`/`Write` adapters, so errors raised deep in
//! the pipeline have to cross layers (tar, codec) that only speak `io::Error`.
//! Each stage tags the errors it originates by boxing a [`BackupError`] inside
//! the `io::Error`; [`BackupError::from_io`] recovers the tag at the top.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Archive corrupt: {0}")]
    ArchiveCorrupt(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Transport error on {key}: {message}")]
    Transport { key: String, message: String },

    #[error("Authentication rejected for {key}: {message}")]
    Auth { key: String, message: String },

    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Path escapes restore root: {}", .0.display())]
    PathTraversal(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, BackupError>;

impl BackupError {
    /// Taxonomy name reported to the operator.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::Io { .. } => "IOError",
            BackupError::ArchiveCorrupt(_) => "ArchiveCorrupt",
            BackupError::Compression(_) => "CompressionError",
            BackupError::Transport { .. } => "TransportError",
            BackupError::Auth { .. } => "AuthError",
            BackupError::NotFound { .. } => "NotFound",
            BackupError::PathTraversal(_) => "PathTraversal",
            BackupError::Config(_) => "ConfigError",
            BackupError::Cancelled => "Cancelled",
        }
    }

    /// Auth and missing-key failures are transport failures surfaced distinctly.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BackupError::Transport { .. } | BackupError::Auth { .. } | BackupError::NotFound { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BackupError::Io {
            path: path.into(),
            source,
        }
    }

    /// Box this error into an `io::Error` so it can cross a `Read`/`Write` boundary.
    pub(crate) fn into_io(self) -> io::Error {
        io::Error::other(self)
    }

    /// Recover a tagged error, or classify an untagged one with `fallback`.
    pub(crate) fn from_io(err: io::Error, fallback: impl FnOnce(io::Error) -> Self) -> Self {
        if !is_tagged(&err) {
            return fallback(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<BackupError>()) {
            Some(Ok(tagged)) => *tagged,
            Some(Err(inner)) => fallback(io::Error::new(kind, inner)),
            None => fallback(io::Error::from(kind)),
        }
    }
}

/// True when `err` already carries a [`BackupError`].
pub(crate) fn is_tagged(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<BackupError>())
}

/// Tag `err` with `tag` unless an inner stage already did.
pub(crate) fn tag_io(err: io::Error, tag: impl FnOnce(io::Error) -> BackupError) -> io::Error {
    if is_tagged(&err) {
        err
    } else {
        tag(err).into_io()
    }
}
