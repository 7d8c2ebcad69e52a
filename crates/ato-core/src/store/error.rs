//! Error types for the session stores

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during inbox or task store operations
///
/// Deserialization failures are fatal for the operation that hit them —
/// a corrupt store file is unrecoverable at this layer. Write failures
/// propagate to callers; the stores never retry.
#[derive(Error, Debug)]
pub enum StoreError {
    /// File I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse a JSON store file
    #[error("JSON parse error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Could not claim the task directory's `.lock` sentinel
    #[error("Failed to claim task directory lock at {path}: {source}")]
    Claim {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A non-JSON bookkeeping file (e.g. `.highwatermark`) holds garbage
    #[error("Corrupt store file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.into(),
            source,
        }
    }
}
