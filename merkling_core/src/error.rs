//! Error types for merkling_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using merkling_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during an ingestion run.
#[derive(Error, Debug)]
pub enum Error {
    /// A declared source file could not be opened or read while hashing.
    ///
    /// This is the one fatal condition in the core: an unreadable input
    /// means the ingestion root is inconsistent and no partial result is
    /// meaningful. Callers are expected to abort the run on it.
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// I/O error occurred during pool or metadata operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Invalid content identifier format or encoding.
    #[error("Invalid identifier: {reason}")]
    InvalidId { reason: String },

    /// Metadata tree could not be encoded or decoded.
    #[error("Invalid metadata: {reason}")]
    InvalidMeta { reason: String },

    /// Configuration file could not be parsed.
    #[error("Invalid config at {path}: {reason}")]
    InvalidConfig { path: PathBuf, reason: String },

    /// Directory entry cannot be represented in the metadata tree.
    #[error("Invalid entry: {reason}")]
    InvalidEntry { reason: String },
}

impl Error {
    /// Create an Unreadable error.
    pub fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Unreadable {
            path: path.into(),
            source,
        }
    }

    /// Create an InvalidId error.
    pub fn invalid_id(reason: impl Into<String>) -> Self {
        Error::InvalidId {
            reason: reason.into(),
        }
    }

    /// Create an InvalidMeta error.
    pub fn invalid_meta(reason: impl Into<String>) -> Self {
        Error::InvalidMeta {
            reason: reason.into(),
        }
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidEntry error.
    pub fn invalid_entry(reason: impl Into<String>) -> Self {
        Error::InvalidEntry {
            reason: reason.into(),
        }
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}
