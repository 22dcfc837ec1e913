//! Error types for storage operations

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the storage engine
#[derive(Error, Debug)]
pub enum StoreError {
    /// Identifier contains path separators, `..`, or disallowed characters
    #[error("unsafe identifier: {value:?}")]
    UnsafeIdentifier { value: String },

    /// Envelope or event failed schema validation
    #[error("schema violation: {reason}")]
    Schema { reason: String },

    /// Message type is not in the enumerated set
    #[error("unknown message type: {value:?}")]
    UnknownType { value: String },

    /// Failed to acquire file lock after multiple retries
    #[error("failed to acquire lock on {path} after {retries} retries")]
    LockTimeout { path: PathBuf, retries: u32 },

    /// File I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to encode or decode JSON
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A referenced message, agent, or task does not exist
    #[error("{what} not found")]
    NotFound { what: String },

    /// Missing team directory or unusable data root
    #[error("bootstrap error: {reason}")]
    Bootstrap { reason: String },
}

impl StoreError {
    /// Configuration/bootstrap errors exit with code 2; everything else is an
    /// operational error (exit 1).
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            StoreError::UnsafeIdentifier { .. }
                | StoreError::Schema { .. }
                | StoreError::UnknownType { .. }
                | StoreError::Bootstrap { .. }
        )
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.into(),
            source,
        }
    }
}
