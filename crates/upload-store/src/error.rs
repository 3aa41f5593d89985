//! Storage error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors returned by the storage facade, its backends and the metadata store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No metadata record, file or object exists for the identifier.
    #[error("upload not found: {id}")]
    NotFound { id: String },

    /// The delete token did not match, or no record exists to check it against.
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid upload id: {0}")]
    InvalidId(String),

    /// Local filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The remote backend rejected or failed an upload.
    #[error("upload failed: {0}")]
    Upload(String),

    /// The remote backend failed to delete an object.
    #[error("delete failed: {0}")]
    Delete(String),

    #[error("metadata store error: {0}")]
    Metadata(String),

    #[error("url shortener error: {0}")]
    Shortener(String),

    /// A backend or metadata call exceeded the configured request timeout.
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Create a not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Map a filesystem error, turning `ErrorKind::NotFound` into [`StorageError::NotFound`].
    pub fn from_io(id: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::not_found(id)
        } else {
            Self::Io(err)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        Self::Metadata(err.to_string())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        Self::Shortener(err.to_string())
    }
}

/// Result type alias using StorageError.
pub type Result<T> = std::result::Result<T, StorageError>;
