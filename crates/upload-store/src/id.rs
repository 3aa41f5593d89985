//! Upload identifiers.

use std::fmt;

use crate::error::{Result, StorageError};

/// Maximum identifier length in bytes.
pub const MAX_ID_LEN: usize = 256;

/// Caller-chosen key naming one stored blob and its metadata record.
///
/// The same string is used as a file name by the local backend and as an
/// object key by S3, so anything that could escape the storage root is
/// rejected up front.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadId(String);

impl UploadId {
    /// Validate and wrap an identifier.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(StorageError::InvalidId("identifier is empty".to_string()));
        }
        if id.len() > MAX_ID_LEN {
            return Err(StorageError::InvalidId(format!(
                "identifier exceeds {MAX_ID_LEN} bytes"
            )));
        }
        // Leading dots also cover "." and ".." and keep ids clear of the
        // local backend's temporary files.
        if id.starts_with('.') {
            return Err(StorageError::InvalidId(format!(
                "identifier may not start with '.': {id}"
            )));
        }
        if id
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
        {
            return Err(StorageError::InvalidId(format!(
                "identifier contains a path separator or control character: {id:?}"
            )));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UploadId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
