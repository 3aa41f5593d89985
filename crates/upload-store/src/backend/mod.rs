//! Blob storage backends.
//!
//! Provides trait and implementations for storing upload bytes locally or in S3.

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::id::UploadId;

pub use local::LocalBlobBackend;
#[cfg(feature = "s3")]
pub use s3::S3BlobBackend;

/// A one-shot byte stream, read to the end or dropped.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Blob backend trait.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Size in bytes of the stored blob.
    async fn length(&self, id: &UploadId) -> Result<u64>;

    /// Open a fresh stream over the stored blob.
    async fn get(&self, id: &UploadId) -> Result<BlobReader>;

    /// Store the stream under `id`, replacing any previous blob.
    ///
    /// Returns the number of bytes written.
    async fn put(&self, id: &UploadId, data: BlobReader) -> Result<u64>;

    /// Delete the blob. A missing blob is reported as `NotFound`.
    async fn delete(&self, id: &UploadId) -> Result<()>;

    /// Check the backend is usable.
    async fn ping(&self) -> Result<()>;

    /// Get the storage scheme (e.g., "local", "s3").
    fn scheme(&self) -> &'static str;
}
