//! Upload storage.
//!
//! One facade, [`Storage`], over a local-filesystem or S3 blob backend,
//! with filenames, delete tokens and expiry kept in Redis.

pub mod backend;
pub mod config;
pub mod error;
pub mod id;
pub mod metadata;
pub mod shortener;
pub mod storage;

pub use backend::{BlobBackend, BlobReader, LocalBlobBackend};
#[cfg(feature = "s3")]
pub use backend::S3BlobBackend;
pub use config::Config;
pub use error::{Result, StorageError};
pub use id::UploadId;
pub use metadata::{MemoryMetadataStore, MetadataStore, RedisMetadataStore, UploadRecord};
pub use shortener::{BitlyShortener, UrlShortener};
pub use storage::{HealthReport, Storage, StorageBuilder, StoredUpload, SweepReport, SweeperHandle};
