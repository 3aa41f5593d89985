//! Upload metadata storage.
//!
//! Each upload has one record holding its original filename, its delete
//! token and its expiry. Records expire on their own; expired identifiers
//! stay visible through [`MetadataStore::take_expired`] so their blobs can
//! be swept.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::id::UploadId;

pub use memory::MemoryMetadataStore;
pub use redis_store::RedisMetadataStore;

/// Metadata kept for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    /// Original display name supplied by the uploader.
    pub filename: String,
    /// Credential authorizing a non-forced delete.
    pub delete_token: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

impl UploadRecord {
    /// Seconds between creation and expiry, never negative.
    pub fn ttl_secs(&self) -> i64 {
        (self.expires - self.created).num_seconds().max(0)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

/// Metadata store backend trait.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace the record for `id`, expiring at `record.expires`.
    async fn put(&self, id: &UploadId, record: &UploadRecord) -> Result<()>;

    /// Fetch the full record.
    async fn get(&self, id: &UploadId) -> Result<UploadRecord>;

    /// Fetch the original filename.
    async fn get_filename(&self, id: &UploadId) -> Result<String>;

    /// Fetch the stored delete token.
    async fn get_delete_token(&self, id: &UploadId) -> Result<String>;

    /// Remove the record. Removing a missing record is not an error.
    async fn remove(&self, id: &UploadId) -> Result<()>;

    /// Claim up to `limit` identifiers whose records expired at or before `now`.
    ///
    /// Claimed identifiers are dropped from the expiry index, so each one is
    /// returned once.
    async fn take_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Release the store's connection. Later calls fail.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Short name used in logs.
    fn kind(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_record_ttl_and_expiry() {
        let created = Utc::now();
        let record = UploadRecord {
            filename: "photo.png".to_string(),
            delete_token: "t".to_string(),
            created,
            expires: created + Duration::seconds(90),
        };

        assert_eq!(record.ttl_secs(), 90);
        assert!(!record.is_expired_at(created));
        assert!(record.is_expired_at(created + Duration::seconds(90)));
    }

    #[test]
    fn test_record_ttl_never_negative() {
        let created = Utc::now();
        let record = UploadRecord {
            filename: "a".to_string(),
            delete_token: "t".to_string(),
            created,
            expires: created - Duration::seconds(5),
        };
        assert_eq!(record.ttl_secs(), 0);
    }
}
