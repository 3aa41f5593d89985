//! In-process metadata store.
//!
//! Used for single-node development and tests. Expired records read as
//! missing but stay in the map until claimed by `take_expired`, matching
//! the expiry index the Redis store keeps.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{MetadataStore, UploadRecord};
use crate::error::{Result, StorageError};
use crate::id::UploadId;

/// Metadata store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    records: Mutex<HashMap<String, UploadRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held, including expired ones not yet claimed.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn live(&self, id: &UploadId) -> Result<UploadRecord> {
        let records = self.records.lock();
        records
            .get(id.as_str())
            .filter(|record| !record.is_expired_at(Utc::now()))
            .cloned()
            .ok_or_else(|| StorageError::not_found(id.as_str()))
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn put(&self, id: &UploadId, record: &UploadRecord) -> Result<()> {
        self.records
            .lock()
            .insert(id.as_str().to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &UploadId) -> Result<UploadRecord> {
        self.live(id)
    }

    async fn get_filename(&self, id: &UploadId) -> Result<String> {
        self.live(id).map(|record| record.filename)
    }

    async fn get_delete_token(&self, id: &UploadId) -> Result<String> {
        self.live(id).map(|record| record.delete_token)
    }

    async fn remove(&self, id: &UploadId) -> Result<()> {
        self.records.lock().remove(id.as_str());
        Ok(())
    }

    async fn take_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        let mut records = self.records.lock();

        let mut expired: Vec<(DateTime<Utc>, String)> = records
            .iter()
            .filter(|(_, record)| record.is_expired_at(now))
            .map(|(id, record)| (record.expires, id.clone()))
            .collect();
        // Oldest first, like ZRANGEBYSCORE.
        expired.sort();
        expired.truncate(limit);

        Ok(expired
            .into_iter()
            .map(|(_, id)| {
                records.remove(&id);
                id
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
