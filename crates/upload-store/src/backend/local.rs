//! Local filesystem backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{BlobBackend, BlobReader};
use crate::error::{Result, StorageError};
use crate::id::UploadId;

/// Stores each upload as `<root>/<id>`.
pub struct LocalBlobBackend {
    root: PathBuf,
}

impl LocalBlobBackend {
    /// Create a backend rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, id: &UploadId) -> PathBuf {
        // UploadId rejects separators and leading dots, so this stays inside root.
        self.root.join(id.as_str())
    }

    /// Hidden sibling the upload is streamed into before the rename.
    fn partial_path(&self, id: &UploadId) -> PathBuf {
        let suffix = hex::encode(rand::random::<[u8; 4]>());
        self.root.join(format!(".{id}.{suffix}.part"))
    }

    async fn write_partial(&self, path: &Path, mut data: BlobReader) -> std::io::Result<u64> {
        let mut file = fs::File::create(path).await?;
        let written = tokio::io::copy(&mut data, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl BlobBackend for LocalBlobBackend {
    async fn length(&self, id: &UploadId) -> Result<u64> {
        let metadata = fs::metadata(self.path(id))
            .await
            .map_err(|e| StorageError::from_io(id.as_str(), e))?;

        if !metadata.is_file() {
            return Err(StorageError::not_found(id.as_str()));
        }

        Ok(metadata.len())
    }

    async fn get(&self, id: &UploadId) -> Result<BlobReader> {
        let file = fs::File::open(self.path(id))
            .await
            .map_err(|e| StorageError::from_io(id.as_str(), e))?;

        // Directories open fine on unix and only fail on the first read.
        if !file.metadata().await?.is_file() {
            return Err(StorageError::not_found(id.as_str()));
        }

        debug!(id = %id, "file opened");
        Ok(Box::pin(file))
    }

    async fn put(&self, id: &UploadId, data: BlobReader) -> Result<u64> {
        fs::create_dir_all(&self.root).await?;

        let partial = self.partial_path(id);
        let written = match self.write_partial(&partial, data).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    warn!(error = %cleanup, path = ?partial, "failed to remove partial upload");
                }
                return Err(StorageError::Io(e));
            }
        };

        let path = self.path(id);
        fs::rename(&partial, &path).await?;

        debug!(id = %id, path = ?path, size = written, "file written");
        Ok(written)
    }

    async fn delete(&self, id: &UploadId) -> Result<()> {
        fs::remove_file(self.path(id))
            .await
            .map_err(|e| StorageError::from_io(id.as_str(), e))?;

        debug!(id = %id, "file deleted");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    fn scheme(&self) -> &'static str {
        "local"
    }
}

impl std::fmt::Debug for LocalBlobBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBlobBackend")
            .field("root", &self.root)
            .finish()
    }
}
