//! S3-compatible object storage backend.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::{BlobBackend, BlobReader};
use crate::error::{Result, StorageError};
use crate::id::UploadId;

/// Stores each upload as one object in a bucket, keyed by its identifier.
pub struct S3BlobBackend {
    client: aws_sdk_s3::Client,
    bucket: String,
    /// Optional prefix for all keys.
    prefix: Option<String>,
}

impl S3BlobBackend {
    /// Create a new S3 backend.
    ///
    /// Uses the default AWS credential chain (env vars, config file, instance profile).
    pub async fn new(bucket: impl Into<String>, prefix: Option<String>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Self::from_client(aws_sdk_s3::Client::new(&config), bucket, prefix)
    }

    /// Create with a custom endpoint (for S3-compatible services like MinIO).
    pub async fn with_endpoint(
        endpoint_url: &str,
        bucket: impl Into<String>,
        prefix: Option<String>,
    ) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(endpoint_url)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(true)
            .build();

        Self::from_client(aws_sdk_s3::Client::from_conf(s3_config), bucket, prefix)
    }

    /// Wrap an already configured client.
    pub fn from_client(
        client: aws_sdk_s3::Client,
        bucket: impl Into<String>,
        prefix: Option<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key for an upload.
    fn key(&self, id: &UploadId) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), id),
            None => id.as_str().to_string(),
        }
    }
}

#[async_trait]
impl BlobBackend for S3BlobBackend {
    async fn length(&self, id: &UploadId) -> Result<u64> {
        let key = self.key(id);

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => output
                .content_length()
                .and_then(|len| u64::try_from(len).ok())
                .ok_or_else(|| {
                    StorageError::Io(std::io::Error::other(format!(
                        "S3 object {key} has no valid content length"
                    )))
                }),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    return Err(StorageError::not_found(id.as_str()));
                }
                Err(StorageError::Io(std::io::Error::other(format!(
                    "failed to head S3 object {key}: {}",
                    DisplayErrorContext(&err)
                ))))
            }
        }
    }

    async fn get(&self, id: &UploadId) -> Result<BlobReader> {
        let key = self.key(id);

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                    return Err(StorageError::not_found(id.as_str()));
                }
                return Err(StorageError::Io(std::io::Error::other(format!(
                    "failed to get S3 object {key}: {}",
                    DisplayErrorContext(&err)
                ))));
            }
        };

        debug!(id = %id, key = %key, "S3 download started");
        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn put(&self, id: &UploadId, mut data: BlobReader) -> Result<u64> {
        let key = self.key(id);

        // PutObject needs a sized body, so the stream is collected first.
        let mut buf = Vec::new();
        data.read_to_end(&mut buf)
            .await
            .map_err(|e| StorageError::Upload(format!("failed to read upload stream: {e}")))?;
        let size = buf.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(buf))
            .send()
            .await
            .map_err(|e| StorageError::Upload(DisplayErrorContext(&e).to_string()))?;

        debug!(id = %id, key = %key, size, "file written to S3");
        Ok(size)
    }

    async fn delete(&self, id: &UploadId) -> Result<()> {
        let key = self.key(id);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::Delete(DisplayErrorContext(&e).to_string()))?;

        debug!(id = %id, key = %key, "file deleted from S3");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!(
                    "S3 bucket {} unreachable: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                )))
            })?;
        Ok(())
    }

    fn scheme(&self) -> &'static str {
        "s3"
    }
}

impl std::fmt::Debug for S3BlobBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlobBackend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish()
    }
}
