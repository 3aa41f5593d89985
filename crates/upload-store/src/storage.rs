//! Upload storage facade.
//!
//! Composes one blob backend with the metadata store and an optional URL
//! shortener. Handles delete tokens, metadata expiry and the sweep that
//! removes blobs whose metadata has expired.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::{BlobBackend, BlobReader, LocalBlobBackend};
use crate::config::{Config, DEFAULT_METADATA_TTL_SECS};
use crate::error::{Result, StorageError};
use crate::id::UploadId;
use crate::metadata::{MetadataStore, RedisMetadataStore, UploadRecord};
use crate::shortener::UrlShortener;

/// Random bytes in a delete token (hex-encoded to 32 characters).
pub const DELETE_TOKEN_BYTES: usize = 16;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Expired ids claimed per metadata round trip during a sweep.
const SWEEP_BATCH: usize = 100;

/// Returned to the uploader after a successful `set`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredUpload {
    pub delete_token: String,
    /// Share URL, shortened when a shortener is configured.
    pub url: String,
}

/// Outcome of one orphan sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Blobs deleted because their metadata had expired.
    pub removed: usize,
    /// Expired ids whose blob was already gone.
    pub already_gone: usize,
    /// Expired ids whose blob could not be deleted.
    pub failed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.removed + self.already_gone + self.failed
    }
}

/// Reachability of the storage collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub backend: &'static str,
    pub backend_ok: bool,
    pub metadata: &'static str,
    pub metadata_ok: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.backend_ok && self.metadata_ok
    }
}

/// Upload storage over one blob backend and the shared metadata store.
///
/// Cheap to clone; clones share the backend and the metadata connection.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    backend: Arc<dyn BlobBackend>,
    metadata: Arc<dyn MetadataStore>,
    shortener: Option<Arc<dyn UrlShortener>>,
    metadata_ttl: TimeDelta,
    request_timeout: Duration,
}

/// Builder for [`Storage`].
pub struct StorageBuilder {
    backend: Arc<dyn BlobBackend>,
    metadata: Arc<dyn MetadataStore>,
    shortener: Option<Arc<dyn UrlShortener>>,
    metadata_ttl: Duration,
    request_timeout: Duration,
}

impl StorageBuilder {
    /// Shorten share URLs returned by `set`.
    pub fn shortener(mut self, shortener: Arc<dyn UrlShortener>) -> Self {
        self.shortener = Some(shortener);
        self
    }

    /// Lifetime of upload metadata (default: one day).
    pub fn metadata_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_ttl = ttl;
        self
    }

    /// Upper bound on each backend, metadata and shortener call (default: 30s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Storage> {
        let metadata_ttl = TimeDelta::from_std(self.metadata_ttl).map_err(|_| {
            StorageError::Config(format!(
                "metadata TTL out of range: {:?}",
                self.metadata_ttl
            ))
        })?;
        if self.request_timeout.is_zero() {
            return Err(StorageError::Config(
                "request timeout must be greater than zero".to_string(),
            ));
        }

        Ok(Storage {
            inner: Arc::new(StorageInner {
                backend: self.backend,
                metadata: self.metadata,
                shortener: self.shortener,
                metadata_ttl,
                request_timeout: self.request_timeout,
            }),
        })
    }
}

impl Storage {
    /// Start building a facade over explicit collaborators.
    pub fn builder(
        backend: Arc<dyn BlobBackend>,
        metadata: Arc<dyn MetadataStore>,
    ) -> StorageBuilder {
        StorageBuilder {
            backend,
            metadata,
            shortener: None,
            metadata_ttl: Duration::from_secs(DEFAULT_METADATA_TTL_SECS),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Connect to Redis and select the blob backend from configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let metadata = RedisMetadataStore::connect(&config.redis_url).await?;
        Self::from_config_with_metadata(config, Arc::new(metadata)).await
    }

    /// Select the blob backend from configuration over a given metadata store.
    ///
    /// The choice is made once here; there is no fallback between backends
    /// afterwards.
    pub async fn from_config_with_metadata(
        config: &Config,
        metadata: Arc<dyn MetadataStore>,
    ) -> Result<Self> {
        let (backend, shortener) = if config.use_remote_backend() {
            remote_parts(config).await?
        } else {
            let local: Arc<dyn BlobBackend> = Arc::new(LocalBlobBackend::new(&config.static_dir));
            (local, None)
        };

        info!(
            env = %config.env,
            backend = backend.scheme(),
            metadata = metadata.kind(),
            shortener = shortener.is_some(),
            "storage backend selected"
        );

        let mut builder = Self::builder(backend, metadata)
            .metadata_ttl(config.metadata_ttl)
            .request_timeout(config.request_timeout);
        if let Some(shortener) = shortener {
            builder = builder.shortener(shortener);
        }
        builder.build()
    }

    /// Original filename of an upload.
    pub async fn filename(&self, id: &str) -> Result<String> {
        let id = UploadId::parse(id)?;
        self.bounded("filename lookup", self.inner.metadata.get_filename(&id))
            .await
    }

    /// Size in bytes of a stored upload.
    pub async fn length(&self, id: &str) -> Result<u64> {
        let id = UploadId::parse(id)?;
        self.bounded("length", self.inner.backend.length(&id)).await
    }

    /// Open a stream over a stored upload.
    ///
    /// Only opening the stream is bounded by the request timeout; reading it
    /// is up to the caller.
    pub async fn get(&self, id: &str) -> Result<BlobReader> {
        let id = UploadId::parse(id)?;
        self.bounded("download", self.inner.backend.get(&id)).await
    }

    /// Store an upload and record its metadata.
    ///
    /// Returns a fresh delete token and the share URL, shortened when a
    /// shortener is configured. A failed shortening falls back to `url`.
    pub async fn set(
        &self,
        id: &str,
        data: BlobReader,
        filename: &str,
        url: &str,
    ) -> Result<StoredUpload> {
        let id = UploadId::parse(id)?;

        let size = self
            .bounded("upload", self.inner.backend.put(&id, data))
            .await?;

        let delete_token = generate_delete_token();
        let created = Utc::now();
        let record = UploadRecord {
            filename: filename.to_string(),
            delete_token: delete_token.clone(),
            created,
            expires: created + self.inner.metadata_ttl,
        };
        self.bounded("metadata write", self.inner.metadata.put(&id, &record))
            .await?;

        let url = self.share_url(&id, url).await;

        info!(
            id = %id,
            filename = %filename,
            size,
            backend = self.inner.backend.scheme(),
            "upload finished"
        );

        Ok(StoredUpload { delete_token, url })
    }

    /// Delete an upload after checking its delete token.
    ///
    /// A wrong token and a missing record are both `Unauthorized`.
    pub async fn delete(&self, id: &str, delete_token: &str) -> Result<()> {
        let id = UploadId::parse(id)?;

        let stored = match self
            .bounded("token lookup", self.inner.metadata.get_delete_token(&id))
            .await
        {
            Ok(token) => token,
            Err(StorageError::NotFound { .. }) => {
                debug!(id = %id, "delete rejected: no metadata");
                return Err(StorageError::Unauthorized);
            }
            Err(e) => return Err(e),
        };

        if !tokens_match(&stored, delete_token) {
            warn!(id = %id, "delete rejected: token mismatch");
            return Err(StorageError::Unauthorized);
        }

        self.remove_upload(&id).await?;
        info!(id = %id, "upload deleted");
        Ok(())
    }

    /// Delete an upload without authorization.
    ///
    /// For administrative callers. Deleting a blob that is already gone
    /// reports `NotFound` after the metadata has been cleared.
    pub async fn force_delete(&self, id: &str) -> Result<()> {
        let id = UploadId::parse(id)?;

        self.remove_upload(&id).await?;
        info!(id = %id, "upload force-deleted");
        Ok(())
    }

    /// Delete blobs whose metadata has expired.
    pub async fn sweep_orphans(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        loop {
            let ids = self
                .bounded(
                    "expiry scan",
                    self.inner.metadata.take_expired(Utc::now(), SWEEP_BATCH),
                )
                .await?;
            let claimed = ids.len();

            for raw in ids {
                let id = match UploadId::parse(raw.as_str()) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(error = %e, id = %raw, "skipping malformed id in expiry index");
                        report.failed += 1;
                        continue;
                    }
                };

                match self
                    .bounded("orphan delete", self.inner.backend.delete(&id))
                    .await
                {
                    Ok(()) => {
                        debug!(id = %id, "orphaned blob deleted");
                        report.removed += 1;
                    }
                    Err(e) if e.is_not_found() => report.already_gone += 1,
                    Err(e) => {
                        warn!(error = %e, id = %id, "failed to delete orphaned blob");
                        report.failed += 1;
                    }
                }
            }

            if claimed < SWEEP_BATCH {
                break;
            }
        }

        if report.total() > 0 {
            info!(
                removed = report.removed,
                already_gone = report.already_gone,
                failed = report.failed,
                "orphan sweep finished"
            );
        } else {
            debug!("orphan sweep found nothing to do");
        }

        Ok(report)
    }

    /// Run [`Storage::sweep_orphans`] every `period` until stopped.
    ///
    /// The first sweep runs immediately.
    pub fn spawn_sweeper(&self, period: Duration) -> SweeperHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let storage = self.clone();
        let handle = tokio::spawn(async move {
            run_sweeper(storage, period, stop_rx).await;
        });

        SweeperHandle {
            stop: stop_tx,
            handle,
        }
    }

    /// Probe the backend and the metadata store.
    pub async fn health(&self) -> HealthReport {
        let backend_ok = match self.bounded("backend ping", self.inner.backend.ping()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "blob backend unhealthy");
                false
            }
        };
        let metadata_ok = match self
            .bounded("metadata ping", self.inner.metadata.ping())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "metadata store unhealthy");
                false
            }
        };

        HealthReport {
            backend: self.inner.backend.scheme(),
            backend_ok,
            metadata: self.inner.metadata.kind(),
            metadata_ok,
        }
    }

    /// Close the metadata connection. Clones of this facade stop working.
    pub async fn shutdown(self) -> Result<()> {
        self.inner.metadata.close().await?;
        info!("storage shut down");
        Ok(())
    }

    /// Scheme of the selected blob backend.
    pub fn backend_scheme(&self) -> &'static str {
        self.inner.backend.scheme()
    }

    pub fn has_shortener(&self) -> bool {
        self.inner.shortener.is_some()
    }

    /// Remove the blob, then its metadata.
    ///
    /// A failed blob delete keeps the record so the token still works and
    /// the sweep can still find the id. A blob that is already gone clears
    /// the record and reports `NotFound`.
    async fn remove_upload(&self, id: &UploadId) -> Result<()> {
        let blob = self
            .bounded("blob delete", self.inner.backend.delete(id))
            .await;
        match &blob {
            Err(e) if !e.is_not_found() => {
                warn!(error = %e, id = %id, "blob delete failed, metadata kept");
                return blob;
            }
            _ => {}
        }

        self.bounded("metadata delete", self.inner.metadata.remove(id))
            .await?;
        blob
    }

    async fn share_url(&self, id: &UploadId, url: &str) -> String {
        let Some(shortener) = &self.inner.shortener else {
            return url.to_string();
        };

        match self.bounded("shorten", shortener.shorten(url)).await {
            Ok(short) => short,
            Err(e) => {
                warn!(error = %e, id = %id, "url shortening failed, returning original url");
                url.to_string()
            }
        }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let after = self.inner.request_timeout;
        match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op, ?after, "storage request timed out");
                Err(StorageError::Timeout { op, after })
            }
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.inner.backend.scheme())
            .field("metadata", &self.inner.metadata.kind())
            .field("shortener", &self.inner.shortener.is_some())
            .field("metadata_ttl", &self.inner.metadata_ttl)
            .field("request_timeout", &self.inner.request_timeout)
            .finish()
    }
}

/// Handle to a running orphan sweeper.
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper and wait for it to exit.
    pub async fn stop(self) {
        // The receiver only goes away if the task already ended.
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "orphan sweeper task failed");
        }
    }
}

async fn run_sweeper(storage: Storage, period: Duration, mut stop_rx: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = storage.sweep_orphans().await {
                    warn!(error = %e, "orphan sweep failed");
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    debug!("orphan sweeper stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(feature = "s3")]
async fn remote_parts(
    config: &Config,
) -> Result<(Arc<dyn BlobBackend>, Option<Arc<dyn UrlShortener>>)> {
    use crate::backend::S3BlobBackend;
    use crate::shortener::BitlyShortener;

    let bucket = config
        .s3_bucket
        .clone()
        .ok_or_else(|| StorageError::Config("S3_BUCKET is required".to_string()))?;

    let backend = match &config.s3_endpoint {
        Some(endpoint) => {
            S3BlobBackend::with_endpoint(endpoint, bucket, config.s3_prefix.clone()).await
        }
        None => S3BlobBackend::new(bucket, config.s3_prefix.clone()).await,
    };

    let shortener = match &config.bitly_key {
        Some(key) => {
            let bitly = BitlyShortener::new(&config.bitly_api_url, key, config.request_timeout)?;
            Some(Arc::new(bitly) as Arc<dyn UrlShortener>)
        }
        None => None,
    };

    Ok((Arc::new(backend), shortener))
}

#[cfg(not(feature = "s3"))]
async fn remote_parts(
    _config: &Config,
) -> Result<(Arc<dyn BlobBackend>, Option<Arc<dyn UrlShortener>>)> {
    Err(StorageError::Config(
        "remote storage selected but this build lacks the `s3` feature".to_string(),
    ))
}

/// Random hex credential authorizing one delete.
fn generate_delete_token() -> String {
    let bytes: [u8; DELETE_TOKEN_BYTES] = rand::random();
    hex::encode(bytes)
}

/// Constant-time token comparison.
fn tokens_match(stored: &str, given: &str) -> bool {
    stored.as_bytes().ct_eq(given.as_bytes()).into()
}
