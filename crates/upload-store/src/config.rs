//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default metadata lifetime: one day.
pub const DEFAULT_METADATA_TTL_SECS: u64 = 86_400;

/// Default bitly v3 shorten endpoint.
pub const DEFAULT_BITLY_API_URL: &str = "https://api-ssl.bitly.com/v3/shorten";

/// Placeholder value that marks a remote setting as not really configured.
const LOCALHOST: &str = "localhost";

/// Storage configuration.
#[derive(Clone)]
pub struct Config {
    /// Deployment environment tag (default: development).
    pub env: String,

    /// S3 bucket holding uploads.
    pub s3_bucket: Option<String>,

    /// Optional prefix for all S3 keys.
    pub s3_prefix: Option<String>,

    /// Custom endpoint for S3-compatible services.
    pub s3_endpoint: Option<String>,

    /// Bitly access token. When set on a remote deployment, upload URLs are shortened.
    pub bitly_key: Option<String>,

    /// Bitly shorten endpoint.
    pub bitly_api_url: String,

    /// Redis connection URL.
    pub redis_url: String,

    /// Root directory for the local filesystem backend (default: ./static).
    pub static_dir: PathBuf,

    /// How long upload metadata lives in Redis.
    pub metadata_ttl: Duration,

    /// Upper bound on every backend, metadata and shortener call.
    pub request_timeout: Duration,

    /// Period of the orphan sweep.
    pub sweep_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let env = non_empty("APP_ENV").unwrap_or_else(|| "development".to_string());

        let redis_host = non_empty("REDIS_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let redis_url =
            non_empty("REDIS_URL").unwrap_or_else(|| format!("redis://{redis_host}:6379"));

        let static_dir = non_empty("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./static"));

        let metadata_ttl_secs: u64 = non_empty("METADATA_TTL_SECS")
            .unwrap_or_else(|| DEFAULT_METADATA_TTL_SECS.to_string())
            .parse()
            .context("METADATA_TTL_SECS must be a whole number of seconds")?;

        let request_timeout_secs: u64 = non_empty("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|| "30".to_string())
            .parse()
            .context("REQUEST_TIMEOUT_SECS must be a whole number of seconds")?;
        anyhow::ensure!(
            request_timeout_secs > 0,
            "REQUEST_TIMEOUT_SECS must be greater than zero"
        );

        let sweep_interval_secs: u64 = non_empty("SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|| "3600".to_string())
            .parse()
            .context("SWEEP_INTERVAL_SECS must be a whole number of seconds")?;
        anyhow::ensure!(
            sweep_interval_secs > 0,
            "SWEEP_INTERVAL_SECS must be greater than zero"
        );

        Ok(Self {
            env,
            s3_bucket: non_empty("S3_BUCKET"),
            s3_prefix: non_empty("S3_PREFIX"),
            s3_endpoint: non_empty("S3_ENDPOINT"),
            bitly_key: non_empty("BITLY_KEY"),
            bitly_api_url: non_empty("BITLY_API_URL")
                .unwrap_or_else(|| DEFAULT_BITLY_API_URL.to_string()),
            redis_url,
            static_dir,
            metadata_ttl: Duration::from_secs(metadata_ttl_secs),
            request_timeout: Duration::from_secs(request_timeout_secs),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
        })
    }

    /// Whether this deployment stores blobs in S3.
    ///
    /// Requires a production environment plus a real bucket and a real
    /// shortener key. Anything else falls back to the local filesystem.
    /// Evaluated once when the storage facade is built.
    pub fn use_remote_backend(&self) -> bool {
        let real = |value: &Option<String>| value.as_deref().is_some_and(|v| v != LOCALHOST);

        self.env == "production" && real(&self.s3_bucket) && real(&self.bitly_key)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("env", &self.env)
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_prefix", &self.s3_prefix)
            .field("s3_endpoint", &self.s3_endpoint)
            .field("bitly_key", &self.bitly_key.as_ref().map(|_| "<redacted>"))
            .field("bitly_api_url", &self.bitly_api_url)
            .field("redis_url", &self.redis_url)
            .field("static_dir", &self.static_dir)
            .field("metadata_ttl", &self.metadata_ttl)
            .field("request_timeout", &self.request_timeout)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}
