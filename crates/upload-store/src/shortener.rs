//! URL shortening for share links handed back after an upload.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Result, StorageError};

/// Turns a long share URL into a short one.
#[async_trait]
pub trait UrlShortener: Send + Sync {
    async fn shorten(&self, url: &str) -> Result<String>;
}

/// Bitly v3 `shorten` endpoint with `format=txt`.
///
/// The response body is the short URL as plain text.
pub struct BitlyShortener {
    client: reqwest::Client,
    api_url: String,
    access_token: String,
}

impl BitlyShortener {
    /// Create a shortener against `api_url` with the given access token.
    pub fn new(
        api_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            access_token: access_token.into(),
        })
    }
}

#[async_trait]
impl UrlShortener for BitlyShortener {
    async fn shorten(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("access_token", self.access_token.as_str()),
                ("longUrl", url),
                ("format", "txt"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        let short = body.trim();

        if short.is_empty() {
            return Err(StorageError::Shortener(
                "shortener returned an empty body".to_string(),
            ));
        }

        debug!(url = %url, short = %short, "url shortened");
        Ok(short.to_string())
    }
}

impl std::fmt::Debug for BitlyShortener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitlyShortener")
            .field("api_url", &self.api_url)
            .finish()
    }
}
