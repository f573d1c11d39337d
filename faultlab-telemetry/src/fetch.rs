//! Bounded-timeout HTTP scraping for the polled sources.
//!
//! Bodies are consumed as a byte stream so that a connection dropped
//! mid-response still yields the bytes received so far. Polled endpoints
//! append stats over time, and a truncated body parses as a slightly
//! stale but valid snapshot more often than not.

use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Per-request timeout covering connect and headers.
const SCRAPE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors produced by the scrape client.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("scrape request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("scrape returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("scrape body is not valid utf-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// HTTP client for the polled metric endpoints.
#[derive(Debug, Clone)]
pub struct ScrapeClient {
    client: reqwest::Client,
}

impl ScrapeClient {
    pub fn new() -> Self {
        // Building with static options does not fail.
        let client = reqwest::Client::builder()
            .timeout(SCRAPE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// GET one endpoint and return the body text.
    ///
    /// A stream error after the headers logs a warning and returns the
    /// partial body accumulated so far.
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => body.extend_from_slice(&bytes),
                Err(err) => {
                    warn!(
                        url,
                        received = body.len(),
                        error = %err,
                        "body stream failed, keeping partial body"
                    );
                    break;
                }
            }
        }

        Ok(String::from_utf8(body)?)
    }
}

impl Default for ScrapeClient {
    fn default() -> Self {
        Self::new()
    }
}
