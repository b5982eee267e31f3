use crate::feed::date::DateNormalizer;
use crate::feed::parser::{parse_feed, FetchedFeed};
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a single fetch of a feed failed.
#[derive(Debug, Error)]
pub enum FetchFailure {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,
    /// Body could not be parsed as RSS, Atom or JSON Feed
    #[error("parse error: {0}")]
    Parse(String),
    /// Server answered 2xx with no body at all
    #[error("empty response body")]
    Empty,
    /// Response body exceeded the 10MB size limit
    #[error("response too large")]
    ResponseTooLarge,
    /// Received fewer bytes than Content-Length announced
    #[error("incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// A failed fetch, tagged with the address that was being fetched.
#[derive(Debug, Error)]
#[error("failed to fetch {address}: {cause}")]
pub struct FetchError {
    pub address: String,
    #[source]
    pub cause: FetchFailure,
}

impl FetchError {
    pub fn new(address: impl Into<String>, cause: FetchFailure) -> Self {
        Self {
            address: address.into(),
            cause,
        }
    }
}

/// Anything that can turn a feed address into a parsed feed.
///
/// Implementations hold no per-feed state: every call is independent of the
/// previous one.
#[async_trait]
pub trait Source: Send + Sync {
    async fn fetch(&self, address: &str) -> Result<FetchedFeed, FetchError>;
}

/// Fetches feeds over HTTP(S) with one attempt per call.
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    timeout: Duration,
    dates: DateNormalizer,
}

impl HttpSource {
    pub fn new(client: reqwest::Client, timeout: Duration, dates: DateNormalizer) -> Self {
        Self {
            client,
            timeout,
            dates,
        }
    }

    /// Builds the client the binary uses: rustls, redirects capped, a
    /// product user agent.
    pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .user_agent(concat!("feedrelay/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
    }

    async fn fetch_bytes(&self, address: &str) -> Result<Vec<u8>, FetchFailure> {
        let response = tokio::time::timeout(self.timeout, self.client.get(address).send())
            .await
            .map_err(|_| FetchFailure::Timeout)??;

        if !response.status().is_success() {
            return Err(FetchFailure::HttpStatus(response.status().as_u16()));
        }

        // The body read shares the same deadline as the request.
        tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_FEED_SIZE))
            .await
            .map_err(|_| FetchFailure::Timeout)?
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn fetch(&self, address: &str) -> Result<FetchedFeed, FetchError> {
        let bytes = self
            .fetch_bytes(address)
            .await
            .map_err(|cause| FetchError::new(address, cause))?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(FetchError::new(address, FetchFailure::Empty));
        }

        let feed = parse_feed(&bytes, &self.dates)
            .map_err(|e| FetchError::new(address, FetchFailure::Parse(e.to_string())))?;

        tracing::debug!(
            url = %address,
            items = feed.items.len(),
            "Fetched feed"
        );

        Ok(feed)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchFailure> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchFailure::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchFailure::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchFailure::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
