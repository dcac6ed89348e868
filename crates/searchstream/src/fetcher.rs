//! Page fetcher
//!
//! One GET per URL, bounded by a single deadline covering connect,
//! headers and body. Failures are classified into [`PageFetchError`]
//! and never retried.

use crate::error::PageFetchError;
use crate::DEFAULT_USER_AGENT;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Default per-page timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on body bytes read per page
pub const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Retrieves raw page content for a URL
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the page body as text
    async fn fetch(&self, url: &str) -> Result<String, PageFetchError>;
}

/// Options for [`HttpPageFetcher`]
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Deadline for the whole request, body included
    pub timeout: Duration,
    /// Body bytes kept before the rest is discarded
    pub max_body_bytes: usize,
    /// Custom User-Agent
    pub user_agent: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            user_agent: None,
        }
    }
}

/// reqwest-backed [`PageFetcher`]
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
    options: FetchOptions,
}

impl HttpPageFetcher {
    /// Create a fetcher with default options
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_options(FetchOptions::default())
    }

    /// Create a fetcher with custom options
    pub fn with_options(options: FetchOptions) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        let user_agent = options.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_USER_AGENT)),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html, application/xhtml+xml, text/plain;q=0.9, */*;q=0.8"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(options.timeout)
            .timeout(options.timeout)
            .build()?;

        Ok(Self { client, options })
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, PageFetchError> {
        let parsed = Url::parse(url)
            .map_err(|e| PageFetchError::Transport(format!("invalid URL {}: {}", url, e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(PageFetchError::Transport(format!(
                "unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let deadline = tokio::time::Instant::now() + self.options.timeout;

        let send = self.client.get(parsed).send();
        let response = match tokio::time::timeout_at(deadline, send).await {
            Ok(result) => result.map_err(PageFetchError::from_reqwest)?,
            Err(_) => return Err(PageFetchError::TimedOut),
        };

        let status = response.status();
        if !status.is_success() {
            debug!(url = %url, status = status.as_u16(), "Page returned non-success status");
            return Err(PageFetchError::HttpStatus(status.as_u16()));
        }

        let body = read_body_until(response, deadline, self.options.max_body_bytes).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Read the response body, failing if the deadline passes first
///
/// Bytes past `max_bytes` are dropped and the connection is released.
async fn read_body_until(
    response: reqwest::Response,
    deadline: tokio::time::Instant,
    max_bytes: usize,
) -> Result<Vec<u8>, PageFetchError> {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();

    loop {
        tokio::select! {
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        let room = max_bytes.saturating_sub(body.len());
                        if bytes.len() >= room {
                            body.extend_from_slice(&bytes[..room]);
                            warn!(max_bytes, "Body size cap reached, truncating page");
                            return Ok(body);
                        }
                        body.extend_from_slice(&bytes);
                    }
                    Some(Err(e)) => return Err(PageFetchError::from_reqwest(e)),
                    None => return Ok(body),
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                return Err(PageFetchError::TimedOut);
            }
        }
    }
}
