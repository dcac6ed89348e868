//! Web search provider client

use crate::error::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default Serper endpoint
pub const DEFAULT_SERPER_ENDPOINT: &str = "https://google.serper.dev/search";

/// Default region sent with every query
pub const DEFAULT_SEARCH_REGION: &str = "in";

/// Keyword query to ranked URL list
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Search and return candidate URLs in provider rank order
    async fn search(&self, query: &str) -> Result<Vec<String>, SearchError>;
}

/// [`SearchClient`] for the Serper Google search API
#[derive(Debug, Clone)]
pub struct SerperClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    region: String,
}

impl SerperClient {
    /// Create a client against the public Serper endpoint
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: DEFAULT_SERPER_ENDPOINT.to_string(),
            region: DEFAULT_SEARCH_REGION.to_string(),
        }
    }

    /// Point at a different endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override the `gl` region parameter
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    gl: &'a str,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    link: Option<String>,
}

#[async_trait]
impl SearchClient for SerperClient {
    async fn search(&self, query: &str) -> Result<Vec<String>, SearchError> {
        let body = SerperRequest {
            q: query,
            gl: &self.region,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Search provider returned an error status");
            return Err(SearchError::HttpStatus(status.as_u16()));
        }

        let parsed: SerperResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Decode(e.to_string()))?;

        let urls: Vec<String> = parsed.organic.into_iter().filter_map(|r| r.link).collect();
        debug!(query = %query, count = urls.len(), "Search returned URLs");
        Ok(urls)
    }
}
