//! Environment configuration and component wiring

use crate::error::ConfigError;
use crate::fetcher::{FetchOptions, HttpPageFetcher};
use crate::model::ChatCompletionsClient;
use crate::orchestrator::Orchestrator;
use crate::pipeline::{SearchAndExtractPipeline, DEFAULT_MAX_CONCURRENT_FETCHES};
use crate::search::SerperClient;
use std::sync::Arc;
use tracing::debug;

/// Model API key variable
pub const MODEL_KEY_VAR: &str = "GROQ_API_KEY";
const MODEL_KEY_FALLBACK_VAR: &str = "api_key";

/// Search API key variable
pub const SEARCH_KEY_VAR: &str = "SERPER_API_KEY";
const SEARCH_KEY_FALLBACK_VAR: &str = "serper_api_key";

const MODEL_VAR: &str = "SEARCHSTREAM_MODEL";
const MODEL_BASE_URL_VAR: &str = "SEARCHSTREAM_MODEL_BASE_URL";
const SEARCH_ENDPOINT_VAR: &str = "SEARCHSTREAM_SEARCH_ENDPOINT";
const SEARCH_REGION_VAR: &str = "SEARCHSTREAM_SEARCH_REGION";

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub model_api_key: String,
    pub search_api_key: String,
    pub model: Option<String>,
    pub model_base_url: Option<String>,
    pub search_endpoint: Option<String>,
    pub search_region: Option<String>,
    pub fetch: FetchOptions,
    pub max_concurrent_fetches: usize,
}

impl Config {
    /// Read configuration from process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through a variable lookup function
    ///
    /// Empty or whitespace-only values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let model_api_key = get(MODEL_KEY_VAR)
            .or_else(|| get(MODEL_KEY_FALLBACK_VAR))
            .ok_or(ConfigError::MissingCredential(MODEL_KEY_VAR))?;
        let search_api_key = get(SEARCH_KEY_VAR)
            .or_else(|| get(SEARCH_KEY_FALLBACK_VAR))
            .ok_or(ConfigError::MissingCredential(SEARCH_KEY_VAR))?;

        Ok(Self {
            model_api_key,
            search_api_key,
            model: get(MODEL_VAR),
            model_base_url: get(MODEL_BASE_URL_VAR),
            search_endpoint: get(SEARCH_ENDPOINT_VAR),
            search_region: get(SEARCH_REGION_VAR),
            fetch: FetchOptions::default(),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        })
    }

    /// Set page fetch options
    pub fn fetch_options(mut self, fetch: FetchOptions) -> Self {
        self.fetch = fetch;
        self
    }

    /// Set the fan-out limit for page fetches
    pub fn max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.max_concurrent_fetches = limit;
        self
    }

    /// Wire up the production clients
    pub fn build_orchestrator(&self) -> Result<Orchestrator, ConfigError> {
        let api_client = reqwest::Client::builder()
            .user_agent(crate::DEFAULT_USER_AGENT)
            .build()
            .map_err(ConfigError::ClientBuild)?;

        let mut model = ChatCompletionsClient::new(api_client.clone(), &self.model_api_key);
        if let Some(ref base_url) = self.model_base_url {
            model = model.base_url(base_url);
        }
        if let Some(ref name) = self.model {
            model = model.model(name);
        }

        let mut search = SerperClient::new(api_client, &self.search_api_key);
        if let Some(ref endpoint) = self.search_endpoint {
            search = search.endpoint(endpoint);
        }
        if let Some(ref region) = self.search_region {
            search = search.region(region);
        }

        let fetcher =
            HttpPageFetcher::with_options(self.fetch.clone()).map_err(ConfigError::ClientBuild)?;

        debug!(
            model_base_url = self.model_base_url.as_deref().unwrap_or("default"),
            max_concurrent_fetches = self.max_concurrent_fetches,
            "Building orchestrator"
        );

        let pipeline = SearchAndExtractPipeline::new(Arc::new(search), Arc::new(fetcher))
            .max_concurrency(self.max_concurrent_fetches);
        Ok(Orchestrator::new(Arc::new(model), pipeline))
    }
}
