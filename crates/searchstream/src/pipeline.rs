//! Search, then fetch and extract every hit concurrently
//!
//! Design: the search call runs first and alone since the URLs are not
//! known before it returns. Fetch+extract futures are then driven with
//! `buffered`, which bounds in-flight requests and yields outcomes in input
//! order no matter which fetch finishes first. Nothing is spawned, so
//! dropping the pipeline future drops every in-flight request.

use crate::extract::{ContentExtractor, ReadableTextExtractor};
use crate::fetcher::PageFetcher;
use crate::search::SearchClient;
use crate::types::{PageError, PageResult, SearchAndExtractResult};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default number of pages fetched at once
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 10;

/// Search-and-extract tool implementation
#[derive(Clone)]
pub struct SearchAndExtractPipeline {
    search: Arc<dyn SearchClient>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn ContentExtractor>,
    max_concurrency: usize,
}

impl SearchAndExtractPipeline {
    /// Create a pipeline using the default extractor
    pub fn new(search: Arc<dyn SearchClient>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            search,
            fetcher,
            extractor: Arc::new(ReadableTextExtractor::new()),
            max_concurrency: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }

    /// Replace the content extractor
    pub fn extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Limit in-flight fetches (at least 1)
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    /// Run one search and extract every returned page
    pub async fn run(&self, query: &str) -> SearchAndExtractResult {
        info!(query = %query, "Running web search");

        let urls = match self.search.search(query).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!(query = %query, error = %e, "Search failed");
                return SearchAndExtractResult::new(vec![PageResult::search_error(e)]);
            }
        };

        let pages: Vec<PageResult> = stream::iter(urls)
            .map(|url| self.fetch_and_extract(url))
            .buffered(self.max_concurrency)
            .collect()
            .await;

        info!(
            query = %query,
            pages = pages.len(),
            failed = pages.iter().filter(|p| p.is_error()).count(),
            "Web search finished"
        );
        SearchAndExtractResult::new(pages)
    }

    async fn fetch_and_extract(&self, url: String) -> PageResult {
        let html = match self.fetcher.fetch(&url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %url, error = %e, "Page fetch failed");
                return PageResult::error(url, PageError::Fetch(e));
            }
        };

        match self.extractor.extract(&html) {
            Some(text) => {
                debug!(url = %url, chars = text.chars().count(), "Extracted page content");
                PageResult::content(url, &text)
            }
            None => {
                debug!(url = %url, "No main content extracted");
                PageResult::error(url, PageError::NoMainContent)
            }
        }
    }
}
