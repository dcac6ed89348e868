//! SearchStream - streaming LLM answers backed by a one-shot web search
//!
//! A query opens a streaming completion with a single tool declared,
//! `search_and_parse`. If the model calls it, the search results are
//! fetched and reduced to readable text concurrently, narrated to the
//! caller, handed back to the model, and a second completion streams the
//! final answer.
//!
//! ## Components
//!
//! - [`ModelClient`] - streaming chat completions ([`ChatCompletionsClient`])
//! - [`SearchClient`] - keyword search to URLs ([`SerperClient`])
//! - [`PageFetcher`] - page retrieval with a strict timeout ([`HttpPageFetcher`])
//! - [`ContentExtractor`] - main readable text from HTML ([`ReadableTextExtractor`])
//! - [`SearchAndExtractPipeline`] - search plus bounded concurrent fetch/extract
//! - [`Orchestrator`] - the two-phase conversation as a fragment stream
//! - [`bridge`] - fragment stream to `text/plain` body chunks
//!
//! ## Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use searchstream::Config;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Config::from_env()?.build_orchestrator()?;
//! let mut fragments = orchestrator.run("today's weather in Paris");
//! while let Some(fragment) = fragments.next().await {
//!     print!("{}", fragment?.text());
//! }
//! # Ok(())
//! # }
//! ```

mod bridge;
mod config;
mod conversation;
mod error;
mod extract;
mod fetcher;
mod model;
mod orchestrator;
mod pipeline;
mod search;
pub mod server;
mod tool;
mod types;

pub use bridge::bridge;
pub use config::{Config, MODEL_KEY_VAR, SEARCH_KEY_VAR};
pub use conversation::ConversationState;
pub use error::{ConfigError, ConversationError, Error, ModelError, PageFetchError, SearchError};
pub use extract::{clean_whitespace, extract_main_text, ContentExtractor, ReadableTextExtractor};
pub use fetcher::{
    FetchOptions, HttpPageFetcher, PageFetcher, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_BODY_BYTES,
};
pub use model::{
    ChatCompletionsClient, ModelClient, ModelSettings, ModelStream, DEFAULT_MODEL,
    DEFAULT_MODEL_BASE_URL,
};
pub use orchestrator::{FragmentStream, Orchestrator};
pub use pipeline::{SearchAndExtractPipeline, DEFAULT_MAX_CONCURRENT_FETCHES};
pub use search::{SearchClient, SerperClient, DEFAULT_SEARCH_REGION, DEFAULT_SERPER_ENDPOINT};
pub use tool::{
    search_args_schema, SearchArgs, ToolDeclaration, SEARCH_TOOL_DESCRIPTION, SEARCH_TOOL_NAME,
};
pub use types::{
    truncate_chars, Message, MessageContent, ModelEvent, OutputFragment, PageError, PageOutcome,
    PageResult, Role, SearchAndExtractResult, ToolInvocation, CONTENT_CHAR_LIMIT,
    PREVIEW_CHAR_LIMIT,
};

/// Default User-Agent string
pub const DEFAULT_USER_AGENT: &str = "SearchStream/0.1";

/// Instruction that opens every conversation
pub const SYSTEM_PROMPT: &str = "You are an assistant that can search the web and provide \
information based on the search results. If there are errors in fetching or parsing web \
content, acknowledge them and try to provide the best response possible with the available \
information. Always use the function if you do not know the answer.";
