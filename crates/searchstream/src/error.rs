//! Error types for SearchStream

use thiserror::Error;

/// Outcome of a failed page fetch
///
/// Display strings are what the model and the caller see in the
/// tool-result payload and the narration lines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageFetchError {
    /// Connect, headers or body did not complete within the fetch timeout
    #[error("Request timed out")]
    TimedOut,

    /// Server answered with a non-2xx status
    #[error("Failed to retrieve content: HTTP {0}")]
    HttpStatus(u16),

    /// DNS, connect, TLS, reset or body read failure
    #[error("Client error: {0}")]
    Transport(String),

    /// Anything the classification above does not cover
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl PageFetchError {
    /// Classify a reqwest error
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PageFetchError::TimedOut
        } else if err.is_builder() {
            PageFetchError::Unexpected(err.to_string())
        } else {
            PageFetchError::Transport(err.to_string())
        }
    }
}

/// Errors from the search provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    /// Provider answered with a non-2xx status
    #[error("Serper API request failed with status code {0}")]
    HttpStatus(u16),

    /// Request never got a response
    #[error("Error during search API request: {0}")]
    Transport(String),

    /// Response body was not the expected JSON
    #[error("Error decoding search API response: {0}")]
    Decode(String),
}

/// Errors from the language model service
#[derive(Debug, Error)]
pub enum ModelError {
    /// Failed to build HTTP client
    #[error("Failed to create HTTP client")]
    ClientBuild(#[source] reqwest::Error),

    /// Request could not be sent or the connection dropped
    #[error("Model request failed: {0}")]
    Transport(String),

    /// Service answered with a non-2xx status
    #[error("Model service returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// SSE framing broke mid-stream
    #[error("Model stream error: {0}")]
    Stream(String),

    /// An SSE event carried a payload we could not parse
    #[error("Malformed model stream event: {0}")]
    Decode(String),

    /// The service reported an error inside the stream
    #[error("Model service error: {0}")]
    Api(String),
}

impl ModelError {
    /// Create an error from a reqwest error
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        ModelError::Transport(err.to_string())
    }
}

/// Start-up configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required credential is missing from the environment
    #[error("Missing required environment variable: {0}")]
    MissingCredential(&'static str),

    /// Failed to build HTTP client
    #[error("Failed to create HTTP client")]
    ClientBuild(#[source] reqwest::Error),
}

/// Violations of the conversation append rules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    /// A tool result was already appended to this conversation
    #[error("Conversation already holds a tool result")]
    ToolResultAlreadyAppended,
}

/// Errors that end a conversation
#[derive(Debug, Error)]
pub enum Error {
    /// Model stream failed to open or broke mid-read
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Tool call arguments were not `{"query": "..."}`
    #[error("Invalid tool arguments: {0}")]
    InvalidToolArguments(String),

    /// Conversation invariant violated
    #[error(transparent)]
    Conversation(#[from] ConversationError),
}
