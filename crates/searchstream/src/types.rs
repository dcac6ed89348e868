//! Core types for SearchStream

use crate::error::{PageFetchError, SearchError};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;

/// Hard cap on extracted page text handed to the model
pub const CONTENT_CHAR_LIMIT: usize = 1000;

/// Length of the per-page summary narrated to the caller
pub const PREVIEW_CHAR_LIMIT: usize = 200;

/// Truncate to at most `max_chars` Unicode scalar values
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
}

/// Body of a conversation message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    ToolResult(SearchAndExtractResult),
}

/// One entry of the conversation sent to the model
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    /// Tool name, set on tool-result messages
    pub name: Option<String>,
    /// Tool call requested by an assistant message
    pub tool_call: Option<ToolInvocation>,
    /// Provider call id a tool-result message answers
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    /// Assistant turn that requested a tool, with whatever text preceded it
    pub fn assistant_tool_call(text: impl Into<String>, call: ToolInvocation) -> Self {
        Self {
            tool_call: Some(call),
            ..Self::text(Role::Assistant, text)
        }
    }

    pub fn tool_result(
        name: impl Into<String>,
        call_id: Option<String>,
        result: SearchAndExtractResult,
    ) -> Self {
        Self {
            role: Role::ToolResult,
            content: MessageContent::ToolResult(result),
            name: Some(name.into()),
            tool_call: None,
            tool_call_id: call_id,
        }
    }

    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            name: None,
            tool_call: None,
            tool_call_id: None,
        }
    }

    /// Content as the string sent over the wire
    ///
    /// Tool results are serialized to their JSON payload.
    pub fn content_text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::ToolResult(result) => result.to_json(),
        }
    }
}

/// Structured request from the model to run a tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Provider-assigned call id, when the service sends one
    pub id: Option<String>,
    pub name: String,
    /// Parsed argument object; a raw string if the model sent invalid JSON
    pub arguments: serde_json::Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// One item of an incrementally arriving model response
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Text(String),
    ToolCall(ToolInvocation),
}

/// Why a page produced no content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    Fetch(PageFetchError),
    /// Page fetched fine but the extractor found nothing readable
    NoMainContent,
    /// Search itself failed; carried as the single pipeline entry
    Search(SearchError),
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageError::Fetch(err) => write!(f, "{}", err),
            PageError::NoMainContent => write!(f, "No main content extracted"),
            PageError::Search(err) => write!(f, "{}", err),
        }
    }
}

/// Outcome for one URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Extracted text, already capped at [`CONTENT_CHAR_LIMIT`]
    Content(String),
    Error(PageError),
}

/// Result for one search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult {
    /// Source URL; `None` only for a search-provider error
    pub url: Option<String>,
    pub outcome: PageOutcome,
}

impl PageResult {
    /// Build a content result, applying the character cap
    pub fn content(url: impl Into<String>, text: &str) -> Self {
        Self {
            url: Some(url.into()),
            outcome: PageOutcome::Content(truncate_chars(text, CONTENT_CHAR_LIMIT).to_string()),
        }
    }

    pub fn error(url: impl Into<String>, error: PageError) -> Self {
        Self {
            url: Some(url.into()),
            outcome: PageOutcome::Error(error),
        }
    }

    pub fn search_error(error: SearchError) -> Self {
        Self {
            url: None,
            outcome: PageOutcome::Error(PageError::Search(error)),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, PageOutcome::Error(_))
    }
}

impl Serialize for PageResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(ref url) = self.url {
            map.serialize_entry("url", url)?;
        }
        match &self.outcome {
            PageOutcome::Content(text) => map.serialize_entry("content", text)?,
            PageOutcome::Error(err) => map.serialize_entry("error", &err.to_string())?,
        }
        map.end()
    }
}

/// Ordered pipeline output, one entry per search hit in provider order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SearchAndExtractResult {
    pub pages: Vec<PageResult>,
}

impl SearchAndExtractResult {
    pub fn new(pages: Vec<PageResult>) -> Self {
        Self { pages }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PageResult> {
        self.pages.iter()
    }

    /// JSON payload of the tool-result message
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "[]".to_string())
    }
}

/// A unit of the caller-visible text stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFragment {
    /// Text generated by the model
    Model(String),
    /// Narration produced by the orchestrator
    Progress(String),
    /// Narration about a failed page or search
    Error(String),
}

impl OutputFragment {
    pub fn text(&self) -> &str {
        match self {
            OutputFragment::Model(s) | OutputFragment::Progress(s) | OutputFragment::Error(s) => s,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            OutputFragment::Model(s) | OutputFragment::Progress(s) | OutputFragment::Error(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_truncate_chars_counts_scalars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
    }

    #[test]
    fn test_page_result_content_is_capped() {
        let long = "x".repeat(1500);
        let result = PageResult::content("https://example.com", &long);
        match result.outcome {
            PageOutcome::Content(text) => assert_eq!(text.chars().count(), CONTENT_CHAR_LIMIT),
            _ => panic!("expected content"),
        }
    }

    #[test]
    fn test_result_json_shape() {
        let result = SearchAndExtractResult::new(vec![
            PageResult::content("https://a.example", "alpha"),
            PageResult::error("https://b.example", PageError::NoMainContent),
            PageResult::error(
                "https://c.example",
                PageError::Fetch(PageFetchError::HttpStatus(403)),
            ),
        ]);

        let value: serde_json::Value = serde_json::from_str(&result.to_json()).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                {"url": "https://a.example", "content": "alpha"},
                {"url": "https://b.example", "error": "No main content extracted"},
                {"url": "https://c.example", "error": "Failed to retrieve content: HTTP 403"},
            ])
        );
    }

    #[test]
    fn test_search_error_json_has_no_url() {
        let result = SearchAndExtractResult::new(vec![PageResult::search_error(
            SearchError::HttpStatus(500),
        )]);
        assert_eq!(
            result.to_json(),
            r#"[{"error":"Serper API request failed with status code 500"}]"#
        );
    }

    #[test]
    fn test_tool_result_message_content() {
        let result = SearchAndExtractResult::new(vec![PageResult::content("https://a.example", "a")]);
        let msg = Message::tool_result("search_and_parse", Some("call_1".into()), result);
        assert_eq!(msg.role, Role::ToolResult);
        assert_eq!(msg.name.as_deref(), Some("search_and_parse"));
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert!(msg.content_text().contains("\"content\":\"a\""));
    }

    proptest! {
        #[test]
        fn prop_stored_content_is_capped_and_idempotent(s in "\\PC{0,1500}") {
            let once = truncate_chars(&s, CONTENT_CHAR_LIMIT);
            prop_assert!(once.chars().count() <= CONTENT_CHAR_LIMIT);
            prop_assert_eq!(truncate_chars(once, CONTENT_CHAR_LIMIT), once);
            if s.chars().count() <= CONTENT_CHAR_LIMIT {
                prop_assert_eq!(once, s.as_str());
            }
        }

        #[test]
        fn prop_preview_is_prefix_of_stored(s in "\\PC{0,1500}") {
            let stored = truncate_chars(&s, CONTENT_CHAR_LIMIT);
            let preview = truncate_chars(stored, PREVIEW_CHAR_LIMIT);
            prop_assert!(stored.starts_with(preview));
        }
    }
}
