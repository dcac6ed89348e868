//! Streaming chat-completions client
//!
//! Speaks the OpenAI-compatible `chat/completions` protocol with
//! `stream: true`. Each SSE `data:` line carries a chunk whose first choice
//! holds a delta of text and/or tool-call fragments. Text is yielded as it
//! arrives; tool-call fragments are accumulated per index and call id and
//! yielded as one
//! [`ModelEvent::ToolCall`] once complete.

use crate::error::ModelError;
use crate::tool::ToolDeclaration;
use crate::types::{Message, MessageContent, ModelEvent, Role, ToolInvocation};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tracing::{debug, trace};

/// Default OpenAI-compatible base URL (Groq)
pub const DEFAULT_MODEL_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Default tool-use model
pub const DEFAULT_MODEL: &str = "llama3-groq-70b-8192-tool-use-preview";

/// Call id used when the service did not assign one
const FALLBACK_CALL_ID: &str = "call_0";

/// Incremental model output
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, ModelError>> + Send>>;

/// Opens streaming completions
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Start a completion over `messages`, optionally allowing one tool
    async fn open_stream(
        &self,
        messages: &[Message],
        tool: Option<&ToolDeclaration>,
    ) -> Result<ModelStream, ModelError>;
}

/// Sampling parameters sent with every request
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 8192,
            temperature: 0.5,
            top_p: 1.0,
        }
    }
}

/// [`ModelClient`] for OpenAI-compatible services
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    settings: ModelSettings,
}

impl ChatCompletionsClient {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_MODEL_BASE_URL.to_string(),
            settings: ModelSettings::default(),
        }
    }

    /// Override the service base URL (without `/chat/completions`)
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Override the model name
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.settings.model = model.into();
        self
    }

    /// Replace all sampling settings
    pub fn settings(mut self, settings: ModelSettings) -> Self {
        self.settings = settings;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ModelClient for ChatCompletionsClient {
    async fn open_stream(
        &self,
        messages: &[Message],
        tool: Option<&ToolDeclaration>,
    ) -> Result<ModelStream, ModelError> {
        let request = ChatRequest::new(&self.settings, messages, tool);
        debug!(
            model = %self.settings.model,
            messages = messages.len(),
            with_tool = tool.is_some(),
            "Opening model stream"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(ModelError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::HttpStatus {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let stream = async_stream::stream! {
            let mut events = response.bytes_stream().eventsource();
            let mut decoder = ChunkDecoder::default();

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(ModelError::Stream(e.to_string()));
                        return;
                    }
                };

                let data = event.data.trim();
                trace!(data = %data, "Model SSE event");
                if data == "[DONE]" {
                    break;
                }
                if data.is_empty() {
                    continue;
                }

                match decoder.decode(data) {
                    Ok(items) => {
                        for item in items {
                            yield Ok(item);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if let Some(call) = decoder.finish() {
                yield Ok(call);
            }
        };

        Ok(Box::pin(stream))
    }
}

// Request wire format

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

impl<'a> ChatRequest<'a> {
    fn new(
        settings: &'a ModelSettings,
        messages: &[Message],
        tool: Option<&'a ToolDeclaration>,
    ) -> Self {
        Self {
            model: &settings.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools: tool.map(|t| {
                vec![WireTool {
                    kind: "function",
                    function: WireFunction {
                        name: &t.name,
                        description: &t.description,
                        parameters: &t.parameters,
                    },
                }]
            }),
            tool_choice: tool.map(|_| "auto"),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            top_p: settings.top_p,
            stream: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => "tool",
        };

        let content = match (&msg.content, &msg.tool_call) {
            (MessageContent::Text(text), Some(_)) if text.is_empty() => None,
            _ => Some(msg.content_text()),
        };

        let tool_call_id = match msg.role {
            Role::ToolResult => Some(
                msg.tool_call_id
                    .clone()
                    .unwrap_or_else(|| FALLBACK_CALL_ID.to_string()),
            ),
            _ => None,
        };

        Self {
            role,
            content,
            name: msg.name.clone(),
            tool_calls: msg.tool_call.as_ref().map(|call| vec![WireToolCall::from(call)]),
            tool_call_id,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

impl From<&ToolInvocation> for WireToolCall {
    fn from(call: &ToolInvocation) -> Self {
        let arguments = match &call.arguments {
            serde_json::Value::String(raw) => raw.clone(),
            other => other.to_string(),
        };
        Self {
            id: call
                .id
                .clone()
                .unwrap_or_else(|| FALLBACK_CALL_ID.to_string()),
            kind: "function",
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

// Streaming response wire format

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Tool call being assembled from deltas
#[derive(Debug, Default)]
struct PartialCall {
    index: usize,
    id: Option<String>,
    name: String,
    arguments: String,
}

impl PartialCall {
    /// A new index or a different call id begins another call
    fn starts_new_call(&self, delta: &ToolCallDelta) -> bool {
        if self.index != delta.index {
            return true;
        }
        matches!((&self.id, &delta.id), (Some(current), Some(next)) if current != next)
    }

    fn into_event(self) -> ModelEvent {
        let arguments = if self.arguments.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&self.arguments)
                .unwrap_or(serde_json::Value::String(self.arguments))
        };
        ModelEvent::ToolCall(ToolInvocation {
            id: self.id,
            name: self.name,
            arguments,
        })
    }
}

/// Turns SSE chunk payloads into [`ModelEvent`]s
#[derive(Debug, Default)]
struct ChunkDecoder {
    pending: Option<PartialCall>,
}

impl ChunkDecoder {
    fn decode(&mut self, data: &str) -> Result<Vec<ModelEvent>, ModelError> {
        let chunk: ChatChunk = serde_json::from_str(data)
            .map_err(|e| ModelError::Decode(format!("{}: {}", e, data)))?;

        if let Some(error) = chunk.error {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ModelError::Api(message));
        }

        let mut out = Vec::new();
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(out);
        };

        let delta = choice.delta.unwrap_or_default();
        if let Some(text) = delta.content {
            if !text.is_empty() {
                out.push(ModelEvent::Text(text));
            }
        }

        for delta in delta.tool_calls.unwrap_or_default() {
            if self.pending.as_ref().is_some_and(|p| p.starts_new_call(&delta)) {
                out.extend(self.finish());
            }
            let pending = self.pending.get_or_insert_with(|| PartialCall {
                index: delta.index,
                ..Default::default()
            });
            if let Some(id) = delta.id {
                pending.id = Some(id);
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    pending.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    pending.arguments.push_str(&arguments);
                }
            }
        }

        if choice.finish_reason.is_some() {
            out.extend(self.finish());
        }

        Ok(out)
    }

    /// Flush the call being assembled, if any
    fn finish(&mut self) -> Option<ModelEvent> {
        self.pending.take().map(PartialCall::into_event)
    }
}
