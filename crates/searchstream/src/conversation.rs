//! Message history for one request

use crate::error::ConversationError;
use crate::types::{Message, Role, SearchAndExtractResult, ToolInvocation};

/// Append-only message list owned by a single conversation
///
/// Starts as `[system, user]`. At most one tool exchange (assistant tool
/// call plus its result) may be appended.
#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(user)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_tool_result(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::ToolResult)
    }

    /// Append the assistant's tool request and the tool's result
    pub fn push_tool_exchange(
        &mut self,
        assistant_text: impl Into<String>,
        call: ToolInvocation,
        result: SearchAndExtractResult,
    ) -> Result<(), ConversationError> {
        if self.has_tool_result() {
            return Err(ConversationError::ToolResultAlreadyAppended);
        }

        let name = call.name.clone();
        let call_id = call.id.clone();
        self.messages
            .push(Message::assistant_tool_call(assistant_text, call));
        self.messages
            .push(Message::tool_result(name, call_id, result));
        Ok(())
    }
}
