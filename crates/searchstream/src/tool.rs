//! The `search_and_parse` tool contract

use crate::error::Error;
use crate::types::ToolInvocation;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

/// Name the model uses to invoke the search tool
pub const SEARCH_TOOL_NAME: &str = "search_and_parse";

/// Tool description for LLM consumption
pub const SEARCH_TOOL_DESCRIPTION: &str = "Search the web and parse content from the results";

/// Arguments of a `search_and_parse` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// The search query to use
    pub query: String,
}

impl SearchArgs {
    /// Parse the arguments of a tool invocation
    pub fn from_invocation(call: &ToolInvocation) -> Result<Self, Error> {
        serde_json::from_value(call.arguments.clone())
            .map_err(|e| Error::InvalidToolArguments(format!("{}: {}", e, call.arguments)))
    }
}

/// A function the model may call, as declared to the model service
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object
    pub parameters: serde_json::Value,
}

impl ToolDeclaration {
    /// Declaration of the web search tool
    pub fn search_and_parse() -> Self {
        Self {
            name: SEARCH_TOOL_NAME.to_string(),
            description: SEARCH_TOOL_DESCRIPTION.to_string(),
            parameters: search_args_schema(),
        }
    }
}

/// JSON schema for [`SearchArgs`], without the draft and title keys
pub fn search_args_schema() -> serde_json::Value {
    let schema = schema_for!(SearchArgs);
    let mut value = serde_json::to_value(schema).unwrap_or_default();

    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }

    value
}
