//! Model backend trait and streaming event types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use callpilot_core::{Message, ToolCallRequest};

use crate::LlmError;

/// Tool definition handed to the model (JSON Schema parameters)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Incremental event surfaced while the model streams one turn
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// Text fragment
    TextDelta(String),
    /// A complete tool-call request, id already session-disambiguated
    ToolCall(ToolCallRequest),
}

/// Why the model stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    EndTurn,
    MaxTokens,
    ToolUse,
}

/// Collected result of one streamed model turn
#[derive(Debug, Clone)]
pub struct ModelTurn {
    /// Full accumulated text
    pub text: String,
    /// Tool calls requested during the turn, in generation order
    pub tool_calls: Vec<ToolCallRequest>,
    pub stop_reason: StopReason,
}

impl ModelTurn {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Language-model backend
///
/// Implementations are constructed once and reused across turns and
/// requests; the event channel is request-scoped and always fresh.
/// A transport or validation failure is fatal for the turn and must be
/// propagated, never swallowed; events already sent stand as-is.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Stream one turn. Text deltas and tool-call requests are sent over
    /// `tx` as they surface; the collected turn is returned at the end.
    async fn stream_turn(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        tx: mpsc::Sender<ModelEvent>,
    ) -> Result<ModelTurn, LlmError>;

    /// Model name for logging
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definition_shape() {
        let def = ToolDefinition::new(
            "web_search",
            "Search the web",
            serde_json::json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"],
            }),
        );
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["name"], "web_search");
        assert!(json["parameters"]["properties"]["query"].is_object());
    }

    #[test]
    fn test_model_turn_has_tool_calls() {
        let turn = ModelTurn {
            text: String::new(),
            tool_calls: vec![ToolCallRequest::new("id1", "web_search")],
            stop_reason: StopReason::ToolUse,
        };
        assert!(turn.has_tool_calls());
    }
}
