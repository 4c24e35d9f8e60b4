//! Tool trait and schema types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use callpilot_core::ToolCallDisplay;

/// Tool execution errors
#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Downstream error: {0}")]
    Downstream(String),

    #[error("Tool {tool} timed out after {secs}s")]
    Timeout { tool: String, secs: u64 },

    #[error("Circuit breaker open for {tool} after {failures} consecutive failures")]
    CircuitOpen { tool: String, failures: u32 },
}

impl ToolError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    pub fn timeout(tool: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            tool: tool.into(),
            secs,
        }
    }

    /// Whether retrying the same call could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Downstream(_))
    }
}

/// Tool output payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Value,
}

impl ToolOutput {
    pub fn json(content: Value) -> Self {
        Self { content }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Value::String(text.into()),
        }
    }

    /// Serialized form appended to history as a tool message
    pub fn to_message_content(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Declared tool interface: name, description, argument schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object
    pub input_schema: Value,
}

/// Builder for JSON Schema argument definitions
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    properties: serde_json::Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter with type and description
    pub fn param(
        mut self,
        name: impl Into<String>,
        param_type: &str,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(
            name.clone(),
            json!({
                "type": param_type,
                "description": description.into(),
            }),
        );
        if required {
            self.required.push(name);
        }
        self
    }

    /// Add an array-of-strings parameter
    pub fn string_array(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(
            name.clone(),
            json!({
                "type": "array",
                "items": {"type": "string"},
                "description": description.into(),
            }),
        );
        if required {
            self.required.push(name);
        }
        self
    }

    /// Constrain an existing string parameter to an enum
    pub fn string_enum(mut self, name: &str, values: &[&str]) -> Self {
        if let Some(Value::Object(prop)) = self.properties.get_mut(name) {
            prop.insert("enum".to_string(), json!(values));
        }
        self
    }

    pub fn build(self) -> Value {
        json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required,
        })
    }
}

/// External capability callable by a persona
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Display metadata emitted with the tool-call event
    fn display(&self) -> ToolCallDisplay;

    fn schema(&self) -> ToolSchema;

    /// Read-only tools are idempotent and safely retryable.
    fn idempotent(&self) -> bool {
        true
    }

    /// Retry budget for one logical call. Side-effecting tools pin this
    /// to 1.
    fn max_attempts(&self) -> u32 {
        3
    }

    /// Validate arguments before execution
    fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        if !arguments.is_object() {
            return Err(ToolError::invalid_params("arguments must be an object"));
        }
        Ok(())
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_builder() {
        let schema = SchemaBuilder::new()
            .param("query", "string", "Search query", true)
            .param("limit", "integer", "Max results", false)
            .build();

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["query"]));
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
    }

    #[test]
    fn test_string_enum_constraint() {
        let schema = SchemaBuilder::new()
            .param("format", "string", "Output format", true)
            .string_enum("format", &["markdown", "html"])
            .build();
        assert_eq!(schema["properties"]["format"]["enum"], json!(["markdown", "html"]));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ToolError::Network("reset".into()).is_retryable());
        assert!(!ToolError::invalid_params("bad").is_retryable());
        assert!(!ToolError::CircuitOpen {
            tool: "web_search".into(),
            failures: 3
        }
        .is_retryable());
    }

    #[test]
    fn test_output_message_content() {
        assert_eq!(ToolOutput::text("hi").to_message_content(), "hi");
        let output = ToolOutput::json(json!({"ok": true}));
        assert_eq!(output.to_message_content(), "{\"ok\":true}");
    }
}
