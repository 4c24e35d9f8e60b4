//! Anthropic Messages API backend
//!
//! Streams responses over SSE with native tool_use support. Tool-call ids
//! from the provider are disambiguated on receipt so the processed-id
//! guard stays sound even when the provider reuses ids across turns.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use callpilot_config::ModelConfig;
use callpilot_core::{Message, MessageRole, ToolCallRequest};

use crate::backend::{ModelBackend, ModelEvent, ModelTurn, StopReason, ToolDefinition};
use crate::LlmError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API backend
pub struct AnthropicBackend {
    config: ModelConfig,
    client: Client,
}

impl AnthropicBackend {
    /// Create a new backend. The reqwest client is built once here and
    /// reused for every request.
    pub fn new(config: ModelConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::Configuration(
                "model API key not set (ANTHROPIC_API_KEY or model.api_key)".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| ApiMessage {
                role: match m.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    // Tool results travel back as user-role content
                    MessageRole::Tool => "user",
                    MessageRole::System => unreachable!(),
                }
                .to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<ApiTool> {
        tools
            .iter()
            .map(|t| ApiTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    async fn stream_turn(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        tx: mpsc::Sender<ModelEvent>,
    ) -> Result<ModelTurn, LlmError> {
        let api_tools = self.convert_tools(tools);
        let request = ApiRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            messages: self.convert_messages(messages),
            system: if system.is_empty() {
                None
            } else {
                Some(system.to_string())
            },
            tools: if api_tools.is_empty() {
                None
            } else {
                Some(api_tools)
            },
            temperature: Some(self.config.temperature),
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.endpoint))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();
        let mut tool_calls: Vec<ToolCallRequest> = Vec::new();
        let mut current_tool_id = String::new();
        let mut current_tool_name = String::new();
        let mut current_tool_input = String::new();
        let mut stop_reason = StopReason::EndTurn;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                let Some(json_str) = line.strip_prefix("data: ") else {
                    continue;
                };
                if json_str == "[DONE]" {
                    continue;
                }

                let Ok(event) = serde_json::from_str::<StreamEvent>(json_str) else {
                    continue;
                };

                match event {
                    StreamEvent::ContentBlockStart { content_block, .. } => {
                        if let ContentBlock::ToolUse { id, name, .. } = content_block {
                            current_tool_id = id;
                            current_tool_name = name;
                            current_tool_input.clear();
                        }
                    }
                    StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                        Delta::TextDelta { text } => {
                            full_text.push_str(&text);
                            let _ = tx.send(ModelEvent::TextDelta(text)).await;
                        }
                        Delta::InputJsonDelta { partial_json } => {
                            current_tool_input.push_str(&partial_json);
                        }
                    },
                    StreamEvent::ContentBlockStop { .. } => {
                        if !current_tool_name.is_empty() {
                            let arguments: HashMap<String, serde_json::Value> =
                                serde_json::from_str(&current_tool_input).unwrap_or_default();

                            let call = ToolCallRequest {
                                id: ToolCallRequest::disambiguate_id(&current_tool_id),
                                name: std::mem::take(&mut current_tool_name),
                                arguments,
                            };
                            current_tool_id.clear();
                            current_tool_input.clear();

                            tracing::debug!(
                                tool = %call.name,
                                call_id = %call.id,
                                "Model requested tool call"
                            );
                            let _ = tx.send(ModelEvent::ToolCall(call.clone())).await;
                            tool_calls.push(call);
                        }
                    }
                    StreamEvent::MessageDelta { delta, .. } => {
                        if let Some(reason) = delta.stop_reason {
                            stop_reason = match reason {
                                AnthropicStopReason::EndTurn
                                | AnthropicStopReason::StopSequence => StopReason::EndTurn,
                                AnthropicStopReason::MaxTokens => StopReason::MaxTokens,
                                AnthropicStopReason::ToolUse => StopReason::ToolUse,
                            };
                        }
                    }
                    StreamEvent::Error { error } => {
                        return Err(LlmError::Api(error.message));
                    }
                    _ => {}
                }
            }
        }

        Ok(ModelTurn {
            text: full_text,
            tool_calls,
            stop_reason,
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: usize,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(dead_code)] // fields required for deserialization
enum StreamEvent {
    MessageStart {
        message: serde_json::Value,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: Option<serde_json::Value>,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<AnthropicStopReason>,
}

/// Stop reasons as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnthropicStopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_rejected() {
        let config = ModelConfig {
            api_key: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            AnthropicBackend::new(config),
            Err(LlmError::Configuration(_))
        ));
    }

    #[test]
    fn test_request_serialization_omits_empty_sections() {
        let request = ApiRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 512,
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: "hello".to_string(),
            }],
            system: None,
            tools: None,
            temperature: Some(0.7),
            stream: true,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("\"system\""));
        assert!(!json.contains("\"tools\""));
        assert!(json.contains("\"stream\":true"));
    }

    #[test]
    fn test_stream_event_parsing() {
        let delta: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
        )
        .unwrap();
        assert!(matches!(
            delta,
            StreamEvent::ContentBlockDelta {
                delta: Delta::TextDelta { .. },
                ..
            }
        ));

        let start: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"web_search","input":{}}}"#,
        )
        .unwrap();
        assert!(matches!(
            start,
            StreamEvent::ContentBlockStart {
                content_block: ContentBlock::ToolUse { .. },
                ..
            }
        ));

        let stop: StreamEvent = serde_json::from_str(
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":12}}"#,
        )
        .unwrap();
        match stop {
            StreamEvent::MessageDelta { delta, .. } => {
                assert_eq!(delta.stop_reason, Some(AnthropicStopReason::ToolUse));
            }
            _ => panic!("wrong event"),
        }
    }

    #[test]
    fn test_message_conversion_maps_tool_to_user() {
        let config = ModelConfig {
            api_key: "test-key".to_string(),
            ..Default::default()
        };
        let backend = AnthropicBackend::new(config).unwrap();
        let messages = vec![
            Message::system("instructions"),
            Message::user("hi"),
            Message::tool("{\"ok\":true}", "call-1"),
        ];
        let converted = backend.convert_messages(&messages);
        assert_eq!(converted.len(), 2); // system filtered out
        assert_eq!(converted[1].role, "user");
    }
}
