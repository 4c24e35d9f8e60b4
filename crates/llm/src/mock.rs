//! Scripted mock backend
//!
//! Drives the orchestration loop in tests without a network. Each call to
//! `stream_turn` consumes the next scripted turn in order.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use callpilot_core::{Message, ToolCallRequest};

use crate::backend::{ModelBackend, ModelEvent, ModelTurn, StopReason, ToolDefinition};
use crate::LlmError;

/// One scripted model turn
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    /// Text streamed as individual deltas
    pub text_chunks: Vec<String>,
    /// Tool calls surfaced after the text, as (name, arguments)
    pub tool_calls: Vec<(String, HashMap<String, Value>)>,
    /// When set, the stream fails with this message after the text chunks
    pub fail_with: Option<String>,
}

impl ScriptedTurn {
    pub fn text(chunks: &[&str]) -> Self {
        Self {
            text_chunks: chunks.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_tool_call(mut self, name: &str, arguments: Value) -> Self {
        let map = arguments
            .as_object()
            .map(|o| o.clone().into_iter().collect())
            .unwrap_or_default();
        self.tool_calls.push((name.to_string(), map));
        self
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Default::default()
        }
    }
}

/// Mock backend replaying a fixed script
#[derive(Default)]
pub struct MockBackend {
    turns: Mutex<Vec<ScriptedTurn>>,
    /// System prompts observed per turn, for assertions
    seen_systems: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns),
            seen_systems: Mutex::new(Vec::new()),
        }
    }

    /// System prompts received so far
    pub fn seen_systems(&self) -> Vec<String> {
        self.seen_systems.lock().clone()
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn stream_turn(
        &self,
        system: &str,
        _messages: &[Message],
        _tools: &[ToolDefinition],
        tx: mpsc::Sender<ModelEvent>,
    ) -> Result<ModelTurn, LlmError> {
        self.seen_systems.lock().push(system.to_string());

        let turn = {
            let mut turns = self.turns.lock();
            if turns.is_empty() {
                ScriptedTurn::text(&["(no script left)"])
            } else {
                turns.remove(0)
            }
        };

        let mut full_text = String::new();
        for chunk in &turn.text_chunks {
            full_text.push_str(chunk);
            let _ = tx.send(ModelEvent::TextDelta(chunk.clone())).await;
        }

        if let Some(message) = turn.fail_with {
            return Err(LlmError::Api(message));
        }

        let mut tool_calls = Vec::new();
        for (name, arguments) in turn.tool_calls {
            let call = ToolCallRequest {
                id: ToolCallRequest::disambiguate_id("mock"),
                name,
                arguments,
            };
            let _ = tx.send(ModelEvent::ToolCall(call.clone())).await;
            tool_calls.push(call);
        }

        let stop_reason = if tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        };

        Ok(ModelTurn {
            text: full_text,
            tool_calls,
            stop_reason,
        })
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}
