//! Lifecycle events streamed back to the caller
//!
//! Events form a closed tagged union and must be consumed in emission
//! order; callers must not reorder or skip events, since rendered text
//! state depends on monotonic delta application.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::state::{AgentKind, ConversationState, SessionStatus};

/// Display metadata attached to a tool-call event so callers can render
/// activity before the result arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDisplay {
    /// Human label, e.g. "Searching the web"
    pub label: String,
    pub description: String,
    /// Rough duration estimate for progress display
    pub estimated_duration_ms: u64,
}

/// One lifecycle event within a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TurnEvent {
    /// Announces which persona handles this turn
    AgentHeader {
        agent: AgentKind,
        label: String,
    },
    /// A streamed assistant message begins
    TextStart {
        message_id: String,
    },
    /// Incremental text fragment
    TextDelta {
        message_id: String,
        delta: String,
    },
    /// Stream finished; carries the full accumulated text
    TextEnd {
        message_id: String,
        text: String,
    },
    /// A tool invocation requested by the model, emitted as it surfaces
    ToolCall {
        id: String,
        name: String,
        arguments: HashMap<String, Value>,
        display: ToolCallDisplay,
    },
    /// Outcome of one tool invocation
    ToolResult {
        id: String,
        name: String,
        success: bool,
        /// Serialized tool output on success, error description on failure
        result: Value,
        attempts: u32,
    },
    /// Session status changed
    Status {
        status: SessionStatus,
    },
    /// Router moved the conversation to a different persona
    AgentSwitch {
        from: AgentKind,
        to: AgentKind,
        reason: String,
        confidence: f32,
    },
    /// Terminal event carrying the resolved end-of-turn state
    Final {
        state: Box<ConversationState>,
    },
}

impl TurnEvent {
    /// Stable tag used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentHeader { .. } => "agent-header",
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolResult { .. } => "tool-result",
            Self::Status { .. } => "status",
            Self::AgentSwitch { .. } => "agent-switch",
            Self::Final { .. } => "final",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tag_serialization() {
        let event = TurnEvent::AgentSwitch {
            from: AgentKind::Router,
            to: AgentKind::Support,
            reason: "support keywords".to_string(),
            confidence: 0.9,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"agent-switch\""));
        assert!(json.contains("\"to\":\"support\""));
    }

    #[test]
    fn test_text_delta_roundtrip() {
        let event = TurnEvent::TextDelta {
            message_id: "m1".to_string(),
            delta: "hel".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: TurnEvent = serde_json::from_str(&json).unwrap();
        match back {
            TurnEvent::TextDelta { delta, .. } => assert_eq!(delta, "hel"),
            other => panic!("unexpected event: {}", other.kind()),
        }
    }

    #[test]
    fn test_kind_matches_wire_tag() {
        let event = TurnEvent::Status {
            status: SessionStatus::Calling,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
    }
}
