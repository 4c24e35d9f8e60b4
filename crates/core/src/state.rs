//! Conversation state threaded through one orchestration turn
//!
//! A `ConversationState` is constructed fresh per invocation from the
//! caller-supplied message history, mutated node-by-node as the driver
//! executes, and discarded once the final event is emitted. The caller
//! persists whichever subset it needs (new messages, agent label).

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default retention for processed tool-call ids
pub const PROCESSED_IDS_RETENTION: usize = 20;

/// Persona identifiers
///
/// `Router` is the neutral conversation persona; it is bound to zero tools.
/// The remaining variants are domain specialists bound to the full catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Router,
    Financial,
    Insurance,
    Booking,
    Account,
    Support,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Financial => "financial",
            Self::Insurance => "insurance",
            Self::Booking => "booking",
            Self::Account => "account",
            Self::Support => "support",
        }
    }

    /// Parse a persisted agent label, falling back to `Router` when the
    /// label is absent or unrecognized.
    pub fn parse_label(label: Option<&str>) -> Self {
        match label.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            Some("financial") => Self::Financial,
            Some("insurance") => Self::Insurance,
            Some("booking") => Self::Booking,
            Some("account") => Self::Account,
            Some("support") => Self::Support,
            Some("router") => Self::Router,
            _ => Self::Router,
        }
    }

    /// Domain specialists, in fixed priority order for tie-breaking.
    pub fn specialists() -> [AgentKind; 5] {
        [
            Self::Financial,
            Self::Insurance,
            Self::Booking,
            Self::Account,
            Self::Support,
        ]
    }

    pub fn is_specialist(&self) -> bool {
        !matches!(self, Self::Router)
    }

    /// Human-readable header shown to the caller UI
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Router => "Assistant",
            Self::Financial => "Financial Specialist",
            Self::Insurance => "Insurance Specialist",
            Self::Booking => "Booking Specialist",
            Self::Account => "Account Specialist",
            Self::Support => "Technical Support Specialist",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session status, monotonic within a single driver pass:
/// routing -> collecting -> calling -> completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Routing,
    Collecting,
    Calling,
    Completed,
}

impl SessionStatus {
    /// Derive the status at the end of an agent turn.
    ///
    /// Pending tool calls move the session to `Calling`. A `Completed`
    /// session stays completed, and `Calling` never regresses to
    /// `Collecting` while the session still awaits call resolution.
    pub fn after_agent_turn(self, has_pending_tool_calls: bool) -> Self {
        if has_pending_tool_calls {
            return Self::Calling;
        }
        match self {
            Self::Completed => Self::Completed,
            Self::Calling => Self::Calling,
            _ => Self::Collecting,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::Collecting => "collecting",
            Self::Calling => "calling",
            Self::Completed => "completed",
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Session-unique id. Provider ids are disambiguated on receipt so the
    /// same provider-side id never collides across turns.
    pub id: String,
    /// Tool name
    pub name: String,
    /// Structured arguments
    pub arguments: HashMap<String, Value>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: HashMap::new(),
        }
    }

    /// Make a provider-issued id globally unique for this session.
    ///
    /// Models occasionally reuse provider-side ids across turns; a timestamp
    /// plus a random fragment keeps the processed-id guard sound.
    pub fn disambiguate_id(provider_id: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}",
            provider_id,
            chrono::Utc::now().timestamp_millis(),
            &suffix[..8]
        )
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }
}

/// Conversation message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    /// Tool calls attached to an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set only when role is `Tool`: the id of the call this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Participant name, when the caller supplies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    /// Tool result message answering `tool_call_id`
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(MessageRole::Tool, content)
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = calls;
        self
    }
}

/// Best-effort identity hints supplied by the caller. Any subset may be
/// absent; every field is sanitized before prompt interpolation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl RequestContext {
    /// Present fields as (label, value) pairs, in a stable order.
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(v) = self.name.as_deref() {
            out.push(("name", v));
        }
        if let Some(v) = self.email.as_deref() {
            out.push(("email", v));
        }
        if let Some(v) = self.phone.as_deref() {
            out.push(("phone", v));
        }
        if let Some(v) = self.timezone.as_deref() {
            out.push(("timezone", v));
        }
        if let Some(v) = self.address.as_deref() {
            out.push(("address", v));
        }
        out
    }
}

/// Session identifiers and trusted profile snapshot used to enrich the
/// call-initiation tool. These come from the hosting application, not from
/// model output, and are treated as trusted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedSecrets {
    pub session_id: String,
    pub auth_token: String,
    /// Trusted user-profile fields (callback number, address, timezone, ...)
    #[serde(default)]
    pub profile: HashMap<String, String>,
}

/// Structured payload populated once the call-initiation tool succeeds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResult {
    pub call_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Raw provider response for caller-side persistence
    #[serde(default)]
    pub details: Value,
}

/// Bounded, insertion-ordered set of tool-call ids already executed this
/// session. The sole de-duplication guard against re-executing a call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessedCallIds {
    ids: VecDeque<String>,
}

impl ProcessedCallIds {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|i| i == id)
    }

    /// Record an id, trimming the oldest entries beyond the retention cap.
    pub fn insert(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.contains(&id) {
            return;
        }
        if self.ids.len() >= PROCESSED_IDS_RETENTION {
            self.ids.pop_front();
        }
        self.ids.push_back(id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// The mutable record threaded through one orchestration invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    /// Ordered message history; insertion order is conversational order.
    pub messages: Vec<Message>,
    pub request_context: RequestContext,
    pub shared_secrets: SharedSecrets,
    pub status: SessionStatus,
    pub current_agent: AgentKind,
    pub call_result: Option<CallResult>,
    pub processed_tool_call_ids: ProcessedCallIds,
    /// Consecutive failures of `last_failed_tool`
    pub consecutive_tool_failures: u32,
    pub last_failed_tool: Option<String>,
    /// Turns spent with the current persona; resets on persona change
    pub agent_turn_count: u32,
}

impl ConversationState {
    /// Build the per-invocation state from caller-supplied history and the
    /// agent label persisted after the previous turn.
    pub fn from_history(
        messages: Vec<Message>,
        request_context: RequestContext,
        shared_secrets: SharedSecrets,
        persisted_agent: Option<&str>,
    ) -> Self {
        Self {
            messages,
            request_context,
            shared_secrets,
            status: SessionStatus::Routing,
            current_agent: AgentKind::parse_label(persisted_agent),
            call_result: None,
            processed_tool_call_ids: ProcessedCallIds::default(),
            consecutive_tool_failures: 0,
            last_failed_tool: None,
            agent_turn_count: 0,
        }
    }

    /// Latest user-authored message content, if any
    pub fn latest_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }

    /// Latest assistant message, if any
    pub fn latest_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
    }

    /// Tool calls attached to the latest assistant message whose ids have
    /// not been executed yet, in generation order.
    pub fn pending_tool_calls(&self) -> Vec<ToolCallRequest> {
        self.latest_assistant()
            .map(|m| {
                m.tool_calls
                    .iter()
                    .filter(|c| !self.processed_tool_call_ids.contains(&c.id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Record a tool failure for the circuit breaker. The counter tracks
    /// consecutive failures of a single tool name; a failure of a different
    /// tool reassigns it.
    pub fn record_tool_failure(&mut self, tool_name: &str) {
        if self.last_failed_tool.as_deref() == Some(tool_name) {
            self.consecutive_tool_failures += 1;
        } else {
            self.last_failed_tool = Some(tool_name.to_string());
            self.consecutive_tool_failures = 1;
        }
    }

    /// Any success clears the breaker counter.
    pub fn record_tool_success(&mut self) {
        self.consecutive_tool_failures = 0;
        self.last_failed_tool = None;
    }

    /// Whether the breaker is open for `tool_name` at `threshold`
    /// consecutive failures.
    pub fn circuit_open_for(&self, tool_name: &str, threshold: u32) -> bool {
        self.last_failed_tool.as_deref() == Some(tool_name)
            && self.consecutive_tool_failures >= threshold
    }

    /// Update persona bookkeeping at the router decision point.
    pub fn assign_agent(&mut self, agent: AgentKind) {
        if self.current_agent == agent {
            self.agent_turn_count += 1;
        } else {
            self.current_agent = agent;
            self.agent_turn_count = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_label_parsing() {
        assert_eq!(AgentKind::parse_label(Some("support")), AgentKind::Support);
        assert_eq!(AgentKind::parse_label(Some(" Financial ")), AgentKind::Financial);
        assert_eq!(AgentKind::parse_label(Some("bogus")), AgentKind::Router);
        assert_eq!(AgentKind::parse_label(None), AgentKind::Router);
    }

    #[test]
    fn test_status_never_regresses_from_calling() {
        assert_eq!(
            SessionStatus::Calling.after_agent_turn(false),
            SessionStatus::Calling
        );
        assert_eq!(
            SessionStatus::Calling.after_agent_turn(true),
            SessionStatus::Calling
        );
        assert_eq!(
            SessionStatus::Completed.after_agent_turn(false),
            SessionStatus::Completed
        );
        assert_eq!(
            SessionStatus::Collecting.after_agent_turn(true),
            SessionStatus::Calling
        );
        assert_eq!(
            SessionStatus::Routing.after_agent_turn(false),
            SessionStatus::Collecting
        );
    }

    #[test]
    fn test_processed_ids_bounded() {
        let mut ids = ProcessedCallIds::default();
        for i in 0..PROCESSED_IDS_RETENTION + 5 {
            ids.insert(format!("call-{}", i));
        }
        assert_eq!(ids.len(), PROCESSED_IDS_RETENTION);
        assert!(!ids.contains("call-0"));
        assert!(ids.contains(&format!("call-{}", PROCESSED_IDS_RETENTION + 4)));
    }

    #[test]
    fn test_breaker_counter_reassigns_on_different_tool() {
        let mut state =
            ConversationState::from_history(vec![], Default::default(), Default::default(), None);

        state.record_tool_failure("web_search");
        state.record_tool_failure("web_search");
        state.record_tool_failure("web_search");
        assert!(state.circuit_open_for("web_search", 3));

        state.record_tool_failure("scrape_page");
        assert!(!state.circuit_open_for("web_search", 3));
        assert_eq!(state.consecutive_tool_failures, 1);

        state.record_tool_success();
        assert!(state.last_failed_tool.is_none());
    }

    #[test]
    fn test_pending_tool_calls_skips_processed() {
        let mut state =
            ConversationState::from_history(vec![], Default::default(), Default::default(), None);
        let calls = vec![
            ToolCallRequest::new("a", "web_search"),
            ToolCallRequest::new("b", "scrape_page"),
        ];
        state.push_message(Message::assistant("checking").with_tool_calls(calls));
        state.processed_tool_call_ids.insert("a");

        let pending = state.pending_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b");
    }

    #[test]
    fn test_agent_turn_count() {
        let mut state =
            ConversationState::from_history(vec![], Default::default(), Default::default(), Some("support"));
        state.assign_agent(AgentKind::Support);
        state.assign_agent(AgentKind::Support);
        assert_eq!(state.agent_turn_count, 2);
        state.assign_agent(AgentKind::Financial);
        assert_eq!(state.agent_turn_count, 1);
    }

    #[test]
    fn test_disambiguated_ids_differ() {
        let a = ToolCallRequest::disambiguate_id("toolu_01");
        let b = ToolCallRequest::disambiguate_id("toolu_01");
        assert_ne!(a, b);
        assert!(a.starts_with("toolu_01_"));
    }
}
