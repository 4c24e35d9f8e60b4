//! Agent execution node
//!
//! One shared engine parameterized by persona: assembles the instruction
//! prompt, submits the full transcript to the model with the persona's
//! tool catalog, and relays the stream as ordered turn events.

use tokio::sync::mpsc;
use tracing::{info, instrument};

use callpilot_config::Settings;
use callpilot_core::{
    AgentKind, ConversationState, Error, Message, Result, ToolCallDisplay, TurnEvent,
};
use callpilot_llm::{
    breaker_warning, ModelBackend, ModelEvent, PromptBuilder, PromptCache, ToolDefinition,
};
use callpilot_tools::ToolRegistry;

use crate::sink::EventSink;

/// Runs one persona turn against the model
pub struct AgentNode<'a> {
    backend: &'a dyn ModelBackend,
    registry: &'a ToolRegistry,
    prompt_cache: &'a PromptCache,
    settings: &'a Settings,
}

impl<'a> AgentNode<'a> {
    pub fn new(
        backend: &'a dyn ModelBackend,
        registry: &'a ToolRegistry,
        prompt_cache: &'a PromptCache,
        settings: &'a Settings,
    ) -> Self {
        Self {
            backend,
            registry,
            prompt_cache,
            settings,
        }
    }

    /// Assemble the instruction prompt for `agent`, appending the breaker
    /// warning (never cached) when the circuit is open.
    fn system_prompt(&self, agent: AgentKind, state: &ConversationState) -> String {
        let mut prompt = PromptBuilder::for_agent(agent)
            .with_request_context(&state.request_context)
            .with_trusted_profile(&state.shared_secrets.profile)
            .build_cached(self.prompt_cache);

        if let Some(tool) = state.last_failed_tool.as_deref() {
            if state.circuit_open_for(tool, self.settings.tools.breaker_threshold) {
                prompt.push_str(&breaker_warning(tool));
            }
        }

        prompt
    }

    /// Tool definitions bound to `agent`: the neutral persona gets none,
    /// specialists get the full catalog.
    fn bound_tools(&self, agent: AgentKind) -> Vec<ToolDefinition> {
        if !agent.is_specialist() {
            return Vec::new();
        }
        self.registry
            .schemas()
            .into_iter()
            .map(|s| ToolDefinition::new(s.name, s.description, s.input_schema))
            .collect()
    }

    /// Stream one model turn for `agent`, appending the assistant message
    /// and deriving the end-of-turn status.
    #[instrument(skip(self, state, sink), fields(agent = %agent))]
    pub async fn run(
        &self,
        agent: AgentKind,
        state: &mut ConversationState,
        sink: &EventSink,
    ) -> Result<()> {
        let system = self.system_prompt(agent, state);
        let tools = self.bound_tools(agent);

        sink.emit(TurnEvent::AgentHeader {
            agent,
            label: agent.display_name().to_string(),
        })
        .await;

        let message_id = uuid::Uuid::new_v4().to_string();
        sink.emit(TurnEvent::TextStart {
            message_id: message_id.clone(),
        })
        .await;

        let (tx, mut rx) = mpsc::channel::<ModelEvent>(64);
        let stream = self.backend.stream_turn(&system, &state.messages, &tools, tx);

        let forward = async {
            while let Some(event) = rx.recv().await {
                match event {
                    ModelEvent::TextDelta(delta) => {
                        sink.emit(TurnEvent::TextDelta {
                            message_id: message_id.clone(),
                            delta,
                        })
                        .await;
                    }
                    ModelEvent::ToolCall(call) => {
                        let display = self
                            .registry
                            .get(&call.name)
                            .map(|t| t.display())
                            .unwrap_or_else(|| ToolCallDisplay {
                                label: format!("Running {}", call.name),
                                description: String::new(),
                                estimated_duration_ms: 0,
                            });
                        sink.emit(TurnEvent::ToolCall {
                            id: call.id,
                            name: call.name,
                            arguments: call.arguments,
                            display,
                        })
                        .await;
                    }
                }
            }
        };

        // A transport or parse failure aborts the turn; events already
        // emitted stand as-is.
        let (turn, ()) = tokio::join!(stream, forward);
        let turn = turn.map_err(Error::from)?;

        sink.emit(TurnEvent::TextEnd {
            message_id,
            text: turn.text.clone(),
        })
        .await;

        info!(
            agent = %agent,
            tool_calls = turn.tool_calls.len(),
            "agent turn complete"
        );

        let has_tool_calls = turn.has_tool_calls();
        let assistant = Message::assistant(turn.text).with_tool_calls(turn.tool_calls);
        state.push_message(assistant);

        state.status = state.status.after_agent_turn(has_tool_calls);
        sink.emit(TurnEvent::Status {
            status: state.status,
        })
        .await;

        Ok(())
    }
}
