//! Orchestration driver
//!
//! An explicit finite-state machine wires router, persona execution and
//! tool execution into exactly one turn per invocation. Transitions are
//! pure functions over (state, outcome); the event channel is built fresh
//! per request and never shared across sessions.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, instrument, warn};

use callpilot_config::Settings;
use callpilot_core::{
    AgentKind, ConversationState, Result, SessionStatus, TurnEvent,
};
use callpilot_llm::{ModelBackend, PromptCache};
use callpilot_tools::ToolRegistry;

use crate::execution::AgentNode;
use crate::router::route;
use crate::sink::EventSink;
use crate::tool_node::ToolNode;

/// Upper bound on persona/tool round-trips within one turn; a persona that
/// keeps requesting tools past this is cut off rather than looped forever.
const MAX_TOOL_ROUNDS: u32 = 8;

/// Driver position within one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// A persona is about to take a model turn
    Persona(AgentKind),
    /// Pending tool calls execute, then control returns to the requester
    Tools { requester: AgentKind },
    End,
}

/// Next state after a persona turn. The neutral persona never requests
/// tools; a specialist proceeds to tools iff it left unprocessed calls.
pub fn after_persona(agent: AgentKind, has_pending_calls: bool) -> DriverState {
    if agent.is_specialist() && has_pending_calls {
        DriverState::Tools { requester: agent }
    } else {
        DriverState::End
    }
}

/// Next state after tool execution: a completed session ends the turn,
/// otherwise results return to the persona that requested them, never to
/// the router.
pub fn after_tools(requester: AgentKind, status: SessionStatus) -> DriverState {
    if status == SessionStatus::Completed {
        DriverState::End
    } else {
        DriverState::Persona(requester)
    }
}

/// One-turn orchestration engine.
///
/// Constructed once per process (backends and tool catalogs are expensive)
/// and reused across requests; everything request-scoped flows through
/// `run_turn` arguments.
pub struct Orchestrator {
    backend: Arc<dyn ModelBackend>,
    registry: Arc<ToolRegistry>,
    prompt_cache: Arc<PromptCache>,
    settings: Settings,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        registry: Arc<ToolRegistry>,
        settings: Settings,
    ) -> Self {
        let prompt_cache = Arc::new(PromptCache::new(settings.prompt_cache_capacity));
        Self {
            backend,
            registry,
            prompt_cache,
            settings,
        }
    }

    /// Drive exactly one turn, emitting ordered events on `tx` and
    /// returning the resolved end-of-turn state (also carried by the
    /// terminal `Final` event).
    ///
    /// A model-stream failure aborts the turn and propagates; events
    /// already emitted stand as-is and no `Final` event is produced.
    #[instrument(skip_all, fields(model = self.backend.model_name()))]
    pub async fn run_turn(
        &self,
        mut state: ConversationState,
        tx: mpsc::Sender<TurnEvent>,
    ) -> Result<ConversationState> {
        let sink = EventSink::new(tx);

        // Entry is computed by the router on every invocation, allowing
        // re-routing between turns of the same session.
        let decision = route(&state, &self.settings.router);
        if decision.agent != state.current_agent {
            info!(
                from = %state.current_agent,
                to = %decision.agent,
                confidence = decision.confidence,
                "persona switch"
            );
            sink.emit(TurnEvent::AgentSwitch {
                from: state.current_agent,
                to: decision.agent,
                reason: decision.reason.clone(),
                confidence: decision.confidence,
            })
            .await;
        }
        state.assign_agent(decision.agent);

        let agent_node = AgentNode::new(
            self.backend.as_ref(),
            &self.registry,
            &self.prompt_cache,
            &self.settings,
        );
        let tool_node = ToolNode::new(&self.registry, &self.settings.tools);

        let mut current = DriverState::Persona(decision.agent);
        let mut tool_rounds = 0u32;

        while current != DriverState::End {
            debug!(state = ?current, "driver transition");
            current = match current {
                DriverState::Persona(agent) => {
                    agent_node.run(agent, &mut state, &sink).await?;
                    after_persona(agent, !state.pending_tool_calls().is_empty())
                }
                DriverState::Tools { requester } => {
                    tool_rounds += 1;
                    if tool_rounds > MAX_TOOL_ROUNDS {
                        warn!(requester = %requester, "tool round limit reached, ending turn");
                        DriverState::End
                    } else {
                        tool_node.run(&mut state, &sink).await?;
                        after_tools(requester, state.status)
                    }
                }
                DriverState::End => DriverState::End,
            };
        }

        sink.emit(TurnEvent::Final {
            state: Box::new(state.clone()),
        })
        .await;

        Ok(state)
    }

    /// Spawn one turn on the runtime and hand back its event stream.
    ///
    /// Dropping the stream cancels delivery; the aborted turn is not
    /// resumed. A model failure ends the stream without a `Final` event.
    pub fn stream_turn(self: &Arc<Self>, state: ConversationState) -> ReceiverStream<TurnEvent> {
        let (tx, rx) = mpsc::channel(64);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(err) = orchestrator.run_turn(state, tx).await {
                error!(error = %err, "turn aborted");
            }
        });
        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_persona_always_ends_turn() {
        assert_eq!(after_persona(AgentKind::Router, false), DriverState::End);
        // The neutral persona is bound to zero tools, so pending calls
        // cannot occur; the transition still never routes it to tools.
        assert_eq!(after_persona(AgentKind::Router, true), DriverState::End);
    }

    #[test]
    fn test_specialist_goes_to_tools_only_with_pending_calls() {
        assert_eq!(
            after_persona(AgentKind::Financial, true),
            DriverState::Tools {
                requester: AgentKind::Financial
            }
        );
        assert_eq!(after_persona(AgentKind::Financial, false), DriverState::End);
    }

    #[test]
    fn test_tools_return_to_requester_never_router() {
        assert_eq!(
            after_tools(AgentKind::Support, SessionStatus::Calling),
            DriverState::Persona(AgentKind::Support)
        );
        assert_eq!(
            after_tools(AgentKind::Support, SessionStatus::Completed),
            DriverState::End
        );
    }
}
