//! Tool execution node
//!
//! Runs every unprocessed tool call attached to the latest assistant
//! message, in generation order, one at a time. Policy lives here:
//! circuit breaker, bounded retry with exponential backoff, a hard
//! timeout over one call's full attempt sequence, and the
//! call-initiation special case.

use serde_json::{json, Map, Value};
use tokio::time::{sleep, timeout};
use tracing::{info, instrument, warn};

use callpilot_config::ToolPolicyConfig;
use callpilot_core::{
    CallResult, ConversationState, Message, Result, SessionStatus, ToolCallRequest, TurnEvent,
};
use callpilot_tools::{
    enrich_call_context, ToolError, ToolExecutor, ToolOutput, ToolRegistry, CALL_TOOL_NAME,
};

use crate::sink::EventSink;

/// Executes pending tool calls against the registry
pub struct ToolNode<'a> {
    registry: &'a ToolRegistry,
    policy: &'a ToolPolicyConfig,
}

struct CallOutcome {
    result: std::result::Result<ToolOutput, ToolError>,
    attempts: u32,
}

impl<'a> ToolNode<'a> {
    pub fn new(registry: &'a ToolRegistry, policy: &'a ToolPolicyConfig) -> Self {
        Self { registry, policy }
    }

    /// Run all pending calls, appending a `Tool` role message per call so
    /// the next agent turn sees every outcome.
    #[instrument(skip_all)]
    pub async fn run(&self, state: &mut ConversationState, sink: &EventSink) -> Result<()> {
        for call in state.pending_tool_calls() {
            // Marking the id first is the at-most-once guard; even an
            // aborted attempt is never re-run under the same id.
            state.processed_tool_call_ids.insert(call.id.clone());

            if state.circuit_open_for(&call.name, self.policy.breaker_threshold) {
                warn!(tool = %call.name, "circuit open, skipping execution");
                let description = format!(
                    "circuit breaker open: {} failed {} consecutive times, call skipped",
                    call.name, state.consecutive_tool_failures
                );
                state.record_tool_failure(&call.name);
                self.finish_failure(state, sink, &call, &description, 0).await;
                continue;
            }

            let outcome = self.execute_with_policy(&call, state).await;
            match outcome.result {
                Ok(output) => {
                    state.record_tool_success();
                    if call.name == CALL_TOOL_NAME {
                        self.apply_call_success(state, &output);
                    }
                    sink.emit(TurnEvent::ToolResult {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        success: true,
                        result: output.content.clone(),
                        attempts: outcome.attempts,
                    })
                    .await;
                    state.push_message(Message::tool(output.to_message_content(), &call.id));
                    if state.status == SessionStatus::Completed {
                        sink.emit(TurnEvent::Status {
                            status: state.status,
                        })
                        .await;
                    }
                }
                Err(err) => {
                    state.record_tool_failure(&call.name);
                    let description = format!(
                        "{} failed after {} attempt{}: {}",
                        call.name,
                        outcome.attempts,
                        if outcome.attempts == 1 { "" } else { "s" },
                        err
                    );
                    self.finish_failure(state, sink, &call, &description, outcome.attempts)
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn finish_failure(
        &self,
        state: &mut ConversationState,
        sink: &EventSink,
        call: &ToolCallRequest,
        description: &str,
        attempts: u32,
    ) {
        sink.emit(TurnEvent::ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            success: false,
            result: json!({ "error": description }),
            attempts,
        })
        .await;
        state.push_message(Message::tool(description, &call.id));
    }

    /// One call's full attempt sequence: bounded retries with exponential
    /// backoff for idempotent tools, a single attempt for anything with a
    /// real-world side effect, the whole sequence under one hard timeout.
    async fn execute_with_policy(
        &self,
        call: &ToolCallRequest,
        state: &ConversationState,
    ) -> CallOutcome {
        let arguments = self.prepare_arguments(call, state);

        let max_attempts = self
            .registry
            .get(&call.name)
            .map(|t| t.max_attempts().min(self.policy.max_attempts).max(1))
            .unwrap_or(1);

        let sequence = async {
            let mut attempts = 0;
            loop {
                attempts += 1;
                match self.registry.execute(&call.name, arguments.clone()).await {
                    Ok(output) => return CallOutcome {
                        result: Ok(output),
                        attempts,
                    },
                    Err(err) => {
                        let retryable = err.is_retryable() && attempts < max_attempts;
                        warn!(
                            tool = %call.name,
                            attempt = attempts,
                            retryable,
                            error = %err,
                            "tool attempt failed"
                        );
                        if !retryable {
                            return CallOutcome {
                                result: Err(err),
                                attempts,
                            };
                        }
                        let backoff = self
                            .policy
                            .backoff_base()
                            .saturating_mul(1 << (attempts - 1))
                            .min(self.policy.backoff_cap());
                        sleep(backoff).await;
                    }
                }
            }
        };

        match timeout(self.policy.call_timeout(), sequence).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(tool = %call.name, "attempt sequence exceeded hard timeout");
                CallOutcome {
                    result: Err(ToolError::timeout(
                        call.name.clone(),
                        self.policy.call_timeout_secs,
                    )),
                    attempts: max_attempts,
                }
            }
        }
    }

    /// Assemble the arguments object; the call-initiation tool additionally
    /// gets the trusted profile merged in.
    fn prepare_arguments(&self, call: &ToolCallRequest, state: &ConversationState) -> Value {
        let object: Map<String, Value> = call
            .arguments
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let arguments = Value::Object(object);

        if call.name == CALL_TOOL_NAME {
            enrich_call_context(&arguments, &state.shared_secrets)
        } else {
            arguments
        }
    }

    /// Call initiation succeeded: populate the structured result and mark
    /// the session completed. Terminal for the session.
    fn apply_call_success(&self, state: &mut ConversationState, output: &ToolOutput) {
        match serde_json::from_value::<CallResult>(output.content.clone()) {
            Ok(result) => {
                info!(call_id = %result.call_id, status = %result.status, "outbound call placed");
                state.call_result = Some(result);
                state.status = SessionStatus::Completed;
            }
            Err(err) => {
                warn!(error = %err, "call succeeded but result payload did not parse");
                state.status = SessionStatus::Completed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callpilot_tools::StubTool;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn state_with_calls(calls: Vec<ToolCallRequest>) -> ConversationState {
        let mut state = ConversationState::from_history(
            vec![Message::user("go")],
            Default::default(),
            Default::default(),
            Some("financial"),
        );
        state.push_message(Message::assistant("on it").with_tool_calls(calls));
        state
    }

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, name)
    }

    fn fast_policy() -> ToolPolicyConfig {
        ToolPolicyConfig {
            backoff_base_ms: 1,
            backoff_cap_ms: 2,
            ..Default::default()
        }
    }

    async fn run_node(
        registry: &ToolRegistry,
        policy: &ToolPolicyConfig,
        state: &mut ConversationState,
    ) -> Vec<TurnEvent> {
        let node = ToolNode::new(registry, policy);
        let (tx, mut rx) = mpsc::channel(64);
        let sink = EventSink::new(tx);
        node.run(state, &sink).await.unwrap();
        drop(sink);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_retry_until_success_with_attempt_count() {
        let stub = StubTool::failing_first("web_search", 2, json!({"ok": true}));
        let counter = stub.invocation_counter();
        let mut registry = ToolRegistry::new();
        registry.register(stub);

        let mut state = state_with_calls(vec![call("c1", "web_search")]);
        let events = run_node(&registry, &fast_policy(), &mut state).await;

        assert!(matches!(
            &events[0],
            TurnEvent::ToolResult { success: true, attempts: 3, .. }
        ));
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(state.consecutive_tool_failures, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_failure_message() {
        let mut registry = ToolRegistry::new();
        registry.register(StubTool::always_failing("web_search"));

        let mut state = state_with_calls(vec![call("c1", "web_search")]);
        let events = run_node(&registry, &fast_policy(), &mut state).await;

        match &events[0] {
            TurnEvent::ToolResult {
                success, attempts, ..
            } => {
                assert!(!success);
                assert_eq!(*attempts, 3);
            }
            other => panic!("unexpected event: {}", other.kind()),
        }
        let last = state.messages.last().unwrap();
        assert!(last.content.contains("3 attempts"));
        assert_eq!(state.last_failed_tool.as_deref(), Some("web_search"));
    }

    #[tokio::test]
    async fn test_processed_id_never_runs_twice() {
        let stub = StubTool::succeeding("web_search", json!({}));
        let counter = stub.invocation_counter();
        let mut registry = ToolRegistry::new();
        registry.register(stub);

        let mut state = state_with_calls(vec![call("c1", "web_search")]);
        run_node(&registry, &fast_policy(), &mut state).await;
        // Second pass over the same assistant message: id already processed.
        let events = run_node(&registry, &fast_policy(), &mut state).await;

        assert!(events.is_empty());
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_breaker_skips_fourth_invocation_locally() {
        let stub = StubTool::always_failing("web_search");
        let counter = stub.invocation_counter();
        let mut registry = ToolRegistry::new();
        registry.register(stub);
        let policy = ToolPolicyConfig {
            max_attempts: 1,
            ..fast_policy()
        };

        let mut state = state_with_calls(vec![]);
        for i in 0..4 {
            state.push_message(
                Message::assistant("trying")
                    .with_tool_calls(vec![call(&format!("c{}", i), "web_search")]),
            );
            let events = run_node(&registry, &policy, &mut state).await;
            assert!(matches!(
                &events[0],
                TurnEvent::ToolResult { success: false, .. }
            ));
        }

        // Three real invocations tripped the breaker; the fourth never
        // reached the tool.
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 3);
        let last = state.messages.last().unwrap();
        assert!(last.content.contains("circuit breaker"));
    }

    #[tokio::test]
    async fn test_call_initiation_single_attempt_and_completion() {
        let stub = StubTool::succeeding(
            CALL_TOOL_NAME,
            json!({"call_id": "c-9", "status": "queued"}),
        )
        .single_attempt();
        let mut registry = ToolRegistry::new();
        registry.register(stub);

        let mut state = state_with_calls(vec![call("c1", CALL_TOOL_NAME)]);
        let events = run_node(&registry, &fast_policy(), &mut state).await;

        assert_eq!(state.status, SessionStatus::Completed);
        let result = state.call_result.as_ref().unwrap();
        assert_eq!(result.call_id, "c-9");
        // Completion is announced after the tool result.
        let kinds: Vec<_> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["tool-result", "status"]);
    }

    #[tokio::test]
    async fn test_failed_call_initiation_is_not_retried() {
        let stub = StubTool::always_failing(CALL_TOOL_NAME).single_attempt();
        let counter = stub.invocation_counter();
        let mut registry = ToolRegistry::new();
        registry.register(stub);

        let mut state = state_with_calls(vec![call("c1", CALL_TOOL_NAME)]);
        let events = run_node(&registry, &fast_policy(), &mut state).await;

        assert!(matches!(
            &events[0],
            TurnEvent::ToolResult { success: false, attempts: 1, .. }
        ));
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(state.call_result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tool_sequence_hits_hard_timeout() {
        let stub = StubTool::succeeding("web_search", json!({"ok": true}))
            .with_delay(std::time::Duration::from_secs(120));
        let counter = stub.invocation_counter();
        let mut registry = ToolRegistry::new();
        registry.register(stub);

        let mut state = state_with_calls(vec![call("c1", "web_search")]);
        let events = run_node(&registry, &fast_policy(), &mut state).await;

        match &events[0] {
            TurnEvent::ToolResult {
                success,
                result,
                attempts,
                ..
            } => {
                assert!(!success);
                assert_eq!(*attempts, 3);
                assert!(result["error"].as_str().unwrap().contains("timed out"));
            }
            other => panic!("unexpected event: {}", other.kind()),
        }
        // The abandoned sequence counts as a failure for the breaker.
        assert_eq!(state.consecutive_tool_failures, 1);
        assert_eq!(state.last_failed_tool.as_deref(), Some("web_search"));
        // Only the first attempt started before the deadline hit.
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_call_arguments_carry_session_identifiers() {
        let stub = StubTool::succeeding(
            CALL_TOOL_NAME,
            json!({"call_id": "c-3", "status": "queued"}),
        )
        .single_attempt();
        let recorder = stub.arguments_recorder();
        let mut registry = ToolRegistry::new();
        registry.register(stub);

        let mut state = state_with_calls(vec![call("c1", CALL_TOOL_NAME)]);
        state.shared_secrets = callpilot_core::SharedSecrets {
            session_id: "sess-9".to_string(),
            auth_token: "tok-9".to_string(),
            profile: Default::default(),
        };

        run_node(&registry, &fast_policy(), &mut state).await;

        let seen = recorder.lock().unwrap().clone().unwrap();
        assert_eq!(seen["session_id"], "sess-9");
        assert_eq!(seen["auth_token"], "tok-9");
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_without_retry() {
        let registry = ToolRegistry::new();
        let mut state = state_with_calls(vec![call("c1", "nope")]);
        let events = run_node(&registry, &fast_policy(), &mut state).await;

        assert!(matches!(
            &events[0],
            TurnEvent::ToolResult { success: false, attempts: 1, .. }
        ));
    }
}
