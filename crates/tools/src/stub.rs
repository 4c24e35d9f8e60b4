//! Scripted stub tool for exercising retry, breaker and dedup behavior
//! without a network.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use callpilot_core::ToolCallDisplay;

use crate::tool::{SchemaBuilder, Tool, ToolError, ToolOutput, ToolSchema};

/// Configurable fake tool.
///
/// Fails the first `fail_first` invocations with a retryable error, then
/// succeeds with the configured payload. The invocation counter is shared
/// so tests can assert exactly how many attempts ran.
pub struct StubTool {
    name: String,
    idempotent: bool,
    max_attempts: u32,
    fail_first: u32,
    delay: Option<Duration>,
    payload: Value,
    invocations: Arc<AtomicU32>,
    last_arguments: Arc<Mutex<Option<Value>>>,
}

impl StubTool {
    pub fn succeeding(name: &str, payload: Value) -> Self {
        Self {
            name: name.to_string(),
            idempotent: true,
            max_attempts: 3,
            fail_first: 0,
            delay: None,
            payload,
            invocations: Arc::new(AtomicU32::new(0)),
            last_arguments: Arc::new(Mutex::new(None)),
        }
    }

    /// Fail the first `n` invocations, then succeed.
    pub fn failing_first(name: &str, n: u32, payload: Value) -> Self {
        Self {
            fail_first: n,
            ..Self::succeeding(name, payload)
        }
    }

    /// Fail every invocation.
    pub fn always_failing(name: &str) -> Self {
        Self {
            fail_first: u32::MAX,
            ..Self::succeeding(name, Value::Null)
        }
    }

    pub fn single_attempt(mut self) -> Self {
        self.idempotent = false;
        self.max_attempts = 1;
        self
    }

    /// Sleep this long inside every invocation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Handle to the shared invocation counter
    pub fn invocation_counter(&self) -> Arc<AtomicU32> {
        self.invocations.clone()
    }

    pub fn invocation_count(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Handle to the arguments seen by the most recent invocation
    pub fn arguments_recorder(&self) -> Arc<Mutex<Option<Value>>> {
        self.last_arguments.clone()
    }
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Scripted tool"
    }

    fn display(&self) -> ToolCallDisplay {
        ToolCallDisplay {
            label: format!("Running {}", self.name),
            description: "Scripted tool".to_string(),
            estimated_duration_ms: 100,
        }
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: "Scripted tool".to_string(),
            input_schema: SchemaBuilder::new().build(),
        }
    }

    fn idempotent(&self) -> bool {
        self.idempotent
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let attempt = self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.last_arguments.lock() {
            *slot = Some(arguments);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if attempt < self.fail_first {
            return Err(ToolError::Downstream(format!(
                "scripted failure {}",
                attempt + 1
            )));
        }
        Ok(ToolOutput::json(self.payload.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_stub_fails_then_succeeds() {
        let stub = StubTool::failing_first("web_search", 2, json!({"ok": true}));

        assert!(stub.execute(json!({})).await.is_err());
        assert!(stub.execute(json!({})).await.is_err());
        let output = stub.execute(json!({})).await.unwrap();
        assert_eq!(output.content, json!({"ok": true}));
        assert_eq!(stub.invocation_count(), 3);
    }

    #[test]
    fn test_single_attempt_configuration() {
        let stub = StubTool::succeeding("initiate_call", json!({})).single_attempt();
        assert!(!stub.idempotent());
        assert_eq!(stub.max_attempts(), 1);
    }
}
