//! Tool registry
//!
//! Immutable after startup: the full catalog is registered once and shared
//! across requests behind an `Arc`. Per-persona availability is decided by
//! the caller, not by mutating the registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::tool::{Tool, ToolError, ToolOutput, ToolSchema};

/// Name-indexed tool catalog
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Duplicate names replace the earlier registration.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool = tool.name(), "registering tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered tool names, sorted for stable output
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas for every registered tool, sorted by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<_> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}

/// Single-attempt execution seam.
///
/// The registry validates and runs exactly one attempt; retry, backoff,
/// timeout and breaker policy live in the orchestration layer above.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError>;
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::not_found(name))?;
        tool.validate(&arguments)?;
        tool.execute(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubTool;
    use serde_json::json;

    #[tokio::test]
    async fn test_registry_lookup_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(StubTool::succeeding("web_search", json!({"results": []})));

        assert!(registry.has("web_search"));
        assert_eq!(registry.tool_names(), vec!["web_search"]);

        let output = registry.execute("web_search", json!({})).await.unwrap();
        assert_eq!(output.content, json!({"results": []}));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.execute("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_validation_rejects_non_object_args() {
        let mut registry = ToolRegistry::new();
        registry.register(StubTool::succeeding("web_search", json!("ok")));
        let err = registry.execute("web_search", json!("string")).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }
}
