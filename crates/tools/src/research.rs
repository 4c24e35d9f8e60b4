//! Web research tools
//!
//! Four read-only tools backed by one research provider: keyword search,
//! single-page scrape, small-site crawl, and structured extraction. All
//! are idempotent and participate in retry with backoff.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use callpilot_config::ToolPolicyConfig;
use callpilot_core::ToolCallDisplay;

use crate::tool::{SchemaBuilder, Tool, ToolError, ToolOutput, ToolSchema};

/// Shared HTTP client for the research endpoints
pub struct ResearchProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl ResearchProvider {
    pub fn new(policy: &ToolPolicyConfig, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: policy.research_endpoint.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// POST a JSON body to `path`, classifying failures for retry policy.
    async fn post(&self, path: &str, body: Value) -> Result<Value, ToolError> {
        let url = format!("{}{}", self.endpoint, path);
        debug!(%url, "research request");

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(%url, %status, "research request failed");
            if status.is_client_error() {
                return Err(ToolError::invalid_params(format!(
                    "provider rejected request ({}): {}",
                    status, detail
                )));
            }
            return Err(ToolError::Downstream(format!(
                "provider error ({}): {}",
                status, detail
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ToolError::Downstream(format!("malformed provider response: {}", e)))
    }
}

fn require_str(arguments: &Value, key: &str) -> Result<(), ToolError> {
    match arguments.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(()),
        Some(Value::String(_)) => Err(ToolError::invalid_params(format!("{} must not be empty", key))),
        Some(_) => Err(ToolError::invalid_params(format!("{} must be a string", key))),
        None => Err(ToolError::invalid_params(format!("{} is required", key))),
    }
}

/// Keyword web search
pub struct WebSearchTool {
    provider: Arc<ResearchProvider>,
}

impl WebSearchTool {
    pub fn new(provider: Arc<ResearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for company policies, phone numbers, hours and procedures"
    }

    fn display(&self) -> ToolCallDisplay {
        ToolCallDisplay {
            label: "Searching the web".to_string(),
            description: "Looking up relevant pages".to_string(),
            estimated_duration_ms: 3_000,
        }
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: SchemaBuilder::new()
                .param("query", "string", "Search query", true)
                .param("limit", "integer", "Maximum number of results", false)
                .build(),
        }
    }

    fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        if !arguments.is_object() {
            return Err(ToolError::invalid_params("arguments must be an object"));
        }
        require_str(arguments, "query")
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let body = json!({
            "query": arguments["query"],
            "limit": arguments.get("limit").cloned().unwrap_or(json!(5)),
        });
        let result = self.provider.post("/v1/search", body).await?;
        Ok(ToolOutput::json(result))
    }
}

/// Fetch one page as markdown
pub struct ScrapePageTool {
    provider: Arc<ResearchProvider>,
}

impl ScrapePageTool {
    pub fn new(provider: Arc<ResearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for ScrapePageTool {
    fn name(&self) -> &str {
        "scrape_page"
    }

    fn description(&self) -> &str {
        "Fetch a single web page and return its readable content"
    }

    fn display(&self) -> ToolCallDisplay {
        ToolCallDisplay {
            label: "Reading a page".to_string(),
            description: "Fetching page content".to_string(),
            estimated_duration_ms: 4_000,
        }
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: SchemaBuilder::new()
                .param("url", "string", "Page URL to fetch", true)
                .build(),
        }
    }

    fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        if !arguments.is_object() {
            return Err(ToolError::invalid_params("arguments must be an object"));
        }
        require_str(arguments, "url")
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let body = json!({
            "url": arguments["url"],
            "formats": ["markdown"],
        });
        let result = self.provider.post("/v1/scrape", body).await?;
        Ok(ToolOutput::json(result))
    }
}

/// Crawl a small set of pages under one site
pub struct CrawlSiteTool {
    provider: Arc<ResearchProvider>,
}

impl CrawlSiteTool {
    pub fn new(provider: Arc<ResearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for CrawlSiteTool {
    fn name(&self) -> &str {
        "crawl_site"
    }

    fn description(&self) -> &str {
        "Crawl a handful of pages under a site when one page is not enough"
    }

    fn display(&self) -> ToolCallDisplay {
        ToolCallDisplay {
            label: "Exploring a site".to_string(),
            description: "Crawling related pages".to_string(),
            estimated_duration_ms: 10_000,
        }
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: SchemaBuilder::new()
                .param("url", "string", "Starting URL", true)
                .param("limit", "integer", "Maximum pages to crawl", false)
                .build(),
        }
    }

    fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        if !arguments.is_object() {
            return Err(ToolError::invalid_params("arguments must be an object"));
        }
        require_str(arguments, "url")
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let body = json!({
            "url": arguments["url"],
            "limit": arguments.get("limit").cloned().unwrap_or(json!(5)),
        });
        let result = self.provider.post("/v1/crawl", body).await?;
        Ok(ToolOutput::json(result))
    }
}

/// Extract structured fields from pages against a caller-supplied schema
pub struct ExtractStructuredTool {
    provider: Arc<ResearchProvider>,
}

impl ExtractStructuredTool {
    pub fn new(provider: Arc<ResearchProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for ExtractStructuredTool {
    fn name(&self) -> &str {
        "extract_structured"
    }

    fn description(&self) -> &str {
        "Extract specific structured fields (phone numbers, hours, fees) from web pages"
    }

    fn display(&self) -> ToolCallDisplay {
        ToolCallDisplay {
            label: "Extracting details".to_string(),
            description: "Pulling structured fields from pages".to_string(),
            estimated_duration_ms: 8_000,
        }
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: SchemaBuilder::new()
                .string_array("urls", "Pages to extract from", true)
                .param("prompt", "string", "What to extract", true)
                .build(),
        }
    }

    fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        if !arguments.is_object() {
            return Err(ToolError::invalid_params("arguments must be an object"));
        }
        match arguments.get("urls") {
            Some(Value::Array(urls)) if !urls.is_empty() => {}
            _ => return Err(ToolError::invalid_params("urls must be a non-empty array")),
        }
        require_str(arguments, "prompt")
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let body = json!({
            "urls": arguments["urls"],
            "prompt": arguments["prompt"],
        });
        let result = self.provider.post("/v1/extract", body).await?;
        Ok(ToolOutput::json(result))
    }
}
