//! Tool catalog for the call-resolution engine
//!
//! Web research tools (search, scrape, crawl, structured extract) are
//! read-only and safely retryable. The call-initiation tool places a real
//! phone call and is never retried automatically.

pub mod call;
pub mod registry;
pub mod research;
pub mod stub;
pub mod tool;

pub use call::{enrich_call_context, InitiateCallTool, TelephonyProvider, CALL_TOOL_NAME};
pub use registry::{ToolExecutor, ToolRegistry};
pub use research::{
    CrawlSiteTool, ExtractStructuredTool, ResearchProvider, ScrapePageTool, WebSearchTool,
};
pub use stub::StubTool;
pub use tool::{SchemaBuilder, Tool, ToolError, ToolOutput, ToolSchema};

impl From<ToolError> for callpilot_core::Error {
    fn from(err: ToolError) -> Self {
        callpilot_core::Error::Tool(err.to_string())
    }
}

use std::sync::Arc;

use callpilot_config::ToolPolicyConfig;

/// Assemble the full production catalog: the four research tools sharing
/// one provider client, plus call initiation.
pub fn full_catalog(
    policy: &ToolPolicyConfig,
    research_key: Option<String>,
    telephony_key: Option<String>,
) -> ToolRegistry {
    let research = Arc::new(ResearchProvider::new(policy, research_key));
    let telephony = Arc::new(TelephonyProvider::new(policy, telephony_key));

    let mut registry = ToolRegistry::new();
    registry.register(WebSearchTool::new(research.clone()));
    registry.register(ScrapePageTool::new(research.clone()));
    registry.register(CrawlSiteTool::new(research.clone()));
    registry.register(ExtractStructuredTool::new(research));
    registry.register(InitiateCallTool::new(telephony));
    registry
}
