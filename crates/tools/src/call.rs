//! Outbound call initiation
//!
//! The one side-effecting tool in the catalog. It places a real phone call
//! through the telephony provider, so it runs exactly one attempt and is
//! never retried automatically; on failure the conversation surfaces the
//! error and lets the user decide.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use callpilot_config::ToolPolicyConfig;
use callpilot_core::{CallResult, SharedSecrets, ToolCallDisplay};

use crate::tool::{SchemaBuilder, Tool, ToolError, ToolOutput, ToolSchema};

pub const CALL_TOOL_NAME: &str = "initiate_call";

/// HTTP client for the telephony provider
pub struct TelephonyProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl TelephonyProvider {
    pub fn new(policy: &ToolPolicyConfig, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: policy.telephony_endpoint.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn dispatch(&self, body: Value) -> Result<Value, ToolError> {
        let url = format!("{}/v1/calls", self.endpoint);
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
            warn!(%status, "call dispatch rejected");
            return Err(ToolError::Downstream(format!(
                "telephony provider error ({}): {}",
                status, detail
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ToolError::Downstream(format!("malformed provider response: {}", e)))
    }
}

/// Merge session identifiers and trusted profile fields into the
/// model-supplied call context.
///
/// The session id and auth token come from the hosting application, so
/// they always overwrite whatever the model put there. For profile fields
/// the model's own values win on key conflicts, and a profile value
/// already contained in (or containing) the model's notes is dropped
/// rather than duplicated.
pub fn enrich_call_context(arguments: &Value, secrets: &SharedSecrets) -> Value {
    let mut merged: Map<String, Value> = arguments.as_object().cloned().unwrap_or_default();

    merged.insert("session_id".to_string(), json!(secrets.session_id));
    merged.insert("auth_token".to_string(), json!(secrets.auth_token));

    let notes = merged
        .get("notes")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let mut profile_entries: Vec<_> = secrets.profile.iter().collect();
    profile_entries.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in profile_entries {
        if merged.contains_key(key.as_str()) {
            continue;
        }
        let lowered = value.to_ascii_lowercase();
        if !notes.is_empty() && (notes.contains(&lowered) || lowered.contains(&notes)) {
            continue;
        }
        merged.insert(key.clone(), json!(value));
    }

    Value::Object(merged)
}

fn parse_call_result(response: &Value) -> Result<CallResult, ToolError> {
    let call_id = response
        .get("call_id")
        .or_else(|| response.get("id"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::Downstream("provider response missing call id".to_string()))?;

    Ok(CallResult {
        call_id: call_id.to_string(),
        status: response
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("queued")
            .to_string(),
        message: response
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        details: response.clone(),
    })
}

/// Place the outbound call.
///
/// Arguments arrive already enriched with the session's trusted profile;
/// enrichment happens in the orchestration layer because the registry is
/// shared across sessions.
pub struct InitiateCallTool {
    provider: Arc<TelephonyProvider>,
}

impl InitiateCallTool {
    pub fn new(provider: Arc<TelephonyProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Tool for InitiateCallTool {
    fn name(&self) -> &str {
        CALL_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Place the outbound phone call once the call context is complete"
    }

    fn display(&self) -> ToolCallDisplay {
        ToolCallDisplay {
            label: "Placing your call".to_string(),
            description: "Dialing the business on your behalf".to_string(),
            estimated_duration_ms: 15_000,
        }
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: SchemaBuilder::new()
                .param("purpose", "string", "What the call should accomplish", true)
                .param("business_name", "string", "Who to call", true)
                .param("phone_number", "string", "Number to dial", true)
                .param("issue_summary", "string", "The issue, stated as the caller would", true)
                .param("caller_name", "string", "Name to identify as on the call", false)
                .string_array(
                    "verification_items",
                    "Account numbers, dates, amounts the callee may ask for",
                    false,
                )
                .string_array(
                    "availability_windows",
                    "When the user is reachable for callbacks",
                    false,
                )
                .param("follow_up", "string", "What to do after the call resolves", false)
                .param("urgency", "string", "How time-sensitive the call is", false)
                .string_enum("urgency", &["low", "normal", "high"])
                .param("notes", "string", "Anything else the caller should know", false)
                .build(),
        }
    }

    fn idempotent(&self) -> bool {
        false
    }

    fn max_attempts(&self) -> u32 {
        1
    }

    fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        if !arguments.is_object() {
            return Err(ToolError::invalid_params("arguments must be an object"));
        }
        for key in ["purpose", "business_name", "phone_number", "issue_summary"] {
            match arguments.get(key).and_then(|v| v.as_str()) {
                Some(s) if !s.trim().is_empty() => {}
                _ => {
                    return Err(ToolError::invalid_params(format!(
                        "{} is required to place a call",
                        key
                    )))
                }
            }
        }
        Ok(())
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        info!(
            business = arguments.get("business_name").and_then(|v| v.as_str()),
            "initiating outbound call"
        );

        let response = self.provider.dispatch(arguments).await?;
        let result = parse_call_result(&response)?;
        Ok(ToolOutput::json(json!({
            "call_id": result.call_id,
            "status": result.status,
            "message": result.message,
            "details": result.details,
        })))
    }
}
