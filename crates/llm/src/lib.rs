//! LLM integration
//!
//! Features:
//! - Backend trait with streaming generation and native tool calling
//! - Anthropic Messages API backend (SSE streaming)
//! - Scripted mock backend for tests
//! - Persona prompt assembly with a bounded cache

pub mod anthropic;
pub mod backend;
pub mod mock;
pub mod prompt;

pub use anthropic::{AnthropicBackend, AnthropicStopReason};
pub use backend::{ModelBackend, ModelEvent, ModelTurn, StopReason, ToolDefinition};
pub use mock::{MockBackend, ScriptedTurn};
pub use prompt::{breaker_warning, persona_instructions, PromptBuilder, PromptCache, PromptKey};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for callpilot_core::Error {
    fn from(err: LlmError) -> Self {
        callpilot_core::Error::Model(err.to_string())
    }
}
