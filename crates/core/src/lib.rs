//! Core types for the call-resolution orchestration engine
//!
//! This crate provides the foundational types shared by all other crates:
//! - Conversation state threaded through one orchestration turn
//! - Message and tool-call representations
//! - The lifecycle event union streamed back to callers
//! - Error types
//! - Context sanitization helpers

pub mod error;
pub mod event;
pub mod sanitize;
pub mod state;

pub use error::{Error, Result};
pub use event::{ToolCallDisplay, TurnEvent};
pub use sanitize::{context_fingerprint, sanitize_field};
pub use state::{
    AgentKind, CallResult, ConversationState, Message, MessageRole, ProcessedCallIds,
    RequestContext, SessionStatus, SharedSecrets, ToolCallRequest,
};
