//! Error types shared across the engine

use thiserror::Error;

/// Top-level engine error
#[derive(Error, Debug)]
pub enum Error {
    /// Model stream/transport failure. Fatal for the turn.
    #[error("Model error: {0}")]
    Model(String),

    /// Tool execution failure that could not be recovered locally.
    #[error("Tool error: {0}")]
    Tool(String),

    /// Routing failure (no usable user message, corrupt agent label).
    #[error("Routing error: {0}")]
    Routing(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid conversation state
    #[error("Invalid state: {0}")]
    State(String),
}

/// Result alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
