//! Runtime settings for the call-resolution engine

pub mod settings;

pub use settings::{ModelConfig, RouterConfig, Settings, ToolPolicyConfig};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
