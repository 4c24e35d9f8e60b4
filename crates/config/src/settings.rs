//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Language-model backend configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Tool execution policy
    #[serde(default)]
    pub tools: ToolPolicyConfig,

    /// Router thresholds
    #[serde(default)]
    pub router: RouterConfig,

    /// Assembled-prompt cache capacity (entries)
    #[serde(default = "default_prompt_cache_capacity")]
    pub prompt_cache_capacity: usize,
}

fn default_prompt_cache_capacity() -> usize {
    100
}

// serde `default = ...` attributes only apply during deserialization, so
// Default must be spelled out to agree with them.
impl Default for Settings {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            tools: ToolPolicyConfig::default(),
            router: RouterConfig::default(),
            prompt_cache_capacity: default_prompt_cache_capacity(),
        }
    }
}

/// Language-model backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// API endpoint
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,
    /// API key; falls back to ANTHROPIC_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Model identifier
    #[serde(default = "default_model_id")]
    pub model: String,
    /// Maximum tokens to generate per turn
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Sampling temperature (0.0 - 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Request timeout in seconds
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model_endpoint() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_api_key() -> String {
    std::env::var("ANTHROPIC_API_KEY").unwrap_or_default()
}

fn default_model_id() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> usize {
    1024
}

fn default_temperature() -> f32 {
    0.7
}

fn default_model_timeout_secs() -> u64 {
    60
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_model_endpoint(),
            api_key: default_api_key(),
            model: default_model_id(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_model_timeout_secs(),
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Tool execution policy
///
/// Retry counts are per tool kind: idempotent research tools retry up to
/// `max_attempts`, the call-initiation tool is pinned to a single attempt
/// regardless of this setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPolicyConfig {
    /// Attempts for idempotent tools
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff between retries (doubles each attempt)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Backoff ceiling
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Hard bound on one tool call's full attempt sequence
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Consecutive same-tool failures before the circuit opens
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    /// Web-research provider endpoint
    #[serde(default = "default_research_endpoint")]
    pub research_endpoint: String,
    /// Outbound telephony provider endpoint
    #[serde(default = "default_telephony_endpoint")]
    pub telephony_endpoint: String,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_cap_ms() -> u64 {
    5_000
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_breaker_threshold() -> u32 {
    3
}

fn default_research_endpoint() -> String {
    "https://api.firecrawl.dev".to_string()
}

fn default_telephony_endpoint() -> String {
    "https://api.bland.ai".to_string()
}

impl Default for ToolPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            breaker_threshold: default_breaker_threshold(),
            research_endpoint: default_research_endpoint(),
            telephony_endpoint: default_telephony_endpoint(),
        }
    }
}

impl ToolPolicyConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Router thresholds
///
/// The 0.3/0.5/0.7 values are the behavioral baseline inherited from the
/// original scoring heuristic; sticky_confidence is reported when a
/// non-neutral persona continues with no new domain signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Minimum confidence for switching away from the active persona
    #[serde(default = "default_switch_threshold")]
    pub switch_threshold: f32,
    /// Confidence reported for sticky continuation
    #[serde(default = "default_sticky_confidence")]
    pub sticky_confidence: f32,
    /// Low-signal score normalization floor
    #[serde(default = "default_low_confidence")]
    pub low_confidence: f32,
    /// Medium-signal score normalization midpoint
    #[serde(default = "default_medium_confidence")]
    pub medium_confidence: f32,
}

fn default_switch_threshold() -> f32 {
    0.7
}

fn default_sticky_confidence() -> f32 {
    0.8
}

fn default_low_confidence() -> f32 {
    0.3
}

fn default_medium_confidence() -> f32 {
    0.5
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            switch_threshold: default_switch_threshold(),
            sticky_confidence: default_sticky_confidence(),
            low_confidence: default_low_confidence(),
            medium_confidence: default_medium_confidence(),
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings: defaults, then an optional file, then `CALLPILOT_*`
    /// environment overrides (e.g. `CALLPILOT_MODEL__ENDPOINT`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let config = builder
            .add_source(Environment::with_prefix("CALLPILOT").separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate setting ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.model.temperature) {
            return Err(ConfigError::Invalid(format!(
                "model.temperature must be in [0, 1], got {}",
                self.model.temperature
            )));
        }
        for (name, value) in [
            ("router.switch_threshold", self.router.switch_threshold),
            ("router.sticky_confidence", self.router.sticky_confidence),
            ("router.low_confidence", self.router.low_confidence),
            ("router.medium_confidence", self.router.medium_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be in [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.tools.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "tools.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.tools.backoff_base_ms > self.tools.backoff_cap_ms {
            return Err(ConfigError::Invalid(
                "tools.backoff_base_ms exceeds tools.backoff_cap_ms".to_string(),
            ));
        }
        if self.prompt_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "prompt_cache_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.tools.breaker_threshold, 3);
        assert_eq!(settings.tools.call_timeout_secs, 30);
        assert_eq!(settings.router.switch_threshold, 0.7);
        assert_eq!(settings.prompt_cache_capacity, 100);
    }

    #[test]
    fn test_default_matches_empty_config() {
        // Default::default() must agree with what an empty config file
        // deserializes to, field defaults included.
        let parsed: Settings = toml::from_str("").unwrap();
        let built = Settings::default();
        assert_eq!(built.prompt_cache_capacity, parsed.prompt_cache_capacity);
        assert_eq!(built.prompt_cache_capacity, 100);
        assert_eq!(built.tools.max_attempts, parsed.tools.max_attempts);
        assert!(built.validate().is_ok());
    }

    #[test]
    fn test_invalid_temperature_rejected() {
        let mut settings = Settings::default();
        settings.model.temperature = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_backoff_ordering_enforced() {
        let mut settings = Settings::default();
        settings.tools.backoff_base_ms = 10_000;
        settings.tools.backoff_cap_ms = 5_000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_file_overrides() {
        let toml = r#"
            [tools]
            max_attempts = 5
            [router]
            switch_threshold = 0.6
        "#;
        let parsed: Settings = toml::from_str(toml).unwrap();
        assert_eq!(parsed.tools.max_attempts, 5);
        assert_eq!(parsed.router.switch_threshold, 0.6);
        // Untouched sections keep defaults
        assert_eq!(parsed.tools.breaker_threshold, 3);
    }
}
