//! Configuration loading, validation, and management for storyhelm.
//!
//! Loads configuration from `~/.storyhelm/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Per-document storage key holding the consultation interval.
pub const INTERVAL_KEY: &str = "interval";

/// The root configuration structure.
///
/// Maps directly to `~/.storyhelm/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Steering loop settings
    #[serde(default)]
    pub steering: SteeringConfig,

    /// The model that writes the story (used by `storyhelm write`)
    #[serde(default)]
    pub writer: WriterConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("steering", &self.steering)
            .field("writer", &self.writer)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Settings for the consultation loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteeringConfig {
    /// The consulting model. Generations it produces are ignored.
    #[serde(default = "default_steering_model")]
    pub model: String,

    #[serde(default = "default_steering_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Let the model reason before giving its directive
    #[serde(default = "default_true")]
    pub enable_thinking: bool,

    /// System prompt sent first in every consultation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Generations between consultations when the document sets none
    #[serde(default = "default_interval")]
    pub default_interval: u32,

    /// Hard cap on history tokens
    #[serde(default = "default_history_max_tokens")]
    pub history_max_tokens: usize,

    /// History size at which oldest entries start rolling off
    #[serde(default = "default_history_rollover_tokens")]
    pub history_rollover_tokens: usize,

    /// Story text kept in context, in characters, newest last
    #[serde(default = "default_max_story_chars")]
    pub max_story_chars: usize,

    /// Trailing characters captured as a directive's outcome
    #[serde(default = "default_outcome_snippet_chars")]
    pub outcome_snippet_chars: usize,

    /// Token estimator for the history buffer
    #[serde(default)]
    pub tokenizer: TokenizerKind,
}

fn default_steering_model() -> String {
    "glm-4-6".into()
}
fn default_steering_max_tokens() -> u32 {
    300
}
fn default_temperature() -> f32 {
    0.7
}
fn default_true() -> bool {
    true
}
fn default_interval() -> u32 {
    4
}
fn default_history_max_tokens() -> usize {
    2000
}
fn default_history_rollover_tokens() -> usize {
    500
}
fn default_max_story_chars() -> usize {
    60_000
}
fn default_outcome_snippet_chars() -> usize {
    200
}

fn default_system_prompt() -> String {
    "You are a story editor quietly guiding a co-written novel. Read the setting, \
     lore, author's note, and story so far, then give one short directive (one or two \
     sentences) for what the next few paragraphs should do: a beat to hit, a tension to \
     raise, a thread to pick up. Never write story prose yourself. Look at your previous \
     directives and what actually happened; if the story ignored one, adjust rather than \
     repeat it."
        .into()
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            model: default_steering_model(),
            max_tokens: default_steering_max_tokens(),
            temperature: default_temperature(),
            enable_thinking: true,
            system_prompt: default_system_prompt(),
            default_interval: default_interval(),
            history_max_tokens: default_history_max_tokens(),
            history_rollover_tokens: default_history_rollover_tokens(),
            max_story_chars: default_max_story_chars(),
            outcome_snippet_chars: default_outcome_snippet_chars(),
            tokenizer: TokenizerKind::default(),
        }
    }
}

/// Which token estimator backs the history buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// ~4 characters per token
    #[default]
    Heuristic,
    /// cl100k BPE
    Cl100k,
}

/// Settings for the story-writing model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default = "default_writer_model")]
    pub model: String,

    #[serde(default = "default_writer_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_writer_temperature")]
    pub temperature: f32,

    #[serde(default = "default_writer_prompt")]
    pub system_prompt: String,
}

fn default_writer_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_writer_max_tokens() -> u32 {
    400
}
fn default_writer_temperature() -> f32 {
    0.9
}
fn default_writer_prompt() -> String {
    "Continue the story with the next paragraph. Follow any bracketed editor \
     instruction that appears near the end, but never mention it."
        .into()
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            model: default_writer_model(),
            max_tokens: default_writer_max_tokens(),
            temperature: default_writer_temperature(),
            system_prompt: default_writer_prompt(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.storyhelm/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `STORYHELM_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("STORYHELM_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("STORYHELM_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("STORYHELM_MODEL") {
            config.steering.model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".storyhelm")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let steering = &self.steering;

        if !(0.0..=2.0).contains(&steering.temperature) {
            return Err(ConfigError::ValidationError(
                "steering.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if steering.default_interval == 0 {
            return Err(ConfigError::ValidationError(
                "steering.default_interval must be at least 1".into(),
            ));
        }

        if steering.history_rollover_tokens > steering.history_max_tokens {
            return Err(ConfigError::ValidationError(
                "steering.history_rollover_tokens must not exceed history_max_tokens".into(),
            ));
        }

        if steering.max_story_chars == 0 {
            return Err(ConfigError::ValidationError(
                "steering.max_story_chars must be > 0".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.writer.temperature) {
            return Err(ConfigError::ValidationError(
                "writer.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            steering: SteeringConfig::default(),
            writer: WriterConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_provider, "openrouter");
        assert_eq!(config.steering.model, "glm-4-6");
        assert_eq!(config.steering.max_tokens, 300);
        assert_eq!(config.steering.default_interval, 4);
        assert_eq!(config.steering.history_max_tokens, 2000);
        assert_eq!(config.steering.history_rollover_tokens, 500);
        assert_eq!(config.steering.max_story_chars, 60_000);
        assert!(config.steering.enable_thinking);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.steering.model, config.steering.model);
        assert_eq!(parsed.writer.model, config.writer.model);
    }

    #[test]
    fn partial_steering_table_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
[steering]
model = "glm-4-5"
default_interval = 2
tokenizer = "cl100k"
"#,
        )
        .unwrap();
        assert_eq!(config.steering.model, "glm-4-5");
        assert_eq!(config.steering.default_interval, 2);
        assert_eq!(config.steering.tokenizer, TokenizerKind::Cl100k);
        assert_eq!(config.steering.max_tokens, 300);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.steering.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_interval_rejected() {
        let mut config = AppConfig::default();
        config.steering.default_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rollover_above_max_rejected() {
        let mut config = AppConfig::default();
        config.steering.history_rollover_tokens = 3000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().default_provider, "openrouter");
    }

    #[test]
    fn load_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[steering]\ntemperature = 9.0\n").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter"));
        assert!(toml_str.contains("glm-4-6"));
    }
}
