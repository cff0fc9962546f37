//! Provider trait: the abstraction over model invocation.
//!
//! A Provider knows how to send a message sequence to a model and return
//! its candidate outputs. Calls may carry a [`CancellationToken`]; a provider
//! that observes cancellation returns [`ProviderError::Cancelled`] rather
//! than a generic failure.
//!
//! Implementations: OpenAI-compatible endpoints (OpenRouter, OpenAI, GLM,
//! Ollama, vLLM) and scripted stand-ins in tests.

use crate::error::ProviderError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "glm-4-6", "anthropic/claude-sonnet-4")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether the model may reason before answering
    #[serde(default)]
    pub enable_thinking: bool,
}

fn default_temperature() -> f32 {
    0.7
}

/// One candidate output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    /// Raw generated text
    pub text: String,

    /// Text after any reasoning preamble was removed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_content: Option<String>,
}

impl Choice {
    /// A plain choice with no reasoning split.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parsed_content: None,
        }
    }

    /// The output a caller should act on: post-reasoning text when present.
    pub fn output(&self) -> &str {
        self.parsed_content.as_deref().unwrap_or(&self.text)
    }
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Candidate outputs, best first
    pub choices: Vec<Choice>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

impl ProviderResponse {
    /// The first candidate's output, if any.
    pub fn first_output(&self) -> Option<&str> {
        self.choices.first().map(Choice::output)
    }
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// The steering loop calls `complete()` without knowing which backend is
/// being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    ///
    /// When `cancel` fires before the response arrives, implementations
    /// return `ProviderError::Cancelled`.
    async fn complete(
        &self,
        request: ProviderRequest,
        cancel: Option<CancellationToken>,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
