//! Provider routing for the two model roles.
//!
//! storyhelm talks to two models: the steering model that issues
//! directives and the writer model that continues the story. Each role names
//! a model string; a `provider:model` prefix picks a configured endpoint,
//! anything else goes to the default provider unchanged.

use std::collections::HashMap;
use std::sync::Arc;
use storyhelm_config::AppConfig;
use storyhelm_core::provider::Provider;
use tracing::debug;

use crate::openai_compat::OpenAiCompatProvider;

/// A provider paired with the model name to send it.
#[derive(Clone)]
pub struct Route {
    pub provider: Arc<dyn Provider>,
    pub model: String,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}

/// Named endpoints plus a fallback.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// The route for a model string.
    ///
    /// `"glm:glm-4-6"` goes to the `glm` endpoint as `glm-4-6`. Prefixes
    /// that name no endpoint stay part of the model (`z-ai/glm-4.6`,
    /// `ollama-model:7b`).
    pub fn resolve(&self, model: &str) -> Option<Route> {
        if let Some((prefix, rest)) = model.split_once(':') {
            if let Some(provider) = self.get(prefix) {
                return Some(Route {
                    provider,
                    model: rest.to_string(),
                });
            }
        }

        self.get(&self.default_provider).map(|provider| Route {
            provider,
            model: model.to_string(),
        })
    }

    /// Route for the steering model in `config`.
    pub fn steering(&self, config: &AppConfig) -> Option<Route> {
        self.resolve(&config.steering.model)
    }

    /// Route for the writer model in `config`.
    pub fn writer(&self, config: &AppConfig) -> Option<Route> {
        self.resolve(&config.writer.model)
    }

    /// Registered endpoint names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Build one OpenAI-compatible endpoint per `[providers.*]` table, plus
/// the default provider when it is not configured explicitly.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);
    let fallback_key = config.api_key.clone().unwrap_or_default();

    for (name, endpoint) in &config.providers {
        let api_key = endpoint.api_key.as_deref().unwrap_or(&fallback_key);
        let base_url = endpoint
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(name));
        router.register(
            name.clone(),
            Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)),
        );
    }

    if router.get(&config.default_provider).is_none() {
        let name = &config.default_provider;
        router.register(
            name.clone(),
            Arc::new(OpenAiCompatProvider::new(
                name,
                default_base_url(name),
                fallback_key.as_str(),
            )),
        );
    }

    debug!(
        providers = ?router.names(),
        default = %config.default_provider,
        "Provider router built"
    );
    router
}

/// Chat-completions base URL for endpoints storyhelm knows by name.
fn default_base_url(name: &str) -> String {
    match name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "glm" | "zhipu" => "https://open.bigmodel.cn/api/paas/v4",
        "deepseek" => "https://api.deepseek.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "vllm" => "http://localhost:8000/v1",
        _ => return format!("http://localhost:8080/{name}/v1"),
    }
    .to_string()
}
