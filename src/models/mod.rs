//! Capability registry mapping model names to language-model handlers.
//!
//! Every chunk is sent to the handler registered under the job's model name. Unknown names are
//! a typed [`UnsupportedModelError`] instead of an empty completion, so a misspelled model fails
//! the submission up front rather than producing an empty document.

mod anthropic;
mod echo;
mod ollama;
mod openai;

pub use anthropic::AnthropicModel;
pub use echo::EchoModel;
pub use ollama::OllamaModel;
pub use openai::OpenAiChatModel;

use crate::config::Config;
use crate::retry::Transient;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors surfaced while asking a provider for a completion.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Provider was unreachable or refused the connection.
    #[error("Model provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

impl Transient for ModelError {}

/// Raised when a job names a model that no handler is registered for.
#[derive(Debug, Clone, Error)]
#[error("Unsupported model: {name}")]
pub struct UnsupportedModelError {
    /// Model name requested by the caller.
    pub name: String,
}

/// Prompt sent to a model for one chunk.
#[derive(Debug, Clone)]
pub struct ModelPrompt {
    /// Instructions framing the task.
    pub system: String,
    /// Chunk text to transform.
    pub user: String,
}

/// Interface implemented by language-model backends.
#[async_trait]
pub trait ModelHandler: Send + Sync {
    /// Produce the completion text for `prompt`.
    async fn complete(&self, prompt: &ModelPrompt) -> Result<String, ModelError>;
}

/// Registry of model handlers keyed by the names callers submit.
#[derive(Default, Clone)]
pub struct ModelRegistry {
    handlers: BTreeMap<String, Arc<dyn ModelHandler>>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ModelHandler>) {
        self.handlers.insert(normalize_model_name(&name.into()), handler);
    }

    /// Builder-style variant of [`ModelRegistry::register`].
    pub fn with(mut self, name: impl Into<String>, handler: Arc<dyn ModelHandler>) -> Self {
        self.register(name, handler);
        self
    }

    /// Look up the handler registered for `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ModelHandler>, UnsupportedModelError> {
        self.handlers
            .get(&normalize_model_name(name))
            .cloned()
            .ok_or_else(|| UnsupportedModelError {
                name: name.to_string(),
            })
    }

    /// Whether a handler is registered for `name`.
    pub fn supports(&self, name: &str) -> bool {
        self.handlers.contains_key(&normalize_model_name(name))
    }

    /// Registered model names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Build the registry for the current configuration.
    ///
    /// `echo` is always available; hosted models are registered only when their credentials
    /// are configured.
    pub fn from_config(config: &Config) -> Result<Self, ModelError> {
        let http = Client::builder()
            .user_agent(concat!("docsmith/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| {
                ModelError::ProviderUnavailable(format!("failed to build HTTP client: {error}"))
            })?;

        let mut registry = Self::new().with("echo", Arc::new(EchoModel));

        if let Some(api_key) = &config.openai_api_key {
            let base_url = config
                .openai_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
            for (name, model) in [("gpt4", "gpt-4"), ("gpt3.5", "gpt-3.5-turbo")] {
                registry.register(
                    name,
                    Arc::new(OpenAiChatModel::new(
                        http.clone(),
                        base_url.clone(),
                        api_key.clone(),
                        model,
                    )),
                );
            }
        }

        if let Some(api_key) = &config.anthropic_api_key {
            registry.register(
                "anthropic",
                Arc::new(AnthropicModel::new(
                    http.clone(),
                    DEFAULT_ANTHROPIC_URL.to_string(),
                    api_key.clone(),
                    config.anthropic_model.clone(),
                )),
            );
        }

        let ollama_url = config
            .ollama_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        for model in &config.ollama_models {
            registry.register(
                model.clone(),
                Arc::new(OllamaModel::new(http.clone(), ollama_url.clone(), model.clone())),
            );
        }

        tracing::info!(models = ?registry.names(), "Model registry initialized");
        Ok(registry)
    }
}

/// Canonical form used for registry lookups.
pub fn normalize_model_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn endpoint(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

/// Convert a non-success response into [`ModelError::GenerationFailed`].
async fn ensure_success(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ModelError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ModelError::GenerationFailed(format!(
        "{provider} returned {status}: {body}"
    )))
}
