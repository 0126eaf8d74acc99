//! OpenAI-compatible chat completions adapter.

use super::{ModelError, ModelHandler, ModelPrompt, endpoint, ensure_success};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Chat-completions client bound to one model identifier.
pub struct OpenAiChatModel {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChatModel {
    /// Bind a client to `model` served from `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        http: Client,
        base_url: String,
        api_key: String,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url,
            api_key,
            model: model.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ModelHandler for OpenAiChatModel {
    async fn complete(&self, prompt: &ModelPrompt) -> Result<String, ModelError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": 0.2,
        });

        let response = self
            .http
            .post(endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                ModelError::ProviderUnavailable(format!(
                    "failed to reach OpenAI at {}: {error}",
                    self.base_url
                ))
            })?;
        let response = ensure_success("OpenAI", response).await?;

        let body: ChatResponse = response.json().await.map_err(|error| {
            ModelError::InvalidResponse(format!("failed to decode OpenAI response: {error}"))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| ModelError::InvalidResponse("OpenAI returned no choices".into()))
    }
}
