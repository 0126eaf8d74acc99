//! Anthropic messages API adapter.

use super::{ModelError, ModelHandler, ModelPrompt, endpoint, ensure_success};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Messages API client bound to one model identifier.
pub struct AnthropicModel {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicModel {
    /// Bind a client to `model` served from `base_url`.
    pub fn new(http: Client, base_url: String, api_key: String, model: String) -> Self {
        Self {
            http,
            base_url,
            api_key,
            model,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl ModelHandler for AnthropicModel {
    async fn complete(&self, prompt: &ModelPrompt) -> Result<String, ModelError> {
        let payload = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": prompt.system,
            "messages": [
                { "role": "user", "content": prompt.user },
            ],
        });

        let response = self
            .http
            .post(endpoint(&self.base_url, "v1/messages"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                ModelError::ProviderUnavailable(format!(
                    "failed to reach Anthropic at {}: {error}",
                    self.base_url
                ))
            })?;
        let response = ensure_success("Anthropic", response).await?;

        let body: MessagesResponse = response.json().await.map_err(|error| {
            ModelError::InvalidResponse(format!("failed to decode Anthropic response: {error}"))
        })?;

        let text: Vec<String> = body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(ModelError::InvalidResponse(
                "Anthropic returned no text blocks".into(),
            ));
        }
        Ok(text.join("").trim().to_string())
    }
}
