//! Ollama generate adapter issuing HTTP requests directly to the runtime.

use super::{ModelError, ModelHandler, ModelPrompt, endpoint, ensure_success};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

/// Generate-endpoint client bound to one local model.
pub struct OllamaModel {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaModel {
    /// Bind a client to `model` served by the Ollama runtime at `base_url`.
    pub fn new(http: Client, base_url: String, model: String) -> Self {
        Self {
            http,
            base_url,
            model,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl ModelHandler for OllamaModel {
    async fn complete(&self, prompt: &ModelPrompt) -> Result<String, ModelError> {
        let url = endpoint(&self.base_url, "api/generate");
        let payload = json!({
            "model": self.model,
            "system": prompt.system,
            "prompt": prompt.user,
            "stream": false,
            "options": {
                "temperature": 0.2,
            }
        });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                ModelError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ModelError::ProviderUnavailable(format!(
                "Ollama endpoint {url} returned 404"
            )));
        }
        let response = ensure_success("Ollama", response).await?;

        let body: OllamaResponse = response.json().await.map_err(|error| {
            ModelError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(ModelError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn prompt() -> ModelPrompt {
        ModelPrompt {
            system: "Document this".into(),
            user: "text".into(),
        }
    }

    #[tokio::test]
    async fn handles_successful_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .body_contains("\"model\":\"llama3\"");
                then.status(200).json_body(json!({
                    "response": "Generated docs",
                    "done": true
                }));
            })
            .await;

        let model = OllamaModel::new(Client::new(), server.base_url(), "llama3".into());
        let content = model.complete(&prompt()).await.expect("completion");

        mock.assert_async().await;
        assert_eq!(content, "Generated docs");
    }

    #[tokio::test]
    async fn incomplete_response_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).json_body(json!({
                    "response": "partial",
                    "done": false
                }));
            })
            .await;

        let model = OllamaModel::new(Client::new(), server.base_url(), "llama3".into());
        let error = model.complete(&prompt()).await.unwrap_err();

        assert!(matches!(error, ModelError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn missing_endpoint_is_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(404);
            })
            .await;

        let model = OllamaModel::new(Client::new(), server.base_url(), "llama3".into());
        let error = model.complete(&prompt()).await.unwrap_err();

        assert!(matches!(error, ModelError::ProviderUnavailable(_)));
    }
}
