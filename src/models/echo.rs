use super::{ModelError, ModelHandler, ModelPrompt};
use async_trait::async_trait;

/// Deterministic offline model that returns the chunk text unchanged.
///
/// Useful for local runs and tests where no provider is reachable.
pub struct EchoModel;

#[async_trait]
impl ModelHandler for EchoModel {
    async fn complete(&self, prompt: &ModelPrompt) -> Result<String, ModelError> {
        Ok(prompt.user.trim().to_string())
    }
}
