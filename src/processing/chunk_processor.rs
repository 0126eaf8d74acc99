//! Per-chunk model invocation with retries.

use super::accumulator::Accumulator;
use super::types::{Chunk, ChunkError};
use crate::models::{ModelPrompt, ModelRegistry};
use crate::retry::RetryPolicy;
use std::sync::Arc;

/// Applies a named model to one chunk and records the result in the accumulator.
#[derive(Clone)]
pub struct ChunkProcessor {
    models: Arc<ModelRegistry>,
    accumulator: Accumulator,
    policy: RetryPolicy,
    system_prompt: Arc<str>,
}

impl ChunkProcessor {
    /// Build a processor.
    pub fn new(
        models: Arc<ModelRegistry>,
        accumulator: Accumulator,
        policy: RetryPolicy,
        system_prompt: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            models,
            accumulator,
            policy,
            system_prompt: system_prompt.into(),
        }
    }

    /// Run one attempt: invoke the model, then record the content under the chunk's index.
    pub async fn process(&self, chunk: &Chunk, model_name: &str) -> Result<String, ChunkError> {
        let handler = self.models.resolve(model_name)?;
        let prompt = ModelPrompt {
            system: self.system_prompt.to_string(),
            user: chunk.text.clone(),
        };
        let content = handler.complete(&prompt).await?;
        self.accumulator
            .record(&chunk.parent_job_id, chunk.sequence_index, &content)
            .await?;
        Ok(content)
    }

    /// Process `chunk`, retrying transient failures with the configured policy.
    ///
    /// An error here fails this chunk only; sibling chunks are unaffected.
    pub async fn process_with_retry(
        &self,
        chunk: &Chunk,
        model_name: &str,
    ) -> Result<String, ChunkError> {
        let result = self
            .policy
            .run("process_chunk", move |attempt| {
                tracing::debug!(
                    job_id = %chunk.parent_job_id,
                    chunk = chunk.sequence_index,
                    attempt,
                    "Processing chunk"
                );
                self.process(chunk, model_name)
            })
            .await;

        match &result {
            Ok(content) => tracing::debug!(
                job_id = %chunk.parent_job_id,
                chunk = chunk.sequence_index,
                bytes = content.len(),
                "Chunk processed"
            ),
            Err(error) => tracing::error!(
                job_id = %chunk.parent_job_id,
                chunk = chunk.sequence_index,
                error = %error,
                "Chunk failed"
            ),
        }
        result
    }
}
