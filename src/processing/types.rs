//! Core data types and error definitions for the processing pipeline.

use crate::models::{ModelError, UnsupportedModelError};
use crate::retry::Transient;
use crate::store::StoreError;
use anyhow::Error as TokenizerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading and splitting the input. Never retried.
#[derive(Debug, Error)]
pub enum InputError {
    /// Input contained no text once whitespace was ignored.
    #[error("Input is empty: nothing to process")]
    Empty,
    /// Splitting was configured with an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Input file could not be read.
    #[error("Failed to read input {path}: {source}")]
    Io {
        /// Path of the input file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Input file is not valid UTF-8 text.
    #[error("Input {path} is not valid UTF-8 text")]
    NotUtf8 {
        /// Path of the input file.
        path: PathBuf,
    },
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Tokenizer model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
    /// The splitting task stopped before producing chunks.
    #[error("Splitting was interrupted: {0}")]
    Interrupted(String),
}

/// Errors raised while processing a single chunk.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// No handler is registered for the requested model.
    #[error(transparent)]
    UnsupportedModel(#[from] UnsupportedModelError),
    /// The model provider failed to produce content.
    #[error("Model invocation failed: {0}")]
    Model(#[from] ModelError),
    /// The fragment could not be written to the result store.
    #[error("Failed to record chunk result: {0}")]
    Store(#[from] StoreError),
}

impl Transient for ChunkError {
    fn is_transient(&self) -> bool {
        !matches!(self, Self::UnsupportedModel(_))
    }
}

/// Errors raised while writing the final artifact.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Accumulated fragments or the filename could not be read from the store.
    #[error("Result store request failed: {0}")]
    Store(#[from] StoreError),
    /// Artifact could not be written.
    #[error("Failed to write artifact {path}: {source}")]
    Io {
        /// Path being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl Transient for PersistenceError {}

/// Errors returned to callers of the pipeline API.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Submission named a model without a registered handler.
    #[error(transparent)]
    UnsupportedModel(#[from] UnsupportedModelError),
    /// No job is tracked under the given identifier.
    #[error("Unknown job: {0}")]
    UnknownJob(String),
    /// Submission was malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// Result store could not be reached.
    #[error("Result store request failed: {0}")]
    Store(#[from] StoreError),
}

/// One unit of split input text assigned to exactly one processing job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Zero-based position of the chunk in the original document.
    pub sequence_index: usize,
    /// Chunk text.
    pub text: String,
    /// Job this chunk belongs to.
    pub parent_job_id: String,
}

/// Submission parameters for a pipeline job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// File to read and split.
    pub input_path: PathBuf,
    /// Model name resolved through the model registry.
    pub model_name: String,
    /// Original filename used to name the artifact; `API-<id>` when absent.
    pub original_filename: Option<String>,
    /// Delete `input_path` once the artifact has been saved.
    pub remove_input_on_success: bool,
}

impl JobRequest {
    /// Request processing of an existing file without removing it afterwards.
    pub fn new(input_path: impl Into<PathBuf>, model_name: impl Into<String>) -> Self {
        Self {
            input_path: input_path.into(),
            model_name: model_name.into(),
            original_filename: None,
            remove_input_on_success: false,
        }
    }
}

/// Externally observable job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted, not yet split.
    Pending,
    /// Chunk jobs are running.
    Progress,
    /// Artifact persisted.
    Success,
    /// Job ended without an artifact.
    Failure,
}

impl JobState {
    /// Whether no further transition is permitted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// Status payload returned by polling and streaming interfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Current state.
    pub state: JobState,
    /// Chunk jobs that reached a terminal state.
    pub current: usize,
    /// Total chunk jobs.
    pub total: usize,
    /// Human-readable status line.
    pub status: String,
    /// Artifact file name on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobStatus {
    /// Status of a job that has not been split yet.
    pub fn pending() -> Self {
        Self {
            state: JobState::Pending,
            current: 0,
            total: 0,
            status: "Pending...".into(),
            result: None,
            reason: None,
        }
    }

    /// Status reported while chunk jobs complete.
    pub fn progress(snapshot: ProgressSnapshot, status: impl Into<String>) -> Self {
        Self {
            state: JobState::Progress,
            current: snapshot.completed_count,
            total: snapshot.total_count,
            status: status.into(),
            result: None,
            reason: None,
        }
    }

    /// Terminal success carrying the artifact name.
    pub fn success(snapshot: ProgressSnapshot, artifact: String) -> Self {
        Self {
            state: JobState::Success,
            current: snapshot.completed_count,
            total: snapshot.total_count,
            status: format!(
                "Task completed. Percent successful: {}%",
                format_percent(snapshot.success_rate())
            ),
            result: Some(artifact),
            reason: None,
        }
    }

    /// Terminal failure carrying `reason`.
    pub fn failure(snapshot: ProgressSnapshot, reason: impl Into<String>) -> Self {
        Self {
            state: JobState::Failure,
            current: snapshot.completed_count,
            total: snapshot.total_count,
            status: "Failed".into(),
            result: None,
            reason: Some(reason.into()),
        }
    }
}

/// Completion counters derived from the chunk states of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSnapshot {
    /// Chunk jobs in a terminal state.
    pub completed_count: usize,
    /// Chunk jobs in the fan-out.
    pub total_count: usize,
    /// Chunk jobs that produced content.
    pub success_count: usize,
}

impl ProgressSnapshot {
    /// Snapshot of a fan-out where nothing has completed yet.
    pub fn started(total_count: usize) -> Self {
        Self {
            completed_count: 0,
            total_count,
            success_count: 0,
        }
    }

    /// Whether every chunk job reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.completed_count == self.total_count
    }

    /// Share of chunk jobs that succeeded, over the whole fan-out.
    pub fn success_rate(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_count as f64
    }
}

/// Render a ratio as a percentage with at most two decimals and no trailing zeros.
pub fn format_percent(ratio: f64) -> String {
    let rendered = format!("{:.2}", ratio * 100.0);
    rendered
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}
