//! Document processing pipeline: splitting, chunk fan-out, accumulation and persistence.

pub mod accumulator;
pub mod chunk_processor;
pub mod chunking;
mod coordinator;
pub mod jobs;
pub mod persistence;
pub mod progress;
pub mod reader;
pub mod sanitize;
mod service;
pub mod types;

pub use coordinator::PipelineCoordinator;
pub use jobs::{CancelOutcome, JobRegistry};
pub use persistence::{ArtifactWriter, FsArtifactWriter, artifact_file_name};
pub use service::PipelineApi;
pub use types::{
    Chunk, ChunkError, InputError, JobRequest, JobState, JobStatus, PersistenceError,
    PipelineError, ProgressSnapshot,
};
