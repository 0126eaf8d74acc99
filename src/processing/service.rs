//! Service abstraction shared by the HTTP surface and the CLI.

use super::coordinator::PipelineCoordinator;
use super::jobs::CancelOutcome;
use super::types::{JobRequest, JobStatus, PipelineError};
use crate::metrics::MetricsSnapshot;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::watch;

/// Abstraction over the pipeline used by external surfaces (HTTP, CLI).
///
/// Lets the router be exercised with stub implementations in tests.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Submit a job and return its identifier.
    async fn submit(&self, request: JobRequest) -> Result<String, PipelineError>;

    /// Latest status of a job.
    fn status(&self, job_id: &str) -> Result<JobStatus, PipelineError>;

    /// Subscribe to status changes of a job.
    fn subscribe(&self, job_id: &str) -> Result<watch::Receiver<JobStatus>, PipelineError>;

    /// Cancel a running job or forget a finished one.
    async fn cancel_or_forget(&self, job_id: &str) -> Result<CancelOutcome, PipelineError>;

    /// Artifact of a successful job, if present.
    async fn artifact_path(&self, job_id: &str) -> Result<Option<PathBuf>, PipelineError>;

    /// Model names accepted on submission.
    fn model_names(&self) -> Vec<String>;

    /// Current pipeline counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

#[async_trait]
impl PipelineApi for PipelineCoordinator {
    async fn submit(&self, request: JobRequest) -> Result<String, PipelineError> {
        self.submit_request(request).await
    }

    fn status(&self, job_id: &str) -> Result<JobStatus, PipelineError> {
        PipelineCoordinator::status(self, job_id)
    }

    fn subscribe(&self, job_id: &str) -> Result<watch::Receiver<JobStatus>, PipelineError> {
        PipelineCoordinator::subscribe(self, job_id)
    }

    async fn cancel_or_forget(&self, job_id: &str) -> Result<CancelOutcome, PipelineError> {
        self.cancel(job_id).await
    }

    async fn artifact_path(&self, job_id: &str) -> Result<Option<PathBuf>, PipelineError> {
        PipelineCoordinator::artifact_path(self, job_id).await
    }

    fn model_names(&self) -> Vec<String> {
        PipelineCoordinator::model_names(self)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        PipelineCoordinator::metrics_snapshot(self)
    }
}
