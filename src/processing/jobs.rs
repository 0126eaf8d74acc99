//! In-process registry of submitted jobs and their published status.
//!
//! Finished jobs stay queryable for the retention period, then the next submission sweeps them.

use super::types::{JobState, JobStatus, PipelineError};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How long a finished job stays in the registry unless configured otherwise.
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(3_600);

/// One tracked job.
#[derive(Debug)]
pub struct JobRecord {
    id: String,
    status: watch::Sender<JobStatus>,
    cancel: CancellationToken,
    finished_at: OnceLock<Instant>,
}

impl JobRecord {
    /// Job identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest published status.
    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every accepted status change.
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    /// Token raised when the job is cancelled.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Time elapsed since the job reached a terminal state.
    pub fn finished_for(&self) -> Option<Duration> {
        self.finished_at.get().map(Instant::elapsed)
    }

    /// Publish `next`.
    ///
    /// Returns `false` when the update was dropped: terminal states are final and the
    /// completion count of a running job never moves backwards.
    pub fn publish(&self, next: JobStatus) -> bool {
        self.status.send_if_modified(|current| {
            if current.state.is_terminal() || *current == next {
                return false;
            }
            if next.state == JobState::Progress
                && current.state == JobState::Progress
                && next.current < current.current
            {
                return false;
            }
            if next.state.is_terminal() {
                let _ = self.finished_at.set(Instant::now());
            }
            *current = next;
            true
        })
    }
}

/// Result of a cancel-or-forget request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The running job was asked to stop.
    Cancelled,
    /// The finished job was removed from the registry.
    Forgotten,
}

/// Jobs keyed by identifier.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<JobRecord>>>,
    retention: Duration,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    /// Empty registry keeping finished jobs for [`DEFAULT_JOB_RETENTION`].
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_JOB_RETENTION)
    }

    /// Empty registry keeping finished jobs for `retention`.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Track a new job in the PENDING state.
    pub fn create(&self, id: &str) -> Arc<JobRecord> {
        let (status, _) = watch::channel(JobStatus::pending());
        let record = Arc::new(JobRecord {
            id: id.to_string(),
            status,
            cancel: CancellationToken::new(),
            finished_at: OnceLock::new(),
        });
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), record.clone());
        record
    }

    /// Look up a job.
    pub fn get(&self, id: &str) -> Option<Arc<JobRecord>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Latest status of `id`. Reading has no effect on the job.
    pub fn status(&self, id: &str) -> Result<JobStatus, PipelineError> {
        self.require(id).map(|record| record.status())
    }

    /// Subscribe to status changes of `id`.
    pub fn subscribe(&self, id: &str) -> Result<watch::Receiver<JobStatus>, PipelineError> {
        self.require(id).map(|record| record.subscribe())
    }

    /// Cancel a running job, or forget a finished one.
    pub fn cancel(&self, id: &str) -> Result<CancelOutcome, PipelineError> {
        let record = self.require(id)?;
        if record.status().state.is_terminal() {
            self.forget(id);
            return Ok(CancelOutcome::Forgotten);
        }
        record.cancel.cancel();
        Ok(CancelOutcome::Cancelled)
    }

    /// Drop `id` from the registry. Running work is not affected.
    pub fn forget(&self, id: &str) -> Option<Arc<JobRecord>> {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Drop every job that finished at least the retention period ago.
    ///
    /// Returns the evicted identifiers. Running jobs are never evicted.
    pub fn evict_expired(&self) -> Vec<String> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = jobs
            .iter()
            .filter(|(_, record)| {
                record
                    .finished_for()
                    .is_some_and(|elapsed| elapsed >= self.retention)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            jobs.remove(id);
        }
        expired
    }

    /// Number of tracked jobs.
    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no jobs are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn require(&self, id: &str) -> Result<Arc<JobRecord>, PipelineError> {
        self.get(id)
            .ok_or_else(|| PipelineError::UnknownJob(id.to_string()))
    }
}
