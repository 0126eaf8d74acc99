use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    jobs_submitted: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    chunks_succeeded: AtomicU64,
    chunks_failed: AtomicU64,
    chunk_retries: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly accepted job.
    pub fn record_submission(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job reaching its terminal state.
    pub fn record_job_outcome(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.jobs_succeeded
        } else {
            &self.jobs_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one chunk job reaching its terminal state.
    pub fn record_chunk(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.chunks_succeeded
        } else {
            &self.chunks_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry of any retryable unit.
    pub fn record_retry(&self) {
        self.chunk_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            chunks_succeeded: self.chunks_succeeded.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            retries: self.chunk_retries.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Jobs accepted since startup.
    pub jobs_submitted: u64,
    /// Jobs that finished with a persisted artifact.
    pub jobs_succeeded: u64,
    /// Jobs that finished without an artifact.
    pub jobs_failed: u64,
    /// Chunk jobs that produced content.
    pub chunks_succeeded: u64,
    /// Chunk jobs that exhausted their retry budget.
    pub chunks_failed: u64,
    /// Retries performed across chunks, store calls and artifact writes.
    pub retries: u64,
}
