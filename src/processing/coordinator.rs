//! Job orchestration: split, bounded fan-out, threshold check and persistence.
//!
//! Each submitted job runs on its own task:
//!
//! 1. Read the input and split it into chunks (tokenization runs on the blocking pool).
//! 2. Issue chunk jobs with at most `MAX_CONCURRENT_CHUNKS` in flight, publishing PROGRESS on
//!    every newly observed completion.
//! 3. Once every chunk job settled, compare the success rate with the threshold and either
//!    persist the artifact (SUCCESS) or publish FAILURE.
//!
//! Cancellation and the maximum wait stop the fan-out early. Chunk jobs already running are
//! drained in the background before the job's fragments are cleared.

use super::accumulator::Accumulator;
use super::chunk_processor::ChunkProcessor;
use super::chunking::split_into_chunks;
use super::jobs::{CancelOutcome, JobRecord, JobRegistry};
use super::persistence::{ArtifactWriter, FsArtifactWriter, PersistRequest, Persister};
use super::progress::ProgressTracker;
use super::reader::read_input;
use super::types::{
    Chunk, InputError, JobRequest, JobState, JobStatus, PipelineError, ProgressSnapshot,
    format_percent,
};
use crate::config::{Config, PipelineSettings};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::models::{ModelError, ModelRegistry};
use crate::retry::RetryPolicy;
use crate::store::{MemoryStore, RetryingStore, SharedStore, filename_key};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

const STATUS_PROCESSING: &str = "Processing";
const STATUS_SAVING: &str = "Saving";

/// Drives submitted jobs from PENDING to a terminal state.
///
/// Cheap to clone; clones share the job registry and pipeline components.
#[derive(Clone)]
pub struct PipelineCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    settings: PipelineSettings,
    models: Arc<ModelRegistry>,
    store: SharedStore,
    accumulator: Accumulator,
    processor: ChunkProcessor,
    persister: Persister,
    jobs: JobRegistry,
    metrics: Arc<PipelineMetrics>,
}

/// How a fan-out ended.
enum FanOut {
    Completed(ProgressSnapshot),
    Interrupted {
        snapshot: ProgressSnapshot,
        reason: String,
        in_flight: JoinSet<(usize, bool)>,
    },
}

impl PipelineCoordinator {
    /// Assemble a coordinator from its parts.
    ///
    /// `store` is wrapped with the retry policy for assembly, naming and teardown; chunk
    /// fragments are written to it directly because chunk jobs retry as a whole.
    pub fn new(
        settings: PipelineSettings,
        models: ModelRegistry,
        store: SharedStore,
        writer: Arc<dyn ArtifactWriter>,
    ) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        let policy = RetryPolicy::from_settings(&settings).with_metrics(metrics.clone());
        let durable: SharedStore = Arc::new(RetryingStore::new(store.clone(), policy.clone()));
        let accumulator = Accumulator::new(store, durable.clone());
        let models = Arc::new(models);
        let processor = ChunkProcessor::new(
            models.clone(),
            accumulator.clone(),
            policy.clone(),
            settings.system_prompt.as_str(),
        );
        let persister = Persister::new(durable.clone(), accumulator.clone(), writer, policy);
        let jobs = JobRegistry::with_retention(settings.job_retention);

        Self {
            inner: Arc::new(Inner {
                settings,
                models,
                store: durable,
                accumulator,
                processor,
                persister,
                jobs,
                metrics,
            }),
        }
    }

    /// Build the production coordinator: configured models, in-memory result store and
    /// artifacts written to `OUTPUT_FOLDER`.
    pub fn from_config(config: &Config) -> Result<Self, ModelError> {
        Ok(Self::new(
            PipelineSettings::from(config),
            ModelRegistry::from_config(config)?,
            Arc::new(MemoryStore::new()),
            Arc::new(FsArtifactWriter::new(&config.output_folder)),
        ))
    }

    /// Settings the pipeline runs with.
    pub fn settings(&self) -> &PipelineSettings {
        &self.inner.settings
    }

    /// Submit `input_path` for processing with `model_name`.
    pub async fn submit(
        &self,
        input_path: impl Into<PathBuf>,
        model_name: &str,
    ) -> Result<String, PipelineError> {
        self.submit_request(JobRequest::new(input_path, model_name))
            .await
    }

    /// Submit a job and return its identifier immediately.
    ///
    /// Unknown models are rejected here and no job is created.
    pub async fn submit_request(&self, request: JobRequest) -> Result<String, PipelineError> {
        if request.model_name.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("model name is required".into()));
        }
        self.inner.models.resolve(&request.model_name)?;

        self.evict_expired().await;

        let job_id = Uuid::new_v4().to_string();
        if let Some(filename) = &request.original_filename {
            self.inner
                .store
                .save(&filename_key(&job_id), filename)
                .await?;
        }

        let record = self.inner.jobs.create(&job_id);
        self.inner.metrics.record_submission();
        tracing::info!(
            job_id = %job_id,
            model = %request.model_name,
            input = %request.input_path.display(),
            "Job submitted"
        );

        let span = tracing::info_span!("pipeline", job_id = %job_id, model = %request.model_name);
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run_job(record, request).await }.instrument(span));
        Ok(job_id)
    }

    /// Latest status of `job_id`.
    pub fn status(&self, job_id: &str) -> Result<JobStatus, PipelineError> {
        self.inner.jobs.status(job_id)
    }

    /// Subscribe to status changes of `job_id`.
    pub fn subscribe(&self, job_id: &str) -> Result<watch::Receiver<JobStatus>, PipelineError> {
        self.inner.jobs.subscribe(job_id)
    }

    /// Cancel a running job or forget a finished one.
    pub async fn cancel(&self, job_id: &str) -> Result<CancelOutcome, PipelineError> {
        let outcome = self.inner.jobs.cancel(job_id)?;
        match outcome {
            CancelOutcome::Cancelled => tracing::info!(job_id, "Cancellation requested"),
            CancelOutcome::Forgotten => {
                self.inner.store.delete(&filename_key(job_id)).await?;
                tracing::debug!(job_id, "Job forgotten");
            }
        }
        Ok(outcome)
    }

    /// Path of the artifact produced by a successful job.
    ///
    /// `Ok(None)` when the job has not succeeded or the artifact was removed.
    pub async fn artifact_path(&self, job_id: &str) -> Result<Option<PathBuf>, PipelineError> {
        let status = self.inner.jobs.status(job_id)?;
        if status.state != JobState::Success {
            return Ok(None);
        }
        match status.result {
            Some(name) => Ok(self.inner.persister.existing_artifact(&name).await),
            None => Ok(None),
        }
    }

    /// Names accepted by [`PipelineCoordinator::submit`].
    pub fn model_names(&self) -> Vec<String> {
        self.inner.models.names()
    }

    /// Current pipeline counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Drop finished jobs past their retention along with their filename entries.
    async fn evict_expired(&self) {
        for job_id in self.inner.jobs.evict_expired() {
            if let Err(error) = self.inner.store.delete(&filename_key(&job_id)).await {
                tracing::warn!(
                    job_id = %job_id,
                    error = %error,
                    "Failed to delete filename of evicted job"
                );
            }
            tracing::debug!(job_id = %job_id, "Evicted finished job");
        }
    }

    async fn run_job(self, record: Arc<JobRecord>, request: JobRequest) {
        match self.prepare(record.id(), &request.input_path).await {
            Ok(chunks) => self.execute(&record, &request, chunks).await,
            Err(error) => self.fail(&record, ProgressSnapshot::default(), error.to_string()),
        }
    }

    /// Fan out `chunks` and settle the job.
    async fn execute(&self, record: &JobRecord, request: &JobRequest, chunks: Vec<Chunk>) {
        let job_id = record.id();
        if record.cancellation().is_cancelled() {
            self.fail(record, ProgressSnapshot::default(), "cancelled");
            return;
        }

        let total = chunks.len();
        tracing::info!(chunks = total, "Input split; fanning out chunk jobs");
        record.publish(JobStatus::progress(
            ProgressSnapshot::started(total),
            STATUS_PROCESSING,
        ));

        match self.fan_out(record, chunks, &request.model_name).await {
            FanOut::Completed(snapshot) => self.finish(record, request, snapshot).await,
            FanOut::Interrupted {
                snapshot,
                reason,
                in_flight,
            } => {
                self.fail(record, snapshot, reason);
                self.drain(job_id, total, in_flight);
            }
        }
    }

    async fn prepare(&self, job_id: &str, input_path: &Path) -> Result<Vec<Chunk>, InputError> {
        let text = read_input(input_path).await?;
        let settings = self.inner.settings.clone();
        let job_id = job_id.to_string();
        tokio::task::spawn_blocking(move || split_into_chunks(&job_id, &text, &settings))
            .await
            .map_err(|error| InputError::Interrupted(error.to_string()))?
    }

    async fn fan_out(&self, record: &JobRecord, chunks: Vec<Chunk>, model_name: &str) -> FanOut {
        let total = chunks.len();
        let limit = self.inner.settings.max_concurrent_chunks.max(1);
        let max_wait = self.inner.settings.max_job_wait;
        let cancel = record.cancellation().clone();
        let mut tracker = ProgressTracker::new(total);
        let mut queue: VecDeque<Chunk> = chunks.into();
        let mut in_flight: JoinSet<(usize, bool)> = JoinSet::new();
        let deadline = tokio::time::sleep(max_wait);
        tokio::pin!(deadline);

        loop {
            if cancel.is_cancelled() {
                return FanOut::Interrupted {
                    snapshot: tracker.snapshot(),
                    reason: "cancelled".into(),
                    in_flight,
                };
            }

            while in_flight.len() < limit {
                let Some(chunk) = queue.pop_front() else {
                    break;
                };
                tracker.mark_running(chunk.sequence_index);
                self.spawn_chunk(&mut in_flight, chunk, model_name);
            }

            if in_flight.is_empty() {
                // Only reachable if a wrapper task vanished without reporting its index.
                for index in 0..total {
                    if tracker.settle(index, false) {
                        tracing::warn!(chunk = index, "Chunk job lost; counting it as failed");
                    }
                }
                return FanOut::Completed(tracker.snapshot());
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = &mut deadline => {
                    tracing::warn!(max_wait = ?max_wait, "Job exceeded its maximum wait");
                    return FanOut::Interrupted {
                        snapshot: tracker.snapshot(),
                        reason: format!("timed out after {max_wait:?}"),
                        in_flight,
                    };
                }
                joined = in_flight.join_next() => match joined {
                    Some(Ok((index, succeeded))) => {
                        if tracker.settle(index, succeeded) {
                            self.inner.metrics.record_chunk(succeeded);
                            let snapshot = tracker.snapshot();
                            tracing::debug!(
                                chunk = index,
                                succeeded,
                                completed = snapshot.completed_count,
                                total,
                                "Chunk job settled"
                            );
                            record.publish(JobStatus::progress(snapshot, STATUS_PROCESSING));
                        }
                    }
                    Some(Err(error)) => {
                        tracing::error!(error = %error, "Chunk wrapper task failed");
                    }
                    None => {}
                },
            }
        }
    }

    /// Run one chunk job. A panic inside the processor counts as a failed chunk.
    fn spawn_chunk(&self, in_flight: &mut JoinSet<(usize, bool)>, chunk: Chunk, model_name: &str) {
        let processor = self.inner.processor.clone();
        let model_name = model_name.to_string();
        let index = chunk.sequence_index;
        let work = tokio::spawn(
            async move {
                processor
                    .process_with_retry(&chunk, &model_name)
                    .await
                    .is_ok()
            }
            .in_current_span(),
        );
        in_flight.spawn(async move { (index, work.await.unwrap_or(false)) });
    }

    async fn finish(&self, record: &JobRecord, request: &JobRequest, snapshot: ProgressSnapshot) {
        let job_id = record.id();
        let threshold = self.inner.settings.success_threshold;
        let success_rate = snapshot.success_rate();

        if success_rate < threshold {
            let reason = format!(
                "Less than {}% of the tasks were successful (failure rate: {}%)",
                format_percent(threshold),
                format_percent(1.0 - success_rate)
            );
            self.clear_fragments(job_id, snapshot.total_count).await;
            self.fail(record, snapshot, reason);
            return;
        }
        if record.cancellation().is_cancelled() {
            self.clear_fragments(job_id, snapshot.total_count).await;
            self.fail(record, snapshot, "cancelled");
            return;
        }

        record.publish(JobStatus::progress(snapshot, STATUS_SAVING));
        let persisted = self
            .inner
            .persister
            .persist(&PersistRequest {
                job_id,
                total_chunks: snapshot.total_count,
                input_path: &request.input_path,
                remove_input: request.remove_input_on_success,
            })
            .await;

        match persisted {
            Ok(artifact) => {
                tracing::info!(
                    artifact = %artifact.name,
                    success_rate = %format_percent(success_rate),
                    "Job completed"
                );
                record.publish(JobStatus::success(snapshot, artifact.name));
                self.inner.metrics.record_job_outcome(true);
            }
            Err(error) => {
                self.clear_fragments(job_id, snapshot.total_count).await;
                self.fail(
                    record,
                    snapshot,
                    format!("Could not save documentation: {error}"),
                );
            }
        }
    }

    fn fail(&self, record: &JobRecord, snapshot: ProgressSnapshot, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(job_id = record.id(), reason = %reason, "Job failed");
        if record.publish(JobStatus::failure(snapshot, reason)) {
            self.inner.metrics.record_job_outcome(false);
        }
    }

    /// Wait for the chunk jobs still running, then drop the job's fragments.
    fn drain(&self, job_id: &str, total: usize, mut in_flight: JoinSet<(usize, bool)>) {
        let coordinator = self.clone();
        let job_id = job_id.to_string();
        tokio::spawn(
            async move {
                let pending = in_flight.len();
                while in_flight.join_next().await.is_some() {}
                tracing::debug!(pending, "Drained in-flight chunk jobs");
                coordinator.clear_fragments(&job_id, total).await;
            }
            .in_current_span(),
        );
    }

    async fn clear_fragments(&self, job_id: &str, total: usize) {
        if let Err(error) = self.inner.accumulator.clear(job_id, total).await {
            tracing::warn!(job_id, error = %error, "Failed to clear accumulated fragments");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EchoModel, ModelHandler, ModelPrompt};
    use crate::processing::types::PersistenceError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn temp_dir(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("docsmith-{label}-{}", Uuid::new_v4()))
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            chunk_size: 12,
            retry_max_attempts: 2,
            retry_delay: Duration::from_millis(1),
            max_concurrent_chunks: 4,
            max_job_wait: Duration::from_secs(30),
            ..PipelineSettings::default()
        }
    }

    fn document() -> String {
        (0..6)
            .map(|index| format!("Section {index} explains how component {index} handles requests."))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    async fn write_input(directory: &Path, text: &str) -> PathBuf {
        tokio::fs::create_dir_all(directory).await.expect("dir");
        let path = directory.join("input.txt");
        tokio::fs::write(&path, text).await.expect("input");
        path
    }

    fn expected_chunks(settings: &PipelineSettings, text: &str) -> Vec<Chunk> {
        let chunks = split_into_chunks("expected", text, settings).expect("chunks");
        assert!(chunks.len() >= 3, "test document must split into several chunks");
        chunks
    }

    /// Wraps the content of each chunk and fails chunks whose text is listed.
    struct ScriptedModel {
        failing: HashSet<String>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn failing(texts: impl IntoIterator<Item = String>) -> Arc<Self> {
            Arc::new(Self {
                failing: texts.into_iter().collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ModelHandler for ScriptedModel {
        async fn complete(&self, prompt: &ModelPrompt) -> Result<String, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&prompt.user) {
                return Err(ModelError::GenerationFailed("scripted failure".into()));
            }
            Ok(format!("[{}]", prompt.user.trim()))
        }
    }

    /// Blocks every call until permits are added.
    struct GatedModel {
        gate: Semaphore,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl GatedModel {
        fn closed() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn open(&self) {
            self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    #[async_trait]
    impl ModelHandler for GatedModel {
        async fn complete(&self, prompt: &ModelPrompt) -> Result<String, ModelError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            let permit = self.gate.acquire().await;
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
            Ok(prompt.user.clone())
        }
    }

    /// Records writes in memory.
    #[derive(Default)]
    struct SpyWriter {
        writes: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ArtifactWriter for SpyWriter {
        async fn write(&self, name: &str, content: &str) -> Result<PathBuf, PersistenceError> {
            if self.fail {
                return Err(PersistenceError::Io {
                    path: self.locate(name),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.writes
                .lock()
                .expect("writes lock")
                .push((name.to_string(), content.to_string()));
            Ok(self.locate(name))
        }

        fn locate(&self, name: &str) -> PathBuf {
            PathBuf::from(name)
        }
    }

    struct Harness {
        coordinator: PipelineCoordinator,
        store: Arc<MemoryStore>,
        writer: Arc<SpyWriter>,
    }

    fn harness(settings: PipelineSettings, model: Arc<dyn ModelHandler>) -> Harness {
        harness_with_writer(settings, model, Arc::new(SpyWriter::default()))
    }

    fn harness_with_writer(
        settings: PipelineSettings,
        model: Arc<dyn ModelHandler>,
        writer: Arc<SpyWriter>,
    ) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let models = ModelRegistry::new()
            .with("echo", Arc::new(EchoModel))
            .with("scripted", model);
        let coordinator = PipelineCoordinator::new(settings, models, store.clone(), writer.clone());
        Harness {
            coordinator,
            store,
            writer,
        }
    }

    async fn wait_terminal(coordinator: &PipelineCoordinator, job_id: &str) -> JobStatus {
        let mut receiver = coordinator.subscribe(job_id).expect("subscribe");
        let status = tokio::time::timeout(
            Duration::from_secs(20),
            receiver.wait_for(|status| status.state.is_terminal()),
        )
        .await
        .expect("job finished in time")
        .expect("status channel open");
        status.clone()
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition reached in time");
    }

    async fn wait_for_empty(store: &MemoryStore) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !store.is_empty().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("store emptied in time");
    }

    #[tokio::test]
    async fn all_chunks_succeeding_persists_ordered_artifact() {
        let directory = temp_dir("coordinator-success");
        let text = document();
        let input = write_input(&directory, &text).await;
        let chunks = expected_chunks(&settings(), &text);
        let h = harness(settings(), ScriptedModel::failing([]));

        let job_id = h.coordinator.submit(&input, "scripted").await.expect("submit");
        let status = wait_terminal(&h.coordinator, &job_id).await;

        assert_eq!(status.state, JobState::Success);
        assert_eq!(status.current, chunks.len());
        assert_eq!(status.total, chunks.len());
        assert_eq!(status.status, "Task completed. Percent successful: 100%");

        let writes = h.writer.writes.lock().expect("writes").clone();
        assert_eq!(writes.len(), 1);
        let (name, content) = &writes[0];
        assert_eq!(status.result.as_deref(), Some(name.as_str()));
        assert_eq!(name, &format!("API-{job_id}-{}-Documentation.md", &job_id[..5]));
        let expected = chunks
            .iter()
            .map(|chunk| format!("[{}]", chunk.text.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        assert_eq!(content, &expected);
        assert!(h.store.is_empty().await);
        assert!(tokio::fs::try_exists(&input).await.expect("exists"));

        tokio::fs::remove_dir_all(&directory).await.ok();
    }

    fn numbered_text(index: usize) -> String {
        format!("Chunk {index} body.")
    }

    /// Run `count` hand-built chunks through the scripted model and wait for the outcome.
    async fn run_numbered_chunks(h: &Harness, count: usize) -> JobStatus {
        let job_id = Uuid::new_v4().to_string();
        let record = h.coordinator.inner.jobs.create(&job_id);
        let chunks = (0..count)
            .map(|sequence_index| Chunk {
                sequence_index,
                text: numbered_text(sequence_index),
                parent_job_id: job_id.clone(),
            })
            .collect();
        h.coordinator
            .execute(&record, &JobRequest::new("unused.txt", "scripted"), chunks)
            .await;
        record.status()
    }

    #[tokio::test]
    async fn one_of_four_chunks_failing_still_persists() {
        let model = ScriptedModel::failing([numbered_text(3)]);
        let h = harness(settings(), model.clone());

        let status = run_numbered_chunks(&h, 4).await;

        assert_eq!(status.state, JobState::Success);
        assert_eq!((status.current, status.total), (4, 4));
        assert_eq!(status.status, "Task completed. Percent successful: 75%");
        let writes = h.writer.writes.lock().expect("writes").clone();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, "[Chunk 0 body.]\n\n[Chunk 1 body.]\n\n[Chunk 2 body.]");
        assert_eq!(model.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn both_of_two_chunks_failing_never_persists() {
        let h = harness(
            settings(),
            ScriptedModel::failing([numbered_text(0), numbered_text(1)]),
        );

        let status = run_numbered_chunks(&h, 2).await;

        assert_eq!(status.state, JobState::Failure);
        assert_eq!((status.current, status.total), (2, 2));
        let reason = status.reason.expect("reason");
        assert!(reason.contains("Less than 50%"), "{reason}");
        assert!(h.writer.writes.lock().expect("writes").is_empty());
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn success_rate_of_exactly_half_persists() {
        let h = harness(
            settings(),
            ScriptedModel::failing([numbered_text(1), numbered_text(2)]),
        );

        let status = run_numbered_chunks(&h, 4).await;

        assert_eq!(status.state, JobState::Success);
        assert_eq!(status.status, "Task completed. Percent successful: 50%");
        let writes = h.writer.writes.lock().expect("writes").clone();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, "[Chunk 0 body.]\n\n[Chunk 3 body.]");
    }

    #[tokio::test]
    async fn cancellation_after_fan_out_skips_persistence() {
        let h = harness(settings(), ScriptedModel::failing([]));
        let job_id = "cancelled-late";
        let record = h.coordinator.inner.jobs.create(job_id);
        h.coordinator
            .inner
            .accumulator
            .record(job_id, 0, "docs")
            .await
            .expect("record");
        let snapshot = ProgressSnapshot {
            completed_count: 1,
            total_count: 1,
            success_count: 1,
        };

        record.cancellation().cancel();
        h.coordinator
            .finish(&record, &JobRequest::new("unused.txt", "scripted"), snapshot)
            .await;

        let status = record.status();
        assert_eq!(status.state, JobState::Failure);
        assert_eq!(status.reason.as_deref(), Some("cancelled"));
        assert!(h.writer.writes.lock().expect("writes").is_empty());
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn finished_jobs_are_evicted_on_next_submission() {
        let directory = temp_dir("coordinator-retention");
        let input = write_input(&directory, &document()).await;
        let settings = PipelineSettings {
            job_retention: Duration::ZERO,
            ..settings()
        };
        let h = harness(settings, ScriptedModel::failing([]));

        let first = h
            .coordinator
            .submit_request(JobRequest {
                original_filename: Some("first.txt".into()),
                ..JobRequest::new(&input, "echo")
            })
            .await
            .expect("submit");
        let status = wait_terminal(&h.coordinator, &first).await;
        assert_eq!(status.state, JobState::Success);
        assert!(h.store.keys().await.contains(&filename_key(&first)));

        let second = h.coordinator.submit(&input, "echo").await.expect("submit");

        assert!(matches!(
            h.coordinator.status(&first),
            Err(PipelineError::UnknownJob(_))
        ));
        assert!(!h.store.keys().await.contains(&filename_key(&first)));
        assert!(h.coordinator.status(&second).is_ok());
        wait_terminal(&h.coordinator, &second).await;

        tokio::fs::remove_dir_all(&directory).await.ok();
    }

    #[tokio::test]
    async fn success_rate_below_threshold_fails_without_artifact() {
        let directory = temp_dir("coordinator-below");
        let text = document();
        let input = write_input(&directory, &text).await;
        let chunks = expected_chunks(&settings(), &text);
        let failing: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let h = harness(settings(), ScriptedModel::failing(failing));

        let job_id = h.coordinator.submit(&input, "scripted").await.expect("submit");
        let status = wait_terminal(&h.coordinator, &job_id).await;

        assert_eq!(status.state, JobState::Failure);
        assert_eq!(status.current, chunks.len());
        assert_eq!(
            status.reason.as_deref(),
            Some("Less than 50% of the tasks were successful (failure rate: 100%)")
        );
        assert!(h.writer.writes.lock().expect("writes").is_empty());
        assert!(h.store.is_empty().await);

        let metrics = h.coordinator.metrics_snapshot();
        assert_eq!(metrics.jobs_failed, 1);
        assert_eq!(metrics.chunks_failed, chunks.len() as u64);

        tokio::fs::remove_dir_all(&directory).await.ok();
    }

    #[tokio::test]
    async fn published_progress_is_monotonic_and_bounded() {
        let directory = temp_dir("coordinator-progress");
        let text = document();
        let input = write_input(&directory, &text).await;
        let h = harness(settings(), ScriptedModel::failing([]));

        let job_id = h.coordinator.submit(&input, "scripted").await.expect("submit");
        let mut receiver = h.coordinator.subscribe(&job_id).expect("subscribe");
        let mut observed = vec![receiver.borrow_and_update().clone()];
        while !observed.last().expect("status").state.is_terminal() {
            tokio::time::timeout(Duration::from_secs(20), receiver.changed())
                .await
                .expect("update in time")
                .expect("channel open");
            observed.push(receiver.borrow_and_update().clone());
        }

        for pair in observed.windows(2) {
            assert!(pair[1].current >= pair[0].current);
        }
        for status in &observed {
            assert!(status.current <= status.total || status.state == JobState::Pending);
        }
        assert_eq!(observed.last().expect("final").state, JobState::Success);

        tokio::fs::remove_dir_all(&directory).await.ok();
    }

    #[tokio::test]
    async fn in_flight_chunk_jobs_never_exceed_limit() {
        let directory = temp_dir("coordinator-limit");
        let input = write_input(&directory, &document()).await;
        let settings = PipelineSettings {
            max_concurrent_chunks: 2,
            ..settings()
        };
        let model = GatedModel::closed();
        let h = harness(settings, model.clone());

        let job_id = h.coordinator.submit(&input, "scripted").await.expect("submit");
        wait_until(|| model.active.load(Ordering::SeqCst) == 2).await;
        model.open();
        let status = wait_terminal(&h.coordinator, &job_id).await;

        assert_eq!(status.state, JobState::Success);
        assert_eq!(model.peak.load(Ordering::SeqCst), 2);

        tokio::fs::remove_dir_all(&directory).await.ok();
    }

    #[tokio::test]
    async fn cancellation_fails_job_and_clears_fragments_after_drain() {
        let directory = temp_dir("coordinator-cancel");
        let input = write_input(&directory, &document()).await;
        let model = GatedModel::closed();
        let h = harness(settings(), model.clone());

        let job_id = h.coordinator.submit(&input, "scripted").await.expect("submit");
        wait_until(|| model.active.load(Ordering::SeqCst) > 0).await;

        let outcome = h.coordinator.cancel(&job_id).await.expect("cancel");
        assert_eq!(outcome, CancelOutcome::Cancelled);
        let status = wait_terminal(&h.coordinator, &job_id).await;
        assert_eq!(status.state, JobState::Failure);
        assert_eq!(status.reason.as_deref(), Some("cancelled"));

        model.open();
        wait_until(|| model.active.load(Ordering::SeqCst) == 0).await;
        wait_for_empty(&h.store).await;
        assert!(h.writer.writes.lock().expect("writes").is_empty());
        assert_eq!(h.coordinator.status(&job_id).expect("status"), status);

        tokio::fs::remove_dir_all(&directory).await.ok();
    }

    #[tokio::test]
    async fn exceeding_maximum_wait_fails_job() {
        let directory = temp_dir("coordinator-timeout");
        let input = write_input(&directory, &document()).await;
        let settings = PipelineSettings {
            max_job_wait: Duration::from_millis(50),
            ..settings()
        };
        let model = GatedModel::closed();
        let h = harness(settings, model.clone());

        let job_id = h.coordinator.submit(&input, "scripted").await.expect("submit");
        let status = wait_terminal(&h.coordinator, &job_id).await;
        model.open();

        assert_eq!(status.state, JobState::Failure);
        assert_eq!(status.reason.as_deref(), Some("timed out after 50ms"));
        wait_for_empty(&h.store).await;

        tokio::fs::remove_dir_all(&directory).await.ok();
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_at_submission() {
        let h = harness(settings(), ScriptedModel::failing([]));

        let error = h
            .coordinator
            .submit("missing.txt", "gpt-17")
            .await
            .unwrap_err();

        assert!(matches!(error, PipelineError::UnsupportedModel(_)));
        assert_eq!(error.to_string(), "Unsupported model: gpt-17");
        assert_eq!(h.coordinator.metrics_snapshot().jobs_submitted, 0);
    }

    #[tokio::test]
    async fn empty_or_missing_input_fails_the_job() {
        let directory = temp_dir("coordinator-empty");
        let input = write_input(&directory, "  \n\t ").await;
        let h = harness(settings(), ScriptedModel::failing([]));

        let empty = h.coordinator.submit(&input, "echo").await.expect("submit");
        let status = wait_terminal(&h.coordinator, &empty).await;
        assert_eq!(status.state, JobState::Failure);
        assert_eq!(status.total, 0);
        assert!(status.reason.expect("reason").contains("empty"));

        let missing = h
            .coordinator
            .submit(directory.join("nope.txt"), "echo")
            .await
            .expect("submit");
        let status = wait_terminal(&h.coordinator, &missing).await;
        assert_eq!(status.state, JobState::Failure);
        assert!(status.reason.expect("reason").contains("Failed to read input"));

        tokio::fs::remove_dir_all(&directory).await.ok();
    }

    #[tokio::test]
    async fn persistence_exhaustion_fails_the_job() {
        let directory = temp_dir("coordinator-persist");
        let input = write_input(&directory, &document()).await;
        let writer = Arc::new(SpyWriter {
            fail: true,
            ..SpyWriter::default()
        });
        let h = harness_with_writer(settings(), ScriptedModel::failing([]), writer);

        let job_id = h.coordinator.submit(&input, "scripted").await.expect("submit");
        let status = wait_terminal(&h.coordinator, &job_id).await;

        assert_eq!(status.state, JobState::Failure);
        let reason = status.reason.expect("reason");
        assert!(reason.starts_with("Could not save documentation"), "{reason}");
        assert!(h.store.is_empty().await);
        assert_eq!(h.coordinator.metrics_snapshot().retries, 1);

        tokio::fs::remove_dir_all(&directory).await.ok();
    }

    #[tokio::test]
    async fn uploads_are_named_after_the_original_file_and_removed() {
        let directory = temp_dir("coordinator-upload");
        let input = write_input(&directory, &document()).await;
        let h = harness(settings(), ScriptedModel::failing([]));

        let job_id = h
            .coordinator
            .submit_request(JobRequest {
                original_filename: Some("handbook.txt".into()),
                remove_input_on_success: true,
                ..JobRequest::new(&input, "echo")
            })
            .await
            .expect("submit");
        let status = wait_terminal(&h.coordinator, &job_id).await;

        assert_eq!(
            status.result,
            Some(format!("handbook.txt-{}-Documentation.md", &job_id[..5]))
        );
        assert!(!tokio::fs::try_exists(&input).await.expect("exists"));
        assert_eq!(h.store.keys().await, vec![filename_key(&job_id)]);

        let outcome = h.coordinator.cancel(&job_id).await.expect("forget");
        assert_eq!(outcome, CancelOutcome::Forgotten);
        assert!(h.store.is_empty().await);
        assert!(matches!(
            h.coordinator.status(&job_id),
            Err(PipelineError::UnknownJob(_))
        ));

        tokio::fs::remove_dir_all(&directory).await.ok();
    }

    #[tokio::test]
    async fn artifact_path_is_available_only_after_success() {
        let directory = temp_dir("coordinator-artifact");
        let input = write_input(&directory, &document()).await;
        let store = Arc::new(MemoryStore::new());
        let coordinator = PipelineCoordinator::new(
            settings(),
            ModelRegistry::new().with("echo", Arc::new(EchoModel)),
            store,
            Arc::new(FsArtifactWriter::new(directory.join("docs"))),
        );

        let job_id = coordinator.submit(&input, "ECHO").await.expect("submit");
        let status = wait_terminal(&coordinator, &job_id).await;
        assert_eq!(status.state, JobState::Success);

        let path = coordinator
            .artifact_path(&job_id)
            .await
            .expect("known job")
            .expect("artifact exists");
        let content = tokio::fs::read_to_string(&path).await.expect("artifact");
        assert!(content.contains("Section 0"));
        assert!(content.find("Section 0") < content.find("Section 5"));

        tokio::fs::remove_dir_all(&directory).await.ok();
    }
}
