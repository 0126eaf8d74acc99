//! Final assembly and artifact persistence.
//!
//! Artifacts are named `<uploaded filename or API-<id>>-<first 5 chars of id>-Documentation.md`.
//! Writes go to a temporary file that is renamed into place, so retrying a write after a fault
//! still leaves exactly one artifact behind.

use super::accumulator::Accumulator;
use super::types::PersistenceError;
use crate::retry::RetryPolicy;
use crate::store::{SharedStore, filename_key};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Extension of generated artifacts.
pub const ARTIFACT_EXTENSION: &str = "md";

/// Destination for assembled documentation.
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    /// Write `content` under `name`, replacing any previous artifact with that name.
    async fn write(&self, name: &str, content: &str) -> Result<PathBuf, PersistenceError>;

    /// Location an artifact named `name` is (or would be) stored at.
    fn locate(&self, name: &str) -> PathBuf;
}

/// Writes artifacts into a directory on the local filesystem.
pub struct FsArtifactWriter {
    directory: PathBuf,
}

impl FsArtifactWriter {
    /// Write artifacts into `directory`, creating it on first use.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl ArtifactWriter for FsArtifactWriter {
    async fn write(&self, name: &str, content: &str) -> Result<PathBuf, PersistenceError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source| PersistenceError::Io { path, source }
        };

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(io_error(&self.directory))?;

        let target = self.locate(name);
        if let Ok(existing) = tokio::fs::read(&target).await {
            if digest(&existing) == digest(content.as_bytes()) {
                tracing::debug!(path = %target.display(), "Artifact unchanged; skipping write");
                return Ok(target);
            }
        }

        let staging = self
            .directory
            .join(format!(".{name}.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&staging, content)
            .await
            .map_err(io_error(&staging))?;
        if let Err(source) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(PersistenceError::Io {
                path: target,
                source,
            });
        }
        Ok(target)
    }

    fn locate(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Name of the artifact produced for `job_id`.
///
/// The uploaded filename is kept whole, extension included: `notes.txt` becomes
/// `notes.txt-<prefix>-Documentation.md`.
pub fn artifact_file_name(original_filename: Option<&str>, job_id: &str) -> String {
    let base = original_filename
        .and_then(|name| Path::new(name.trim()).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("API-{job_id}"));
    let prefix: String = job_id.chars().take(5).collect();
    format!("{base}-{prefix}-Documentation.{ARTIFACT_EXTENSION}")
}

/// What to persist for a finished fan-out.
#[derive(Debug, Clone)]
pub struct PersistRequest<'a> {
    /// Job identifier.
    pub job_id: &'a str,
    /// Number of chunks in the fan-out.
    pub total_chunks: usize,
    /// Input file processed by the job.
    pub input_path: &'a Path,
    /// Delete the input file after a successful write.
    pub remove_input: bool,
}

/// Location of a persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedArtifact {
    /// Artifact file name.
    pub name: String,
    /// Full path of the written artifact.
    pub path: PathBuf,
}

/// Assembles accumulated fragments and writes the artifact.
#[derive(Clone)]
pub struct Persister {
    store: SharedStore,
    accumulator: Accumulator,
    writer: Arc<dyn ArtifactWriter>,
    policy: RetryPolicy,
}

impl Persister {
    /// Build a persister. `store` should already retry on its own.
    pub fn new(
        store: SharedStore,
        accumulator: Accumulator,
        writer: Arc<dyn ArtifactWriter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            accumulator,
            writer,
            policy,
        }
    }

    /// Artifact name for `job_id`, using the recorded upload filename when present.
    pub async fn artifact_name(&self, job_id: &str) -> Result<String, PersistenceError> {
        let original = self.store.get(&filename_key(job_id)).await?;
        Ok(artifact_file_name(original.as_deref(), job_id))
    }

    /// Location of the artifact for `job_id` if it exists.
    pub async fn existing_artifact(&self, name: &str) -> Option<PathBuf> {
        let path = self.writer.locate(name);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }

    /// Assemble and write the artifact, then tear down the job's fragments.
    ///
    /// Teardown and input removal are best-effort: the artifact already exists, so their
    /// failures are logged rather than returned.
    pub async fn persist(
        &self,
        request: &PersistRequest<'_>,
    ) -> Result<PersistedArtifact, PersistenceError> {
        let job_id = request.job_id;
        tracing::info!(job_id, "Saving processed document");

        let name = self.artifact_name(job_id).await?;
        let content = self
            .accumulator
            .assemble(job_id, request.total_chunks)
            .await?;

        let writer = &self.writer;
        let (name_ref, content_ref) = (name.as_str(), content.as_str());
        let path = self
            .policy
            .run("write_artifact", move |_| writer.write(name_ref, content_ref))
            .await?;
        tracing::info!(job_id, path = %path.display(), bytes = content.len(), "Artifact saved");

        if let Err(error) = self.accumulator.clear(job_id, request.total_chunks).await {
            tracing::warn!(job_id, error = %error, "Failed to clear accumulated fragments");
        }
        if request.remove_input {
            if let Err(error) = tokio::fs::remove_file(request.input_path).await {
                tracing::warn!(
                    job_id,
                    path = %request.input_path.display(),
                    error = %error,
                    "Failed to remove processed input"
                );
            }
        }

        Ok(PersistedArtifact { name, path })
    }
}
