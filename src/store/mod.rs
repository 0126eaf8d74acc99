//! Key-value accumulator backing chunk fragments and filename lookups.
//!
//! The pipeline only relies on `get`, `save`, and `delete`. `save` overwrites by key and
//! `delete` of a missing key succeeds, so replaying either call after a retry leaves the store in
//! the same observable state.

mod memory;
mod retrying;

pub use memory::MemoryStore;
pub use retrying::RetryingStore;

use crate::retry::Transient;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by result store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be reached.
    #[error("Result store unavailable: {0}")]
    Unavailable(String),
    /// Backend rejected the operation.
    #[error("Result store operation failed: {0}")]
    Backend(String),
}

impl Transient for StoreError {}

/// Interface implemented by key-value cache backends.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Fetch the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`; removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Shared handle to a result store.
pub type SharedStore = Arc<dyn ResultStore>;

/// Key holding the content produced for one chunk of a job.
pub fn fragment_key(job_id: &str, index: usize) -> String {
    format!("chunk-{job_id}-{index:06}")
}

/// Key holding the original filename of an uploaded input.
pub fn filename_key(job_id: &str) -> String {
    format!("file-{job_id}")
}
