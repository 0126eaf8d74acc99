//! Per-job accumulator of chunk results.
//!
//! Each chunk owns one key (`chunk-<job>-<index>`), so concurrent writers never touch the same
//! entry and completion order has no effect on the assembled document: assembly sorts by
//! sequence index and joins.

use crate::store::{SharedStore, StoreError, fragment_key};

const FRAGMENT_SEPARATOR: &str = "\n\n";

/// Sequence-indexed fragment storage scoped to job identifiers.
#[derive(Clone)]
pub struct Accumulator {
    writer: SharedStore,
    durable: SharedStore,
}

impl Accumulator {
    /// Build an accumulator.
    ///
    /// `writer` receives chunk fragments; its caller retries the whole chunk unit, so it should
    /// not retry on its own. `durable` serves assembly and teardown and is expected to retry.
    pub fn new(writer: SharedStore, durable: SharedStore) -> Self {
        Self { writer, durable }
    }

    /// Record the content produced for chunk `index` of `job_id`.
    pub async fn record(&self, job_id: &str, index: usize, content: &str) -> Result<(), StoreError> {
        self.writer.save(&fragment_key(job_id, index), content).await
    }

    /// Collect the fragments of `job_id` present in the store, ordered by sequence index.
    pub async fn fragments(
        &self,
        job_id: &str,
        total: usize,
    ) -> Result<Vec<(usize, String)>, StoreError> {
        let mut fragments = Vec::with_capacity(total);
        for index in 0..total {
            if let Some(content) = self.durable.get(&fragment_key(job_id, index)).await? {
                fragments.push((index, content));
            }
        }
        fragments.sort_by_key(|(index, _)| *index);
        Ok(fragments)
    }

    /// Assemble the document for `job_id`. Chunks without a fragment are skipped.
    pub async fn assemble(&self, job_id: &str, total: usize) -> Result<String, StoreError> {
        let fragments = self.fragments(job_id, total).await?;
        Ok(join_fragments(fragments))
    }

    /// Delete every fragment of `job_id`.
    pub async fn clear(&self, job_id: &str, total: usize) -> Result<(), StoreError> {
        for index in 0..total {
            self.durable.delete(&fragment_key(job_id, index)).await?;
        }
        tracing::debug!(job_id, total, "Cleared accumulated fragments");
        Ok(())
    }
}

fn join_fragments(fragments: Vec<(usize, String)>) -> String {
    fragments
        .iter()
        .map(|(_, content)| content.trim())
        .filter(|content| !content.is_empty())
        .collect::<Vec<_>>()
        .join(FRAGMENT_SEPARATOR)
}
