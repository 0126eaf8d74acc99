//! Progress derivation for a chunk fan-out.

use super::types::ProgressSnapshot;

/// Lifecycle of one chunk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    /// Waiting to be issued.
    Pending,
    /// Issued and running.
    Running,
    /// Produced content.
    Succeeded,
    /// Exhausted its retry budget.
    Failed,
}

impl ChunkState {
    /// Whether the chunk job has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Derive counters from chunk states. Pure; recomputed on every call.
pub fn snapshot(states: &[ChunkState]) -> ProgressSnapshot {
    let completed_count = states.iter().filter(|state| state.is_terminal()).count();
    let success_count = states
        .iter()
        .filter(|state| matches!(state, ChunkState::Succeeded))
        .count();
    ProgressSnapshot {
        completed_count,
        total_count: states.len(),
        success_count,
    }
}

/// Chunk states of one job, indexed by sequence index.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    states: Vec<ChunkState>,
}

impl ProgressTracker {
    /// Track `total` chunk jobs, all pending.
    pub fn new(total: usize) -> Self {
        Self {
            states: vec![ChunkState::Pending; total],
        }
    }

    /// Mark chunk `index` as issued. Ignored for finished or unknown chunks.
    pub fn mark_running(&mut self, index: usize) {
        match self.states.get_mut(index) {
            Some(state) if *state == ChunkState::Pending => *state = ChunkState::Running,
            _ => {}
        }
    }

    /// Record the outcome of chunk `index`.
    ///
    /// Returns `true` when this call moved the chunk into a terminal state; a chunk that
    /// already finished keeps its first outcome.
    pub fn settle(&mut self, index: usize, succeeded: bool) -> bool {
        match self.states.get_mut(index) {
            Some(state) if !state.is_terminal() => {
                *state = if succeeded {
                    ChunkState::Succeeded
                } else {
                    ChunkState::Failed
                };
                true
            }
            _ => false,
        }
    }

    /// State of chunk `index`.
    pub fn state(&self, index: usize) -> Option<ChunkState> {
        self.states.get(index).copied()
    }

    /// Current counters.
    pub fn snapshot(&self) -> ProgressSnapshot {
        snapshot(&self.states)
    }
}
