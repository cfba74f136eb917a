//! Indexing jobs and their lifecycle

use serde::{Deserialize, Serialize};

use crate::item::{epoch_now, ItemId};

/// What an indexing job does to the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexOp {
    /// Write the lexical document; re-enqueue embedding when absent or stale.
    Upsert {
        /// The embedded text fields changed, so the old vector is invalid.
        text_changed: bool,
    },
    /// Remove from both the lexical index and the vector store.
    Delete,
}

/// Lifecycle state of a job. Failed work is dead-lettered, never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    /// Waiting for retry attempt `n` (1-based).
    Retrying(u32),
    DeadLettered,
}

/// One unit of indexing work derived from a catalog change notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingJob {
    pub id: ItemId,
    pub op: IndexOp,
    /// Seconds since epoch at enqueue time.
    pub enqueued_at: i64,
    pub attempts: u32,
    pub state: JobState,
}

impl IndexingJob {
    pub fn new(id: ItemId, op: IndexOp) -> Self {
        Self {
            id,
            op,
            enqueued_at: epoch_now(),
            attempts: 0,
            state: JobState::Pending,
        }
    }
}

/// A job that exhausted its retries, kept for operator inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterJob {
    pub job: IndexingJob,
    pub error: String,
    pub failed_at: i64,
}
