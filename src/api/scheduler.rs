//! Worker pool bounding how many bundles are in flight at once.
//!
//! The dispatcher takes a [`WorkerSlot`] before spawning a bundle task and
//! moves it into the task, so the slot is held for the whole life of one
//! bundle, retries included. Dropping the slot frees it for the next bundle.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::ScoreError;

// ─────────────────────────────────────────────────────────────────────────────
// WorkerPool
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-size pool of dispatch slots.
pub struct WorkerPool {
    sem: Arc<Semaphore>,
}

impl WorkerPool {
    /// Creates a pool with `workers` slots. Zero is treated as one.
    pub fn new(workers: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Waits for a free slot.
    pub async fn acquire(&self) -> Result<WorkerSlot, ScoreError> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ScoreError::Internal("worker pool closed".to_string()))?;
        Ok(WorkerSlot { _permit: permit })
    }
}

/// One occupied slot. Released on drop.
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
