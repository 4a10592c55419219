//! Per-workflow exclusive locks.
//!
//! Multi-step mutations and publishing hold the lock of the workflow they
//! touch for their whole body, so concurrent callers serialize instead of
//! interleaving.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::WorkflowId;

#[derive(Debug, Clone, Default)]
pub struct WorkflowLocks {
    locks: Arc<DashMap<WorkflowId, Arc<Mutex<()>>>>,
}

impl WorkflowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock of `workflow_id`.
    pub async fn lock(&self, workflow_id: WorkflowId) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the shard guard is released before awaiting.
        let mutex = self.locks.entry(workflow_id).or_default().clone();
        mutex.lock_owned().await
    }
}
