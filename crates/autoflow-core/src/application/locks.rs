use crate::domain::workflow::WorkflowId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-workflow locks
///
/// Every mutation of a stored workflow happens while holding its lock, so
/// edits, settings updates and status transitions of one workflow never
/// interleave. Different workflows lock independently.
#[derive(Clone, Default)]
pub struct WorkflowLocks {
    locks: Arc<DashMap<WorkflowId, Arc<Mutex<()>>>>,
}

impl WorkflowLocks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a workflow
    pub async fn acquire(&self, workflow_id: &WorkflowId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(workflow_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock of a deleted workflow
    pub fn forget(&self, workflow_id: &WorkflowId) {
        self.locks.remove(workflow_id);
    }
}
