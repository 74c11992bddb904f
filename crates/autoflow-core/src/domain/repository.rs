//! Repository traits for Autoflow Core
//!
//! This module defines the persistence gateway used by the editor, the
//! lifecycle controller and the execution engine. External crates implement
//! these traits to provide different persistence mechanisms.

use async_trait::async_trait;

use super::run::{Run, RunId};
use super::workflow::{OwnerId, Workflow, WorkflowId};
use crate::CoreError;

/// Repository for workflow documents
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Load a workflow by ID
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, CoreError>;

    /// Save a workflow
    async fn save(&self, workflow: &Workflow) -> Result<(), CoreError>;

    /// Delete a workflow
    async fn delete(&self, id: &WorkflowId) -> Result<(), CoreError>;

    /// All workflows
    async fn find_all(&self) -> Result<Vec<Workflow>, CoreError>;

    /// Workflows belonging to one owner
    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Workflow>, CoreError>;

    /// Workflows with status `active`
    async fn find_active(&self) -> Result<Vec<Workflow>, CoreError>;
}

/// Repository for run records
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Append a terminal run
    async fn append_run(&self, run: &Run) -> Result<(), CoreError>;

    /// Find a run by ID
    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>, CoreError>;

    /// Runs of a workflow, oldest first
    async fn list_for_workflow(&self, workflow_id: &WorkflowId) -> Result<Vec<Run>, CoreError>;

    /// Remove every run of a workflow, returning how many were removed
    async fn delete_for_workflow(&self, workflow_id: &WorkflowId) -> Result<usize, CoreError>;
}

/// In-memory implementations of the repository traits for testing and embedding
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use crate::domain::workflow::WorkflowStatus;
    use dashmap::DashMap;
    use std::sync::Arc;

    /// In-memory workflow repository backed by a concurrent map
    #[derive(Clone, Default)]
    pub struct MemoryWorkflowRepository {
        workflows: Arc<DashMap<WorkflowId, Workflow>>,
    }

    impl MemoryWorkflowRepository {
        /// Create a new memory workflow repository
        pub fn new() -> Self {
            Self::default()
        }

        fn collect<F>(&self, filter: F) -> Vec<Workflow>
        where
            F: Fn(&Workflow) -> bool,
        {
            let mut workflows: Vec<Workflow> = self
                .workflows
                .iter()
                .filter(|entry| filter(entry.value()))
                .map(|entry| entry.value().clone())
                .collect();
            workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            workflows
        }
    }

    #[async_trait]
    impl WorkflowRepository for MemoryWorkflowRepository {
        async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, CoreError> {
            Ok(self.workflows.get(id).map(|w| w.value().clone()))
        }

        async fn save(&self, workflow: &Workflow) -> Result<(), CoreError> {
            self.workflows.insert(workflow.id.clone(), workflow.clone());
            Ok(())
        }

        async fn delete(&self, id: &WorkflowId) -> Result<(), CoreError> {
            self.workflows.remove(id);
            Ok(())
        }

        async fn find_all(&self) -> Result<Vec<Workflow>, CoreError> {
            Ok(self.collect(|_| true))
        }

        async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Workflow>, CoreError> {
            Ok(self.collect(|w| &w.owner_id == owner_id))
        }

        async fn find_active(&self) -> Result<Vec<Workflow>, CoreError> {
            Ok(self.collect(|w| w.status == WorkflowStatus::Active))
        }
    }

    /// In-memory run repository backed by concurrent maps
    #[derive(Clone, Default)]
    pub struct MemoryRunRepository {
        runs: Arc<DashMap<RunId, Run>>,
        by_workflow: Arc<DashMap<WorkflowId, Vec<RunId>>>,
    }

    impl MemoryRunRepository {
        /// Create a new memory run repository
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of stored runs
        pub fn len(&self) -> usize {
            self.runs.len()
        }

        /// Whether no run is stored
        pub fn is_empty(&self) -> bool {
            self.runs.is_empty()
        }
    }

    #[async_trait]
    impl RunRepository for MemoryRunRepository {
        async fn append_run(&self, run: &Run) -> Result<(), CoreError> {
            if self.runs.contains_key(&run.id) {
                return Err(CoreError::StateStoreError(format!(
                    "Run {} already recorded",
                    run.id
                )));
            }
            self.runs.insert(run.id.clone(), run.clone());
            self.by_workflow
                .entry(run.workflow_id.clone())
                .or_default()
                .push(run.id.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>, CoreError> {
            Ok(self.runs.get(id).map(|r| r.value().clone()))
        }

        async fn list_for_workflow(
            &self,
            workflow_id: &WorkflowId,
        ) -> Result<Vec<Run>, CoreError> {
            let ids = self
                .by_workflow
                .get(workflow_id)
                .map(|ids| ids.value().clone())
                .unwrap_or_default();
            Ok(ids
                .iter()
                .filter_map(|id| self.runs.get(id).map(|r| r.value().clone()))
                .collect())
        }

        async fn delete_for_workflow(&self, workflow_id: &WorkflowId) -> Result<usize, CoreError> {
            let ids = self
                .by_workflow
                .remove(workflow_id)
                .map(|(_, ids)| ids)
                .unwrap_or_default();
            for id in &ids {
                self.runs.remove(id);
            }
            Ok(ids.len())
        }
    }

}
