//! In-memory persistence for the Autoflow platform
//!
//! This crate provides document-backed implementations of the repository
//! interfaces defined in autoflow-core. Workflows and runs are held as the
//! same JSON documents a durable store would keep, which makes it useful for
//! development, testing, and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;

pub mod repositories;
pub use repositories::{
    InMemoryRunRepository, InMemoryWorkflowRepository, RunIndex, RunRecords, WorkflowDocuments,
};

use autoflow_core::{
    domain::workflow::Workflow, CoreError, RunRepository, WorkflowRepository,
};

/// Provider for in-memory repositories sharing one set of maps
#[derive(Clone)]
pub struct InMemoryStateStoreProvider {
    workflows: WorkflowDocuments,
    runs: RunRecords,
    run_index: RunIndex,
}

impl InMemoryStateStoreProvider {
    /// Create a new, empty provider
    pub fn new() -> Self {
        Self {
            workflows: Arc::new(RwLock::new(HashMap::new())),
            runs: Arc::new(RwLock::new(HashMap::new())),
            run_index: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create repositories over the shared maps
    pub fn create_repositories(&self) -> (Arc<dyn WorkflowRepository>, Arc<dyn RunRepository>) {
        let workflow_repo = Arc::new(InMemoryWorkflowRepository::new(self.workflows.clone()));
        let run_repo = Arc::new(InMemoryRunRepository::new(
            self.runs.clone(),
            self.run_index.clone(),
        ));
        (workflow_repo, run_repo)
    }

    /// Load workflow documents, validating each before any is stored
    ///
    /// Nothing is stored when one document is invalid.
    pub async fn seed_workflows(&self, documents: Vec<Value>) -> Result<usize, CoreError> {
        let mut validated = Vec::with_capacity(documents.len());
        for document in documents {
            let workflow: Workflow = serde_json::from_value(document.clone()).map_err(|e| {
                CoreError::ValidationError(format!("Invalid workflow document: {}", e))
            })?;
            validated.push((workflow.id.0, document));
        }

        let count = validated.len();
        let mut workflows = self.workflows.write().await;
        workflows.extend(validated);
        info!(count, "Seeded workflow documents");
        Ok(count)
    }

    /// Every stored workflow document
    pub async fn export_workflows(&self) -> Vec<Value> {
        let workflows = self.workflows.read().await;
        let mut documents: Vec<(&String, &Value)> = workflows.iter().collect();
        documents.sort_by(|a, b| a.0.cmp(b.0));
        documents.into_iter().map(|(_, d)| d.clone()).collect()
    }

    /// Number of recorded runs
    pub async fn run_count(&self) -> usize {
        self.runs.read().await.len()
    }
}

impl Default for InMemoryStateStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
