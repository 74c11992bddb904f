use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use autoflow_core::{
    domain::run::{Run, RunId},
    domain::workflow::{OwnerId, Workflow, WorkflowId, WorkflowStatus},
    CoreError, RunRepository, WorkflowRepository,
};

/// Workflow documents keyed by workflow ID
pub type WorkflowDocuments = Arc<RwLock<HashMap<String, Value>>>;

/// Run records keyed by run ID
pub type RunRecords = Arc<RwLock<HashMap<String, Value>>>;

/// Run IDs per workflow ID, in append order
pub type RunIndex = Arc<RwLock<HashMap<String, Vec<String>>>>;

/// In-memory implementation of the WorkflowRepository
///
/// Workflows are kept as their persisted JSON documents, so every load goes
/// through the same validation as a document read from durable storage.
/// Saves are optimistic: a document whose version does not move past the
/// stored one is rejected with `VersionConflict`, unless it is identical to
/// what is stored.
pub struct InMemoryWorkflowRepository {
    documents: WorkflowDocuments,
}

impl InMemoryWorkflowRepository {
    /// Create a new in-memory workflow repository
    pub fn new(documents: WorkflowDocuments) -> Self {
        Self { documents }
    }

    async fn load_where<F>(&self, filter: F) -> Result<Vec<Workflow>, CoreError>
    where
        F: Fn(&Workflow) -> bool,
    {
        let documents = self.documents.read().await;
        let mut workflows = Vec::with_capacity(documents.len());
        for document in documents.values() {
            let workflow = decode_workflow(document)?;
            if filter(&workflow) {
                workflows.push(workflow);
            }
        }
        workflows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(workflows)
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn find_by_id(&self, id: &WorkflowId) -> Result<Option<Workflow>, CoreError> {
        let documents = self.documents.read().await;
        documents.get(&id.0).map(decode_workflow).transpose()
    }

    async fn save(&self, workflow: &Workflow) -> Result<(), CoreError> {
        let document = serde_json::to_value(workflow)?;
        let mut documents = self.documents.write().await;

        if let Some(stored) = documents.get(&workflow.id.0) {
            let stored_version = stored.get("version").and_then(Value::as_u64).unwrap_or(0);
            if workflow.version <= stored_version && stored != &document {
                warn!(
                    workflow_id = %workflow.id,
                    version = workflow.version,
                    stored_version,
                    "Rejected stale workflow save"
                );
                return Err(CoreError::VersionConflict {
                    workflow_id: workflow.id.0.clone(),
                    expected: workflow.version.saturating_sub(1),
                    found: stored_version,
                });
            }
        }

        debug!(workflow_id = %workflow.id, version = workflow.version, "Saving workflow document");
        documents.insert(workflow.id.0.clone(), document);
        Ok(())
    }

    async fn delete(&self, id: &WorkflowId) -> Result<(), CoreError> {
        let mut documents = self.documents.write().await;
        documents.remove(&id.0);
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<Workflow>, CoreError> {
        self.load_where(|_| true).await
    }

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Workflow>, CoreError> {
        self.load_where(|w| &w.owner_id == owner_id).await
    }

    async fn find_active(&self) -> Result<Vec<Workflow>, CoreError> {
        self.load_where(|w| w.status == WorkflowStatus::Active).await
    }
}

/// In-memory implementation of the RunRepository
///
/// Runs are append-only records.
pub struct InMemoryRunRepository {
    records: RunRecords,
    index: RunIndex,
}

impl InMemoryRunRepository {
    /// Create a new in-memory run repository
    pub fn new(records: RunRecords, index: RunIndex) -> Self {
        Self { records, index }
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn append_run(&self, run: &Run) -> Result<(), CoreError> {
        if !run.is_terminal() {
            return Err(CoreError::StateStoreError(format!(
                "Run {} is still {}",
                run.id, run.status
            )));
        }
        let record = serde_json::to_value(run)?;

        let mut records = self.records.write().await;
        if records.contains_key(&run.id.0) {
            return Err(CoreError::StateStoreError(format!(
                "Run {} already recorded",
                run.id
            )));
        }
        records.insert(run.id.0.clone(), record);

        let mut index = self.index.write().await;
        index
            .entry(run.workflow_id.0.clone())
            .or_default()
            .push(run.id.0.clone());

        debug!(run_id = %run.id, workflow_id = %run.workflow_id, status = %run.status, "Recorded run");
        Ok(())
    }

    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>, CoreError> {
        let records = self.records.read().await;
        records.get(&id.0).map(decode_run).transpose()
    }

    async fn list_for_workflow(&self, workflow_id: &WorkflowId) -> Result<Vec<Run>, CoreError> {
        let records = self.records.read().await;
        let index = self.index.read().await;

        index
            .get(&workflow_id.0)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| records.get(id))
                    .map(decode_run)
                    .collect()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn delete_for_workflow(&self, workflow_id: &WorkflowId) -> Result<usize, CoreError> {
        let mut records = self.records.write().await;
        let mut index = self.index.write().await;

        let ids = index.remove(&workflow_id.0).unwrap_or_default();
        for id in &ids {
            records.remove(id);
        }
        Ok(ids.len())
    }
}

fn decode_workflow(document: &Value) -> Result<Workflow, CoreError> {
    serde_json::from_value(document.clone())
        .map_err(|e| CoreError::StateStoreError(format!("Corrupt workflow document: {}", e)))
}

fn decode_run(record: &Value) -> Result<Run, CoreError> {
    serde_json::from_value(record.clone())
        .map_err(|e| CoreError::StateStoreError(format!("Corrupt run record: {}", e)))
}
