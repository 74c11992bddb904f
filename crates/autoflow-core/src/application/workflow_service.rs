use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::application::execution_engine::ExecutionEngine;
use crate::application::locks::WorkflowLocks;
use crate::domain::repository::{RunRepository, WorkflowRepository};
use crate::domain::run::{Run, RunId};
use crate::domain::workflow::{
    ErrorHandling, OwnerId, Workflow, WorkflowId, WorkflowSettings, WorkflowStatus,
    MAX_RETRY_ATTEMPTS,
};
use crate::CoreError;

/// Workflow management: creation, metadata, settings, deletion and history
#[derive(Clone)]
pub struct WorkflowService {
    workflows: Arc<dyn WorkflowRepository>,
    runs: Arc<dyn RunRepository>,
    locks: WorkflowLocks,
    engine: ExecutionEngine,
}

impl WorkflowService {
    /// Create a new workflow service
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        runs: Arc<dyn RunRepository>,
        locks: WorkflowLocks,
        engine: ExecutionEngine,
    ) -> Self {
        Self {
            workflows,
            runs,
            locks,
            engine,
        }
    }

    /// Create an empty draft workflow
    pub async fn create(
        &self,
        owner_id: OwnerId,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Workflow, CoreError> {
        let mut workflow = Workflow::new(owner_id, name);
        workflow.description = description.into();
        self.workflows.save(&workflow).await?;
        info!(workflow_id = %workflow.id, owner_id = %workflow.owner_id, "Workflow created");
        Ok(workflow)
    }

    /// Load a workflow
    pub async fn get(&self, workflow_id: &WorkflowId) -> Result<Workflow, CoreError> {
        self.workflows
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| CoreError::WorkflowNotFound(workflow_id.0.clone()))
    }

    /// Workflows of one owner
    pub async fn list_for_owner(&self, owner_id: &OwnerId) -> Result<Vec<Workflow>, CoreError> {
        self.workflows.find_by_owner(owner_id).await
    }

    /// Rename or re-describe a workflow
    pub async fn update_details(
        &self,
        workflow_id: &WorkflowId,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Workflow, CoreError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "Workflow name must not be empty".to_string(),
            ));
        }
        let description = description.into();
        self.mutate(workflow_id, move |workflow| {
            workflow.name = name;
            workflow.description = description;
        })
        .await
    }

    /// Replace the settings read by future runs
    pub async fn update_settings(
        &self,
        workflow_id: &WorkflowId,
        settings: WorkflowSettings,
    ) -> Result<Workflow, CoreError> {
        validate_settings(&settings)?;
        self.mutate(workflow_id, move |workflow| workflow.settings = settings)
            .await
    }

    /// Delete a workflow and its run history
    ///
    /// In-flight runs are cancelled first. Returns the number of run
    /// records removed.
    pub async fn delete(&self, workflow_id: &WorkflowId) -> Result<usize, CoreError> {
        let guard = self.locks.acquire(workflow_id).await;
        self.get(workflow_id).await?;

        let cancelled = self.engine.cancel_workflow(workflow_id);
        let removed = self.runs.delete_for_workflow(workflow_id).await?;
        self.workflows.delete(workflow_id).await?;
        drop(guard);
        self.locks.forget(workflow_id);

        info!(
            workflow_id = %workflow_id,
            cancelled_runs = cancelled,
            removed_runs = removed,
            "Workflow deleted"
        );
        Ok(removed)
    }

    /// Load one recorded run
    pub async fn get_run(&self, run_id: &RunId) -> Result<Run, CoreError> {
        self.runs
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| CoreError::RunNotFound(run_id.0.clone()))
    }

    /// Recorded runs of a workflow, oldest first
    pub async fn run_history(&self, workflow_id: &WorkflowId) -> Result<Vec<Run>, CoreError> {
        self.runs.list_for_workflow(workflow_id).await
    }

    /// The persisted document of a workflow
    pub async fn export(&self, workflow_id: &WorkflowId) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(self.get(workflow_id).await?)?)
    }

    /// Store a workflow document, re-validating its graph
    ///
    /// An imported workflow always starts as a draft.
    pub async fn import(&self, document: Value) -> Result<Workflow, CoreError> {
        let mut workflow: Workflow = serde_json::from_value(document)
            .map_err(|e| CoreError::ValidationError(format!("Invalid workflow document: {}", e)))?;
        validate_settings(&workflow.settings)?;

        let _guard = self.locks.acquire(&workflow.id).await;
        if let Some(existing) = self.workflows.find_by_id(&workflow.id).await? {
            if existing.version > workflow.version {
                return Err(CoreError::VersionConflict {
                    workflow_id: workflow.id.0.clone(),
                    expected: workflow.version,
                    found: existing.version,
                });
            }
            self.engine.detach_workflow(&workflow.id);
        }

        workflow.status = WorkflowStatus::Draft;
        workflow.touch();
        self.workflows.save(&workflow).await?;
        info!(workflow_id = %workflow.id, version = workflow.version, "Workflow imported");
        Ok(workflow)
    }

    async fn mutate<F>(&self, workflow_id: &WorkflowId, change: F) -> Result<Workflow, CoreError>
    where
        F: FnOnce(&mut Workflow) + Send,
    {
        let _guard = self.locks.acquire(workflow_id).await;
        let mut workflow = self.get(workflow_id).await?;
        change(&mut workflow);
        workflow.touch();
        self.workflows.save(&workflow).await?;
        Ok(workflow)
    }
}

fn validate_settings(settings: &WorkflowSettings) -> Result<(), CoreError> {
    if let ErrorHandling::Retry(policy) = &settings.error_handling {
        match policy.max_attempts {
            Some(0) => {
                return Err(CoreError::ValidationError(
                    "Retry policy needs at least one attempt".to_string(),
                ));
            }
            Some(n) if n > MAX_RETRY_ATTEMPTS => {
                return Err(CoreError::ValidationError(format!(
                    "Retry policy allows at most {} attempts, got {}",
                    MAX_RETRY_ATTEMPTS, n
                )));
            }
            _ => {}
        }
    }
    if let Some(interval) = settings.schedule.interval() {
        if interval.is_zero() {
            return Err(CoreError::ValidationError(
                "Scheduled interval must be greater than zero".to_string(),
            ));
        }
    }
    Ok(())
}
