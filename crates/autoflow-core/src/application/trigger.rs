use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::application::execution_engine::{ExecutionEngine, RunHandle};
use crate::domain::repository::WorkflowRepository;
use crate::domain::run::TriggerEvent;
use crate::domain::workflow::{Workflow, WorkflowId};
use crate::{CoreError, DataPacket};

/// Routes ingested trigger events to workflows
#[derive(Clone)]
pub struct TriggerDispatcher {
    repo: Arc<dyn WorkflowRepository>,
    engine: ExecutionEngine,
}

impl TriggerDispatcher {
    /// Create a new dispatcher
    pub fn new(repo: Arc<dyn WorkflowRepository>, engine: ExecutionEngine) -> Self {
        Self { repo, engine }
    }

    /// Ingest an event
    ///
    /// A targeted event starts at most one run and reports why it was
    /// dropped. A broadcast event starts one run per active workflow with a
    /// trigger for its kind, whatever its execution schedule.
    pub async fn ingest(&self, event: TriggerEvent) -> Result<Vec<RunHandle>, CoreError> {
        match event.workflow_id.clone() {
            Some(workflow_id) => {
                let workflow = self.load(&workflow_id).await?;
                let handle = self.engine.start_run(&workflow, event).map_err(|e| {
                    debug!(workflow_id = %workflow_id, error = %e, "Trigger dropped");
                    e
                })?;
                Ok(vec![handle])
            }
            None => self.broadcast(event).await,
        }
    }

    /// Fire every trigger of an active workflow
    pub async fn run_now(
        &self,
        workflow_id: &WorkflowId,
        payload: DataPacket,
    ) -> Result<RunHandle, CoreError> {
        let workflow = self.load(workflow_id).await?;
        info!(workflow_id = %workflow_id, "Manual run requested");
        self.engine
            .start_run(&workflow, TriggerEvent::manual(workflow_id.clone(), payload))
    }

    async fn broadcast(&self, event: TriggerEvent) -> Result<Vec<RunHandle>, CoreError> {
        let listeners: Vec<Workflow> = self
            .repo
            .find_active()
            .await?
            .into_iter()
            .filter(|w| w.listens_for(&event.trigger_kind))
            .collect();

        debug!(
            trigger_kind = %event.trigger_kind,
            listeners = listeners.len(),
            "Broadcasting trigger"
        );

        let mut handles = Vec::with_capacity(listeners.len());
        for workflow in &listeners {
            let mut targeted = event.clone();
            targeted.workflow_id = Some(workflow.id.clone());
            match self.engine.start_run(workflow, targeted) {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!(workflow_id = %workflow.id, error = %e, "Broadcast delivery failed"),
            }
        }
        Ok(handles)
    }

    async fn load(&self, workflow_id: &WorkflowId) -> Result<Workflow, CoreError> {
        self.repo
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| CoreError::WorkflowNotFound(workflow_id.0.clone()))
    }
}
