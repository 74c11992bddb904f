use std::sync::Arc;

use tracing::{info, warn};

use crate::application::execution_engine::ExecutionEngine;
use crate::application::locks::WorkflowLocks;
use crate::domain::repository::WorkflowRepository;
use crate::domain::step::StepId;
use crate::domain::workflow::{Workflow, WorkflowId, WorkflowStatus};
use crate::CoreError;

/// Outcome of a status transition
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationReport {
    /// The workflow after the transition
    pub workflow: Workflow,

    /// Non-trigger steps without inbound connections; they never run
    pub orphans: Vec<StepId>,

    /// In-flight runs detached by a transition to draft
    pub detached_runs: usize,
}

/// Governs workflow status transitions
#[derive(Clone)]
pub struct LifecycleController {
    repo: Arc<dyn WorkflowRepository>,
    locks: WorkflowLocks,
    engine: ExecutionEngine,
}

impl LifecycleController {
    /// Create a new lifecycle controller
    pub fn new(
        repo: Arc<dyn WorkflowRepository>,
        locks: WorkflowLocks,
        engine: ExecutionEngine,
    ) -> Self {
        Self {
            repo,
            locks,
            engine,
        }
    }

    /// Activate a workflow
    pub async fn activate(&self, workflow_id: &WorkflowId) -> Result<ActivationReport, CoreError> {
        self.transition(workflow_id, WorkflowStatus::Active).await
    }

    /// Pause an active workflow
    pub async fn deactivate(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<ActivationReport, CoreError> {
        self.transition(workflow_id, WorkflowStatus::Inactive).await
    }

    /// Return a workflow to draft
    pub async fn revert_to_draft(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<ActivationReport, CoreError> {
        self.transition(workflow_id, WorkflowStatus::Draft).await
    }

    /// Move a workflow to `target`
    ///
    /// Activation requires a trigger with a non-empty reachable set.
    /// `draft -> inactive` is rejected. A transition to the current status
    /// changes nothing.
    pub async fn transition(
        &self,
        workflow_id: &WorkflowId,
        target: WorkflowStatus,
    ) -> Result<ActivationReport, CoreError> {
        let _guard = self.locks.acquire(workflow_id).await;
        let mut workflow = self
            .repo
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| CoreError::WorkflowNotFound(workflow_id.0.clone()))?;

        let current = workflow.status;
        let orphans: Vec<StepId> = workflow.graph.orphans().into_iter().cloned().collect();
        if current == target {
            return Ok(ActivationReport {
                workflow,
                orphans,
                detached_runs: 0,
            });
        }

        match (current, target) {
            (WorkflowStatus::Draft, WorkflowStatus::Active) => check_runnable(&workflow)?,
            (WorkflowStatus::Active, WorkflowStatus::Inactive)
            | (WorkflowStatus::Inactive, WorkflowStatus::Active)
            | (_, WorkflowStatus::Draft) => {}
            _ => {
                return Err(CoreError::InvalidTransition {
                    from: current.to_string(),
                    to: target.to_string(),
                })
            }
        }

        if target == WorkflowStatus::Active && !orphans.is_empty() {
            warn!(
                workflow_id = %workflow_id,
                orphans = ?orphans,
                "Workflow has steps no trigger reaches; they will never run"
            );
        }

        let detached_runs = if target == WorkflowStatus::Draft {
            self.engine.detach_workflow(workflow_id)
        } else {
            0
        };

        workflow.status = target;
        workflow.touch();
        self.repo.save(&workflow).await?;
        info!(
            workflow_id = %workflow_id,
            from = %current,
            to = %target,
            "Workflow status changed"
        );

        Ok(ActivationReport {
            workflow,
            orphans,
            detached_runs,
        })
    }
}

fn check_runnable(workflow: &Workflow) -> Result<(), CoreError> {
    if workflow.graph.triggers().next().is_none() {
        return Err(CoreError::NotRunnable(format!(
            "Workflow {} has no trigger step",
            workflow.id
        )));
    }
    if workflow.graph.reachable_from_triggers().next().is_none() {
        return Err(CoreError::NotRunnable(format!(
            "Workflow {} has no reachable steps",
            workflow.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::HandlerRegistry;
    use crate::config::EngineConfig;
    use crate::domain::graph::Graph;
    use crate::domain::repository::memory::{MemoryRunRepository, MemoryWorkflowRepository};
    use crate::domain::step::{ActionConfig, Step};
    use crate::domain::workflow::OwnerId;

    async fn setup(graph: Graph) -> (LifecycleController, Arc<MemoryWorkflowRepository>, WorkflowId) {
        let repo = Arc::new(MemoryWorkflowRepository::new());
        let mut workflow = Workflow::new(OwnerId::from("user-1"), "Lifecycle").with_id("wf-1");
        workflow.replace_graph(graph);
        repo.save(&workflow).await.unwrap();

        let engine = ExecutionEngine::new(
            Arc::new(HandlerRegistry::new()),
            Arc::new(MemoryRunRepository::new()),
            EngineConfig::default(),
        );
        let controller = LifecycleController::new(repo.clone(), WorkflowLocks::new(), engine);
        (controller, repo, workflow.id)
    }

    fn runnable() -> Graph {
        let mut graph = Graph::new();
        graph
            .add_step(Step::trigger("Form", "form_submitted").with_id("t"))
            .unwrap();
        graph
            .add_step(Step::action("A", ActionConfig::new("noop")).with_id("a"))
            .unwrap();
        graph
            .add_step(Step::action("Loose", ActionConfig::new("noop")).with_id("loose"))
            .unwrap();
        graph
            .add_connection(StepId::new("t"), StepId::new("a"))
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_activation_without_trigger_is_not_runnable() {
        let mut graph = Graph::new();
        graph
            .add_step(Step::action("A", ActionConfig::new("noop")).with_id("a"))
            .unwrap();
        let (controller, repo, wid) = setup(graph).await;

        let result = controller.activate(&wid).await;
        assert!(matches!(result, Err(CoreError::NotRunnable(_))));
        let stored = repo.find_by_id(&wid).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Draft);
    }

    #[tokio::test]
    async fn test_activation_reports_orphans() {
        let (controller, repo, wid) = setup(runnable()).await;

        let report = controller.activate(&wid).await.unwrap();
        assert_eq!(report.workflow.status, WorkflowStatus::Active);
        assert_eq!(report.orphans, vec![StepId::new("loose")]);
        let stored = repo.find_by_id(&wid).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Active);
    }

    #[tokio::test]
    async fn test_transition_table() {
        let (controller, _, wid) = setup(runnable()).await;

        assert!(matches!(
            controller.deactivate(&wid).await,
            Err(CoreError::InvalidTransition { .. })
        ));
        controller.activate(&wid).await.unwrap();
        let paused = controller.deactivate(&wid).await.unwrap();
        assert_eq!(paused.workflow.status, WorkflowStatus::Inactive);
        let resumed = controller.activate(&wid).await.unwrap();
        assert_eq!(resumed.workflow.status, WorkflowStatus::Active);
        let draft = controller.revert_to_draft(&wid).await.unwrap();
        assert_eq!(draft.workflow.status, WorkflowStatus::Draft);
    }

    #[tokio::test]
    async fn test_same_status_is_noop() {
        let (controller, _, wid) = setup(runnable()).await;
        let first = controller.activate(&wid).await.unwrap();
        let second = controller.activate(&wid).await.unwrap();
        assert_eq!(second.workflow.version, first.workflow.version);
    }
}
