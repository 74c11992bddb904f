use std::sync::Arc;

use tracing::{debug, warn};

use crate::application::locks::WorkflowLocks;
use crate::domain::catalog::StepCatalog;
use crate::domain::graph::{Graph, GraphCommand};
use crate::domain::repository::WorkflowRepository;
use crate::domain::step::{Step, StepId};
use crate::domain::workflow::{Workflow, WorkflowId};
use crate::CoreError;

/// Applies validated graph commands to stored workflows
///
/// Each command runs under the workflow's lock: load, apply to a copy of the
/// graph, and save only when the command was accepted and changed the graph.
/// A rejected or no-op command leaves the stored workflow untouched.
#[derive(Clone)]
pub struct WorkflowEditor {
    repo: Arc<dyn WorkflowRepository>,
    locks: WorkflowLocks,
    catalog: Arc<StepCatalog>,
}

impl WorkflowEditor {
    /// Create a new editor
    pub fn new(repo: Arc<dyn WorkflowRepository>, locks: WorkflowLocks) -> Self {
        Self {
            repo,
            locks,
            catalog: Arc::new(StepCatalog::builtin()),
        }
    }

    /// Replace the step catalog
    pub fn with_catalog(mut self, catalog: StepCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    /// Apply one command
    pub async fn apply(
        &self,
        workflow_id: &WorkflowId,
        command: GraphCommand,
    ) -> Result<Workflow, CoreError> {
        self.apply_all(workflow_id, vec![command]).await
    }

    /// Apply a batch of commands, all or nothing
    pub async fn apply_all(
        &self,
        workflow_id: &WorkflowId,
        commands: Vec<GraphCommand>,
    ) -> Result<Workflow, CoreError> {
        let _guard = self.locks.acquire(workflow_id).await;
        let mut workflow = self.load(workflow_id).await?;

        let mut graph = workflow.graph.clone();
        for command in commands {
            debug!(workflow_id = %workflow_id, ?command, "Applying graph command");
            graph = graph.apply(command).map_err(|e| {
                warn!(workflow_id = %workflow_id, error = %e, "Graph command rejected");
                e
            })?;
        }

        if graph == workflow.graph {
            debug!(workflow_id = %workflow_id, "Graph unchanged, nothing saved");
            return Ok(workflow);
        }

        workflow.replace_graph(graph);
        self.repo.save(&workflow).await?;
        debug!(
            workflow_id = %workflow_id,
            version = workflow.version,
            steps = workflow.graph.len(),
            "Workflow graph updated"
        );
        Ok(workflow)
    }

    /// Add a step, returning its ID
    pub async fn add_step(
        &self,
        workflow_id: &WorkflowId,
        step: Step,
    ) -> Result<StepId, CoreError> {
        let step_id = step.id.clone();
        self.apply(workflow_id, GraphCommand::AddStep(step)).await?;
        Ok(step_id)
    }

    /// Add a fresh instance of a catalog template, returning its ID
    pub async fn add_from_template(
        &self,
        workflow_id: &WorkflowId,
        template_key: &str,
    ) -> Result<StepId, CoreError> {
        let step = self.catalog.instantiate(template_key).ok_or_else(|| {
            CoreError::ValidationError(format!("Unknown step template: {}", template_key))
        })?;
        self.add_step(workflow_id, step).await
    }

    /// Remove a step and its connections
    pub async fn remove_step(
        &self,
        workflow_id: &WorkflowId,
        step_id: &StepId,
    ) -> Result<Workflow, CoreError> {
        self.apply(workflow_id, GraphCommand::RemoveStep(step_id.clone()))
            .await
    }

    /// Connect two steps, optionally on one branch of a condition
    pub async fn add_connection(
        &self,
        workflow_id: &WorkflowId,
        from: &StepId,
        to: &StepId,
        branch: Option<bool>,
    ) -> Result<Workflow, CoreError> {
        self.apply(
            workflow_id,
            GraphCommand::AddConnection {
                from: from.clone(),
                to: to.clone(),
                branch,
            },
        )
        .await
    }

    /// Remove a connection if present
    pub async fn remove_connection(
        &self,
        workflow_id: &WorkflowId,
        from: &StepId,
        to: &StepId,
    ) -> Result<Workflow, CoreError> {
        self.apply(
            workflow_id,
            GraphCommand::RemoveConnection {
                from: from.clone(),
                to: to.clone(),
            },
        )
        .await
    }

    /// Current graph of a workflow
    pub async fn snapshot(&self, workflow_id: &WorkflowId) -> Result<Arc<Graph>, CoreError> {
        Ok(Arc::new(self.load(workflow_id).await?.graph))
    }

    async fn load(&self, workflow_id: &WorkflowId) -> Result<Workflow, CoreError> {
        self.repo
            .find_by_id(workflow_id)
            .await?
            .ok_or_else(|| CoreError::WorkflowNotFound(workflow_id.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::memory::MemoryWorkflowRepository;
    use crate::domain::step::ActionConfig;
    use crate::domain::workflow::OwnerId;

    async fn setup() -> (WorkflowEditor, Arc<MemoryWorkflowRepository>, WorkflowId) {
        let repo = Arc::new(MemoryWorkflowRepository::new());
        let workflow = Workflow::new(OwnerId::from("user-1"), "Editor test").with_id("wf-1");
        repo.save(&workflow).await.unwrap();
        let editor = WorkflowEditor::new(repo.clone(), WorkflowLocks::new());
        (editor, repo, workflow.id)
    }

    #[tokio::test]
    async fn test_edits_bump_version_and_persist() {
        let (editor, repo, wid) = setup().await;

        let t = editor.add_from_template(&wid, "form_submission").await.unwrap();
        let a = editor
            .add_step(&wid, Step::action("Send", ActionConfig::new("send_email")))
            .await
            .unwrap();
        let workflow = editor.add_connection(&wid, &t, &a, None).await.unwrap();

        assert_eq!(workflow.version, 3);
        let stored = repo.find_by_id(&wid).await.unwrap().unwrap();
        assert_eq!(stored.graph.connections().len(), 1);
        assert_eq!(stored.graph.reachable_from_triggers().count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_edit_leaves_store_unchanged() {
        let (editor, repo, wid) = setup().await;
        let t = editor.add_from_template(&wid, "email_received").await.unwrap();
        let before = repo.find_by_id(&wid).await.unwrap().unwrap();

        let result = editor.add_connection(&wid, &t, &t, None).await;
        assert_eq!(result.unwrap_err(), CoreError::SelfLoop(t.0.clone()));

        let after = repo.find_by_id(&wid).await.unwrap().unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_removing_missing_connection_keeps_version() {
        let (editor, repo, wid) = setup().await;
        let t = editor.add_from_template(&wid, "email_received").await.unwrap();
        let a = editor
            .add_step(&wid, Step::action("Send", ActionConfig::new("send_email")))
            .await
            .unwrap();
        let before = repo.find_by_id(&wid).await.unwrap().unwrap();
        assert_eq!(before.version, 2);

        let workflow = editor.remove_connection(&wid, &t, &a).await.unwrap();

        assert_eq!(workflow.version, 2);
        let after = repo.find_by_id(&wid).await.unwrap().unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_batch_is_atomic() {
        let (editor, repo, wid) = setup().await;
        let a = Step::action("A", ActionConfig::new("noop")).with_id("a");

        let result = editor
            .apply_all(
                &wid,
                vec![
                    GraphCommand::AddStep(a),
                    GraphCommand::AddConnection {
                        from: StepId::new("a"),
                        to: StepId::new("ghost"),
                        branch: None,
                    },
                ],
            )
            .await;

        assert!(matches!(result, Err(CoreError::InvalidEndpoint(_))));
        let stored = repo.find_by_id(&wid).await.unwrap().unwrap();
        assert!(stored.graph.is_empty());
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn test_unknown_workflow_and_template() {
        let (editor, _, wid) = setup().await;
        let missing = WorkflowId::from("nope");
        assert_eq!(
            editor.snapshot(&missing).await.unwrap_err(),
            CoreError::WorkflowNotFound("nope".to_string())
        );
        assert!(matches!(
            editor.add_from_template(&wid, "teleport").await,
            Err(CoreError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_edits_are_serialized() {
        let (editor, repo, wid) = setup().await;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let editor = editor.clone();
            let wid = wid.clone();
            tasks.push(tokio::spawn(async move {
                editor
                    .add_step(
                        &wid,
                        Step::action(format!("Step {}", i), ActionConfig::new("noop")),
                    )
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = repo.find_by_id(&wid).await.unwrap().unwrap();
        assert_eq!(stored.graph.len(), 16);
        assert_eq!(stored.version, 16);
    }
}
