//! Fluent construction of workflows for tests.

use autoflow_core::{
    ActionConfig, CoreError, ErrorHandling, ExecutionSchedule, Graph, GraphCommand,
    NotificationSettings, OwnerId, Step, StepId, Workflow, WorkflowStatus,
};
use serde_json::Value;

/// Builds a workflow step by step
///
/// Steps and connections are recorded as graph commands and applied in
/// order by [`WorkflowBuilder::build`], so an invalid edge surfaces as the
/// same error the editor would return.
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    id: Option<String>,
    owner_id: OwnerId,
    name: String,
    status: WorkflowStatus,
    error_handling: ErrorHandling,
    schedule: ExecutionSchedule,
    notifications: NotificationSettings,
    commands: Vec<GraphCommand>,
}

impl WorkflowBuilder {
    /// Start a workflow called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            owner_id: OwnerId::from("test-owner"),
            name: name.into(),
            status: WorkflowStatus::Draft,
            error_handling: ErrorHandling::Stop,
            schedule: ExecutionSchedule::Manual,
            notifications: NotificationSettings::default(),
            commands: Vec::new(),
        }
    }

    /// Fix the workflow ID
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the owner
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner_id = OwnerId(owner.into());
        self
    }

    /// Set the status of the built workflow
    pub fn status(mut self, status: WorkflowStatus) -> Self {
        self.status = status;
        self
    }

    /// Shorthand for an active workflow
    pub fn active(self) -> Self {
        self.status(WorkflowStatus::Active)
    }

    /// Set the error-handling policy
    pub fn error_handling(mut self, error_handling: ErrorHandling) -> Self {
        self.error_handling = error_handling;
        self
    }

    /// Set the execution schedule
    pub fn schedule(mut self, schedule: ExecutionSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Set the notification settings
    pub fn notifications(mut self, notifications: NotificationSettings) -> Self {
        self.notifications = notifications;
        self
    }

    /// Add any step
    pub fn step(mut self, step: Step) -> Self {
        self.commands.push(GraphCommand::AddStep(step));
        self
    }

    /// Add a trigger step listening for `event`
    pub fn trigger(self, id: &str, event: &str) -> Self {
        self.step(Step::trigger(id, event).with_id(id))
    }

    /// Add an action step calling `handler`
    pub fn action(self, id: &str, handler: &str) -> Self {
        self.step(Step::action(id, ActionConfig::new(handler)).with_id(id))
    }

    /// Add an action step calling `handler` with one parameter
    pub fn action_with_param(self, id: &str, handler: &str, key: &str, value: Value) -> Self {
        self.step(Step::action(id, ActionConfig::new(handler).with_param(key, value)).with_id(id))
    }

    /// Add an action step with its own timeout
    pub fn action_with_timeout(self, id: &str, handler: &str, timeout_ms: u64) -> Self {
        self.step(
            Step::action(id, ActionConfig::new(handler).with_timeout_ms(timeout_ms)).with_id(id),
        )
    }

    /// Add a condition step evaluating a JMESPath `expression`
    pub fn condition(self, id: &str, expression: &str) -> Self {
        self.step(Step::condition(id, expression).with_id(id))
    }

    /// Connect two steps
    pub fn connect(mut self, from: &str, to: &str) -> Self {
        self.commands.push(GraphCommand::AddConnection {
            from: StepId::new(from),
            to: StepId::new(to),
            branch: None,
        });
        self
    }

    /// Connect a condition to a step on one outcome
    pub fn branch(mut self, from: &str, to: &str, outcome: bool) -> Self {
        self.commands.push(GraphCommand::AddConnection {
            from: StepId::new(from),
            to: StepId::new(to),
            branch: Some(outcome),
        });
        self
    }

    /// Build only the graph
    pub fn build_graph(&self) -> Result<Graph, CoreError> {
        self.commands
            .iter()
            .cloned()
            .try_fold(Graph::new(), |graph, command| graph.apply(command))
    }

    /// Build the workflow
    pub fn build(self) -> Result<Workflow, CoreError> {
        let graph = self.build_graph()?;
        let mut workflow = Workflow::new(self.owner_id, self.name);
        if let Some(id) = self.id {
            workflow = workflow.with_id(id);
        }
        workflow.replace_graph(graph);
        workflow.status = self.status;
        workflow.settings.error_handling = self.error_handling;
        workflow.settings.schedule = self.schedule;
        workflow.settings.notifications = self.notifications;
        Ok(workflow)
    }
}
