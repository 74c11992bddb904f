use crate::domain::events::{
    DomainEvent, RunCompleted, RunFailed, RunStarted, StepFailed, StepSkipped, StepStarted,
    StepSucceeded,
};
use crate::domain::step::{StepId, TriggerConfig};
use crate::domain::workflow::{ErrorHandling, ExecutionSchedule, Workflow, WorkflowId};
use crate::{CoreError, DataPacket};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Value object: Run ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a fresh run ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ingested event that may start runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    /// Target workflow; broadcast when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,

    /// Event source, matched against trigger configurations
    pub trigger_kind: String,

    /// Event payload, becomes the output of matching triggers
    #[serde(default)]
    pub payload: DataPacket,

    /// Fires every trigger regardless of kind
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub manual: bool,
}

impl TriggerEvent {
    /// An event delivered to one workflow
    pub fn targeted(
        workflow_id: WorkflowId,
        trigger_kind: impl Into<String>,
        payload: DataPacket,
    ) -> Self {
        Self {
            workflow_id: Some(workflow_id),
            trigger_kind: trigger_kind.into(),
            payload,
            manual: false,
        }
    }

    /// An event offered to every listening workflow
    pub fn broadcast(trigger_kind: impl Into<String>, payload: DataPacket) -> Self {
        Self {
            workflow_id: None,
            trigger_kind: trigger_kind.into(),
            payload,
            manual: false,
        }
    }

    /// A "run now" request firing all triggers of the workflow
    pub fn manual(workflow_id: WorkflowId, payload: DataPacket) -> Self {
        Self {
            workflow_id: Some(workflow_id),
            trigger_kind: "manual".to_string(),
            payload,
            manual: true,
        }
    }

    /// Whether this event fires the given trigger
    pub fn fires(&self, trigger: &TriggerConfig) -> bool {
        self.manual || trigger.matches(&self.trigger_kind)
    }
}

/// Status of one step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not reached yet
    Pending,
    /// Handler in flight
    Running,
    /// Finished with output
    Succeeded,
    /// Finished with error
    Failed,
    /// Never attempted
    Skipped,
}

impl StepStatus {
    /// Whether the step has reached a final status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, not started
    Idle,
    /// Executing steps
    Running,
    /// Every reachable step reached a terminal status
    Completed,
    /// Aborted
    Failed,
}

impl RunStatus {
    /// Whether the run is finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a step failed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum StepError {
    /// The handler returned an error
    #[error("Handler failure: {0}")]
    HandlerFailure(String),

    /// The handler did not finish in time
    #[error("Step timed out after {after_ms}ms")]
    Timeout {
        /// Timeout that elapsed
        #[serde(rename = "afterMs")]
        after_ms: u64,
    },

    /// The run was cancelled while the step was running
    #[error("Step cancelled")]
    Cancelled,

    /// No handler is registered for the key
    #[error("No handler registered for: {0}")]
    Unresolved(String),
}

impl From<CoreError> for StepError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::HandlerFailure(message) => StepError::HandlerFailure(message),
            other => StepError::HandlerFailure(other.to_string()),
        }
    }
}

/// Outcome of one step within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// The step
    pub step_id: StepId,

    /// Current status
    pub status: StepStatus,

    /// First attempt start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Terminal transition time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Attempts made
    #[serde(default)]
    pub attempts: u32,

    /// Output of a succeeded step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<DataPacket>,

    /// Error of a failed step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl StepResult {
    fn pending(step_id: StepId) -> Self {
        Self {
            step_id,
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            attempts: 0,
            output: None,
            error: None,
        }
    }
}

/// Aggregate: one execution of a workflow snapshot
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// Unique identifier
    pub id: RunId,

    /// Workflow that was executed
    pub workflow_id: WorkflowId,

    /// Event that started the run
    pub trigger: TriggerEvent,

    /// Overall status
    pub status: RunStatus,

    /// Error policy frozen at creation
    pub error_handling: ErrorHandling,

    /// Schedule frozen at creation
    pub schedule: ExecutionSchedule,

    /// One result per reachable step, in execution order
    pub step_results: Vec<StepResult>,

    /// Run-level error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Start timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// End timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    /// Domain events
    #[serde(skip)]
    events: Vec<Box<dyn DomainEvent>>,
}

// Pending domain events stay with the original
impl Clone for Run {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            workflow_id: self.workflow_id.clone(),
            trigger: self.trigger.clone(),
            status: self.status,
            error_handling: self.error_handling.clone(),
            schedule: self.schedule.clone(),
            step_results: self.step_results.clone(),
            error: self.error.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            events: Vec::new(),
        }
    }
}

impl Run {
    /// Create an idle run over the given execution order
    pub fn new(workflow: &Workflow, order: &[StepId], trigger: TriggerEvent) -> Self {
        Self {
            id: RunId::generate(),
            workflow_id: workflow.id.clone(),
            trigger,
            status: RunStatus::Idle,
            error_handling: workflow.settings.error_handling.clone(),
            schedule: workflow.settings.schedule.clone(),
            step_results: order.iter().cloned().map(StepResult::pending).collect(),
            error: None,
            started_at: None,
            ended_at: None,
            events: Vec::new(),
        }
    }

    /// Idle -> Running
    pub fn start(&mut self) -> Result<(), CoreError> {
        if self.status != RunStatus::Idle {
            return Err(self.invalid_run_transition(RunStatus::Running));
        }
        let now = Utc::now();
        self.status = RunStatus::Running;
        self.started_at = Some(now);
        self.record_event(Box::new(RunStarted {
            run_id: self.id.clone(),
            workflow_id: self.workflow_id.clone(),
            trigger_kind: self.trigger.trigger_kind.clone(),
            timestamp: now,
        }));
        Ok(())
    }

    /// Result of a step
    pub fn result(&self, step_id: &StepId) -> Option<&StepResult> {
        self.step_results.iter().find(|r| &r.step_id == step_id)
    }

    /// Status of a step, if it is part of the run
    pub fn step_status(&self, step_id: &StepId) -> Option<StepStatus> {
        self.result(step_id).map(|r| r.status)
    }

    /// Mark a step as running for the given attempt
    pub fn begin_step(&mut self, step_id: &StepId, attempt: u32) -> Result<(), CoreError> {
        let now = Utc::now();
        let result = self.active_result(step_id, &[StepStatus::Pending, StepStatus::Running])?;
        result.status = StepStatus::Running;
        result.attempts = attempt;
        result.started_at.get_or_insert(now);

        self.record_event(Box::new(StepStarted {
            run_id: self.id.clone(),
            step_id: step_id.clone(),
            attempt,
            timestamp: now,
        }));
        Ok(())
    }

    /// Mark a step as succeeded
    pub fn succeed_step(&mut self, step_id: &StepId, output: DataPacket) -> Result<(), CoreError> {
        let now = Utc::now();
        let result = self.active_result(step_id, &[StepStatus::Pending, StepStatus::Running])?;
        result.status = StepStatus::Succeeded;
        result.attempts = result.attempts.max(1);
        result.started_at.get_or_insert(now);
        result.ended_at = Some(now);
        result.output = Some(output);
        result.error = None;

        self.record_event(Box::new(StepSucceeded {
            run_id: self.id.clone(),
            step_id: step_id.clone(),
            timestamp: now,
        }));
        Ok(())
    }

    /// Mark a step as failed
    pub fn fail_step(&mut self, step_id: &StepId, error: StepError) -> Result<(), CoreError> {
        let now = Utc::now();
        let result = self.active_result(step_id, &[StepStatus::Pending, StepStatus::Running])?;
        result.status = StepStatus::Failed;
        result.attempts = result.attempts.max(1);
        result.started_at.get_or_insert(now);
        result.ended_at = Some(now);
        result.output = None;
        result.error = Some(error.clone());

        self.record_event(Box::new(StepFailed {
            run_id: self.id.clone(),
            step_id: step_id.clone(),
            error,
            timestamp: now,
        }));
        Ok(())
    }

    /// Mark a pending step as skipped
    pub fn skip_step(&mut self, step_id: &StepId) -> Result<(), CoreError> {
        let now = Utc::now();
        let result = self.active_result(step_id, &[StepStatus::Pending])?;
        result.status = StepStatus::Skipped;
        result.ended_at = Some(now);

        self.record_event(Box::new(StepSkipped {
            run_id: self.id.clone(),
            step_id: step_id.clone(),
            timestamp: now,
        }));
        Ok(())
    }

    /// Skip every step not reached yet
    pub fn skip_remaining(&mut self) -> Result<(), CoreError> {
        let pending: Vec<StepId> = self
            .step_results
            .iter()
            .filter(|r| r.status == StepStatus::Pending)
            .map(|r| r.step_id.clone())
            .collect();
        for step_id in pending {
            self.skip_step(&step_id)?;
        }
        Ok(())
    }

    /// Running -> Completed
    pub fn complete(&mut self) -> Result<(), CoreError> {
        if self.status != RunStatus::Running {
            return Err(self.invalid_run_transition(RunStatus::Completed));
        }
        if let Some(open) = self.step_results.iter().find(|r| !r.status.is_terminal()) {
            return Err(CoreError::ValidationError(format!(
                "Cannot complete run {}: step {} is {}",
                self.id, open.step_id, open.status
            )));
        }

        let now = Utc::now();
        self.status = RunStatus::Completed;
        self.ended_at = Some(now);
        self.record_event(Box::new(RunCompleted {
            run_id: self.id.clone(),
            timestamp: now,
        }));
        Ok(())
    }

    /// Idle or Running -> Failed
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(self.invalid_run_transition(RunStatus::Failed));
        }

        let now = Utc::now();
        let error = error.into();
        self.status = RunStatus::Failed;
        self.error = Some(error.clone());
        self.started_at.get_or_insert(now);
        self.ended_at = Some(now);
        self.record_event(Box::new(RunFailed {
            run_id: self.id.clone(),
            error,
            timestamp: now,
        }));
        Ok(())
    }

    /// Whether the run is finished
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Steps with the given status, in execution order
    pub fn steps_with_status(&self, status: StepStatus) -> Vec<&StepId> {
        self.step_results
            .iter()
            .filter(|r| r.status == status)
            .map(|r| &r.step_id)
            .collect()
    }

    /// Accumulated `{step id: {status, output}}` view of the run
    pub fn step_states(&self) -> Map<String, Value> {
        self.step_results
            .iter()
            .map(|r| {
                let mut state = Map::new();
                state.insert("status".to_string(), Value::String(r.status.to_string()));
                state.insert(
                    "output".to_string(),
                    r.output
                        .as_ref()
                        .map(|o| o.as_value().clone())
                        .unwrap_or(Value::Null),
                );
                (r.step_id.0.clone(), Value::Object(state))
            })
            .collect()
    }

    /// Record a domain event
    pub fn record_event(&mut self, event: Box<dyn DomainEvent>) {
        self.events.push(event);
    }

    /// Get and clear all domain events
    pub fn take_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
        std::mem::take(&mut self.events)
    }

    fn active_result(
        &mut self,
        step_id: &StepId,
        allowed: &[StepStatus],
    ) -> Result<&mut StepResult, CoreError> {
        if self.status != RunStatus::Running {
            return Err(CoreError::InvalidTransition {
                from: format!("run {}", self.status),
                to: format!("step {} update", step_id),
            });
        }
        let result = self
            .step_results
            .iter_mut()
            .find(|r| &r.step_id == step_id)
            .ok_or_else(|| CoreError::StepNotFound(step_id.0.clone()))?;
        if !allowed.contains(&result.status) {
            return Err(CoreError::InvalidTransition {
                from: format!("step {} {}", step_id, result.status),
                to: "update".to_string(),
            });
        }
        Ok(result)
    }

    fn invalid_run_transition(&self, to: RunStatus) -> CoreError {
        CoreError::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}
