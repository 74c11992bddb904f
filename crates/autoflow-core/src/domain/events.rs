use crate::domain::run::{RunId, StepError};
use crate::domain::step::StepId;
use crate::domain::workflow::WorkflowId;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Domain event trait for everything a run records
pub trait DomainEvent: Debug + Send + Sync {
    /// Returns the type of the event as a string
    fn event_type(&self) -> &'static str;

    /// Returns the run this event belongs to
    fn run_id(&self) -> &RunId;

    /// Returns the step this event concerns, if any
    fn step_id(&self) -> Option<&StepId> {
        None
    }

    /// Returns the timestamp when the event occurred
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Event: Run started
#[derive(Debug, Clone)]
pub struct RunStarted {
    /// The run
    pub run_id: RunId,

    /// The workflow the run executes
    pub workflow_id: WorkflowId,

    /// Trigger kind that started it
    pub trigger_kind: String,

    /// When the run started
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for RunStarted {
    fn event_type(&self) -> &'static str {
        "run.started"
    }

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: Step started (once per attempt)
#[derive(Debug, Clone)]
pub struct StepStarted {
    /// The run
    pub run_id: RunId,

    /// The step
    pub step_id: StepId,

    /// Attempt number, starting at 1
    pub attempt: u32,

    /// When the attempt started
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for StepStarted {
    fn event_type(&self) -> &'static str {
        "step.started"
    }

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn step_id(&self) -> Option<&StepId> {
        Some(&self.step_id)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: Step succeeded
#[derive(Debug, Clone)]
pub struct StepSucceeded {
    /// The run
    pub run_id: RunId,

    /// The step
    pub step_id: StepId,

    /// When the step finished
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for StepSucceeded {
    fn event_type(&self) -> &'static str {
        "step.succeeded"
    }

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn step_id(&self) -> Option<&StepId> {
        Some(&self.step_id)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: Step failed
#[derive(Debug, Clone)]
pub struct StepFailed {
    /// The run
    pub run_id: RunId,

    /// The step
    pub step_id: StepId,

    /// Why it failed
    pub error: StepError,

    /// When the step failed
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for StepFailed {
    fn event_type(&self) -> &'static str {
        "step.failed"
    }

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn step_id(&self) -> Option<&StepId> {
        Some(&self.step_id)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: Step skipped
#[derive(Debug, Clone)]
pub struct StepSkipped {
    /// The run
    pub run_id: RunId,

    /// The step
    pub step_id: StepId,

    /// When the step was skipped
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for StepSkipped {
    fn event_type(&self) -> &'static str {
        "step.skipped"
    }

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn step_id(&self) -> Option<&StepId> {
        Some(&self.step_id)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: Run completed
#[derive(Debug, Clone)]
pub struct RunCompleted {
    /// The run
    pub run_id: RunId,

    /// When the run completed
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for RunCompleted {
    fn event_type(&self) -> &'static str {
        "run.completed"
    }

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Event: Run failed
#[derive(Debug, Clone)]
pub struct RunFailed {
    /// The run
    pub run_id: RunId,

    /// Run-level error message
    pub error: String,

    /// When the run failed
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for RunFailed {
    fn event_type(&self) -> &'static str {
        "run.failed"
    }

    fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
