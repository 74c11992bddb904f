//!
//! Autoflow Core - workflow runtime for the Autoflow platform
//!
//! This crate defines the workflow graph model, the validated graph editor,
//! the lifecycle controller and the execution engine, together with the
//! step-handler and persistence interfaces that other crates plug into.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Domain layer - core business models, entities, and rules
pub mod domain;

/// Application services - editing, lifecycle, execution and scheduling
pub mod application;

/// Core types
pub mod types;

/// Error types
pub mod error;

/// Engine configuration
pub mod config;

// Re-export key types
pub use config::EngineConfig;
pub use error::CoreError;
pub use types::DataPacket;

// Re-export main API types for easy use
pub use domain::graph::{Connection, Graph, GraphCommand};
pub use domain::run::{
    Run, RunId, RunStatus, StepError, StepResult, StepStatus, TriggerEvent,
};
pub use domain::step::{
    ActionConfig, ConditionConfig, Step, StepConfig, StepId, StepKind, TriggerConfig,
};
pub use domain::workflow::{
    ErrorHandling, ExecutionSchedule, ExhaustedAction, NotificationSettings, OwnerId,
    RetryPolicy, Workflow, WorkflowId, WorkflowSettings, WorkflowStatus, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_RETRY_INITIAL_DELAY_MS, MAX_RETRY_ATTEMPTS, MAX_RETRY_DELAY,
};
pub use domain::repository::{RunRepository, WorkflowRepository};

pub use application::execution_engine::{
    DomainEventHandler, ExecutionEngine, RunFinalizeError, RunHandle,
};
pub use application::graph_editor::WorkflowEditor;
pub use application::handlers::{HandlerFactory, HandlerRegistry};
pub use application::lifecycle::{ActivationReport, LifecycleController};
pub use application::locks::WorkflowLocks;
pub use application::notifier::{LogNotifier, Notifier, RunNotice};
pub use application::scheduler::ScheduleRunner;
pub use application::trigger::TriggerDispatcher;
pub use application::workflow_service::WorkflowService;
pub use domain::catalog::{StepCatalog, StepTemplate};
pub use domain::condition::{ConditionEvaluator, JmesPathEvaluator};

/// Everything a step handler receives for one attempt
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The run being executed
    pub run_id: RunId,

    /// The workflow the run belongs to
    pub workflow_id: WorkflowId,

    /// The step being executed
    pub step_id: StepId,

    /// Display title of the step
    pub title: String,

    /// Parameters from the action configuration
    pub params: Map<String, Value>,

    /// Payload of the event that started the run
    pub trigger: DataPacket,

    /// Outputs of the steps that already succeeded
    pub outputs: HashMap<StepId, DataPacket>,

    /// Attempt number, starting at 1
    pub attempt: u32,
}

impl StepContext {
    /// Look up a parameter
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Look up a string parameter
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Output of an earlier step
    pub fn output_of(&self, step_id: &StepId) -> Option<&DataPacket> {
        self.outputs.get(step_id)
    }
}

/// A pluggable implementation of an action step
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Execute one attempt of the step
    async fn execute(&self, context: StepContext) -> Result<DataPacket, CoreError>;
}
