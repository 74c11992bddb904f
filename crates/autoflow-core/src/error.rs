use thiserror::Error;

/// Core error type for the Autoflow runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Workflow not found
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Step not found in the graph
    #[error("Step not found: {0}")]
    StepNotFound(String),

    /// Run not found
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// A step with the same identifier already exists
    #[error("Duplicate step ID: {0}")]
    DuplicateStep(String),

    /// A connection endpoint does not reference an existing step
    #[error("Invalid connection endpoint: {0}")]
    InvalidEndpoint(String),

    /// A connection from a step to itself
    #[error("Self-loop on step: {0}")]
    SelfLoop(String),

    /// Adding the connection would close a cycle
    #[error("Cycle detected: connecting {from} -> {to} closes a cycle")]
    CycleDetected {
        /// Source of the rejected connection
        from: String,
        /// Target of the rejected connection
        to: String,
    },

    /// A branch label was attached to a connection not leaving a condition
    #[error("Branch label on non-condition step: {0}")]
    InvalidBranch(String),

    /// Workflow cannot be activated
    #[error("Workflow is not runnable: {0}")]
    NotRunnable(String),

    /// Trigger delivered to a workflow that is not active
    #[error("Workflow {workflow_id} is not active (status: {status})")]
    NotActive {
        /// Workflow that received the trigger
        workflow_id: String,
        /// Its current status
        status: String,
    },

    /// No trigger step in the workflow matches the event
    #[error("No trigger in workflow {workflow_id} matches event: {trigger_kind}")]
    NoMatchingTrigger {
        /// Workflow that received the trigger
        workflow_id: String,
        /// Trigger kind of the event
        trigger_kind: String,
    },

    /// Status transition not permitted
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// A step handler failed
    #[error("Handler failure: {0}")]
    HandlerFailure(String),

    /// Expression evaluation error
    #[error("Expression evaluation error: {0}")]
    ExpressionError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Stored document changed since it was loaded
    #[error("Version conflict on workflow {workflow_id}: expected {expected}, found {found}")]
    VersionConflict {
        /// Workflow being saved
        workflow_id: String,
        /// Version the writer based its change on
        expected: u64,
        /// Version currently stored
        found: u64,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Whether the error is a graph-edit validation failure
    pub fn is_graph_violation(&self) -> bool {
        matches!(
            self,
            CoreError::DuplicateStep(_)
                | CoreError::StepNotFound(_)
                | CoreError::InvalidEndpoint(_)
                | CoreError::SelfLoop(_)
                | CoreError::CycleDetected { .. }
                | CoreError::InvalidBranch(_)
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
