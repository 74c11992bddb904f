use crate::domain::graph::{Connection, Graph};
use crate::domain::step::{Step, TriggerConfig};
use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Value object: Workflow ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    /// Generate a fresh workflow ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Value object: Owner ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Being edited, never runs
    #[default]
    Draft,

    /// Accepts triggers
    Active,

    /// Paused, ignores triggers
    Inactive,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Draft => f.write_str("draft"),
            WorkflowStatus::Active => f.write_str("active"),
            WorkflowStatus::Inactive => f.write_str("inactive"),
        }
    }
}

/// When a workflow runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ExecutionSchedule {
    /// Runs only when an event or "run now" starts it
    #[default]
    Manual,

    /// Kept listening by the hosting service
    Continuous,

    /// Fired by the schedule runner every `interval_secs`
    Scheduled {
        /// Seconds between runs
        #[serde(rename = "intervalSecs")]
        interval_secs: u64,
    },
}

impl ExecutionSchedule {
    /// Interval of a scheduled workflow
    pub fn interval(&self) -> Option<Duration> {
        match self {
            ExecutionSchedule::Scheduled { interval_secs } => {
                Some(Duration::from_secs(*interval_secs))
            }
            _ => None,
        }
    }
}

/// Attempts used when a retry policy leaves `maxAttempts` unset
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Initial backoff used when a retry policy leaves `initialDelayMs` unset
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 500;

/// Upper bound on the attempts of one step
pub const MAX_RETRY_ATTEMPTS: u32 = 100;

/// Longest wait between two attempts
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3_600);

/// Retry parameters for failed action steps
///
/// Unset counts and delays are filled from the engine configuration when a
/// run is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// Delay before the second attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,

    /// Factor applied to the delay after each retry
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// What to do once attempts are exhausted
    #[serde(default)]
    pub on_exhausted: ExhaustedAction,
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay_ms: None,
            backoff_multiplier: default_backoff_multiplier(),
            on_exhausted: ExhaustedAction::Stop,
        }
    }
}

impl RetryPolicy {
    /// Retry policy with default backoff that stops once exhausted
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::default()
        }
    }

    /// Set the initial delay
    pub fn with_initial_delay_ms(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = Some(delay_ms);
        self
    }

    /// Set the fallback once attempts are exhausted
    pub fn on_exhausted(mut self, action: ExhaustedAction) -> Self {
        self.on_exhausted = action;
        self
    }

    /// Fill unset fields, keeping the ones already chosen
    pub fn with_defaults(mut self, attempts: u32, initial_delay_ms: u64) -> Self {
        self.max_attempts.get_or_insert(attempts);
        self.initial_delay_ms.get_or_insert(initial_delay_ms);
        self
    }

    /// Total attempts, between 1 and `MAX_RETRY_ATTEMPTS`
    pub fn attempts(&self) -> u32 {
        self.max_attempts
            .unwrap_or(DEFAULT_RETRY_ATTEMPTS)
            .clamp(1, MAX_RETRY_ATTEMPTS)
    }

    /// Delay before the given attempt (1-based), capped at `MAX_RETRY_DELAY`
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let initial = self
            .initial_delay_ms
            .unwrap_or(DEFAULT_RETRY_INITIAL_DELAY_MS);
        if attempt <= 1 || initial == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let millis = initial as f64 * self.backoff_multiplier.max(1.0).powi(exponent);
        if millis.is_finite() && millis < MAX_RETRY_DELAY.as_millis() as f64 {
            Duration::from_millis(millis as u64)
        } else {
            MAX_RETRY_DELAY
        }
    }
}

/// Fallback after retries are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustedAction {
    /// Fail the run
    #[default]
    Stop,
    /// Carry on with the next step
    Continue,
}

/// What the engine does when a step fails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum ErrorHandling {
    /// Fail the run at the first failed step
    #[default]
    Stop,

    /// Record the failure and keep going
    Continue,

    /// Re-invoke failed actions, then fall back
    Retry(RetryPolicy),
}

impl ErrorHandling {
    /// Policy applied once a step has finally failed
    pub fn fallback(&self) -> ExhaustedAction {
        match self {
            ErrorHandling::Stop => ExhaustedAction::Stop,
            ErrorHandling::Continue => ExhaustedAction::Continue,
            ErrorHandling::Retry(policy) => policy.on_exhausted,
        }
    }

    /// Total attempts allowed for an action step
    pub fn max_attempts(&self) -> u32 {
        match self {
            ErrorHandling::Retry(policy) => policy.attempts(),
            _ => 1,
        }
    }

    /// Fill unset retry fields, leaving other policies as they are
    pub fn with_retry_defaults(self, attempts: u32, initial_delay_ms: u64) -> Self {
        match self {
            ErrorHandling::Retry(policy) => {
                ErrorHandling::Retry(policy.with_defaults(attempts, initial_delay_ms))
            }
            other => other,
        }
    }
}

/// Which run outcomes are reported to the notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    /// Notify when a run completes
    #[serde(default)]
    pub on_completion: bool,

    /// Notify when a run fails
    #[serde(default)]
    pub on_error: bool,
}

/// Workflow settings frozen into each run at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
    /// Execution schedule
    #[serde(default)]
    pub schedule: ExecutionSchedule,

    /// Error-handling policy
    #[serde(default)]
    pub error_handling: ErrorHandling,

    /// Notification settings
    #[serde(default)]
    pub notifications: NotificationSettings,
}

/// Aggregate: Workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WorkflowDocument", into = "WorkflowDocument")]
pub struct Workflow {
    /// Unique identifier
    pub id: WorkflowId,

    /// Owning user
    pub owner_id: OwnerId,

    /// Display name
    pub name: String,

    /// Description
    pub description: String,

    /// Lifecycle status
    pub status: WorkflowStatus,

    /// Incremented on every persisted mutation
    pub version: u64,

    /// Settings
    pub settings: WorkflowSettings,

    /// Steps and connections
    pub graph: Graph,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create an empty draft workflow
    pub fn new(owner_id: OwnerId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::generate(),
            owner_id,
            name: name.into(),
            description: String::new(),
            status: WorkflowStatus::Draft,
            version: 0,
            settings: WorkflowSettings::default(),
            graph: Graph::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the generated ID
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = WorkflowId(id.into());
        self
    }

    /// Replace the graph, bumping the version
    pub fn replace_graph(&mut self, graph: Graph) {
        self.graph = graph;
        self.touch();
    }

    /// Mark the workflow as mutated
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Whether the workflow accepts triggers
    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }

    /// Trigger configurations listening for `trigger_kind`
    pub fn matching_triggers<'a>(
        &'a self,
        trigger_kind: &'a str,
    ) -> impl Iterator<Item = &'a TriggerConfig> + 'a {
        self.graph
            .triggers()
            .filter_map(|s| s.trigger_config())
            .filter(move |t| t.matches(trigger_kind))
    }

    /// Whether any trigger listens for `trigger_kind`
    pub fn listens_for(&self, trigger_kind: &str) -> bool {
        self.matching_triggers(trigger_kind).next().is_some()
    }
}

/// Wire shape of a workflow document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowDocument {
    id: WorkflowId,
    owner_id: OwnerId,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    status: WorkflowStatus,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    settings: WorkflowSettings,
    #[serde(default)]
    steps: Vec<Step>,
    #[serde(default)]
    connections: Vec<Connection>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WorkflowDocument> for Workflow {
    type Error = CoreError;

    fn try_from(doc: WorkflowDocument) -> Result<Self, Self::Error> {
        let graph = Graph::from_parts(doc.steps, doc.connections)?;
        Ok(Workflow {
            id: doc.id,
            owner_id: doc.owner_id,
            name: doc.name,
            description: doc.description,
            status: doc.status,
            version: doc.version,
            settings: doc.settings,
            graph,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        })
    }
}

impl From<Workflow> for WorkflowDocument {
    fn from(workflow: Workflow) -> Self {
        let (steps, connections) = workflow.graph.into_parts();
        WorkflowDocument {
            id: workflow.id,
            owner_id: workflow.owner_id,
            name: workflow.name,
            description: workflow.description,
            status: workflow.status,
            version: workflow.version,
            settings: workflow.settings,
            steps,
            connections,
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
        }
    }
}
