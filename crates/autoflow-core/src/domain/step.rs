use crate::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Value object: Step ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    /// Create a step ID from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, collision-free step ID
    pub fn generate() -> Self {
        Self(format!("step-{}", Uuid::new_v4()))
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StepId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The kind of a workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Gates entry into the workflow on an external event
    Trigger,
    /// Invokes a step handler
    Action,
    /// Evaluates a predicate and selects a branch
    Condition,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Trigger => f.write_str("trigger"),
            StepKind::Action => f.write_str("action"),
            StepKind::Condition => f.write_str("condition"),
        }
    }
}

/// Configuration of a trigger step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Event source this trigger listens for, e.g. `email_received`
    pub event: String,
}

impl TriggerConfig {
    /// Whether an ingested trigger kind matches this trigger
    pub fn matches(&self, trigger_kind: &str) -> bool {
        self.event == trigger_kind
    }
}

/// Configuration of an action step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Key used to resolve the step handler
    pub handler: String,

    /// Free-form parameters handed to the handler
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,

    /// Per-step timeout override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ActionConfig {
    /// Create an action configuration for the given handler key
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            params: Map::new(),
            timeout_ms: None,
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    /// Override the step timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Configuration of a condition step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Predicate expression evaluated against the run context
    pub expression: String,

    /// Expression language
    #[serde(default = "default_condition_language")]
    pub language: String,
}

fn default_condition_language() -> String {
    "jmespath".to_string()
}

impl ConditionConfig {
    /// Create a JMESPath condition
    pub fn jmespath(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            language: default_condition_language(),
        }
    }
}

/// Kind-specific step configuration
#[derive(Debug, Clone, PartialEq)]
pub enum StepConfig {
    /// Trigger configuration
    Trigger(TriggerConfig),
    /// Action configuration
    Action(ActionConfig),
    /// Condition configuration
    Condition(ConditionConfig),
}

impl StepConfig {
    /// The step kind this configuration belongs to
    pub fn kind(&self) -> StepKind {
        match self {
            StepConfig::Trigger(_) => StepKind::Trigger,
            StepConfig::Action(_) => StepKind::Action,
            StepConfig::Condition(_) => StepKind::Condition,
        }
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            StepConfig::Trigger(config) => serde_json::to_value(config),
            StepConfig::Action(config) => serde_json::to_value(config),
            StepConfig::Condition(config) => serde_json::to_value(config),
        }
    }

    fn from_value(kind: StepKind, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            StepKind::Trigger => StepConfig::Trigger(serde_json::from_value(value)?),
            StepKind::Action => StepConfig::Action(serde_json::from_value(value)?),
            StepKind::Condition => StepConfig::Condition(serde_json::from_value(value)?),
        })
    }
}

/// A node in a workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StepDocument", into = "StepDocument")]
pub struct Step {
    /// Unique identifier within the workflow
    pub id: StepId,

    /// Display title
    pub title: String,

    /// Longer description shown in the builder
    pub description: String,

    /// Kind-specific configuration
    pub config: StepConfig,
}

impl Step {
    /// Create a step with a fresh identifier
    pub fn new(title: impl Into<String>, config: StepConfig) -> Self {
        Self {
            id: StepId::generate(),
            title: title.into(),
            description: String::new(),
            config,
        }
    }

    /// Create a trigger step listening for `event`
    pub fn trigger(title: impl Into<String>, event: impl Into<String>) -> Self {
        Self::new(
            title,
            StepConfig::Trigger(TriggerConfig {
                event: event.into(),
            }),
        )
    }

    /// Create an action step
    pub fn action(title: impl Into<String>, config: ActionConfig) -> Self {
        Self::new(title, StepConfig::Action(config))
    }

    /// Create a JMESPath condition step
    pub fn condition(title: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(
            title,
            StepConfig::Condition(ConditionConfig::jmespath(expression)),
        )
    }

    /// Replace the generated identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = StepId(id.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The step kind
    pub fn kind(&self) -> StepKind {
        self.config.kind()
    }

    /// Whether this is a trigger step
    pub fn is_trigger(&self) -> bool {
        self.kind() == StepKind::Trigger
    }

    /// Trigger configuration, if this is a trigger
    pub fn trigger_config(&self) -> Option<&TriggerConfig> {
        match &self.config {
            StepConfig::Trigger(config) => Some(config),
            _ => None,
        }
    }
}

/// Wire shape of a step: `{id, kind, title, description, configuration}`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StepDocument {
    id: StepId,
    kind: StepKind,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    configuration: Value,
}

impl TryFrom<StepDocument> for Step {
    type Error = CoreError;

    fn try_from(doc: StepDocument) -> Result<Self, Self::Error> {
        if doc.id.0.is_empty() {
            return Err(CoreError::ValidationError(
                "Step ID must not be empty".to_string(),
            ));
        }

        let config = StepConfig::from_value(doc.kind, doc.configuration).map_err(|e| {
            CoreError::ValidationError(format!(
                "Invalid {} configuration for step {}: {}",
                doc.kind, doc.id, e
            ))
        })?;

        Ok(Step {
            id: doc.id,
            title: doc.title,
            description: doc.description,
            config,
        })
    }
}

impl From<Step> for StepDocument {
    fn from(step: Step) -> Self {
        // Config structs serialize to plain objects, this cannot fail
        let configuration = step.config.to_value().unwrap_or(Value::Null);
        StepDocument {
            id: step.id,
            kind: step.config.kind(),
            title: step.title,
            description: step.description,
            configuration,
        }
    }
}
