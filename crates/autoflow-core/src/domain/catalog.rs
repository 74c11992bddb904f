//! Built-in step templates offered by the workflow builder.

use crate::domain::step::{
    ActionConfig, ConditionConfig, Step, StepConfig, StepId, StepKind, TriggerConfig,
};

/// A reusable step blueprint
#[derive(Debug, Clone, PartialEq)]
pub struct StepTemplate {
    /// Stable lookup key
    pub key: &'static str,

    /// Display title
    pub title: &'static str,

    /// Display description
    pub description: &'static str,

    /// Configuration copied into each instance
    pub config: StepConfig,
}

impl StepTemplate {
    /// Kind of the steps this template produces
    pub fn kind(&self) -> StepKind {
        self.config.kind()
    }

    /// Create a step from this template with a fresh identifier
    pub fn instantiate(&self) -> Step {
        Step {
            id: StepId::generate(),
            title: self.title.to_string(),
            description: self.description.to_string(),
            config: self.config.clone(),
        }
    }
}

/// The set of templates available to the builder
#[derive(Debug, Clone)]
pub struct StepCatalog {
    templates: Vec<StepTemplate>,
}

impl StepCatalog {
    /// The built-in templates
    pub fn builtin() -> Self {
        let templates = vec![
            StepTemplate {
                key: "email_received",
                title: "Email Received",
                description: "Triggers when a new email is received",
                config: StepConfig::Trigger(TriggerConfig {
                    event: "email_received".to_string(),
                }),
            },
            StepTemplate {
                key: "form_submission",
                title: "Form Submission",
                description: "Triggers when a form is submitted",
                config: StepConfig::Trigger(TriggerConfig {
                    event: "form_submitted".to_string(),
                }),
            },
            StepTemplate {
                key: "send_email",
                title: "Send Email",
                description: "Sends an automated email",
                config: StepConfig::Action(ActionConfig::new("send_email")),
            },
            StepTemplate {
                key: "ai_analysis",
                title: "AI Analysis",
                description: "Analyzes data using AI",
                config: StepConfig::Action(ActionConfig::new("ai_analysis")),
            },
            StepTemplate {
                key: "if_then",
                title: "If/Then",
                description: "Conditional logic based on data",
                config: StepConfig::Condition(ConditionConfig::jmespath("trigger")),
            },
        ];
        Self { templates }
    }

    /// Look up a template by key
    pub fn get(&self, key: &str) -> Option<&StepTemplate> {
        self.templates.iter().find(|t| t.key == key)
    }

    /// All templates
    pub fn templates(&self) -> &[StepTemplate] {
        &self.templates
    }

    /// Templates of one kind
    pub fn of_kind(&self, kind: StepKind) -> impl Iterator<Item = &StepTemplate> {
        self.templates.iter().filter(move |t| t.kind() == kind)
    }

    /// Instantiate the template with the given key
    pub fn instantiate(&self, key: &str) -> Option<Step> {
        self.get(key).map(StepTemplate::instantiate)
    }
}

impl Default for StepCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
