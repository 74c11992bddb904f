use crate::domain::run::{Run, RunId, RunStatus};
use crate::domain::workflow::WorkflowId;
use crate::CoreError;
use async_trait::async_trait;
use tracing::info;

/// Summary of a finished run handed to the notifier
#[derive(Debug, Clone, PartialEq)]
pub struct RunNotice {
    /// The run
    pub run_id: RunId,

    /// The workflow it executed
    pub workflow_id: WorkflowId,

    /// Workflow name at run creation
    pub workflow_name: String,

    /// Terminal status
    pub status: RunStatus,

    /// Run-level error of a failed run
    pub error: Option<String>,
}

impl RunNotice {
    /// Build a notice from a finished run
    pub fn from_run(run: &Run, workflow_name: &str) -> Self {
        Self {
            run_id: run.id.clone(),
            workflow_id: run.workflow_id.clone(),
            workflow_name: workflow_name.to_string(),
            status: run.status,
            error: run.error.clone(),
        }
    }
}

/// Delivers run outcomes to users
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notice
    async fn notify(&self, notice: RunNotice) -> Result<(), CoreError>;
}

/// Notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: RunNotice) -> Result<(), CoreError> {
        info!(
            run_id = %notice.run_id,
            workflow_id = %notice.workflow_id,
            status = %notice.status,
            "Workflow '{}' run finished",
            notice.workflow_name
        );
        Ok(())
    }
}
