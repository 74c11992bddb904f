//! Step definitions for the workflow feature files

mod graph_steps;
mod lifecycle_steps;
mod run_steps;

use autoflow_core::CoreError;

/// Short name used by feature files to refer to a rejection
pub(crate) fn rejection_kind(error: &CoreError) -> &'static str {
    match error {
        CoreError::CycleDetected { .. } => "cycle",
        CoreError::SelfLoop(_) => "self-loop",
        CoreError::InvalidBranch(_) => "invalid-branch",
        CoreError::InvalidEndpoint(_) => "unknown-endpoint",
        CoreError::DuplicateStep(_) => "duplicate-step",
        CoreError::NotRunnable(_) => "not-runnable",
        CoreError::NotActive { .. } => "not-active",
        CoreError::NoMatchingTrigger { .. } => "no-matching-trigger",
        CoreError::InvalidTransition { .. } => "invalid-transition",
        CoreError::VersionConflict { .. } => "version-conflict",
        CoreError::ValidationError(_) => "invalid",
        _ => "other",
    }
}
