//! Assertion utilities for validating finished runs.

use std::collections::HashSet;

use autoflow_core::{DataPacket, Run, RunStatus, StepError, StepId, StepStatus, Workflow};
use serde_json::Value;
use thiserror::Error;

/// Error type for run validation failures
#[derive(Debug, Error, PartialEq)]
pub enum RunAssertionError {
    #[error("Invalid run status: expected {expected}, got {actual}")]
    RunStatus { expected: RunStatus, actual: RunStatus },

    #[error("Step {0} has no result in this run")]
    MissingStep(String),

    #[error("Invalid status for step {step}: expected {expected}, got {actual}")]
    StepStatus {
        step: String,
        expected: StepStatus,
        actual: StepStatus,
    },

    #[error("Step {0} was never run to completion")]
    NotTerminal(String),

    #[error("Step {0} has a result but is not reachable from any trigger")]
    Unreachable(String),

    #[error("Unexpected output for step {step}: expected {expected}, got {actual}")]
    Output {
        step: String,
        expected: Value,
        actual: Value,
    },

    #[error("Unexpected error for step {step}: expected {expected:?}, got {actual:?}")]
    StepError {
        step: String,
        expected: Option<StepError>,
        actual: Option<StepError>,
    },

    #[error("Step {step} took {actual} attempts, expected {expected}")]
    Attempts { step: String, expected: u32, actual: u32 },
}

/// Asserts that a run ended with the expected status.
pub fn assert_run_status(run: &Run, expected: RunStatus) -> Result<(), RunAssertionError> {
    if run.status != expected {
        return Err(RunAssertionError::RunStatus {
            expected,
            actual: run.status,
        });
    }
    Ok(())
}

/// Asserts the status of one step.
pub fn assert_step_status(
    run: &Run,
    step: &str,
    expected: StepStatus,
) -> Result<(), RunAssertionError> {
    let actual = run
        .step_status(&StepId::new(step))
        .ok_or_else(|| RunAssertionError::MissingStep(step.to_string()))?;
    if actual != expected {
        return Err(RunAssertionError::StepStatus {
            step: step.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Asserts that every listed step was skipped.
pub fn assert_steps_skipped(run: &Run, steps: &[&str]) -> Result<(), RunAssertionError> {
    steps
        .iter()
        .try_for_each(|step| assert_step_status(run, step, StepStatus::Skipped))
}

/// Asserts that no step was left pending or running.
pub fn assert_all_terminal(run: &Run) -> Result<(), RunAssertionError> {
    match run.step_results.iter().find(|r| !r.status.is_terminal()) {
        Some(open) => Err(RunAssertionError::NotTerminal(open.step_id.0.clone())),
        None => Ok(()),
    }
}

/// Asserts that results exist only for steps reachable from a trigger.
pub fn assert_results_within_reachable(
    run: &Run,
    workflow: &Workflow,
) -> Result<(), RunAssertionError> {
    let reachable: HashSet<&StepId> = workflow
        .graph
        .reachable_from_triggers()
        .map(|s| &s.id)
        .collect();
    match run
        .step_results
        .iter()
        .find(|r| !reachable.contains(&r.step_id))
    {
        Some(stray) => Err(RunAssertionError::Unreachable(stray.step_id.0.clone())),
        None => Ok(()),
    }
}

/// Asserts the output recorded for a step.
pub fn assert_step_output(
    run: &Run,
    step: &str,
    expected: Value,
) -> Result<(), RunAssertionError> {
    let result = run
        .result(&StepId::new(step))
        .ok_or_else(|| RunAssertionError::MissingStep(step.to_string()))?;
    let actual = result
        .output
        .as_ref()
        .map(DataPacket::as_value)
        .cloned()
        .unwrap_or(Value::Null);
    if actual != expected {
        return Err(RunAssertionError::Output {
            step: step.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Asserts the error recorded for a step.
pub fn assert_step_error(
    run: &Run,
    step: &str,
    expected: Option<StepError>,
) -> Result<(), RunAssertionError> {
    let result = run
        .result(&StepId::new(step))
        .ok_or_else(|| RunAssertionError::MissingStep(step.to_string()))?;
    if result.error != expected {
        return Err(RunAssertionError::StepError {
            step: step.to_string(),
            expected,
            actual: result.error.clone(),
        });
    }
    Ok(())
}

/// Asserts how many attempts a step took.
pub fn assert_attempts(run: &Run, step: &str, expected: u32) -> Result<(), RunAssertionError> {
    let result = run
        .result(&StepId::new(step))
        .ok_or_else(|| RunAssertionError::MissingStep(step.to_string()))?;
    if result.attempts != expected {
        return Err(RunAssertionError::Attempts {
            step: step.to_string(),
            expected,
            actual: result.attempts,
        });
    }
    Ok(())
}
