//! Builders and canned fixtures for workflows.

pub mod workflow;
pub mod fixtures;

pub use fixtures::*;
pub use workflow::WorkflowBuilder;
