/// Step model and configuration
pub mod step;

/// Workflow graph
pub mod graph;

/// Workflow aggregate and settings
pub mod workflow;

/// Run aggregate
pub mod run;

/// Domain events
pub mod events;

/// Condition evaluation
pub mod condition;

/// Built-in step templates
pub mod catalog;

/// Repository interfaces
pub mod repository;
