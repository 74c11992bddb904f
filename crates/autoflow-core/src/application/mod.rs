/// Per-workflow mutation locks
pub mod locks;

/// Step-handler resolution
pub mod handlers;

/// Run outcome notifications
pub mod notifier;

/// Validated graph edits
pub mod graph_editor;

/// Workflow status transitions
pub mod lifecycle;

/// Run execution
pub mod execution_engine;

/// Trigger ingestion
pub mod trigger;

/// Workflow management
pub mod workflow_service;

/// Periodic firing of scheduled workflows
pub mod scheduler;
