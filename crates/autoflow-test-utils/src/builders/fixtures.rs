//! Canned workflows shared by tests.

use autoflow_core::{CoreError, ErrorHandling, Workflow};

use super::WorkflowBuilder;

/// Event kind the fixtures' triggers listen for
pub const EMAIL_RECEIVED: &str = "email_received";

/// `t -> a -> c -> {b1 on true, b2 on false}`
///
/// `a` calls the `analyze` handler, `c` checks `steps.a.output.urgent`,
/// `b1` calls `escalate` and `b2` calls `file`.
pub fn branching_workflow(error_handling: ErrorHandling) -> WorkflowBuilder {
    WorkflowBuilder::new("Triage")
        .id("triage")
        .error_handling(error_handling)
        .trigger("t", EMAIL_RECEIVED)
        .action("a", "analyze")
        .condition("c", "steps.a.output.urgent")
        .action("b1", "escalate")
        .action("b2", "file")
        .connect("t", "a")
        .connect("a", "c")
        .branch("c", "b1", true)
        .branch("c", "b2", false)
}

/// `t -> s1 -> s2 -> ... -> sN`, every action calling `handler`
pub fn linear_workflow(actions: usize, handler: &str) -> WorkflowBuilder {
    let mut builder = WorkflowBuilder::new("Linear")
        .id("linear")
        .trigger("t", EMAIL_RECEIVED);
    let mut previous = "t".to_string();
    for i in 1..=actions {
        let id = format!("s{}", i);
        builder = builder.action(&id, handler).connect(&previous, &id);
        previous = id;
    }
    builder
}

/// Active workflow with a single trigger and nothing else
pub fn trigger_only_workflow(id: &str, event: &str) -> Result<Workflow, CoreError> {
    WorkflowBuilder::new(id).id(id).trigger("t", event).active().build()
}
