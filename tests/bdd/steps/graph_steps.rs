use autoflow_core::{ActionConfig, Step, StepId, WorkflowId};
use autoflow_test_utils::bdd::AutoflowWorld;
use autoflow_test_utils::WorkflowBuilder;
use cucumber::{given, then, when};
use serde_json::json;

use super::rejection_kind;

#[given(expr = "a draft workflow {string}")]
async fn draft_workflow(world: &mut AutoflowWorld, id: String) {
    let workflow = WorkflowBuilder::new(&id).id(&id).build().unwrap();
    world.platform.install(workflow).await.unwrap();
    world.workflow_id = Some(WorkflowId(id));
}

#[given(expr = "a trigger step {string} listening for {string}")]
async fn trigger_step(world: &mut AutoflowWorld, id: String, event: String) {
    let step = Step::trigger(&id, event).with_id(&id);
    world.platform.editor.add_step(&world.workflow_id(), step).await.unwrap();
}

#[given(expr = "an action step {string} calling {string}")]
async fn action_step(world: &mut AutoflowWorld, id: String, handler: String) {
    if !world.recorders.contains_key(&handler) {
        world.record_handler(&handler, json!({ "handledBy": handler }));
    }
    let step = Step::action(&id, ActionConfig::new(&handler)).with_id(&id);
    world.platform.editor.add_step(&world.workflow_id(), step).await.unwrap();
}

#[given(expr = "a condition step {string} checking {string}")]
async fn condition_step(world: &mut AutoflowWorld, id: String, expression: String) {
    let step = Step::condition(&id, expression).with_id(&id);
    world.platform.editor.add_step(&world.workflow_id(), step).await.unwrap();
}

#[given(expr = "a connection from {string} to {string}")]
async fn connection(world: &mut AutoflowWorld, from: String, to: String) {
    world
        .platform
        .editor
        .add_connection(&world.workflow_id(), &StepId(from), &StepId(to), None)
        .await
        .unwrap();
}

#[given(expr = "a {word} branch from {string} to {string}")]
async fn branch(world: &mut AutoflowWorld, outcome: String, from: String, to: String) {
    let outcome: bool = outcome.parse().unwrap();
    world
        .platform
        .editor
        .add_connection(&world.workflow_id(), &StepId(from), &StepId(to), Some(outcome))
        .await
        .unwrap();
}

#[when(expr = "I connect {string} to {string}")]
async fn connect(world: &mut AutoflowWorld, from: String, to: String) {
    let result = world
        .platform
        .editor
        .add_connection(&world.workflow_id(), &StepId(from), &StepId(to), None)
        .await;
    world.record(result);
}

#[when(expr = "I connect {string} to {string} on the {word} branch")]
async fn connect_branch(world: &mut AutoflowWorld, from: String, to: String, outcome: String) {
    let outcome: bool = outcome.parse().unwrap();
    let result = world
        .platform
        .editor
        .add_connection(&world.workflow_id(), &StepId(from), &StepId(to), Some(outcome))
        .await;
    world.record(result);
}

#[when(expr = "I remove step {string}")]
async fn remove_step(world: &mut AutoflowWorld, id: String) {
    let result = world
        .platform
        .editor
        .remove_step(&world.workflow_id(), &StepId(id))
        .await;
    world.record(result);
}

#[when("I export the workflow")]
async fn export(world: &mut AutoflowWorld) {
    let document = world.platform.service.export(&world.workflow_id()).await.unwrap();
    world.exported = Some(document);
}

#[when("I import the exported workflow")]
async fn import(world: &mut AutoflowWorld) {
    let document = world.exported.clone().expect("nothing was exported");
    let result = world.platform.service.import(document).await;
    world.record(result);
}

#[then(expr = "the edit is rejected as {word}")]
async fn edit_rejected(world: &mut AutoflowWorld, kind: String) {
    let error = world.last_error.as_ref().expect("the last request succeeded");
    assert_eq!(rejection_kind(error), kind, "unexpected error: {}", error);
}

#[then("the edit is accepted")]
async fn edit_accepted(world: &mut AutoflowWorld) {
    assert!(world.last_error.is_none(), "rejected: {:?}", world.last_error);
}

#[then(expr = "the workflow has {int} step(s)")]
async fn step_count(world: &mut AutoflowWorld, expected: usize) {
    assert_eq!(world.workflow().await.graph.len(), expected);
}

#[then(expr = "the workflow has {int} connection(s)")]
async fn connection_count(world: &mut AutoflowWorld, expected: usize) {
    assert_eq!(world.workflow().await.graph.connections().len(), expected);
}

#[then(expr = "step {string} connects to {string}")]
async fn connected(world: &mut AutoflowWorld, from: String, to: String) {
    let workflow = world.workflow().await;
    let from = StepId(from);
    let successors = workflow.graph.successors(&from);
    assert!(
        successors.iter().any(|s| s.0 == to),
        "{} does not connect to {}",
        from,
        to
    );
}

#[then(expr = "the execution order is {string}")]
async fn execution_order(world: &mut AutoflowWorld, expected: String) {
    let order: Vec<String> = world
        .workflow()
        .await
        .graph
        .execution_order()
        .into_iter()
        .map(|id| id.0)
        .collect();
    assert_eq!(order.join(", "), expected);
}
