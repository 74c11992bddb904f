use autoflow_core::WorkflowStatus;
use autoflow_test_utils::bdd::AutoflowWorld;
use cucumber::{given, then, when};

async fn transition(world: &mut AutoflowWorld, target: WorkflowStatus) {
    let result = world
        .platform
        .lifecycle
        .transition(&world.workflow_id(), target)
        .await;
    world.last_report = world.record(result);
}

#[given("the workflow is active")]
async fn already_active(world: &mut AutoflowWorld) {
    world.platform.lifecycle.activate(&world.workflow_id()).await.unwrap();
}

#[when("I activate the workflow")]
async fn activate(world: &mut AutoflowWorld) {
    transition(world, WorkflowStatus::Active).await;
}

#[when("I deactivate the workflow")]
async fn deactivate(world: &mut AutoflowWorld) {
    transition(world, WorkflowStatus::Inactive).await;
}

#[when("I return the workflow to draft")]
async fn revert(world: &mut AutoflowWorld) {
    transition(world, WorkflowStatus::Draft).await;
}

#[then(expr = "the workflow is {word}")]
async fn status_is(world: &mut AutoflowWorld, expected: String) {
    assert_eq!(world.workflow().await.status.to_string(), expected);
}

#[then(expr = "step {string} is reported as an orphan")]
async fn orphan_reported(world: &mut AutoflowWorld, step_name: String) {
    let report = world.last_report.as_ref().expect("no transition report");
    assert!(
        report.orphans.iter().any(|id| id.0 == step_name),
        "orphans were {:?}",
        report.orphans
    );
}

#[then("no orphans are reported")]
async fn no_orphans(world: &mut AutoflowWorld) {
    let report = world.last_report.as_ref().expect("no transition report");
    assert!(report.orphans.is_empty(), "orphans were {:?}", report.orphans);
}
