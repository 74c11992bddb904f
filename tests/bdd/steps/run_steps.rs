use std::sync::Arc;

use anyhow::Context;
use autoflow_core::{DataPacket, ErrorHandling, RetryPolicy};
use autoflow_test_utils::assertions::{assert_all_terminal, assert_results_within_reachable};
use autoflow_test_utils::bdd::AutoflowWorld;
use autoflow_test_utils::mocks::{FailingHandler, FlakyHandler};
use cucumber::{given, then, when};
use serde_json::Value;

async fn set_error_handling(world: &mut AutoflowWorld, error_handling: ErrorHandling) {
    let mut settings = world.workflow().await.settings;
    settings.error_handling = error_handling;
    world
        .platform
        .service
        .update_settings(&world.workflow_id(), settings)
        .await
        .unwrap();
}

#[given(expr = "handler {string} answers {string}")]
async fn handler_answers(
    world: &mut AutoflowWorld,
    key: String,
    output: String,
) -> anyhow::Result<()> {
    let output: Value = serde_json::from_str(&output)
        .with_context(|| format!("output of {} is not JSON", key))?;
    world.record_handler(&key, output);
    Ok(())
}

#[given(expr = "handler {string} fails with {string}")]
async fn handler_fails(world: &mut AutoflowWorld, key: String, message: String) {
    world.recorders.remove(&key);
    world.platform.register(&key, Arc::new(FailingHandler::new(message)));
}

#[given(expr = "handler {string} fails {int} time(s) before succeeding")]
async fn handler_flaky(world: &mut AutoflowWorld, key: String, failures: u32) {
    world.recorders.remove(&key);
    world.platform.register(&key, Arc::new(FlakyHandler::new(failures + 1)));
}

#[given("the workflow stops at the first failure")]
async fn stop_policy(world: &mut AutoflowWorld) {
    set_error_handling(world, ErrorHandling::Stop).await;
}

#[given("the workflow continues past failures")]
async fn continue_policy(world: &mut AutoflowWorld) {
    set_error_handling(world, ErrorHandling::Continue).await;
}

#[given(expr = "the workflow retries failed steps up to {int} attempts")]
async fn retry_policy(world: &mut AutoflowWorld, attempts: u32) {
    let policy = RetryPolicy::new(attempts).with_initial_delay_ms(1);
    set_error_handling(world, ErrorHandling::Retry(policy)).await;
}

#[when(expr = "a(n) {string} event arrives with {string}")]
async fn event_arrives(
    world: &mut AutoflowWorld,
    kind: String,
    payload: String,
) -> anyhow::Result<()> {
    let payload: Value =
        serde_json::from_str(&payload).context("event payload is not JSON")?;
    let result = world
        .platform
        .trigger(&world.workflow_id(), &kind, DataPacket::new(payload))
        .await;
    world.last_run = world.record(result);
    Ok(())
}

#[when("I run the workflow now")]
async fn run_now(world: &mut AutoflowWorld) {
    let result = world.platform.run_now(&world.workflow_id()).await;
    world.last_run = world.record(result);
}

#[then(expr = "the run is {word}")]
async fn run_status(world: &mut AutoflowWorld, expected: String) {
    let run = world.last_run();
    assert_eq!(run.status.to_string(), expected, "run error: {:?}", run.error);
    assert_all_terminal(run).unwrap();
    assert_results_within_reachable(run, &world.workflow().await).unwrap();
}

#[then(expr = "the run is refused as {word}")]
async fn run_refused(world: &mut AutoflowWorld, kind: String) {
    let error = world.last_error.as_ref().expect("the run was not refused");
    assert_eq!(super::rejection_kind(error), kind, "unexpected error: {}", error);
}

#[then(expr = "step {string} has {word}")]
async fn step_status(world: &mut AutoflowWorld, step_name: String, expected: String) {
    let status = world
        .last_run()
        .step_status(&step_name.as_str().into())
        .unwrap_or_else(|| panic!("step {} is not part of the run", step_name));
    assert_eq!(status.to_string(), expected);
}

#[then(expr = "step {string} is not part of the run")]
async fn step_absent(world: &mut AutoflowWorld, step_name: String) {
    assert!(world.last_run().step_status(&step_name.as_str().into()).is_none());
}

#[then(expr = "step {string} took {int} attempt(s)")]
async fn step_attempts(world: &mut AutoflowWorld, step_name: String, expected: u32) {
    let result = world
        .last_run()
        .result(&step_name.as_str().into())
        .unwrap_or_else(|| panic!("step {} is not part of the run", step_name));
    assert_eq!(result.attempts, expected);
}

#[then(expr = "handler {string} was called {int} time(s)")]
async fn handler_calls(world: &mut AutoflowWorld, key: String, expected: usize) {
    assert_eq!(world.calls_to(&key), expected);
}

#[then(expr = "the run error mentions {string}")]
async fn run_error(world: &mut AutoflowWorld, fragment: String) {
    let error = world.last_run().error.clone().unwrap_or_default();
    assert!(error.contains(&fragment), "run error was {:?}", error);
}
