//! End-to-end run behaviour over the trigger -> action -> condition -> branch shape.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use autoflow_core::domain::events::DomainEvent;
use autoflow_core::domain::repository::memory::MemoryRunRepository;
use autoflow_core::{
    ActionConfig, CoreError, DataPacket, DomainEventHandler, EngineConfig, ErrorHandling,
    ExecutionEngine, Graph, HandlerRegistry, Notifier, OwnerId, RetryPolicy,
    Run, RunNotice, RunRepository, RunStatus, Step, StepContext, StepError, StepHandler, StepId,
    StepStatus, TriggerEvent, Workflow, WorkflowId, WorkflowStatus,
};
use futures::future::join_all;
use mockall::mock;
use serde_json::json;
use tracing_subscriber::EnvFilter;

mock! {
    pub Handler {}

    #[async_trait]
    impl StepHandler for Handler {
        async fn execute(&self, context: StepContext) -> Result<DataPacket, CoreError>;
    }
}

fn id(s: &str) -> StepId {
    StepId::new(s)
}

/// T -> A -> C -> {B1 on true, B2 on false}, plus an unreachable step
fn branching_workflow(error_handling: ErrorHandling) -> Workflow {
    let mut graph = Graph::new();
    graph
        .add_step(Step::trigger("Email received", "email_received").with_id("t"))
        .unwrap();
    graph
        .add_step(Step::action("Analyze", ActionConfig::new("analyze")).with_id("a"))
        .unwrap();
    graph
        .add_step(Step::condition("Urgent?", "steps.a.output.urgent").with_id("c"))
        .unwrap();
    graph
        .add_step(Step::action("Escalate", ActionConfig::new("escalate")).with_id("b1"))
        .unwrap();
    graph
        .add_step(Step::action("File", ActionConfig::new("file")).with_id("b2"))
        .unwrap();
    graph
        .add_step(Step::action("Loose", ActionConfig::new("file")).with_id("loose"))
        .unwrap();
    graph.add_connection(id("t"), id("a")).unwrap();
    graph.add_connection(id("a"), id("c")).unwrap();
    graph.add_branch_connection(id("c"), id("b1"), true).unwrap();
    graph.add_branch_connection(id("c"), id("b2"), false).unwrap();

    let mut workflow = Workflow::new(OwnerId::from("user-1"), "Triage").with_id("triage");
    workflow.replace_graph(graph);
    workflow.status = WorkflowStatus::Active;
    workflow.settings.error_handling = error_handling;
    workflow
}

fn expect_calls(times: usize) -> Arc<dyn StepHandler> {
    let mut handler = MockHandler::new();
    handler
        .expect_execute()
        .times(times)
        .returning(|context| Ok(DataPacket::new(json!({"handled": context.step_id.0}))));
    Arc::new(handler)
}

fn analyzer(urgent: bool) -> Arc<dyn StepHandler> {
    let mut handler = MockHandler::new();
    handler
        .expect_execute()
        .times(1)
        .returning(move |_| Ok(DataPacket::new(json!({"urgent": urgent}))));
    Arc::new(handler)
}

fn failing(times: usize) -> Arc<dyn StepHandler> {
    let mut handler = MockHandler::new();
    handler
        .expect_execute()
        .times(times)
        .returning(|_| Err(CoreError::HandlerFailure("model unavailable".to_string())));
    Arc::new(handler)
}

fn engine(registry: HandlerRegistry) -> (ExecutionEngine, Arc<MemoryRunRepository>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let runs = Arc::new(MemoryRunRepository::new());
    let engine = ExecutionEngine::new(Arc::new(registry), runs.clone(), EngineConfig::default());
    (engine, runs)
}

async fn run_to_end(engine: &ExecutionEngine, workflow: &Workflow) -> Run {
    engine
        .start_run(
            workflow,
            TriggerEvent::targeted(
                workflow.id.clone(),
                "email_received",
                DataPacket::new(json!({"subject": "Server down"})),
            ),
        )
        .unwrap()
        .wait()
        .await
        .unwrap()
}

fn statuses(run: &Run) -> Vec<(String, StepStatus)> {
    run.step_results
        .iter()
        .map(|r| (r.step_id.0.clone(), r.status))
        .collect()
}

fn assert_results_cover_reachable_only(run: &Run, workflow: &Workflow) {
    let reachable: Vec<&StepId> = workflow
        .graph
        .reachable_from_triggers()
        .map(|s| &s.id)
        .collect();
    assert_eq!(run.step_results.len(), reachable.len());
    assert!(run.step_results.iter().all(|r| reachable.contains(&&r.step_id)));
    assert!(run.step_results.iter().all(|r| r.status.is_terminal()));
}

#[tokio::test]
async fn true_branch_runs_and_false_branch_is_skipped() {
    let workflow = branching_workflow(ErrorHandling::Stop);
    let registry = HandlerRegistry::new()
        .with_handler("analyze", analyzer(true))
        .with_handler("escalate", expect_calls(1))
        .with_handler("file", expect_calls(0));
    let (engine, _) = engine(registry);

    let run = run_to_end(&engine, &workflow).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(
        statuses(&run),
        vec![
            ("t".to_string(), StepStatus::Succeeded),
            ("a".to_string(), StepStatus::Succeeded),
            ("c".to_string(), StepStatus::Succeeded),
            ("b1".to_string(), StepStatus::Succeeded),
            ("b2".to_string(), StepStatus::Skipped),
        ]
    );
    assert_eq!(
        run.result(&id("c")).unwrap().output,
        Some(DataPacket::new(json!({"result": true})))
    );
    assert_results_cover_reachable_only(&run, &workflow);
}

#[tokio::test]
async fn false_branch_runs_and_true_branch_is_skipped() {
    let workflow = branching_workflow(ErrorHandling::Stop);
    let registry = HandlerRegistry::new()
        .with_handler("analyze", analyzer(false))
        .with_handler("escalate", expect_calls(0))
        .with_handler("file", expect_calls(1));
    let (engine, _) = engine(registry);

    let run = run_to_end(&engine, &workflow).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.step_status(&id("b1")), Some(StepStatus::Skipped));
    assert_eq!(run.step_status(&id("b2")), Some(StepStatus::Succeeded));
    assert_results_cover_reachable_only(&run, &workflow);
}

#[tokio::test]
async fn stop_policy_skips_everything_after_the_failure() {
    let workflow = branching_workflow(ErrorHandling::Stop);
    let registry = HandlerRegistry::new()
        .with_handler("analyze", failing(1))
        .with_handler("escalate", expect_calls(0))
        .with_handler("file", expect_calls(0));
    let (engine, runs) = engine(registry);

    let run = run_to_end(&engine, &workflow).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap_or("").contains("model unavailable"));
    assert_eq!(run.step_status(&id("a")), Some(StepStatus::Failed));
    for suffix in ["c", "b1", "b2"] {
        assert_eq!(run.step_status(&id(suffix)), Some(StepStatus::Skipped));
    }
    assert_results_cover_reachable_only(&run, &workflow);

    let stored = runs.find_by_id(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
}

#[tokio::test]
async fn continue_policy_carries_on_past_a_failed_step() {
    let workflow = branching_workflow(ErrorHandling::Continue);
    let registry = HandlerRegistry::new()
        .with_handler("analyze", failing(1))
        .with_handler("escalate", expect_calls(0))
        .with_handler("file", expect_calls(1));
    let (engine, _) = engine(registry);

    let run = run_to_end(&engine, &workflow).await;

    // A failed step leaves no output, so the condition reads null and is false
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.step_status(&id("a")), Some(StepStatus::Failed));
    assert_eq!(run.step_status(&id("c")), Some(StepStatus::Succeeded));
    assert_eq!(run.step_status(&id("b2")), Some(StepStatus::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_every_attempt() {
    let policy = RetryPolicy::new(3).with_initial_delay_ms(50);
    let workflow = branching_workflow(ErrorHandling::Retry(policy));
    let registry = HandlerRegistry::new()
        .with_handler("analyze", failing(3))
        .with_handler("escalate", expect_calls(0))
        .with_handler("file", expect_calls(0));
    let (engine, _) = engine(registry);

    let run = run_to_end(&engine, &workflow).await;

    let analyzed = run.result(&id("a")).unwrap();
    assert_eq!(analyzed.status, StepStatus::Failed);
    assert_eq!(analyzed.attempts, 3);
    assert!(matches!(analyzed.error, Some(StepError::HandlerFailure(_))));
    assert_eq!(run.status, RunStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_run_and_skips_the_rest() {
    struct Stalls;

    #[async_trait]
    impl StepHandler for Stalls {
        async fn execute(&self, _context: StepContext) -> Result<DataPacket, CoreError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(DataPacket::null())
        }
    }

    let workflow = branching_workflow(ErrorHandling::Continue);
    let registry = HandlerRegistry::new()
        .with_handler("analyze", Arc::new(Stalls))
        .with_handler("escalate", expect_calls(0))
        .with_handler("file", expect_calls(0));
    let (engine, _) = engine(registry);

    let handle = engine
        .start_run(
            &workflow,
            TriggerEvent::targeted(workflow.id.clone(), "email_received", DataPacket::null()),
        )
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.cancel(handle.run_id()));

    let run = handle.wait().await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.result(&id("a")).unwrap().error,
        Some(StepError::Cancelled)
    );
    for rest in ["c", "b1", "b2"] {
        assert_eq!(run.step_status(&id(rest)), Some(StepStatus::Skipped));
    }
    assert!(engine.active_runs(&workflow.id).is_empty());
}

#[derive(Default)]
struct RecordingNotifier {
    notices: Mutex<Vec<RunNotice>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notice: RunNotice) -> Result<(), CoreError> {
        self.notices.lock().unwrap().push(notice);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingEvents {
    types: Mutex<Vec<String>>,
}

#[async_trait]
impl DomainEventHandler for RecordingEvents {
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError> {
        self.types.lock().unwrap().push(event.event_type().to_string());
        Ok(())
    }
}

#[tokio::test]
async fn notifications_follow_the_frozen_settings() {
    let mut workflow = branching_workflow(ErrorHandling::Stop);
    workflow.settings.notifications.on_error = true;

    let notifier = Arc::new(RecordingNotifier::default());
    let events = Arc::new(RecordingEvents::default());
    let registry = HandlerRegistry::new()
        .with_handler("analyze", failing(1))
        .with_handler("escalate", expect_calls(0))
        .with_handler("file", expect_calls(0));
    let (engine, _) = engine(registry);
    let engine = engine
        .with_notifier(notifier.clone())
        .with_event_handler(events.clone());

    let run = run_to_end(&engine, &workflow).await;

    let notices = notifier.notices.lock().unwrap().clone();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].run_id, run.id);
    assert_eq!(notices[0].status, RunStatus::Failed);
    assert_eq!(notices[0].workflow_name, "Triage");

    let types = events.types.lock().unwrap().clone();
    assert_eq!(types.first().map(String::as_str), Some("run.started"));
    assert_eq!(types.last().map(String::as_str), Some("run.failed"));
    assert!(types.contains(&"step.failed".to_string()));
}

#[tokio::test]
async fn concurrent_runs_share_the_permit_pool() {
    let workflow = branching_workflow(ErrorHandling::Stop);
    let mut handler = MockHandler::new();
    handler
        .expect_execute()
        .times(8)
        .returning(|_| Ok(DataPacket::new(json!({"urgent": true}))));
    let registry = HandlerRegistry::new()
        .with_handler("analyze", Arc::new(handler))
        .with_handler("escalate", expect_calls(8))
        .with_handler("file", expect_calls(0));

    let runs = Arc::new(MemoryRunRepository::new());
    let config = EngineConfig {
        max_concurrent_runs: 2,
        ..EngineConfig::default()
    };
    let engine = ExecutionEngine::new(Arc::new(registry), runs.clone(), config);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            engine
                .start_run(
                    &workflow,
                    TriggerEvent::manual(WorkflowId::from("triage"), DataPacket::null()),
                )
                .unwrap()
        })
        .collect();
    let finished = join_all(handles.into_iter().map(|h| h.wait())).await;

    assert!(finished
        .iter()
        .all(|r| r.as_ref().map(|run| run.status == RunStatus::Completed).unwrap_or(false)));
    assert_eq!(
        runs.list_for_workflow(&workflow.id).await.unwrap().len(),
        8
    );
}
