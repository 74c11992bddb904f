//! Run execution.
//!
//! A run executes an immutable snapshot of the workflow graph. Steps are
//! visited in the graph's deterministic topological order; a step whose
//! inbound connections are all inactive is skipped, never attempted. Action
//! steps go through the handler registry with a per-step timeout and race
//! against the run's cancellation token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::handlers::HandlerRegistry;
use crate::application::notifier::{LogNotifier, Notifier, RunNotice};
use crate::config::EngineConfig;
use crate::domain::condition::{ConditionEvaluator, JmesPathEvaluator};
use crate::domain::events::DomainEvent;
use crate::domain::graph::Graph;
use crate::domain::repository::RunRepository;
use crate::domain::run::{Run, RunId, RunStatus, StepError, StepStatus, TriggerEvent};
use crate::domain::step::{ActionConfig, ConditionConfig, Step, StepConfig, StepId};
use crate::domain::workflow::{
    ErrorHandling, ExhaustedAction, NotificationSettings, Workflow, WorkflowId,
};
use crate::{CoreError, DataPacket, StepContext, StepHandler};

/// Handler for domain events recorded by runs
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Handle a domain event
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError>;
}

/// Event handler that writes every event to the trace log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventHandler;

#[async_trait]
impl DomainEventHandler for TracingEventHandler {
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError> {
        debug!(
            run_id = %event.run_id(),
            step_id = event.step_id().map(|s| s.0.as_str()).unwrap_or(""),
            "{}",
            event.event_type()
        );
        Ok(())
    }
}

/// A run finished but its record could not be finalized
#[derive(Error, Debug)]
pub enum RunFinalizeError {
    /// The run repository rejected the record
    #[error("Run finished but could not be recorded: {source}")]
    Persistence {
        /// The finished run, for the caller to retry `append_run`
        run: Box<Run>,
        /// The repository error
        source: CoreError,
    },

    /// The run task ended without producing a run
    #[error("Run task terminated abnormally: {0}")]
    Aborted(String),
}

/// Handle to a spawned run
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    workflow_id: WorkflowId,
    token: CancellationToken,
    join: JoinHandle<Result<Run, RunFinalizeError>>,
}

impl RunHandle {
    /// The run ID
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// The workflow the run executes
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the run task has finished
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the terminal run
    pub async fn wait(self) -> Result<Run, RunFinalizeError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(RunFinalizeError::Aborted(e.to_string())),
        }
    }
}

/// Everything frozen at run creation besides the run itself
#[derive(Debug, Clone)]
struct ExecutionPlan {
    graph: Arc<Graph>,
    workflow_name: String,
    notifications: NotificationSettings,
}

#[derive(Debug, Clone)]
struct ActiveRun {
    workflow_id: WorkflowId,
    token: CancellationToken,
}

/// Executes workflow runs
#[derive(Clone)]
pub struct ExecutionEngine {
    handlers: Arc<HandlerRegistry>,
    evaluator: Arc<dyn ConditionEvaluator>,
    run_repo: Arc<dyn RunRepository>,
    event_handler: Arc<dyn DomainEventHandler>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    permits: Arc<Semaphore>,
    active: Arc<DashMap<RunId, ActiveRun>>,
}

impl ExecutionEngine {
    /// Create a new execution engine
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        run_repo: Arc<dyn RunRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            handlers,
            evaluator: Arc::new(JmesPathEvaluator),
            run_repo,
            event_handler: Arc::new(TracingEventHandler),
            notifier: Arc::new(LogNotifier),
            permits: Arc::new(Semaphore::new(config.max_concurrent_runs.max(1))),
            config,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Replace the condition evaluator
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Replace the domain event handler
    pub fn with_event_handler(mut self, event_handler: Arc<dyn DomainEventHandler>) -> Self {
        self.event_handler = event_handler;
        self
    }

    /// Replace the notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a run of `workflow` for `event`
    ///
    /// The workflow must be active and have a trigger the event fires. The
    /// graph and settings are frozen into the run before it is spawned, so
    /// later edits do not affect it.
    pub fn start_run(
        &self,
        workflow: &Workflow,
        event: TriggerEvent,
    ) -> Result<RunHandle, CoreError> {
        if !workflow.is_active() {
            return Err(CoreError::NotActive {
                workflow_id: workflow.id.0.clone(),
                status: workflow.status.to_string(),
            });
        }
        let fires = workflow
            .graph
            .triggers()
            .filter_map(Step::trigger_config)
            .any(|t| event.fires(t));
        if !fires {
            return Err(CoreError::NoMatchingTrigger {
                workflow_id: workflow.id.0.clone(),
                trigger_kind: event.trigger_kind.clone(),
            });
        }

        let plan = ExecutionPlan {
            graph: Arc::new(workflow.graph.clone()),
            workflow_name: workflow.name.clone(),
            notifications: workflow.settings.notifications,
        };
        let order = plan.graph.execution_order();
        let mut run = Run::new(workflow, &order, event);
        run.error_handling = std::mem::take(&mut run.error_handling).with_retry_defaults(
            self.config.default_retry_attempts,
            self.config.retry_initial_delay_ms,
        );
        let run_id = run.id.clone();
        let token = CancellationToken::new();

        self.active.insert(
            run_id.clone(),
            ActiveRun {
                workflow_id: workflow.id.clone(),
                token: token.clone(),
            },
        );

        info!(
            run_id = %run_id,
            workflow_id = %workflow.id,
            trigger_kind = %run.trigger.trigger_kind,
            steps = order.len(),
            "Run created"
        );

        let engine = self.clone();
        let task_token = token.clone();
        let join = tokio::spawn(async move {
            let permit = tokio::select! {
                permit = engine.permits.clone().acquire_owned() => permit.ok(),
                _ = task_token.cancelled() => None,
            };
            let run = engine.execute(&plan, run, &task_token).await;
            drop(permit);
            engine.finalize(&plan, run).await
        });

        Ok(RunHandle {
            run_id,
            workflow_id: workflow.id.clone(),
            token,
            join,
        })
    }

    /// Cancel an in-flight run, returning whether it was found
    pub fn cancel(&self, run_id: &RunId) -> bool {
        match self.active.get(run_id) {
            Some(entry) => {
                info!(run_id = %run_id, "Cancelling run");
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight run of a workflow
    pub fn cancel_workflow(&self, workflow_id: &WorkflowId) -> usize {
        let mut cancelled = 0;
        for entry in self.active.iter() {
            if &entry.workflow_id == workflow_id {
                entry.token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Detach in-flight runs from their workflow
    ///
    /// Detached runs finish on their snapshot but can no longer be cancelled
    /// through the engine. Their own [`RunHandle`] still works.
    pub fn detach_workflow(&self, workflow_id: &WorkflowId) -> usize {
        let before = self.active.len();
        self.active.retain(|_, entry| &entry.workflow_id != workflow_id);
        let detached = before.saturating_sub(self.active.len());
        if detached > 0 {
            info!(workflow_id = %workflow_id, detached, "Detached in-flight runs");
        }
        detached
    }

    /// In-flight runs of a workflow that can still be cancelled
    pub fn active_runs(&self, workflow_id: &WorkflowId) -> Vec<RunId> {
        self.active
            .iter()
            .filter(|entry| &entry.workflow_id == workflow_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    async fn execute(&self, plan: &ExecutionPlan, mut run: Run, token: &CancellationToken) -> Run {
        if let Err(e) = run.start() {
            error!(run_id = %run.id, error = %e, "Run could not start");
            return run;
        }
        self.drain_events(&mut run).await;

        let fallback = run.error_handling.fallback();
        let order: Vec<StepId> = run.step_results.iter().map(|r| r.step_id.clone()).collect();
        let mut outcomes: HashMap<StepId, bool> = HashMap::new();
        let mut abort: Option<String> = None;

        for step_id in order {
            if token.is_cancelled() {
                abort = Some("Run cancelled".to_string());
                break;
            }
            let Some(step) = plan.graph.step(&step_id) else {
                abort = Some(format!("Step {} missing from snapshot", step_id));
                break;
            };

            let outcome = match &step.config {
                StepConfig::Trigger(config) => {
                    let recorded = if run.trigger.fires(config) {
                        let payload = run.trigger.payload.clone();
                        run.succeed_step(&step_id, payload)
                    } else {
                        run.skip_step(&step_id)
                    };
                    recorded.map(|_| None)
                }
                _ if !is_live(&plan.graph, &run, &outcomes, &step_id, fallback) => {
                    debug!(run_id = %run.id, step_id = %step_id, "Skipping step on untaken path");
                    run.skip_step(&step_id).map(|_| None)
                }
                StepConfig::Action(config) => {
                    match self.run_action(&mut run, step, config, token).await {
                        Ok(output) => run.succeed_step(&step_id, output).map(|_| None),
                        Err(err) => run.fail_step(&step_id, err.clone()).map(|_| Some(err)),
                    }
                }
                StepConfig::Condition(config) => {
                    match self.run_condition(plan, &mut run, &step_id, config) {
                        Ok(result) => {
                            outcomes.insert(step_id.clone(), result);
                            run.succeed_step(&step_id, DataPacket::singleton("result", json!(result)))
                                .map(|_| None)
                        }
                        Err(err) => run.fail_step(&step_id, err.clone()).map(|_| Some(err)),
                    }
                }
            };
            self.drain_events(&mut run).await;

            match outcome {
                Ok(None) => {}
                Ok(Some(err)) => {
                    warn!(run_id = %run.id, step_id = %step_id, error = %err, "Step failed");
                    if err == StepError::Cancelled {
                        abort = Some("Run cancelled".to_string());
                        break;
                    }
                    if fallback == ExhaustedAction::Stop {
                        abort = Some(format!("Step {} failed: {}", step_id, err));
                        break;
                    }
                }
                Err(e) => {
                    abort = Some(format!("Step {} could not be recorded: {}", step_id, e));
                    break;
                }
            }
        }

        let finished = match abort {
            Some(message) => run.skip_remaining().and_then(|_| run.fail(message)),
            None => run.complete(),
        };
        if let Err(e) = finished {
            error!(run_id = %run.id, error = %e, "Run could not be finished cleanly");
            if !run.is_terminal() {
                let _ = run.fail(e.to_string());
            }
        }
        self.drain_events(&mut run).await;

        info!(
            run_id = %run.id,
            workflow_id = %run.workflow_id,
            status = %run.status,
            succeeded = run.steps_with_status(StepStatus::Succeeded).len(),
            failed = run.steps_with_status(StepStatus::Failed).len(),
            skipped = run.steps_with_status(StepStatus::Skipped).len(),
            "Run finished"
        );
        run
    }

    async fn run_action(
        &self,
        run: &mut Run,
        step: &Step,
        config: &ActionConfig,
        token: &CancellationToken,
    ) -> Result<DataPacket, StepError> {
        let Some(handler) = self.handlers.resolve(&config.handler) else {
            run.begin_step(&step.id, 1)?;
            return Err(StepError::Unresolved(config.handler.clone()));
        };

        let max_attempts = run.error_handling.max_attempts();
        let timeout_ms = config
            .timeout_ms
            .unwrap_or(self.config.default_step_timeout_ms);
        let mut last_error = StepError::HandlerFailure("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = retry_delay(&run.error_handling, attempt);
                debug!(run_id = %run.id, step_id = %step.id, attempt, ?delay, "Retrying step");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => return Err(StepError::Cancelled),
                }
            }

            run.begin_step(&step.id, attempt)?;
            self.drain_events(run).await;

            let context = StepContext {
                run_id: run.id.clone(),
                workflow_id: run.workflow_id.clone(),
                step_id: step.id.clone(),
                title: step.title.clone(),
                params: config.params.clone(),
                trigger: run.trigger.payload.clone(),
                outputs: accumulated_outputs(run),
                attempt,
            };

            match invoke(handler.clone(), context, timeout_ms, token).await {
                Ok(output) => return Ok(output),
                Err(StepError::Cancelled) => return Err(StepError::Cancelled),
                Err(err) => {
                    debug!(
                        run_id = %run.id,
                        step_id = %step.id,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Step attempt failed"
                    );
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    fn run_condition(
        &self,
        plan: &ExecutionPlan,
        run: &mut Run,
        step_id: &StepId,
        config: &ConditionConfig,
    ) -> Result<bool, StepError> {
        run.begin_step(step_id, 1)?;
        let context = json!({
            "trigger": run.trigger.payload.as_value(),
            "steps": run.step_states(),
            "workflow": {
                "id": run.workflow_id.0,
                "name": plan.workflow_name,
            },
        });
        let result = self
            .evaluator
            .evaluate(&config.expression, &config.language, &context)
            .map_err(|e| StepError::HandlerFailure(e.to_string()))?;
        debug!(run_id = %run.id, step_id = %step_id, result, "Condition evaluated");
        Ok(result)
    }

    async fn finalize(&self, plan: &ExecutionPlan, mut run: Run) -> Result<Run, RunFinalizeError> {
        self.drain_events(&mut run).await;
        self.active.remove(&run.id);

        let persisted = self.run_repo.append_run(&run).await;

        let wanted = match run.status {
            RunStatus::Completed => plan.notifications.on_completion,
            RunStatus::Failed => plan.notifications.on_error,
            _ => false,
        };
        if wanted {
            let notice = RunNotice::from_run(&run, &plan.workflow_name);
            if let Err(e) = self.notifier.notify(notice).await {
                warn!(run_id = %run.id, error = %e, "Run notification failed");
            }
        }

        match persisted {
            Ok(()) => Ok(run),
            Err(source) => {
                error!(run_id = %run.id, error = %source, "Failed to record run");
                Err(RunFinalizeError::Persistence {
                    run: Box::new(run),
                    source,
                })
            }
        }
    }

    async fn drain_events(&self, run: &mut Run) {
        for event in run.take_events() {
            if let Err(e) = self.event_handler.handle_event(event).await {
                warn!(run_id = %run.id, error = %e, "Domain event handler failed");
            }
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("handlers", &self.handlers)
            .field("config", &self.config)
            .field("active_runs", &self.active.len())
            .finish()
    }
}

/// A non-trigger step runs iff at least one inbound connection is active
fn is_live(
    graph: &Graph,
    run: &Run,
    outcomes: &HashMap<StepId, bool>,
    step_id: &StepId,
    fallback: ExhaustedAction,
) -> bool {
    graph.inbound(step_id).any(|connection| {
        match run.step_status(&connection.from) {
            Some(StepStatus::Succeeded) => match connection.branch {
                None => true,
                Some(branch) => outcomes.get(&connection.from) == Some(&branch),
            },
            Some(StepStatus::Failed) => {
                fallback == ExhaustedAction::Continue && connection.branch.is_none()
            }
            _ => false,
        }
    })
}

fn accumulated_outputs(run: &Run) -> HashMap<StepId, DataPacket> {
    run.step_results
        .iter()
        .filter_map(|r| r.output.as_ref().map(|o| (r.step_id.clone(), o.clone())))
        .collect()
}

fn retry_delay(policy: &ErrorHandling, attempt: u32) -> Duration {
    match policy {
        ErrorHandling::Retry(retry) => retry.delay_before(attempt),
        _ => Duration::ZERO,
    }
}

/// Run one handler attempt under the timeout, racing cancellation
async fn invoke(
    handler: Arc<dyn StepHandler>,
    context: StepContext,
    timeout_ms: u64,
    token: &CancellationToken,
) -> Result<DataPacket, StepError> {
    let task = tokio::spawn(async move { handler.execute(context).await });
    let abort = task.abort_handle();

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => {
            abort.abort();
            return Err(StepError::Cancelled);
        }
        outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), task) => outcome,
    };

    match outcome {
        Err(_) => {
            abort.abort();
            Err(StepError::Timeout {
                after_ms: timeout_ms,
            })
        }
        Ok(Err(join_error)) => Err(StepError::HandlerFailure(format!(
            "Handler panicked: {}",
            join_error
        ))),
        Ok(Ok(result)) => result.map_err(StepError::from),
    }
}
