//! A fully wired in-memory platform for end-to-end tests.

use std::sync::Arc;

use autoflow_core::{
    CoreError, DataPacket, EngineConfig, ExecutionEngine, HandlerRegistry, LifecycleController,
    Run, RunHandle, RunRepository, StepHandler, TriggerDispatcher, TriggerEvent, Workflow,
    WorkflowEditor, WorkflowId, WorkflowLocks, WorkflowRepository, WorkflowService,
};
use autoflow_state_inmemory::InMemoryStateStoreProvider;
use tracing::{debug, warn};

/// Every service wired over one in-memory store
///
/// Handlers are registered after construction; the registry is shared with
/// the engine, so a handler registered later is resolved by runs started
/// afterwards.
#[derive(Clone)]
pub struct TestPlatform {
    /// In-memory store behind both repositories
    pub provider: InMemoryStateStoreProvider,

    /// Workflow repository
    pub workflows: Arc<dyn WorkflowRepository>,

    /// Run history repository
    pub runs: Arc<dyn RunRepository>,

    /// Handlers resolved by the engine
    pub handlers: Arc<HandlerRegistry>,

    /// Per-workflow locks shared by every service
    pub locks: WorkflowLocks,

    /// Execution engine
    pub engine: ExecutionEngine,

    /// Graph editor
    pub editor: WorkflowEditor,

    /// Status transitions
    pub lifecycle: LifecycleController,

    /// Trigger routing
    pub dispatcher: TriggerDispatcher,

    /// Workflow management and run history
    pub service: WorkflowService,
}

impl TestPlatform {
    /// Platform configured from the defaults and `AUTOFLOW_*` variables
    ///
    /// An invalid environment falls back to the defaults.
    pub fn new() -> Self {
        let config = EngineConfig::load().unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring invalid engine configuration");
            EngineConfig::default()
        });
        Self::with_config(config)
    }

    /// Platform with a custom engine configuration
    pub fn with_config(config: EngineConfig) -> Self {
        let provider = InMemoryStateStoreProvider::new();
        let (workflows, runs) = provider.create_repositories();
        let handlers = Arc::new(HandlerRegistry::new());
        let locks = WorkflowLocks::new();
        let engine = ExecutionEngine::new(handlers.clone(), runs.clone(), config);

        Self {
            editor: WorkflowEditor::new(workflows.clone(), locks.clone()),
            lifecycle: LifecycleController::new(workflows.clone(), locks.clone(), engine.clone()),
            dispatcher: TriggerDispatcher::new(workflows.clone(), engine.clone()),
            service: WorkflowService::new(
                workflows.clone(),
                runs.clone(),
                locks.clone(),
                engine.clone(),
            ),
            provider,
            workflows,
            runs,
            handlers,
            locks,
            engine,
        }
    }

    /// Register a handler under `key`
    pub fn register(&self, key: &str, handler: Arc<dyn StepHandler>) -> &Self {
        self.handlers.register(key, handler);
        self
    }

    /// Store a workflow as-is, bypassing lifecycle checks
    pub async fn install(&self, workflow: Workflow) -> Result<Workflow, CoreError> {
        self.workflows.save(&workflow).await?;
        debug!(workflow_id = %workflow.id, status = %workflow.status, "Workflow installed");
        Ok(workflow)
    }

    /// Deliver `trigger_kind` to one workflow and wait for the run
    pub async fn trigger(
        &self,
        workflow_id: &WorkflowId,
        trigger_kind: &str,
        payload: DataPacket,
    ) -> Result<Run, CoreError> {
        let event = TriggerEvent::targeted(workflow_id.clone(), trigger_kind, payload);
        let handles = self.dispatcher.ingest(event).await?;
        let mut finished = Self::wait_all(handles).await?;
        finished
            .pop()
            .ok_or_else(|| CoreError::Other(format!("No run started for {}", workflow_id)))
    }

    /// Broadcast `trigger_kind` and wait for every run it started
    pub async fn broadcast(
        &self,
        trigger_kind: &str,
        payload: DataPacket,
    ) -> Result<Vec<Run>, CoreError> {
        let handles = self
            .dispatcher
            .ingest(TriggerEvent::broadcast(trigger_kind, payload))
            .await?;
        Self::wait_all(handles).await
    }

    /// Run a workflow now and wait for the run
    pub async fn run_now(&self, workflow_id: &WorkflowId) -> Result<Run, CoreError> {
        let handle = self
            .dispatcher
            .run_now(workflow_id, DataPacket::null())
            .await?;
        Self::wait(handle).await
    }

    /// Wait for a spawned run
    pub async fn wait(handle: RunHandle) -> Result<Run, CoreError> {
        handle.wait().await.map_err(|e| CoreError::Other(e.to_string()))
    }

    async fn wait_all(handles: Vec<RunHandle>) -> Result<Vec<Run>, CoreError> {
        let mut finished = Vec::with_capacity(handles.len());
        for handle in handles {
            finished.push(Self::wait(handle).await?);
        }
        Ok(finished)
    }
}

impl Default for TestPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TestPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPlatform")
            .field("handlers", &self.handlers.keys())
            .finish()
    }
}
