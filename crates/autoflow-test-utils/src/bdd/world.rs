//! World definition for Autoflow BDD tests

use std::collections::HashMap;
use std::sync::Arc;

use autoflow_core::{ActivationReport, CoreError, Run, Workflow, WorkflowId};
use cucumber::World;
use serde_json::Value;

use crate::harness::TestPlatform;
use crate::mocks::{RecordingHandler, ScriptedHandler};

/// World struct that holds state across step definitions
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct AutoflowWorld {
    /// Services under test
    pub platform: TestPlatform,

    /// Workflow the scenario is working on
    pub workflow_id: Option<WorkflowId>,

    /// Recording handlers by registry key
    pub recorders: HashMap<String, RecordingHandler>,

    /// Most recent finished run
    pub last_run: Option<Run>,

    /// Most recent error returned by a service
    pub last_error: Option<CoreError>,

    /// Most recent lifecycle transition
    pub last_report: Option<ActivationReport>,

    /// Document kept by an export step
    pub exported: Option<Value>,
}

impl AutoflowWorld {
    /// Fresh world with an empty platform
    pub fn new() -> Self {
        Self {
            platform: TestPlatform::new(),
            workflow_id: None,
            recorders: HashMap::new(),
            last_run: None,
            last_error: None,
            last_report: None,
            exported: None,
        }
    }

    /// The workflow under test
    ///
    /// # Panics
    /// If no scenario step created or installed a workflow.
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
            .clone()
            .expect("no workflow has been set up in this scenario")
    }

    /// Load the workflow under test
    ///
    /// # Panics
    /// If the workflow was deleted or never stored.
    pub async fn workflow(&self) -> Workflow {
        self.platform
            .service
            .get(&self.workflow_id())
            .await
            .expect("workflow under test is missing from the store")
    }

    /// The last finished run
    ///
    /// # Panics
    /// If no run has finished yet.
    pub fn last_run(&self) -> &Run {
        self.last_run.as_ref().expect("no run has finished yet")
    }

    /// Register a recording handler answering with `output` under `key`
    pub fn record_handler(&mut self, key: &str, output: Value) -> RecordingHandler {
        let recorder = RecordingHandler::new(Arc::new(ScriptedHandler::always(output)));
        self.platform.register(key, Arc::new(recorder.clone()));
        self.recorders.insert(key.to_string(), recorder.clone());
        recorder
    }

    /// Number of calls the recording handler under `key` received
    pub fn calls_to(&self, key: &str) -> usize {
        self.recorders.get(key).map_or(0, RecordingHandler::call_count)
    }

    /// Keep the outcome of a service call
    pub fn record<T>(&mut self, result: Result<T, CoreError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.last_error = None;
                Some(value)
            }
            Err(e) => {
                self.last_error = Some(e);
                None
            }
        }
    }
}

impl Default for AutoflowWorld {
    fn default() -> Self {
        Self::new()
    }
}
