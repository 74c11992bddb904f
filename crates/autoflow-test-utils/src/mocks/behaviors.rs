//! Hand-written step handlers with scripted behaviour.
//!
//! Unlike the mockall mock these keep working when the engine calls them
//! from a spawned task, and they expose what they saw for later inspection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autoflow_core::{CoreError, DataPacket, StepContext, StepHandler};
use parking_lot::Mutex;
use serde_json::Value;

/// Returns queued results in order, then repeats the fallback
#[derive(Debug)]
pub struct ScriptedHandler {
    script: Mutex<VecDeque<Result<DataPacket, CoreError>>>,
    fallback: Result<DataPacket, CoreError>,
}

impl ScriptedHandler {
    /// Handler that answers from `script`, then with `fallback` forever
    pub fn new(
        script: Vec<Result<DataPacket, CoreError>>,
        fallback: Result<DataPacket, CoreError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
        }
    }

    /// Handler that always succeeds with `output`
    pub fn always(output: Value) -> Self {
        Self::new(Vec::new(), Ok(DataPacket::new(output)))
    }
}

#[async_trait]
impl StepHandler for ScriptedHandler {
    async fn execute(&self, _context: StepContext) -> Result<DataPacket, CoreError> {
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Always fails with a handler failure
#[derive(Debug, Clone)]
pub struct FailingHandler {
    message: String,
}

impl FailingHandler {
    /// Handler failing with `message`
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl StepHandler for FailingHandler {
    async fn execute(&self, _context: StepContext) -> Result<DataPacket, CoreError> {
        Err(CoreError::HandlerFailure(self.message.clone()))
    }
}

/// Fails until the given attempt number, then succeeds
#[derive(Debug)]
pub struct FlakyHandler {
    succeed_on: u32,
    calls: AtomicU32,
}

impl FlakyHandler {
    /// Handler succeeding on attempt `succeed_on` (1-based)
    pub fn new(succeed_on: u32) -> Self {
        Self {
            succeed_on,
            calls: AtomicU32::new(0),
        }
    }

    /// Number of calls so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StepHandler for FlakyHandler {
    async fn execute(&self, context: StepContext) -> Result<DataPacket, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if context.attempt >= self.succeed_on {
            Ok(DataPacket::singleton("attempt", Value::from(context.attempt)))
        } else {
            Err(CoreError::HandlerFailure(format!(
                "attempt {} failed",
                context.attempt
            )))
        }
    }
}

/// Sleeps before succeeding
#[derive(Debug, Clone, Copy)]
pub struct SlowHandler {
    delay: Duration,
}

impl SlowHandler {
    /// Handler taking `delay` per call
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl StepHandler for SlowHandler {
    async fn execute(&self, _context: StepContext) -> Result<DataPacket, CoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(DataPacket::singleton(
            "sleptMs",
            Value::from(self.delay.as_millis() as u64),
        ))
    }
}

/// Records every context it receives and delegates to an inner handler
#[derive(Clone)]
pub struct RecordingHandler {
    inner: Arc<dyn StepHandler>,
    seen: Arc<Mutex<Vec<StepContext>>>,
}

impl RecordingHandler {
    /// Wrap `inner`
    pub fn new(inner: Arc<dyn StepHandler>) -> Self {
        Self {
            inner,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Recording handler answering with its own parameters
    pub fn echo() -> Self {
        Self::new(Arc::new(EchoParams))
    }

    /// Contexts seen so far, in call order
    pub fn contexts(&self) -> Vec<StepContext> {
        self.seen.lock().clone()
    }

    /// Number of calls so far
    pub fn call_count(&self) -> usize {
        self.seen.lock().len()
    }
}

impl std::fmt::Debug for RecordingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingHandler")
            .field("calls", &self.call_count())
            .finish()
    }
}

#[async_trait]
impl StepHandler for RecordingHandler {
    async fn execute(&self, context: StepContext) -> Result<DataPacket, CoreError> {
        self.seen.lock().push(context.clone());
        self.inner.execute(context).await
    }
}

struct EchoParams;

#[async_trait]
impl StepHandler for EchoParams {
    async fn execute(&self, context: StepContext) -> Result<DataPacket, CoreError> {
        Ok(DataPacket::new(Value::Object(context.params)))
    }
}
