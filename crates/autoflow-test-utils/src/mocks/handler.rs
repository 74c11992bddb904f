//! Mock implementation of the StepHandler trait.

use async_trait::async_trait;
use autoflow_core::{CoreError, DataPacket, StepContext, StepHandler};
use mockall::mock;
use serde_json::Value;

mock! {
    pub StepHandler {}

    #[async_trait]
    impl StepHandler for StepHandler {
        async fn execute(&self, context: StepContext) -> Result<DataPacket, CoreError>;
    }
}

/// Creates a mock handler that echoes its parameters on every call.
pub fn create_mock_step_handler() -> MockStepHandler {
    let mut mock = MockStepHandler::new();
    mock.expect_execute()
        .returning(|context| Ok(DataPacket::new(Value::Object(context.params))));
    mock
}

/// Creates a mock handler that must be called exactly `times` times and
/// returns `output` each time.
pub fn create_mock_step_handler_returning(times: usize, output: Value) -> MockStepHandler {
    let mut mock = MockStepHandler::new();
    mock.expect_execute()
        .times(times)
        .returning(move |_| Ok(DataPacket::new(output.clone())));
    mock
}

/// Creates a mock handler that must never be called.
pub fn create_unreachable_step_handler() -> MockStepHandler {
    let mut mock = MockStepHandler::new();
    mock.expect_execute().never();
    mock
}
