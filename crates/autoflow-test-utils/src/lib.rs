//! Testing utilities for the Autoflow platform.
//!
//! This crate provides mock and scripted step handlers, workflow builders and
//! fixtures, run assertions, and a fully wired in-memory platform for tests
//! that exercise the services end to end.

pub mod assertions;
pub mod builders;
pub mod harness;
pub mod mocks;

/// BDD testing utilities
#[cfg(feature = "bdd")]
pub mod bdd;

/// Re-export commonly used types for convenience
pub use mockall;

pub use assertions::RunAssertionError;
pub use builders::WorkflowBuilder;
pub use harness::TestPlatform;
