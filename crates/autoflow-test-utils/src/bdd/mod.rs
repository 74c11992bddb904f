//! BDD testing utilities for the Autoflow platform
//!
//! This module provides the cucumber world shared by feature suites. Step
//! definitions live with the suite that runs them.

mod world;
pub use world::*;

use cucumber::World as _;
use std::path::Path;

/// Run every feature file under `features_dir`, exiting non-zero on failure
pub async fn run_features(features_dir: impl AsRef<Path>) {
    AutoflowWorld::cucumber()
        .fail_on_skipped()
        .run_and_exit(features_dir.as_ref())
        .await;
}
