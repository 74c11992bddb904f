//! Assertion utilities for finished runs.

pub mod run_state;

pub use run_state::*;
