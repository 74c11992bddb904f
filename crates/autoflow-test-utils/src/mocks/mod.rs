//! Mock and scripted implementations of the step handler interface.

pub mod handler;
pub mod behaviors;

pub use behaviors::*;
pub use handler::*;
