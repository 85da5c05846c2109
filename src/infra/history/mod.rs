//! Run history backends.

pub mod memory;

pub use memory::{InMemoryRunHistory, RunRecord};
