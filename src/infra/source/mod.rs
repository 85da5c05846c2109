//! Job definition sources.

pub mod memory;

pub use memory::InMemoryDefinitionSource;
