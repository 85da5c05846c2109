//! Builders to construct the automation host from configuration.

pub mod host_builder;

pub use host_builder::{build_host, AutomationHost};
