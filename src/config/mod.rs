//! Configuration models for polling, throttling, execution and caching.

pub mod scheduler;

pub use scheduler::{CacheConfig, ResourceLimitsConfig, SchedulerConfig, DEFAULT_RESOURCE_TYPE};
