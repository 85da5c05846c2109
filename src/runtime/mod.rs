//! Runtime adapters and read-only API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{health, recent_executions, recent_fires, registered_jobs, resource_usage, Health};
pub use tokio_spawner::TokioSpawner;
