//! Infrastructure adapters for definition sources, run history and the
//! configuration snapshot cache.

pub mod cache;
pub mod history;
pub mod source;

pub use cache::FileSystemJobConfigurationCache;
pub use history::{InMemoryRunHistory, RunRecord};
pub use source::InMemoryDefinitionSource;
