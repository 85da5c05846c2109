//! Configuration snapshot caches.

pub mod file;

pub use file::FileSystemJobConfigurationCache;
