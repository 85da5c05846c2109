//! Unit tests for individual components

mod cache_test;
mod config_test;
mod error_test;
mod notifier_test;
mod runtime_test;
mod throttle_test;
mod trigger_test;
mod util_test;
