//! Tests for utility functions

use prometheus_automation_scheduler::util::{init_tracing, init_tracing_with};

#[test]
fn test_init_tracing_is_repeatable() {
    init_tracing();
    init_tracing_with("debug");
    tracing::info!("subscriber installed once");
}
