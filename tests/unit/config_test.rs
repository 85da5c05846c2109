//! Tests for configuration validation

use prometheus_automation_scheduler::config::{ResourceLimitsConfig, SchedulerConfig};

#[test]
fn test_partial_json_uses_defaults() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{
            "poll_interval_secs": 120,
            "resource_limits": { "limits": { "Sap": 1 } }
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.poll_interval_secs, 120);
    assert_eq!(cfg.retry_interval_secs, 30);
    assert_eq!(cfg.max_concurrency, 5);
    assert_eq!(cfg.notification_capacity, 500);
    assert_eq!(cfg.resource_limits.default_limit, 4);
    assert_eq!(cfg.resource_limits.limit_for("Sap"), 1);
    assert!(cfg.cache.enabled);
    assert_eq!(cfg.cache.max_age_hours, 24);
}

#[test]
fn test_zero_values_rejected() {
    assert!(SchedulerConfig::from_json_str(r#"{ "poll_interval_secs": 0 }"#).is_err());
    assert!(SchedulerConfig::from_json_str(r#"{ "retry_interval_secs": 0 }"#).is_err());
    assert!(SchedulerConfig::from_json_str(r#"{ "max_concurrency": 0 }"#).is_err());
    assert!(SchedulerConfig::from_json_str(r#"{ "notification_capacity": 0 }"#).is_err());
}

#[test]
fn test_zero_resource_limit_rejected() {
    let limits = ResourceLimitsConfig::default().with_limit("Sap", 0);
    let err = limits.validate().unwrap_err();
    assert!(err.contains("Sap"));

    let cfg = SchedulerConfig {
        resource_limits: limits,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().unwrap_err().starts_with("resource_limits invalid"));
}

#[test]
fn test_malformed_json_rejected() {
    let err = SchedulerConfig::from_json_str("{ nope").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_cache_path_resolves_against_content_root() {
    let cfg = SchedulerConfig {
        content_root: "/srv/automation".into(),
        ..SchedulerConfig::default()
    };
    assert_eq!(
        cfg.cache_path(),
        std::path::PathBuf::from("/srv/automation/data/job-configuration-cache.json")
    );
}
