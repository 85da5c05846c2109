//! Tests for the file system configuration snapshot cache

use std::path::PathBuf;

use prometheus_automation_scheduler::config::CacheConfig;
use prometheus_automation_scheduler::core::{JobConfigurationCache, JobDefinition};
use prometheus_automation_scheduler::infra::FileSystemJobConfigurationCache;

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("automation-cache-test-{}", uuid::Uuid::new_v4()))
}

#[tokio::test]
async fn test_snapshot_roundtrip_creates_directories() {
    let dir = temp_dir();
    let path = dir.join("nested").join("cache.json");
    let cache = FileSystemJobConfigurationCache::new(&path, &CacheConfig::default());
    assert!(!cache.has_valid_snapshot().await);

    let jobs = vec![
        JobDefinition::new(1, "inventory", "INV").every_minutes(15),
        JobDefinition::new(2, "report", "REP").with_env("MODE", "full"),
    ];
    cache.save_snapshot(&jobs).await.unwrap();

    assert!(path.exists());
    assert!(cache.has_valid_snapshot().await);
    assert!(cache.snapshot_timestamp().await.is_some());
    assert_eq!(cache.load_snapshot().await, jobs);

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(raw.get("timestamp").is_some());
    assert_eq!(raw["jobs"].as_array().unwrap().len(), 2);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_empty_snapshot_is_not_valid() {
    let dir = temp_dir();
    let cache = FileSystemJobConfigurationCache::new(dir.join("cache.json"), &CacheConfig::default());
    cache.save_snapshot(&[]).await.unwrap();
    assert!(!cache.has_valid_snapshot().await);
    assert!(cache.snapshot_timestamp().await.is_some());
    let _ = std::fs::remove_dir_all(dir);
}
