//! JSON file snapshot of the last good definition set.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::CacheConfig;
use crate::core::{ConfigurationSnapshot, JobConfigurationCache, JobDefinition, SchedulerError};

/// Stores `{ "timestamp": ..., "jobs": [...] }` at a fixed path.
///
/// When disabled, saves are no-ops and loads return nothing. Unreadable or
/// malformed files are logged and treated as absent.
#[derive(Debug, Clone)]
pub struct FileSystemJobConfigurationCache {
    path: PathBuf,
    enabled: bool,
    max_age: chrono::Duration,
}

impl FileSystemJobConfigurationCache {
    /// Create a cache writing to `path`.
    pub fn new(path: impl Into<PathBuf>, config: &CacheConfig) -> Self {
        let hours = i64::try_from(config.max_age_hours).unwrap_or(i64::MAX);
        Self {
            path: path.into(),
            enabled: config.enabled,
            max_age: chrono::Duration::try_hours(hours).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the cache reads and writes at all.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn read(&self) -> Option<ConfigurationSnapshot> {
        if !self.enabled {
            return None;
        }
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("could not read configuration snapshot {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str::<ConfigurationSnapshot>(&raw) {
            Ok(snapshot) => {
                let age = Utc::now() - snapshot.timestamp;
                if age > self.max_age {
                    tracing::warn!(
                        "configuration snapshot is {}h old, older than the {}h limit",
                        age.num_hours(),
                        self.max_age.num_hours()
                    );
                }
                Some(snapshot)
            }
            Err(e) => {
                tracing::warn!("configuration snapshot {} is malformed: {}", self.path.display(), e);
                None
            }
        }
    }
}

#[async_trait]
impl JobConfigurationCache for FileSystemJobConfigurationCache {
    async fn save_snapshot(&self, jobs: &[JobDefinition]) -> Result<(), SchedulerError> {
        if !self.enabled {
            return Ok(());
        }
        let snapshot = ConfigurationSnapshot {
            timestamp: Utc::now(),
            jobs: jobs.to_vec(),
        };
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| SchedulerError::Cache(format!("serialize snapshot: {e}")))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SchedulerError::Cache(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| SchedulerError::Cache(format!("write {}: {e}", self.path.display())))?;
        tracing::debug!("saved configuration snapshot with {} job(s)", jobs.len());
        Ok(())
    }

    async fn load_snapshot(&self) -> Vec<JobDefinition> {
        self.read().await.map(|s| s.jobs).unwrap_or_default()
    }

    async fn has_valid_snapshot(&self) -> bool {
        self.read().await.is_some_and(|s| !s.jobs.is_empty())
    }

    async fn snapshot_timestamp(&self) -> Option<DateTime<Utc>> {
        self.read().await.map(|s| s.timestamp)
    }
}
