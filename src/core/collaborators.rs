//! Seams to the stores the scheduler reads from and reports to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::definition::JobDefinition;
use super::SchedulerError;

/// Read-only provider of the currently enabled job definitions.
#[async_trait]
pub trait JobDefinitionSource: Send + Sync {
    /// Full snapshot of enabled definitions. Order is not significant.
    async fn load_enabled(&self) -> Result<Vec<JobDefinition>, SchedulerError>;
}

/// Identifier issued by a [`RunHistory`] for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub u64);

/// Final status recorded for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    /// Exit code 0.
    Succeeded,
    /// Non-zero exit or failure before launch.
    Failed,
    /// Cancelled while running.
    Cancelled,
}

/// Durable run log owned by the embedding application.
///
/// Calls are best effort: errors are logged by the caller and never fail the
/// job being recorded.
#[async_trait]
pub trait RunHistory: Send + Sync {
    /// Record the start of a run.
    async fn start(&self, job_name: &str) -> Result<RunId, SchedulerError>;

    /// Record the end of a run.
    async fn complete(
        &self,
        run_id: RunId,
        status: RunStatus,
        message: Option<String>,
    ) -> Result<(), SchedulerError>;
}

/// History that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRunHistory;

#[async_trait]
impl RunHistory for NoopRunHistory {
    async fn start(&self, _job_name: &str) -> Result<RunId, SchedulerError> {
        Ok(RunId(0))
    }

    async fn complete(
        &self,
        _run_id: RunId,
        _status: RunStatus,
        _message: Option<String>,
    ) -> Result<(), SchedulerError> {
        Ok(())
    }
}

/// Persisted copy of the last good definition set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Definitions at that time.
    pub jobs: Vec<JobDefinition>,
}

/// Fallback store used to keep scheduling when the source is unreachable at
/// startup.
#[async_trait]
pub trait JobConfigurationCache: Send + Sync {
    /// Replace the snapshot with `jobs`.
    async fn save_snapshot(&self, jobs: &[JobDefinition]) -> Result<(), SchedulerError>;

    /// Definitions from the snapshot; empty when there is none or it is unreadable.
    async fn load_snapshot(&self) -> Vec<JobDefinition>;

    /// Whether a readable, non-empty snapshot exists.
    async fn has_valid_snapshot(&self) -> bool;

    /// Timestamp of the snapshot, if any.
    async fn snapshot_timestamp(&self) -> Option<DateTime<Utc>>;
}
