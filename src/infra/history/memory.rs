//! In-memory run history.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::{RunHistory, RunId, RunStatus, SchedulerError};

/// One recorded run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Issued id.
    pub run_id: RunId,
    /// Job name.
    pub job_name: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Completion time, `None` while running.
    pub completed_at: Option<DateTime<Utc>>,
    /// Final status, `None` while running.
    pub status: Option<RunStatus>,
    /// Completion message.
    pub message: Option<String>,
}

/// Run history kept in process memory.
pub struct InMemoryRunHistory {
    next_id: AtomicU64,
    runs: Mutex<Vec<RunRecord>>,
}

impl Default for InMemoryRunHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRunHistory {
    /// Create an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            runs: Mutex::new(Vec::new()),
        }
    }

    /// All runs in start order.
    #[must_use]
    pub fn records(&self) -> Vec<RunRecord> {
        self.runs.lock().clone()
    }

    /// Runs of one job in start order.
    #[must_use]
    pub fn records_for(&self, job_name: &str) -> Vec<RunRecord> {
        self.runs
            .lock()
            .iter()
            .filter(|r| r.job_name == job_name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RunHistory for InMemoryRunHistory {
    async fn start(&self, job_name: &str) -> Result<RunId, SchedulerError> {
        let run_id = RunId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.runs.lock().push(RunRecord {
            run_id,
            job_name: job_name.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            status: None,
            message: None,
        });
        Ok(run_id)
    }

    async fn complete(
        &self,
        run_id: RunId,
        status: RunStatus,
        message: Option<String>,
    ) -> Result<(), SchedulerError> {
        let mut runs = self.runs.lock();
        let record = runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| SchedulerError::Engine(format!("unknown run id {}", run_id.0)))?;
        record.completed_at = Some(Utc::now());
        record.status = Some(status);
        record.message = message;
        Ok(())
    }
}
