//! In-memory definition source for development and testing.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::core::{JobDefinition, JobDefinitionSource, SchedulerError};

/// Mutable definition set served as the enabled snapshot.
///
/// The source can be switched into a failing state to simulate an outage.
#[derive(Default)]
pub struct InMemoryDefinitionSource {
    definitions: RwLock<Vec<JobDefinition>>,
    failure: RwLock<Option<String>>,
    loads: AtomicUsize,
}

impl InMemoryDefinitionSource {
    /// Create a source serving `definitions`.
    #[must_use]
    pub fn new(definitions: Vec<JobDefinition>) -> Self {
        Self {
            definitions: RwLock::new(definitions),
            ..Self::default()
        }
    }

    /// Replace the whole set.
    pub fn set_definitions(&self, definitions: Vec<JobDefinition>) {
        *self.definitions.write() = definitions;
    }

    /// Insert or replace the definition with the same `job_id`.
    pub fn upsert(&self, definition: JobDefinition) {
        let mut definitions = self.definitions.write();
        match definitions.iter_mut().find(|d| d.job_id == definition.job_id) {
            Some(existing) => *existing = definition,
            None => definitions.push(definition),
        }
    }

    /// Remove the definition with `job_id`. Returns whether it existed.
    pub fn remove(&self, job_id: i64) -> bool {
        let mut definitions = self.definitions.write();
        let before = definitions.len();
        definitions.retain(|d| d.job_id != job_id);
        definitions.len() != before
    }

    /// Make every subsequent load fail with `message`.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    /// Clear a simulated outage.
    pub fn recover(&self) {
        *self.failure.write() = None;
    }

    /// Number of load attempts so far.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl JobDefinitionSource for InMemoryDefinitionSource {
    async fn load_enabled(&self) -> Result<Vec<JobDefinition>, SchedulerError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        let failure = self.failure.read().clone();
        if let Some(message) = failure {
            return Err(SchedulerError::SourceUnavailable(message));
        }
        Ok(self.definitions.read().clone())
    }
}
