//! Schedule reconciler: keeps engine registrations in step with the
//! definition source.
//!
//! Each cycle fetches the enabled definitions and compares their signatures
//! with those applied by the previous cycle. Only new or changed jobs are
//! re-registered; identities no longer present are removed. Running
//! executions are never interrupted. A failed cycle forgets the applied
//! signatures, so the next successful one re-registers everything.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::collaborators::{JobConfigurationCache, JobDefinitionSource};
use super::definition::{schedule_signature, signature_map, JobDefinition, JobKey};
use super::engine::FireEngine;
use super::executor::ExecutionUnitFactory;
use super::trigger::fire_rule_for;
use super::SchedulerError;

/// Result of one reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleOutcome {
    /// Registrations were updated.
    Reconciled {
        /// Jobs registered or replaced.
        registered: usize,
        /// Obsolete identities removed.
        removed: usize,
        /// Jobs skipped because they could not be registered.
        skipped: usize,
    },
    /// Signatures matched the previous cycle; nothing touched.
    Unchanged,
    /// The source returned no enabled jobs.
    Empty,
    /// The cycle failed; the engine was put in standby.
    Failed(String),
}

impl CycleOutcome {
    /// Whether the cycle failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Polls the source and applies changes to the engine.
pub struct ScheduleReconciler {
    source: Arc<dyn JobDefinitionSource>,
    engine: Arc<dyn FireEngine>,
    factory: ExecutionUnitFactory,
    cache: Option<Arc<dyn JobConfigurationCache>>,
    signatures: Mutex<Option<HashMap<i64, String>>>,
    poll_interval: Duration,
    retry_interval: Duration,
}

impl ScheduleReconciler {
    /// Create a reconciler.
    pub fn new(
        source: Arc<dyn JobDefinitionSource>,
        engine: Arc<dyn FireEngine>,
        factory: ExecutionUnitFactory,
        poll_interval: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            source,
            engine,
            factory,
            cache: None,
            signatures: Mutex::new(None),
            poll_interval,
            retry_interval,
        }
    }

    /// Save a snapshot after every successful non-empty fetch.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn JobConfigurationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Signatures applied by the last successful cycle.
    #[must_use]
    pub fn applied_signatures(&self) -> Option<HashMap<i64, String>> {
        self.signatures.lock().clone()
    }

    /// Delay before the cycle following `outcome`.
    #[must_use]
    pub const fn next_delay(&self, outcome: &CycleOutcome) -> Duration {
        if outcome.is_failed() {
            self.retry_interval
        } else {
            self.poll_interval
        }
    }

    /// Run one cycle. Never returns an error: failures are logged, the engine
    /// is put in standby and the outcome is [`CycleOutcome::Failed`].
    pub async fn run_cycle(&self) -> CycleOutcome {
        match self.try_cycle().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("reconciliation cycle failed: {}", e);
                *self.signatures.lock() = None;
                if let Err(se) = self.engine.standby().await {
                    tracing::warn!("could not put fire engine in standby: {}", se);
                }
                CycleOutcome::Failed(e.to_string())
            }
        }
    }

    /// Run cycles until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        self.run_after(Duration::ZERO, cancel).await;
    }

    /// Wait `initial_delay`, then run cycles until `cancel` fires.
    pub async fn run_after(&self, initial_delay: Duration, cancel: CancellationToken) {
        let mut delay = initial_delay;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
            let outcome = self.run_cycle().await;
            delay = self.next_delay(&outcome);
            tracing::debug!("next reconciliation in {}s", delay.as_secs());
        }
        tracing::info!("reconciliation loop stopped");
    }

    /// Register the cached snapshot without touching the applied signatures,
    /// so the next successful cycle re-registers everything. Returns the
    /// number of registered jobs.
    pub async fn seed_from_cache(&self) -> usize {
        let Some(cache) = &self.cache else {
            return 0;
        };
        if !cache.has_valid_snapshot().await {
            tracing::warn!("no usable configuration snapshot to start from");
            return 0;
        }
        let defs = cache.load_snapshot().await;
        let mut registered = 0;
        for def in &defs {
            match self.register(def).await {
                Ok(()) => registered += 1,
                Err(e) => tracing::warn!("skipping cached job {}: {}", def.key(), e),
            }
        }
        if let Err(e) = self.engine.start().await {
            tracing::error!("could not start fire engine after seeding: {}", e);
        }
        tracing::warn!("started from configuration snapshot with {} job(s)", registered);
        registered
    }

    async fn try_cycle(&self) -> Result<CycleOutcome, SchedulerError> {
        let defs = self.source.load_enabled().await?;
        if defs.is_empty() {
            tracing::info!("no enabled jobs found");
            *self.signatures.lock() = None;
            self.ensure_running().await?;
            return Ok(CycleOutcome::Empty);
        }

        self.save_snapshot(&defs).await;

        let mut current = signature_map(&defs);
        let previous = self.signatures.lock().clone();
        if previous.as_ref() == Some(&current) {
            self.ensure_running().await?;
            return Ok(CycleOutcome::Unchanged);
        }

        let (outcome, failed) = self.apply(&defs, previous.as_ref()).await?;
        // unapplied jobs stay out of the map so the next cycle retries them
        for job_id in failed {
            current.remove(&job_id);
        }
        *self.signatures.lock() = Some(current);
        self.ensure_running().await?;
        Ok(outcome)
    }

    /// Remove obsolete registrations and register new or changed jobs.
    /// Returns the outcome and the ids of jobs that could not be registered.
    async fn apply(
        &self,
        defs: &[JobDefinition],
        previous: Option<&HashMap<i64, String>>,
    ) -> Result<(CycleOutcome, Vec<i64>), SchedulerError> {
        let current: HashSet<JobKey> = defs.iter().map(JobDefinition::key).collect();
        let mut removed = 0;
        for key in self.engine.job_keys().await? {
            if current.contains(&key) {
                continue;
            }
            match self.engine.unschedule(&key).await {
                Ok(true) => {
                    tracing::info!("removed obsolete job {}", key);
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("could not remove obsolete job {}: {}", key, e),
            }
        }

        let mut registered = 0;
        let mut failed = Vec::new();
        for def in defs {
            let changed = previous.is_none_or(|p| p.get(&def.job_id) != Some(&schedule_signature(def)));
            if !changed {
                continue;
            }
            match self.register(def).await {
                Ok(()) => registered += 1,
                Err(e) => {
                    tracing::warn!("skipping job {}: {}", def.key(), e);
                    failed.push(def.job_id);
                }
            }
        }

        let skipped = failed.len();
        tracing::info!(
            "reconciled {} job(s): {} registered, {} removed, {} skipped",
            defs.len(),
            registered,
            removed,
            skipped
        );
        Ok((
            CycleOutcome::Reconciled {
                registered,
                removed,
                skipped,
            },
            failed,
        ))
    }

    async fn register(&self, def: &JobDefinition) -> Result<(), SchedulerError> {
        let unit = self.factory.build(def)?;
        let rule = fire_rule_for(def, &Local::now());
        self.engine.schedule(def.key(), rule, Arc::new(unit)).await
    }

    async fn ensure_running(&self) -> Result<(), SchedulerError> {
        if !self.engine.is_running() {
            self.engine.start().await?;
        }
        Ok(())
    }

    async fn save_snapshot(&self, defs: &[JobDefinition]) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.save_snapshot(defs).await {
                tracing::warn!("could not save configuration snapshot: {}", e);
            }
        }
    }
}
