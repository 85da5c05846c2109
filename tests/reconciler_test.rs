//! Integration tests for schedule reconciliation
//!
//! These tests drive the reconciler against a recording engine and validate:
//! - Idempotent cycles when nothing changed
//! - Removal of obsolete identities
//! - Re-registration of exactly the changed jobs
//! - Degraded behavior when the definition source fails
//! - Seeding from the configuration snapshot

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveTime;
use parking_lot::Mutex;
use prometheus_automation_scheduler::config::{CacheConfig, ResourceLimitsConfig};
use prometheus_automation_scheduler::core::{
    CycleOutcome, ExecutionNotifier, ExecutionUnitFactory, FireEngine, FireRule, JobAction,
    JobConfigurationCache, JobDefinition, JobKey, NoopRunHistory, ResourceThrottle,
    ScheduleReconciler, SchedulerError,
};
use prometheus_automation_scheduler::infra::{
    FileSystemJobConfigurationCache, InMemoryDefinitionSource,
};

// ============================================================================
// RECORDING ENGINE
// ============================================================================

#[derive(Default)]
struct RecordingEngine {
    jobs: Mutex<HashMap<JobKey, FireRule>>,
    scheduled: Mutex<Vec<JobKey>>,
    unscheduled: Mutex<Vec<JobKey>>,
    running: Mutex<bool>,
    standby_calls: Mutex<usize>,
    failing_schedules: Mutex<usize>,
}

impl RecordingEngine {
    fn take_scheduled(&self) -> Vec<JobKey> {
        std::mem::take(&mut *self.scheduled.lock())
    }

    fn take_unscheduled(&self) -> Vec<JobKey> {
        std::mem::take(&mut *self.unscheduled.lock())
    }

    fn rule(&self, key: &JobKey) -> Option<FireRule> {
        self.jobs.lock().get(key).cloned()
    }

    fn fail_next_schedules(&self, count: usize) {
        *self.failing_schedules.lock() = count;
    }

    fn keys(&self) -> Vec<JobKey> {
        let mut keys: Vec<JobKey> = self.jobs.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl FireEngine for RecordingEngine {
    async fn start(&self) -> Result<(), SchedulerError> {
        *self.running.lock() = true;
        Ok(())
    }

    async fn standby(&self) -> Result<(), SchedulerError> {
        *self.running.lock() = false;
        *self.standby_calls.lock() += 1;
        Ok(())
    }

    fn is_running(&self) -> bool {
        *self.running.lock()
    }

    async fn schedule(
        &self,
        key: JobKey,
        rule: FireRule,
        _action: Arc<dyn JobAction>,
    ) -> Result<(), SchedulerError> {
        {
            let mut failing = self.failing_schedules.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(SchedulerError::Engine("registration rejected".into()));
            }
        }
        self.scheduled.lock().push(key.clone());
        self.jobs.lock().insert(key, rule);
        Ok(())
    }

    async fn unschedule(&self, key: &JobKey) -> Result<bool, SchedulerError> {
        self.unscheduled.lock().push(key.clone());
        Ok(self.jobs.lock().remove(key).is_some())
    }

    async fn job_keys(&self) -> Result<Vec<JobKey>, SchedulerError> {
        Ok(self.jobs.lock().keys().cloned().collect())
    }

    async fn shutdown(&self) -> Result<(), SchedulerError> {
        Ok(())
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn factory() -> ExecutionUnitFactory {
    ExecutionUnitFactory::new(
        ".",
        "sh",
        Arc::new(ResourceThrottle::new(ResourceLimitsConfig::default())),
        Arc::new(ExecutionNotifier::default()),
        Arc::new(NoopRunHistory),
    )
}

fn setup(defs: Vec<JobDefinition>) -> (Arc<InMemoryDefinitionSource>, Arc<RecordingEngine>, ScheduleReconciler) {
    let source = Arc::new(InMemoryDefinitionSource::new(defs));
    let engine = Arc::new(RecordingEngine::default());
    let reconciler = ScheduleReconciler::new(
        Arc::clone(&source) as _,
        Arc::clone(&engine) as _,
        factory(),
        Duration::from_secs(60),
        Duration::from_secs(30),
    );
    (source, engine, reconciler)
}

fn job(id: i64, name: &str) -> JobDefinition {
    JobDefinition::new(id, name, name.to_uppercase())
        .with_command("run.sh")
        .with_arguments("--a")
        .every_minutes(10)
}

fn temp_cache() -> (std::path::PathBuf, Arc<FileSystemJobConfigurationCache>) {
    let dir = std::env::temp_dir().join(format!("reconciler-cache-{}", uuid::Uuid::new_v4()));
    let cache = Arc::new(FileSystemJobConfigurationCache::new(
        dir.join("cache.json"),
        &CacheConfig::default(),
    ));
    (dir, cache)
}

// ============================================================================
// RECONCILIATION
// ============================================================================

#[tokio::test]
async fn test_second_cycle_without_changes_is_a_no_op() {
    let (_source, engine, reconciler) = setup(vec![job(1, "alpha"), job(2, "beta")]);

    let first = reconciler.run_cycle().await;
    assert_eq!(
        first,
        CycleOutcome::Reconciled {
            registered: 2,
            removed: 0,
            skipped: 0
        }
    );
    assert!(engine.is_running());
    assert_eq!(engine.take_scheduled().len(), 2);

    let second = reconciler.run_cycle().await;
    assert_eq!(second, CycleOutcome::Unchanged);
    assert!(engine.take_scheduled().is_empty());
    assert!(engine.take_unscheduled().is_empty());
    assert_eq!(reconciler.next_delay(&second), Duration::from_secs(60));
}

#[tokio::test]
async fn test_disabled_job_is_removed() {
    let (source, engine, reconciler) = setup(vec![job(1, "alpha"), job(2, "beta")]);
    reconciler.run_cycle().await;
    engine.take_scheduled();

    assert!(source.remove(2));
    let outcome = reconciler.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Reconciled {
            registered: 0,
            removed: 1,
            skipped: 0
        }
    );
    assert_eq!(engine.take_unscheduled(), vec![JobKey::new(2, "beta")]);
    assert_eq!(engine.keys(), vec![JobKey::new(1, "alpha")]);
    assert!(engine.take_scheduled().is_empty());
}

#[tokio::test]
async fn test_arguments_change_replaces_only_that_job() {
    let (source, engine, reconciler) = setup(vec![job(7, "sync"), job(8, "report")]);
    reconciler.run_cycle().await;
    engine.take_scheduled();

    source.upsert(job(7, "sync").with_arguments("--b"));
    let outcome = reconciler.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Reconciled {
            registered: 1,
            removed: 0,
            skipped: 0
        }
    );
    assert_eq!(engine.take_scheduled(), vec![JobKey::new(7, "sync")]);
    assert!(engine.take_unscheduled().is_empty());
}

#[tokio::test]
async fn test_failed_registration_is_retried_next_cycle() {
    let (source, engine, reconciler) = setup(vec![job(7, "sync"), job(8, "report")]);
    reconciler.run_cycle().await;
    engine.take_scheduled();

    source.upsert(job(7, "sync").with_arguments("--b"));
    engine.fail_next_schedules(1);
    assert_eq!(
        reconciler.run_cycle().await,
        CycleOutcome::Reconciled {
            registered: 0,
            removed: 0,
            skipped: 1
        }
    );
    assert!(engine.take_scheduled().is_empty());
    assert!(!reconciler.applied_signatures().unwrap().contains_key(&7));

    assert_eq!(
        reconciler.run_cycle().await,
        CycleOutcome::Reconciled {
            registered: 1,
            removed: 0,
            skipped: 0
        }
    );
    assert_eq!(engine.take_scheduled(), vec![JobKey::new(7, "sync")]);
    assert_eq!(reconciler.run_cycle().await, CycleOutcome::Unchanged);
}

#[tokio::test]
async fn test_rename_replaces_identity() {
    let (source, engine, reconciler) = setup(vec![job(1, "alpha")]);
    reconciler.run_cycle().await;
    engine.take_scheduled();

    source.upsert(job(1, "alpha-renamed"));
    reconciler.run_cycle().await;
    assert_eq!(engine.take_unscheduled(), vec![JobKey::new(1, "alpha")]);
    assert_eq!(engine.take_scheduled(), vec![JobKey::new(1, "alpha-renamed")]);
    assert_eq!(engine.keys(), vec![JobKey::new(1, "alpha-renamed")]);
}

#[tokio::test]
async fn test_source_failure_enters_standby_and_retries_sooner() {
    let (source, engine, reconciler) = setup(vec![job(1, "alpha"), job(2, "beta")]);
    reconciler.run_cycle().await;
    engine.take_scheduled();

    source.fail_with("connection refused");
    let failed = reconciler.run_cycle().await;
    assert!(failed.is_failed());
    assert!(!engine.is_running());
    assert_eq!(*engine.standby_calls.lock(), 1);
    assert_eq!(reconciler.next_delay(&failed), Duration::from_secs(30));
    assert!(reconciler.applied_signatures().is_none());
    // existing registrations survive the outage
    assert_eq!(engine.keys().len(), 2);

    source.recover();
    let recovered = reconciler.run_cycle().await;
    assert_eq!(
        recovered,
        CycleOutcome::Reconciled {
            registered: 2,
            removed: 0,
            skipped: 0
        }
    );
    assert!(engine.is_running());
    assert_eq!(engine.take_scheduled().len(), 2);
}

#[tokio::test]
async fn test_empty_fetch_clears_signatures() {
    let (source, engine, reconciler) = setup(vec![job(1, "alpha")]);
    reconciler.run_cycle().await;
    assert!(reconciler.applied_signatures().is_some());

    source.set_definitions(Vec::new());
    assert_eq!(reconciler.run_cycle().await, CycleOutcome::Empty);
    assert!(reconciler.applied_signatures().is_none());
    assert!(engine.is_running());
    // reconciliation skipped, nothing removed
    assert_eq!(engine.keys(), vec![JobKey::new(1, "alpha")]);
}

#[tokio::test]
async fn test_invalid_job_is_skipped() {
    let broken = JobDefinition::new(3, "broken", " ");
    let (_source, engine, reconciler) = setup(vec![job(1, "alpha"), broken]);
    let outcome = reconciler.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Reconciled {
            registered: 1,
            removed: 0,
            skipped: 1
        }
    );
    assert_eq!(engine.keys(), vec![JobKey::new(1, "alpha")]);
}

#[tokio::test]
async fn test_registered_rules_follow_schedule_fields() {
    let at = NaiveTime::from_hms_opt(5, 0, 0).unwrap();
    let (_source, engine, reconciler) = setup(vec![
        JobDefinition::new(1, "every5", "E5").with_command("run.sh").every_minutes(5),
        JobDefinition::new(2, "weekdays", "WD").with_command("run.sh").weekly_at(at, 0),
    ]);
    reconciler.run_cycle().await;

    assert_eq!(
        engine.rule(&JobKey::new(1, "every5")),
        Some(FireRule::Interval {
            every: Duration::from_secs(300)
        })
    );
    assert_eq!(
        engine.rule(&JobKey::new(2, "weekdays")),
        Some(FireRule::Weekly {
            at,
            days: 0b0011_1110
        })
    );
}

// ============================================================================
// CONFIGURATION SNAPSHOT
// ============================================================================

#[tokio::test]
async fn test_snapshot_saved_and_used_to_seed() {
    let (dir, cache) = temp_cache();
    let (_source, _engine, reconciler) = setup(vec![job(1, "alpha"), job(2, "beta")]);
    let reconciler = reconciler.with_cache(Arc::clone(&cache) as _);
    reconciler.run_cycle().await;
    assert!(cache.has_valid_snapshot().await);

    let (down_source, down_engine, degraded) = setup(Vec::new());
    let degraded = degraded.with_cache(Arc::clone(&cache) as _);
    down_source.fail_with("database offline");
    assert!(degraded.run_cycle().await.is_failed());
    assert!(!down_engine.is_running());

    assert_eq!(degraded.seed_from_cache().await, 2);
    assert!(down_engine.is_running());
    assert_eq!(
        down_engine.keys(),
        vec![JobKey::new(1, "alpha"), JobKey::new(2, "beta")]
    );
    assert!(degraded.applied_signatures().is_none());

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_seed_without_snapshot_registers_nothing() {
    let (dir, cache) = temp_cache();
    let (_source, engine, reconciler) = setup(Vec::new());
    let reconciler = reconciler.with_cache(cache as _);
    assert_eq!(reconciler.seed_from_cache().await, 0);
    assert!(engine.keys().is_empty());
    let _ = std::fs::remove_dir_all(dir);
}
