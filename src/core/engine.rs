//! Fire-time engine: turns registered fire rules into executions.
//!
//! Each registration owns a timer task. When a firing is due the timer waits
//! for the engine to be running, takes the identity's execution lock and hands
//! the firing to a worker bounded by `max_concurrency`. The execution lock is
//! kept per identity across replacement, so a re-registered job never runs
//! concurrently with the execution started by its previous registration.
//! Firings missed while the lock was held or the engine was in standby are
//! coalesced into one. Dispatched executions are tracked so that shutdown
//! returns only after every in-flight execution has reported its outcome.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, OwnedMutexGuard, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::definition::JobKey;
use super::executor::JobAction;
use super::trigger::FireRule;
use super::SchedulerError;
use crate::util::clock;

/// Abstraction for spawning tasks on a runtime.
pub trait Spawn {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Registry and lifecycle of scheduled jobs.
#[async_trait]
pub trait FireEngine: Send + Sync {
    /// Start (or resume from standby) firing.
    async fn start(&self) -> Result<(), SchedulerError>;

    /// Hold firings until started again. Running executions continue.
    async fn standby(&self) -> Result<(), SchedulerError>;

    /// Whether firings are being dispatched.
    fn is_running(&self) -> bool;

    /// Register `action` under `key`, replacing any existing registration.
    async fn schedule(
        &self,
        key: JobKey,
        rule: FireRule,
        action: Arc<dyn JobAction>,
    ) -> Result<(), SchedulerError>;

    /// Remove a registration. Running executions are not interrupted.
    async fn unschedule(&self, key: &JobKey) -> Result<bool, SchedulerError>;

    /// Identities currently registered.
    async fn job_keys(&self) -> Result<Vec<JobKey>, SchedulerError>;

    /// Stop timers, cancel in-flight executions and wait for them to finish.
    /// Terminal.
    async fn shutdown(&self) -> Result<(), SchedulerError>;
}

/// Outcome of one dispatched firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireRecord {
    /// Unique id of the firing.
    pub fire_id: Uuid,
    /// Identity that fired.
    pub key: JobKey,
    /// When the firing was due.
    pub scheduled_for: DateTime<Utc>,
    /// When the action started.
    pub started_at: DateTime<Utc>,
    /// When the action returned.
    pub finished_at: DateTime<Utc>,
    /// Error text for failed firings.
    pub error: Option<String>,
}

impl FireRecord {
    /// Whether the action returned `Ok`.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Snapshot of one registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredJob {
    /// Identity.
    pub key: JobKey,
    /// Human-readable rule.
    pub rule: String,
    /// Next due instant, `None` once exhausted.
    pub next_fire: Option<DateTime<Utc>>,
}

struct Registration {
    generation: u64,
    rule: FireRule,
    cancel: CancellationToken,
    next_fire: Arc<Mutex<Option<DateTime<Utc>>>>,
}

struct EngineState {
    running: watch::Sender<bool>,
    shutdown: CancellationToken,
    workers: Arc<Semaphore>,
    max_concurrency: usize,
    registrations: Mutex<HashMap<JobKey, Registration>>,
    execution_locks: Mutex<HashMap<JobKey, Arc<tokio::sync::Mutex<()>>>>,
    fires: Mutex<VecDeque<FireRecord>>,
    fire_capacity: usize,
    generation: AtomicU64,
    executions: TaskTracker,
}

impl EngineState {
    fn execution_lock(&self, key: &JobKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.execution_locks
                .lock()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Drop the lock entry of an identity that is neither registered nor executing.
    fn prune_lock(&self, key: &JobKey) {
        let mut locks = self.execution_locks.lock();
        if let Some(lock) = locks.get(key) {
            if Arc::strong_count(lock) == 1 && !self.registrations.lock().contains_key(key) {
                locks.remove(key);
            }
        }
    }

    /// Wait until the engine is running. Returns `false` if `cancel` fires first.
    async fn wait_running(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.running.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return true;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    fn record(&self, record: FireRecord) {
        let mut fires = self.fires.lock();
        while fires.len() >= self.fire_capacity {
            fires.pop_front();
        }
        fires.push_back(record);
    }

    /// Remove the registration if it still belongs to `generation`.
    fn retire(&self, key: &JobKey, generation: u64) {
        let mut registrations = self.registrations.lock();
        if registrations
            .get(key)
            .is_some_and(|r| r.generation == generation)
        {
            registrations.remove(key);
        }
    }
}

/// Tokio implementation of [`FireEngine`].
pub struct TokioFireEngine<S> {
    state: Arc<EngineState>,
    spawner: S,
}

impl<S> TokioFireEngine<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    /// Create an engine in standby.
    #[must_use]
    pub fn new(max_concurrency: usize, fire_history_capacity: usize, spawner: S) -> Self {
        let max_concurrency = max_concurrency.max(1);
        let (running, _) = watch::channel(false);
        Self {
            state: Arc::new(EngineState {
                running,
                shutdown: CancellationToken::new(),
                workers: Arc::new(Semaphore::new(max_concurrency)),
                max_concurrency,
                registrations: Mutex::new(HashMap::new()),
                execution_locks: Mutex::new(HashMap::new()),
                fires: Mutex::new(VecDeque::with_capacity(fire_history_capacity.max(1))),
                fire_capacity: fire_history_capacity.max(1),
                generation: AtomicU64::new(1),
                executions: TaskTracker::new(),
            }),
            spawner,
        }
    }

    /// Worker pool size.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.state.max_concurrency
    }

    /// Firings currently holding a worker.
    #[must_use]
    pub fn active_executions(&self) -> usize {
        self.state.max_concurrency - self.state.workers.available_permits()
    }

    /// Whether the engine has been shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.shutdown.is_cancelled()
    }

    /// Registrations sorted by identity.
    #[must_use]
    pub fn registrations(&self) -> Vec<RegisteredJob> {
        let mut jobs: Vec<RegisteredJob> = self
            .state
            .registrations
            .lock()
            .iter()
            .map(|(key, reg)| RegisteredJob {
                key: key.clone(),
                rule: reg.rule.to_string(),
                next_fire: *reg.next_fire.lock(),
            })
            .collect();
        jobs.sort_by(|a, b| a.key.cmp(&b.key));
        jobs
    }

    /// Up to `count` most recent fire records, newest first.
    #[must_use]
    pub fn recent_fires(&self, count: usize) -> Vec<FireRecord> {
        self.state
            .fires
            .lock()
            .iter()
            .rev()
            .take(count)
            .cloned()
            .collect()
    }

    fn ensure_open(&self) -> Result<(), SchedulerError> {
        if self.is_shutdown() {
            Err(SchedulerError::Engine("engine has been shut down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S> FireEngine for TokioFireEngine<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    async fn start(&self) -> Result<(), SchedulerError> {
        self.ensure_open()?;
        if !self.state.running.send_replace(true) {
            tracing::info!("fire engine started");
        }
        Ok(())
    }

    async fn standby(&self) -> Result<(), SchedulerError> {
        self.ensure_open()?;
        if self.state.running.send_replace(false) {
            tracing::warn!("fire engine in standby");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        *self.state.running.borrow() && !self.is_shutdown()
    }

    async fn schedule(
        &self,
        key: JobKey,
        rule: FireRule,
        action: Arc<dyn JobAction>,
    ) -> Result<(), SchedulerError> {
        self.ensure_open()?;
        let generation = self.state.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.state.shutdown.child_token();
        let next_fire = Arc::new(Mutex::new(rule.first_fire(&Local::now())));

        let previous = self.state.registrations.lock().insert(
            key.clone(),
            Registration {
                generation,
                rule: rule.clone(),
                cancel: cancel.clone(),
                next_fire: Arc::clone(&next_fire),
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
            tracing::info!("replaced registration {} ({})", key, rule);
        } else {
            tracing::info!("registered {} ({})", key, rule);
        }

        let timer = Timer {
            state: Arc::clone(&self.state),
            spawner: self.spawner.clone(),
            key,
            rule,
            action,
            cancel,
            next_fire,
            generation,
        };
        self.spawner.spawn(timer.run());
        Ok(())
    }

    async fn unschedule(&self, key: &JobKey) -> Result<bool, SchedulerError> {
        let removed = self.state.registrations.lock().remove(key);
        let Some(registration) = removed else {
            return Ok(false);
        };
        registration.cancel.cancel();
        self.state.prune_lock(key);
        tracing::info!("unregistered {}", key);
        Ok(true)
    }

    async fn job_keys(&self) -> Result<Vec<JobKey>, SchedulerError> {
        Ok(self.state.registrations.lock().keys().cloned().collect())
    }

    async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.state.running.send_replace(false);
        self.state.shutdown.cancel();
        self.state.registrations.lock().clear();
        self.state.executions.close();
        let in_flight = self.state.executions.len();
        if in_flight > 0 {
            tracing::info!("waiting for {} in-flight execution(s)", in_flight);
        }
        self.state.executions.wait().await;
        tracing::info!("fire engine shut down");
        Ok(())
    }
}

/// Timer task of one registration.
struct Timer<S> {
    state: Arc<EngineState>,
    spawner: S,
    key: JobKey,
    rule: FireRule,
    action: Arc<dyn JobAction>,
    cancel: CancellationToken,
    next_fire: Arc<Mutex<Option<DateTime<Utc>>>>,
    generation: u64,
}

impl<S> Timer<S>
where
    S: Spawn + Clone + Send + Sync + 'static,
{
    async fn run(self) {
        let mut next = *self.next_fire.lock();
        while let Some(due) = next {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(clock::until(due)) => {}
            }
            if !self.state.wait_running(&self.cancel).await {
                return;
            }

            let lock = self.state.execution_lock(&self.key);
            let guard = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                guard = lock.lock_owned() => guard,
            };
            self.dispatch(due, guard);

            next = self.following(due);
            *self.next_fire.lock() = next;
        }
        tracing::debug!("{} has no further firings", self.key);
        self.state.retire(&self.key, self.generation);
        self.state.prune_lock(&self.key);
    }

    /// Next due instant after `due`, skipping instants already in the past.
    fn following(&self, due: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        let mut last = due;
        let mut next = self.rule.next_after(&due.with_timezone(&Local));
        let mut skipped = 0u32;
        while let Some(candidate) = next {
            if candidate >= now {
                break;
            }
            if candidate <= last {
                // non-advancing rule
                next = Some(now);
                break;
            }
            skipped += 1;
            last = candidate;
            next = self.rule.next_after(&candidate.with_timezone(&Local));
        }
        if skipped > 0 {
            tracing::warn!("{} skipped {} missed firing(s)", self.key, skipped);
        }
        next
    }

    fn dispatch(&self, scheduled_for: DateTime<Utc>, guard: OwnedMutexGuard<()>) {
        let state = Arc::clone(&self.state);
        let key = self.key.clone();
        let action = Arc::clone(&self.action);
        let fire_id = Uuid::new_v4();
        let execution = async move {
            let shutdown = state.shutdown.clone();
            let _permit = tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                permit = Arc::clone(&state.workers).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            tracing::debug!(fire = %fire_id, "firing {}", key);
            let started_at = Utc::now();
            let result = action.execute(shutdown.child_token()).await;
            drop(guard);
            state.prune_lock(&key);
            if let Err(e) = &result {
                tracing::warn!(fire = %fire_id, "execution of {} failed: {}", key, e);
            }
            state.record(FireRecord {
                fire_id,
                key,
                scheduled_for,
                started_at,
                finished_at: Utc::now(),
                error: result.err().map(|e| e.to_string()),
            });
        };
        self.spawner.spawn(self.state.executions.track_future(execution));
    }
}
