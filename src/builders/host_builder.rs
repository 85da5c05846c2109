//! Builder assembling the automation host from configuration.

use std::sync::Arc;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::core::{
    AppResult, CycleOutcome, ExecutionNotifier, ExecutionUnitFactory, FireEngine,
    JobConfigurationCache, JobDefinitionSource, NoopRunHistory, ResourceThrottle, RunHistory,
    ScheduleReconciler, SchedulerError, TokioFireEngine,
};
use crate::infra::FileSystemJobConfigurationCache;
use crate::runtime::TokioSpawner;

/// Running scheduler: throttle, notifier, engine and reconciliation loop.
pub struct AutomationHost {
    config: SchedulerConfig,
    throttle: Arc<ResourceThrottle>,
    notifier: Arc<ExecutionNotifier>,
    engine: Arc<TokioFireEngine<TokioSpawner>>,
    reconciler: Arc<ScheduleReconciler>,
    cancel: CancellationToken,
    reconcile_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Build a host from configuration.
///
/// `history` defaults to a no-op history. `cache` defaults to the file cache
/// at [`SchedulerConfig::cache_path`] when the cache is enabled.
///
/// # Errors
///
/// [`SchedulerError::Config`] for invalid configuration, and
/// [`SchedulerError::Engine`] when called outside a tokio runtime.
pub fn build_host(
    cfg: &SchedulerConfig,
    source: Arc<dyn JobDefinitionSource>,
    history: Option<Arc<dyn RunHistory>>,
    cache: Option<Arc<dyn JobConfigurationCache>>,
) -> Result<AutomationHost, SchedulerError> {
    cfg.validate().map_err(SchedulerError::Config)?;

    let throttle = Arc::new(ResourceThrottle::new(cfg.resource_limits.clone()));
    let notifier = Arc::new(ExecutionNotifier::new(cfg.notification_capacity));
    let history = history.unwrap_or_else(|| Arc::new(NoopRunHistory));
    let engine = Arc::new(TokioFireEngine::new(
        cfg.max_concurrency,
        cfg.fire_history_capacity,
        TokioSpawner::try_current()?,
    ));

    let cache = cache.or_else(|| {
        cfg.cache.enabled.then(|| {
            Arc::new(FileSystemJobConfigurationCache::new(cfg.cache_path(), &cfg.cache))
                as Arc<dyn JobConfigurationCache>
        })
    });

    let factory = ExecutionUnitFactory::new(
        cfg.content_root.clone(),
        cfg.script_extension.clone(),
        Arc::clone(&throttle),
        Arc::clone(&notifier),
        history,
    );
    let mut reconciler = ScheduleReconciler::new(
        source,
        Arc::clone(&engine) as Arc<dyn FireEngine>,
        factory,
        cfg.poll_interval(),
        cfg.retry_interval(),
    );
    if let Some(cache) = cache {
        reconciler = reconciler.with_cache(cache);
    }

    Ok(AutomationHost {
        config: cfg.clone(),
        throttle,
        notifier,
        engine,
        reconciler: Arc::new(reconciler),
        cancel: CancellationToken::new(),
        reconcile_loop: Mutex::new(None),
    })
}

impl AutomationHost {
    /// Start the engine, run the first cycle and spawn the reconciliation loop.
    ///
    /// If the first cycle fails, the engine is seeded from the configuration
    /// snapshot when one exists.
    ///
    /// # Errors
    ///
    /// Fails only when the fire engine cannot start.
    pub async fn start(&self) -> AppResult<CycleOutcome> {
        self.engine
            .start()
            .await
            .context("fire engine failed to start")?;

        let outcome = self.reconciler.run_cycle().await;
        if outcome.is_failed() {
            let seeded = self.reconciler.seed_from_cache().await;
            if seeded == 0 {
                tracing::warn!("definition source unavailable at startup and no snapshot to fall back on");
            }
        }

        let reconciler = Arc::clone(&self.reconciler);
        let cancel = self.cancel.clone();
        let delay = reconciler.next_delay(&outcome);
        let handle = tokio::spawn(async move { reconciler.run_after(delay, cancel).await });
        if let Some(previous) = self.reconcile_loop.lock().replace(handle) {
            previous.abort();
        }
        tracing::info!("automation host started");
        Ok(outcome)
    }

    /// Stop the reconciliation loop and shut down the engine, cancelling
    /// in-flight executions.
    ///
    /// # Errors
    ///
    /// Propagates engine shutdown failures.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.cancel.cancel();
        let handle = self.reconcile_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("reconciliation loop ended abnormally: {}", e);
            }
        }
        self.engine
            .shutdown()
            .await
            .context("fire engine failed to shut down")?;
        tracing::info!("automation host stopped");
        Ok(())
    }

    /// Configuration the host was built with.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Shared resource throttle.
    #[must_use]
    pub const fn throttle(&self) -> &Arc<ResourceThrottle> {
        &self.throttle
    }

    /// Shared execution notifier.
    #[must_use]
    pub const fn notifier(&self) -> &Arc<ExecutionNotifier> {
        &self.notifier
    }

    /// Fire engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<TokioFireEngine<TokioSpawner>> {
        &self.engine
    }

    /// Schedule reconciler.
    #[must_use]
    pub const fn reconciler(&self) -> &Arc<ScheduleReconciler> {
        &self.reconciler
    }
}
