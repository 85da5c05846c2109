//! Job actions and the execution unit run at each firing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::collaborators::{RunHistory, RunId, RunStatus};
use super::definition::{non_blank, JobDefinition, JobKey};
use super::notifier::ExecutionNotifier;
use super::process::{ProcessCommand, ProcessExecutor};
use super::throttle::ResourceThrottle;
use super::SchedulerError;

/// Work performed when a registration fires.
///
/// The engine treats an `Err` as a failed firing; it never retries.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_automation_scheduler::core::{JobAction, SchedulerError};
/// use tokio_util::sync::CancellationToken;
///
/// struct Ping;
///
/// #[async_trait]
/// impl JobAction for Ping {
///     async fn execute(&self, _cancel: CancellationToken) -> Result<(), SchedulerError> {
///         tracing::info!("ping");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait JobAction: Send + Sync + 'static {
    /// Run once. `cancel` fires when the engine shuts down.
    async fn execute(&self, cancel: CancellationToken) -> Result<(), SchedulerError>;
}

/// Closed set of job kinds the scheduler can run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// Launch an external program or script.
    ExternalProcess(ProcessCommand),
}

/// One job's execution orchestration: notify, throttle, run, report.
pub struct ExecutionUnit {
    key: JobKey,
    kind: JobKind,
    resource_type: Option<String>,
    throttle: Arc<ResourceThrottle>,
    notifier: Arc<ExecutionNotifier>,
    history: Arc<dyn RunHistory>,
    process: ProcessExecutor,
}

impl std::fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("resource_type", &self.resource_type)
            .finish_non_exhaustive()
    }
}

impl ExecutionUnit {
    /// Engine identity of the job.
    #[must_use]
    pub const fn key(&self) -> &JobKey {
        &self.key
    }

    /// Job name used in notifications.
    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.key.name
    }

    /// What the unit runs.
    #[must_use]
    pub const fn kind(&self) -> &JobKind {
        &self.kind
    }

    /// Throttle pool the unit acquires before running.
    #[must_use]
    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    async fn record_start(&self) -> Option<RunId> {
        match self.history.start(self.job_name()).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(job = self.job_name(), "failed to record run start: {}", e);
                None
            }
        }
    }

    async fn record_complete(&self, run_id: Option<RunId>, status: RunStatus, message: Option<String>) {
        let Some(run_id) = run_id else {
            return;
        };
        if let Err(e) = self.history.complete(run_id, status, message).await {
            tracing::warn!(job = self.job_name(), "failed to record run completion: {}", e);
        }
    }

    async fn run_kind(&self, cancel: &CancellationToken) -> Result<super::process::ProcessOutcome, SchedulerError> {
        match &self.kind {
            JobKind::ExternalProcess(command) => self.process.run(self.job_name(), command, cancel).await,
        }
    }
}

#[async_trait]
impl JobAction for ExecutionUnit {
    async fn execute(&self, cancel: CancellationToken) -> Result<(), SchedulerError> {
        let name = self.job_name();
        let started = Instant::now();
        self.notifier.notify_starting(name);
        let run_id = self.record_start().await;

        let mut lease = match self.throttle.acquire(self.resource_type(), &cancel).await {
            Ok(lease) => lease,
            Err(e) => {
                let message = format!(
                    "could not acquire resource '{}': {e}",
                    self.resource_type().unwrap_or_default()
                );
                self.notifier.notify_failed(name, message.clone());
                self.record_complete(run_id, RunStatus::Failed, Some(message)).await;
                return Err(e);
            }
        };

        self.notifier.notify_running(name);
        let result = self.run_kind(&cancel).await;
        self.throttle.release(&mut lease);
        let elapsed = started.elapsed();

        match result {
            Ok(outcome) => {
                let summary = outcome.summary();
                self.notifier
                    .notify_completed(name, elapsed, outcome.exit_code, summary.clone());
                let status = if outcome.success() {
                    RunStatus::Succeeded
                } else {
                    RunStatus::Failed
                };
                let message = if outcome.success() {
                    summary
                } else {
                    Some(format!("exit code {}", outcome.exit_code))
                };
                self.record_complete(run_id, status, message).await;
                outcome.into_result().map(|_| ())
            }
            Err(SchedulerError::Cancelled) => {
                self.notifier.notify_cancelled(name, elapsed);
                self.record_complete(run_id, RunStatus::Cancelled, None).await;
                Err(SchedulerError::Cancelled)
            }
            Err(e) => {
                self.notifier.notify_failed(name, e.to_string());
                self.record_complete(run_id, RunStatus::Failed, Some(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }
}

/// Builds execution units from definitions, resolving default commands and
/// relative paths against the content root.
#[derive(Clone)]
pub struct ExecutionUnitFactory {
    content_root: PathBuf,
    script_extension: String,
    throttle: Arc<ResourceThrottle>,
    notifier: Arc<ExecutionNotifier>,
    history: Arc<dyn RunHistory>,
}

impl ExecutionUnitFactory {
    /// Create a factory sharing the given throttle, notifier and history.
    pub fn new(
        content_root: impl Into<PathBuf>,
        script_extension: impl Into<String>,
        throttle: Arc<ResourceThrottle>,
        notifier: Arc<ExecutionNotifier>,
        history: Arc<dyn RunHistory>,
    ) -> Self {
        Self {
            content_root: content_root.into(),
            script_extension: script_extension.into(),
            throttle,
            notifier,
            history,
        }
    }

    /// Resolve the process invocation for a definition.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidDefinition`] when neither a command nor an
    /// operation code is set.
    pub fn resolve_command(&self, def: &JobDefinition) -> Result<ProcessCommand, SchedulerError> {
        let command = match non_blank(def.command.as_deref()) {
            Some(command) => self.resolve_program(command),
            None => {
                let op = def.operation_code.trim();
                if op.is_empty() {
                    return Err(SchedulerError::InvalidDefinition {
                        job: def.name.clone(),
                        reason: "no command and no operation code".into(),
                    });
                }
                self.content_root
                    .join("scripts")
                    .join(format!("{op}.{}", self.script_extension))
                    .to_string_lossy()
                    .into_owned()
            }
        };

        let working_directory = non_blank(def.working_directory.as_deref())
            .map_or_else(|| self.content_root.clone(), |wd| self.resolve_path(wd));

        Ok(ProcessCommand {
            command,
            arguments: def.arguments.clone().unwrap_or_default(),
            working_directory,
            show_window: def.show_window,
            environment: def.environment.clone(),
        })
    }

    /// Build the execution unit for a definition.
    ///
    /// # Errors
    ///
    /// Propagates [`ExecutionUnitFactory::resolve_command`] failures.
    pub fn build(&self, def: &JobDefinition) -> Result<ExecutionUnit, SchedulerError> {
        let command = self.resolve_command(def)?;
        Ok(ExecutionUnit {
            key: def.key(),
            kind: JobKind::ExternalProcess(command),
            resource_type: def.resource_type().map(str::to_string),
            throttle: Arc::clone(&self.throttle),
            notifier: Arc::clone(&self.notifier),
            history: Arc::clone(&self.history),
            process: ProcessExecutor::new(),
        })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.content_root.join(path)
        }
    }

    /// Bare program names stay as PATH lookups; anything with a separator is
    /// a path.
    fn resolve_program(&self, command: &str) -> String {
        if command.contains('/') || command.contains('\\') {
            self.resolve_path(command).to_string_lossy().into_owned()
        } else {
            command.to_string()
        }
    }
}
