//! Core scheduling abstractions: definitions, fire rules, throttling,
//! execution and reconciliation.

pub mod collaborators;
pub mod definition;
pub mod engine;
pub mod error;
pub mod executor;
pub mod notifier;
pub mod process;
pub mod reconciler;
pub mod throttle;
pub mod trigger;

pub use collaborators::{
    ConfigurationSnapshot, JobConfigurationCache, JobDefinitionSource, NoopRunHistory, RunHistory,
    RunId, RunStatus,
};
pub use definition::{schedule_signature, signature_map, JobDefinition, JobKey, ScheduleKind};
pub use engine::{FireEngine, FireRecord, RegisteredJob, Spawn, TokioFireEngine};
pub use error::{AppResult, SchedulerError};
pub use executor::{ExecutionUnit, ExecutionUnitFactory, JobAction, JobKind};
pub use notifier::{
    ExecutionNotification, ExecutionNotifier, ExecutionState, SubscriptionId,
    DEFAULT_NOTIFICATION_CAPACITY,
};
pub use process::{split_arguments, ProcessCommand, ProcessExecutor, ProcessOutcome};
pub use reconciler::{CycleOutcome, ScheduleReconciler};
pub use throttle::{ResourceLease, ResourceThrottle, ResourceUsage};
pub use trigger::{fire_rule_for, FireRule};
