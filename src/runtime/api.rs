//! API-facing read models for a management surface.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::builders::AutomationHost;
use crate::core::{ExecutionNotification, FireEngine, FireRecord, RegisteredJob, ResourceUsage};

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Engine is dispatching firings.
    pub ok: bool,
    /// Engine running flag.
    pub engine_running: bool,
    /// Number of registered jobs.
    pub registered_jobs: usize,
    /// Firings currently executing.
    pub active_executions: usize,
    /// Whether the last reconciliation applied signatures.
    pub reconciled: bool,
    /// Response time.
    pub checked_at: DateTime<Utc>,
}

/// Up to `count` most recent lifecycle notifications, newest first.
#[must_use]
pub fn recent_executions(host: &AutomationHost, count: usize) -> Vec<ExecutionNotification> {
    host.notifier().recent_executions(count)
}

/// Up to `count` most recent engine firings, newest first.
#[must_use]
pub fn recent_fires(host: &AutomationHost, count: usize) -> Vec<FireRecord> {
    host.engine().recent_fires(count)
}

/// Usage and limit of every configured or active resource type.
#[must_use]
pub fn resource_usage(host: &AutomationHost) -> Vec<ResourceUsage> {
    let throttle = host.throttle();
    let mut usage: BTreeMap<String, ResourceUsage> = host
        .config()
        .resource_limits
        .limits
        .keys()
        .map(|name| {
            (
                name.clone(),
                ResourceUsage {
                    resource_type: name.clone(),
                    in_use: throttle.current_usage(name),
                    limit: throttle.limit(name),
                },
            )
        })
        .collect();
    for active in throttle.usage() {
        usage.insert(active.resource_type.clone(), active);
    }
    usage.into_values().collect()
}

/// Registered jobs with their rules and next fire times.
#[must_use]
pub fn registered_jobs(host: &AutomationHost) -> Vec<RegisteredJob> {
    host.engine().registrations()
}

/// Health snapshot.
#[must_use]
pub fn health(host: &AutomationHost) -> Health {
    let engine = host.engine();
    let engine_running = engine.is_running();
    Health {
        ok: engine_running,
        engine_running,
        registered_jobs: engine.registrations().len(),
        active_executions: engine.active_executions(),
        reconciled: host.reconciler().applied_signatures().is_some(),
        checked_at: Utc::now(),
    }
}
