//! # Prometheus Automation Scheduler
//!
//! A reconciling scheduler for unattended external automations (programs and
//! scripts) with bounded access to scarce shared resources.
//!
//! Job definitions live in an external, mutable store. The scheduler polls the
//! enabled set, detects changes by signature, converts each schedule into a
//! concrete fire rule and registers it with a fire-time engine, all without a
//! restart. At fire time each job acquires a slot in its resource pool, runs
//! its external process and reports its lifecycle through an observable
//! notification log.
//!
//! ## Core Problem Solved
//!
//! Desktop automations that drive a shared client (an ERP GUI, a spreadsheet
//! engine) cannot run arbitrarily in parallel:
//!
//! - **Scarce Resources**: a resource type caps how many jobs use it at once
//! - **Live Definitions**: jobs are added, edited and removed while the host runs
//! - **Store Outages**: a failing definition store must not drop scheduled work
//! - **No Overlap**: a job never runs twice at the same time, even across edits
//!
//! ## Key Features
//!
//! - **Signature Reconciliation**: only new or changed jobs are re-registered
//! - **Fire Rules**: `MINUTES`, `DAILY`, `WEEKLY` and `ONCE` schedules
//! - **Resource Throttle**: lazily created counting pools per resource type
//! - **Process Execution**: hidden runs with captured output, or visible sessions
//! - **Execution Notifier**: bounded lifecycle log with synchronous subscribers
//! - **Configuration Snapshot**: start from the last good definition set when
//!   the store is down
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_automation_scheduler::builders::build_host;
//! use prometheus_automation_scheduler::config::SchedulerConfig;
//! use prometheus_automation_scheduler::infra::InMemoryDefinitionSource;
//! use prometheus_automation_scheduler::core::JobDefinition;
//!
//! prometheus_automation_scheduler::util::init_tracing();
//! let cfg = SchedulerConfig::from_env()?;
//! let source = Arc::new(InMemoryDefinitionSource::new(vec![
//!     JobDefinition::new(7, "inventory", "INV_EXPORT")
//!         .with_resource_type("Sap")
//!         .every_minutes(15),
//! ]));
//! let host = build_host(&cfg, source, None, None)?;
//! host.start().await?;
//!
//! let rx = host.notifier().subscribe_channel().1;
//! // ...
//! host.shutdown().await?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: definitions, rules, throttling, execution.
pub mod core;
/// Configuration models for polling, throttling, execution and caching.
pub mod config;
/// Builders to construct the automation host from configuration.
pub mod builders;
/// Infrastructure adapters for sources, run history and snapshot caches.
pub mod infra;
/// Runtime adapters and read-only API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
