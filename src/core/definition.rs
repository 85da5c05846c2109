//! Job definitions as delivered by the definition source, plus the derived
//! identity and signature used for reconciliation.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Declarative record describing what to run and when.
///
/// Definitions are owned by the external source; the scheduler only reads
/// full snapshots of the enabled set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefinition {
    /// Source-assigned identifier, stable while the definition exists.
    pub job_id: i64,
    /// Human label, part of the engine identity.
    pub name: String,
    /// Operation code used to resolve a default command.
    pub operation_code: String,
    /// Program or script to run. Blank means "resolve from the operation code".
    pub command: Option<String>,
    /// Raw argument string.
    pub arguments: Option<String>,
    /// Working directory. Blank means the content root.
    pub working_directory: Option<String>,
    /// Launch in a visible session instead of capturing output.
    pub show_window: bool,
    /// Environment overrides for the child process.
    pub environment: HashMap<String, String>,
    /// Name of the throttle pool to acquire before running.
    pub resource_type: Option<String>,
    /// Schedule kind as stored by the source (`MINUTES`, `DAILY`, `WEEKLY`, `ONCE`).
    pub schedule_type: String,
    /// Repeat interval for `MINUTES` schedules.
    pub interval_minutes: Option<i32>,
    /// Time of day for `DAILY`, `WEEKLY` and `ONCE` schedules.
    pub run_at_time: Option<NaiveTime>,
    /// Weekday mask for `WEEKLY` schedules, bit 0 = Sunday.
    pub days_of_week_mask: Option<u8>,
}

impl JobDefinition {
    /// Create a definition with a `MINUTES` schedule and no process fields.
    pub fn new(job_id: i64, name: impl Into<String>, operation_code: impl Into<String>) -> Self {
        Self {
            job_id,
            name: name.into(),
            operation_code: operation_code.into(),
            schedule_type: ScheduleKind::Minutes.as_str().to_string(),
            ..Self::default()
        }
    }

    /// Set the command.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Set the argument string.
    #[must_use]
    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }

    /// Bind the job to a throttle pool.
    #[must_use]
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Add one environment override.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Use a `MINUTES` schedule.
    #[must_use]
    pub fn every_minutes(mut self, interval: i32) -> Self {
        self.schedule_type = ScheduleKind::Minutes.as_str().to_string();
        self.interval_minutes = Some(interval);
        self
    }

    /// Use a `DAILY` schedule.
    #[must_use]
    pub fn daily_at(mut self, at: NaiveTime) -> Self {
        self.schedule_type = ScheduleKind::Daily.as_str().to_string();
        self.run_at_time = Some(at);
        self
    }

    /// Use a `WEEKLY` schedule.
    #[must_use]
    pub fn weekly_at(mut self, at: NaiveTime, mask: u8) -> Self {
        self.schedule_type = ScheduleKind::Weekly.as_str().to_string();
        self.run_at_time = Some(at);
        self.days_of_week_mask = Some(mask);
        self
    }

    /// Use a `ONCE` schedule.
    #[must_use]
    pub fn once_at(mut self, at: Option<NaiveTime>) -> Self {
        self.schedule_type = ScheduleKind::Once.as_str().to_string();
        self.run_at_time = at;
        self
    }

    /// Parsed schedule kind.
    #[must_use]
    pub fn schedule_kind(&self) -> ScheduleKind {
        ScheduleKind::parse(&self.schedule_type)
    }

    /// Engine identity of this definition.
    #[must_use]
    pub fn key(&self) -> JobKey {
        JobKey::new(self.job_id, &self.name)
    }

    /// Resource type with blank values normalized away.
    #[must_use]
    pub fn resource_type(&self) -> Option<&str> {
        non_blank(self.resource_type.as_deref())
    }
}

/// Schedule kinds understood by the trigger policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScheduleKind {
    /// Repeat every N minutes.
    Minutes,
    /// Once per day at a time of day.
    Daily,
    /// On selected weekdays at a time of day.
    Weekly,
    /// A single firing.
    Once,
    /// Anything else the source stored.
    Unknown(String),
}

impl ScheduleKind {
    /// Parse case-insensitively, keeping unrecognized values.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "MINUTES" => Self::Minutes,
            "DAILY" => Self::Daily,
            "WEEKLY" => Self::Weekly,
            "ONCE" => Self::Once,
            _ => Self::Unknown(raw.trim().to_string()),
        }
    }

    /// Canonical upper-case spelling.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Minutes => "MINUTES",
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Once => "ONCE",
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine identity of a job, derived from its id and name.
///
/// Obsolete detection compares keys exactly, so renaming a job replaces its
/// registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    /// Source-assigned job id.
    pub job_id: i64,
    /// Job name at registration time.
    pub name: String,
}

impl JobKey {
    /// Build a key.
    pub fn new(job_id: i64, name: impl Into<String>) -> Self {
        Self {
            job_id,
            name: name.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job.{}.{}", self.job_id, self.name)
    }
}

/// Deterministic fingerprint of every field that affects firing or execution.
///
/// Two definitions with equal signatures are interchangeable for scheduling.
#[must_use]
pub fn schedule_signature(def: &JobDefinition) -> String {
    let mut env: Vec<(&String, &String)> = def.environment.iter().collect();
    env.sort_by(|(a, _), (b, _)| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    });

    let mut sig = String::with_capacity(128);
    let _ = write!(
        sig,
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|",
        def.name,
        def.operation_code,
        def.command.as_deref().unwrap_or_default(),
        def.arguments.as_deref().unwrap_or_default(),
        def.working_directory.as_deref().unwrap_or_default(),
        def.show_window,
        def.resource_type().unwrap_or_default(),
        def.schedule_kind(),
        def.interval_minutes.map(|v| v.to_string()).unwrap_or_default(),
        def.run_at_time
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_default(),
        def.days_of_week_mask.map(|v| v.to_string()).unwrap_or_default(),
    );
    for (key, value) in env {
        let _ = write!(sig, "{key}={value};");
    }
    sig
}

/// Signature map keyed by job id for a fetched definition set.
#[must_use]
pub fn signature_map(defs: &[JobDefinition]) -> HashMap<i64, String> {
    defs.iter()
        .map(|d| (d.job_id, schedule_signature(d)))
        .collect()
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> JobDefinition {
        JobDefinition::new(7, "sync", "SYNC")
            .with_command("run.cmd")
            .with_arguments("--fast")
            .every_minutes(5)
    }

    #[test]
    fn test_key_display() {
        assert_eq!(sample().key().to_string(), "Job.7.sync");
    }

    #[test]
    fn test_schedule_kind_parse_is_case_insensitive() {
        assert_eq!(ScheduleKind::parse("weekly"), ScheduleKind::Weekly);
        assert_eq!(ScheduleKind::parse(" Once "), ScheduleKind::Once);
        assert_eq!(
            ScheduleKind::parse("HOURLY"),
            ScheduleKind::Unknown("HOURLY".into())
        );
    }

    #[test]
    fn test_signature_is_stable_across_env_insertion_order() {
        let a = sample().with_env("PATH_B", "2").with_env("path_a", "1");
        let b = sample().with_env("path_a", "1").with_env("PATH_B", "2");
        assert_eq!(schedule_signature(&a), schedule_signature(&b));
        assert!(schedule_signature(&a).ends_with("path_a=1;PATH_B=2;"));
    }

    #[test]
    fn test_signature_changes_with_arguments() {
        let a = sample();
        let b = sample().with_arguments("--slow");
        assert_ne!(schedule_signature(&a), schedule_signature(&b));
    }

    #[test]
    fn test_signature_ignores_blank_resource_type() {
        let a = sample();
        let b = sample().with_resource_type("   ");
        assert_eq!(schedule_signature(&a), schedule_signature(&b));
    }

    #[test]
    fn test_definition_deserializes_with_defaults() {
        let def: JobDefinition = serde_json::from_str(
            r#"{"job_id": 3, "name": "report", "schedule_type": "DAILY", "run_at_time": "02:30:00"}"#,
        )
        .unwrap();
        assert_eq!(def.schedule_kind(), ScheduleKind::Daily);
        assert_eq!(def.run_at_time, NaiveTime::from_hms_opt(2, 30, 0));
        assert!(def.environment.is_empty());
        assert!(!def.show_window);
    }
}
