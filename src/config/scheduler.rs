//! Scheduler, throttle and cache configuration structures.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resource type used when a job names none but a default pool is wanted.
pub const DEFAULT_RESOURCE_TYPE: &str = "Default";

/// Per-resource-type concurrency limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimitsConfig {
    /// Capacity for resource types without an explicit entry.
    pub default_limit: u32,
    /// Explicit capacities keyed by resource type.
    pub limits: HashMap<String, u32>,
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        Self {
            default_limit: 4,
            limits: HashMap::new(),
        }
    }
}

impl ResourceLimitsConfig {
    /// Set an explicit limit.
    #[must_use]
    pub fn with_limit(mut self, resource_type: impl Into<String>, limit: u32) -> Self {
        self.limits.insert(resource_type.into(), limit);
        self
    }

    /// Capacity for `resource_type`: its explicit entry, else the entry for
    /// [`DEFAULT_RESOURCE_TYPE`], else `default_limit`.
    #[must_use]
    pub fn limit_for(&self, resource_type: &str) -> u32 {
        self.limits
            .get(resource_type)
            .or_else(|| self.limits.get(DEFAULT_RESOURCE_TYPE))
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Validate limit values.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_limit == 0 {
            return Err("default_limit must be greater than 0".into());
        }
        for (name, limit) in &self.limits {
            if name.trim().is_empty() {
                return Err("resource type names must not be blank".into());
            }
            if *limit == 0 {
                return Err(format!("limit for `{name}` must be greater than 0"));
            }
        }
        Ok(())
    }
}

/// File system snapshot cache of the last good definition set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether snapshots are written and read at all.
    pub enabled: bool,
    /// Snapshot file path, relative paths resolve against the content root.
    pub path: PathBuf,
    /// Snapshots older than this are still used but logged as stale.
    pub max_age_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("data/job-configuration-cache.json"),
            max_age_hours: 24,
        }
    }
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between reconciliation cycles.
    pub poll_interval_secs: u64,
    /// Seconds to wait after a failed cycle.
    pub retry_interval_secs: u64,
    /// Maximum firings executing at once across all jobs.
    pub max_concurrency: usize,
    /// Execution notifier log capacity.
    pub notification_capacity: usize,
    /// Engine fire history capacity.
    pub fire_history_capacity: usize,
    /// Throttle limits.
    pub resource_limits: ResourceLimitsConfig,
    /// Base directory for default scripts and relative paths.
    pub content_root: PathBuf,
    /// Extension of default operation scripts.
    pub script_extension: String,
    /// Definition snapshot cache.
    pub cache: CacheConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            retry_interval_secs: 30,
            max_concurrency: 5,
            notification_capacity: 500,
            fire_history_capacity: 200,
            resource_limits: ResourceLimitsConfig::default(),
            content_root: PathBuf::from("."),
            script_extension: default_script_extension().to_string(),
            cache: CacheConfig::default(),
        }
    }
}

const fn default_script_extension() -> &'static str {
    if cfg!(windows) {
        "cmd"
    } else {
        "sh"
    }
}

impl SchedulerConfig {
    /// Interval between successful cycles.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Delay after a failed cycle.
    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Cache path resolved against the content root.
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        if self.cache.path.is_absolute() {
            self.cache.path.clone()
        } else {
            self.content_root.join(&self.cache.path)
        }
    }

    /// Validate all values.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_secs == 0 {
            return Err("poll_interval_secs must be greater than 0".into());
        }
        if self.retry_interval_secs == 0 {
            return Err("retry_interval_secs must be greater than 0".into());
        }
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".into());
        }
        if self.notification_capacity == 0 {
            return Err("notification_capacity must be greater than 0".into());
        }
        if self.fire_history_capacity == 0 {
            return Err("fire_history_capacity must be greater than 0".into());
        }
        if self.script_extension.trim().is_empty() {
            return Err("script_extension must not be blank".into());
        }
        self.resource_limits
            .validate()
            .map_err(|e| format!("resource_limits invalid: {e}"))?;
        if self.cache.enabled && self.cache.path.as_os_str().is_empty() {
            return Err("cache.path must be set when the cache is enabled".into());
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `SCHEDULER_*` environment variables, after
    /// loading a `.env` file when one exists.
    ///
    /// Recognized: `SCHEDULER_POLL_INTERVAL_SECS`, `SCHEDULER_RETRY_INTERVAL_SECS`,
    /// `SCHEDULER_MAX_CONCURRENCY`, `SCHEDULER_NOTIFICATION_CAPACITY`,
    /// `SCHEDULER_FIRE_HISTORY_CAPACITY`, `SCHEDULER_DEFAULT_RESOURCE_LIMIT`,
    /// `SCHEDULER_RESOURCE_LIMITS` (`Type=N,Other=M`), `SCHEDULER_CONTENT_ROOT`,
    /// `SCHEDULER_SCRIPT_EXTENSION`, `SCHEDULER_CACHE_ENABLED`,
    /// `SCHEDULER_CACHE_PATH`, `SCHEDULER_CACHE_MAX_AGE_HOURS`.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup and validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("SCHEDULER_POLL_INTERVAL_SECS") {
            cfg.poll_interval_secs = parse_var("SCHEDULER_POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("SCHEDULER_RETRY_INTERVAL_SECS") {
            cfg.retry_interval_secs = parse_var("SCHEDULER_RETRY_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("SCHEDULER_MAX_CONCURRENCY") {
            cfg.max_concurrency = parse_var("SCHEDULER_MAX_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("SCHEDULER_NOTIFICATION_CAPACITY") {
            cfg.notification_capacity = parse_var("SCHEDULER_NOTIFICATION_CAPACITY", &v)?;
        }
        if let Some(v) = get("SCHEDULER_FIRE_HISTORY_CAPACITY") {
            cfg.fire_history_capacity = parse_var("SCHEDULER_FIRE_HISTORY_CAPACITY", &v)?;
        }
        if let Some(v) = get("SCHEDULER_DEFAULT_RESOURCE_LIMIT") {
            cfg.resource_limits.default_limit = parse_var("SCHEDULER_DEFAULT_RESOURCE_LIMIT", &v)?;
        }
        if let Some(v) = get("SCHEDULER_RESOURCE_LIMITS") {
            for pair in v.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let (name, limit) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("SCHEDULER_RESOURCE_LIMITS entry `{pair}` must be Type=N"))?;
                let limit = parse_var("SCHEDULER_RESOURCE_LIMITS", limit.trim())?;
                cfg.resource_limits.limits.insert(name.trim().to_string(), limit);
            }
        }
        if let Some(v) = get("SCHEDULER_CONTENT_ROOT") {
            cfg.content_root = PathBuf::from(v);
        }
        if let Some(v) = get("SCHEDULER_SCRIPT_EXTENSION") {
            cfg.script_extension = v.trim_start_matches('.').to_string();
        }
        if let Some(v) = get("SCHEDULER_CACHE_ENABLED") {
            cfg.cache.enabled = parse_var("SCHEDULER_CACHE_ENABLED", &v.to_ascii_lowercase())?;
        }
        if let Some(v) = get("SCHEDULER_CACHE_PATH") {
            cfg.cache.path = PathBuf::from(v);
        }
        if let Some(v) = get("SCHEDULER_CACHE_MAX_AGE_HOURS") {
            cfg.cache.max_age_hours = parse_var("SCHEDULER_CACHE_MAX_AGE_HOURS", &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| format!("{key}: invalid value `{value}`: {e}"))
}
