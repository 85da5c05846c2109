//! Resource throttle: bounded admission pools keyed by resource type.
//!
//! Pools are created lazily on first use with the capacity configured for
//! their resource type at that moment. Capacity never changes afterwards, even
//! if the configured limits do.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::ResourceLimitsConfig;
use crate::core::definition::non_blank;
use crate::core::SchedulerError;

/// Waits longer than this are logged as warnings.
const SLOW_ACQUIRE: Duration = Duration::from_secs(1);

/// One counting pool.
struct ThrottlePool {
    resource_type: String,
    limit: u32,
    semaphore: Arc<Semaphore>,
    /// Lock-free usage counter; eventually consistent with the semaphore.
    in_use: AtomicU32,
}

impl ThrottlePool {
    fn release_slot(&self, permit: OwnedSemaphorePermit) {
        let _ = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
        drop(permit);
        tracing::info!(
            "resource '{}' released ({}/{})",
            self.resource_type,
            self.in_use.load(Ordering::Acquire),
            self.limit
        );
    }
}

/// Usage snapshot of one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Resource type name.
    pub resource_type: String,
    /// Slots currently held.
    pub in_use: u32,
    /// Pool capacity.
    pub limit: u32,
}

/// Caps concurrent holders per resource type.
pub struct ResourceThrottle {
    limits: ResourceLimitsConfig,
    pools: Mutex<HashMap<String, Arc<ThrottlePool>>>,
}

impl ResourceThrottle {
    /// Create a throttle with the given limits.
    #[must_use]
    pub fn new(limits: ResourceLimitsConfig) -> Self {
        Self {
            limits,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a slot for `resource_type`.
    ///
    /// A blank or absent resource type yields an unthrottled lease without
    /// waiting. Otherwise the caller waits for a free slot; cancellation while
    /// waiting returns [`SchedulerError::Cancelled`] and holds nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Cancelled`] when `cancel` fires first.
    pub async fn acquire(
        &self,
        resource_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ResourceLease, SchedulerError> {
        let Some(resource_type) = non_blank(resource_type) else {
            tracing::debug!("no resource type specified, skipping throttling");
            return Ok(ResourceLease::unthrottled());
        };

        let pool = self.pool_for(resource_type);
        tracing::info!(
            "acquiring resource '{}' ({}/{})",
            resource_type,
            pool.in_use.load(Ordering::Acquire),
            pool.limit
        );

        let started = Instant::now();
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::warn!("wait for resource '{}' cancelled", resource_type);
                return Err(SchedulerError::Cancelled);
            }
            permit = Arc::clone(&pool.semaphore).acquire_owned() => {
                permit.map_err(|_| SchedulerError::Engine(format!("resource pool '{resource_type}' closed")))?
            }
        };
        let in_use = pool.in_use.fetch_add(1, Ordering::AcqRel) + 1;

        let waited = started.elapsed();
        if waited > SLOW_ACQUIRE {
            tracing::warn!(
                "resource '{}' acquired after waiting {:.2}s ({}/{})",
                resource_type,
                waited.as_secs_f64(),
                in_use,
                pool.limit
            );
        } else {
            tracing::info!("resource '{}' acquired ({}/{})", resource_type, in_use, pool.limit);
        }

        Ok(ResourceLease {
            resource_type: resource_type.to_string(),
            acquired_at: Utc::now(),
            slot: Some((pool, permit)),
        })
    }

    /// Release a lease. Releasing an already released lease is a no-op.
    pub fn release(&self, lease: &mut ResourceLease) {
        lease.release();
    }

    /// Slots currently held for `resource_type`.
    #[must_use]
    pub fn current_usage(&self, resource_type: &str) -> u32 {
        self.pools
            .lock()
            .get(resource_type.trim())
            .map_or(0, |p| p.in_use.load(Ordering::Acquire))
    }

    /// Capacity for `resource_type`: the pool's fixed capacity once created,
    /// otherwise the configured limit.
    #[must_use]
    pub fn limit(&self, resource_type: &str) -> u32 {
        let key = resource_type.trim();
        self.pools
            .lock()
            .get(key)
            .map_or_else(|| self.limits.limit_for(key), |p| p.limit)
    }

    /// Usage of every pool created so far, sorted by resource type.
    #[must_use]
    pub fn usage(&self) -> Vec<ResourceUsage> {
        let mut usage: Vec<ResourceUsage> = self
            .pools
            .lock()
            .values()
            .map(|p| ResourceUsage {
                resource_type: p.resource_type.clone(),
                in_use: p.in_use.load(Ordering::Acquire),
                limit: p.limit,
            })
            .collect();
        usage.sort_by(|a, b| a.resource_type.cmp(&b.resource_type));
        usage
    }

    fn pool_for(&self, resource_type: &str) -> Arc<ThrottlePool> {
        let mut pools = self.pools.lock();
        Arc::clone(pools.entry(resource_type.to_string()).or_insert_with(|| {
            let limit = self.limits.limit_for(resource_type);
            tracing::info!("creating resource pool for '{}' with limit {}", resource_type, limit);
            Arc::new(ThrottlePool {
                resource_type: resource_type.to_string(),
                limit,
                semaphore: Arc::new(Semaphore::new(limit as usize)),
                in_use: AtomicU32::new(0),
            })
        }))
    }
}

/// One held slot in a throttle pool.
///
/// Released explicitly with [`ResourceLease::release`] or implicitly on drop;
/// only the first release returns the slot.
pub struct ResourceLease {
    resource_type: String,
    acquired_at: DateTime<Utc>,
    slot: Option<(Arc<ThrottlePool>, OwnedSemaphorePermit)>,
}

impl ResourceLease {
    fn unthrottled() -> Self {
        Self {
            resource_type: String::new(),
            acquired_at: Utc::now(),
            slot: None,
        }
    }

    /// Resource type the lease was acquired for; empty when unthrottled.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Acquisition timestamp.
    #[must_use]
    pub const fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Whether the lease holds (or held) a real pool slot.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        !self.resource_type.is_empty()
    }

    /// Whether the slot has been returned.
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.slot.is_none()
    }

    /// Return the slot to its pool. Returns `true` only for the call that
    /// actually released it.
    pub fn release(&mut self) -> bool {
        match self.slot.take() {
            Some((pool, permit)) => {
                pool.release_slot(permit);
                true
            }
            None => false,
        }
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ResourceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLease")
            .field("resource_type", &self.resource_type)
            .field("acquired_at", &self.acquired_at)
            .field("released", &self.is_released())
            .finish()
    }
}
