//! Execution notifier: bounded, ordered log of job lifecycle transitions with
//! synchronous subscriber fan-out.
//!
//! Every notification is appended to the log and then delivered to all
//! current subscribers before the notifying call returns. Appends are
//! serialized, so subscribers observe notifications in log order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};

/// Default log capacity.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 500;

/// Lifecycle state carried by a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Firing accepted, nothing acquired yet.
    Starting,
    /// Resource held and process launching.
    Running,
    /// Process exited with code 0.
    Completed,
    /// Process exited non-zero, or the run failed before launch.
    Failed,
    /// The run was cancelled while waiting for the process.
    Cancelled,
}

/// Immutable lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionNotification {
    /// Job name.
    pub job_name: String,
    /// State reached.
    pub state: ExecutionState,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// Optional detail.
    pub message: Option<String>,
    /// Elapsed run time for terminal states.
    pub duration: Option<Duration>,
    /// Process exit code for terminal states.
    pub exit_code: Option<i32>,
}

impl ExecutionNotification {
    fn new(job_name: &str, state: ExecutionState) -> Self {
        Self {
            job_name: job_name.to_string(),
            state,
            timestamp: Utc::now(),
            message: None,
            duration: None,
            exit_code: None,
        }
    }
}

/// Handle returned by [`ExecutionNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&ExecutionNotification) + Send + Sync>;

#[derive(Clone)]
enum Subscriber {
    Callback(Callback),
    Channel(Sender<ExecutionNotification>),
}

/// Bounded lifecycle log with publish-subscribe fan-out.
pub struct ExecutionNotifier {
    log: Mutex<VecDeque<ExecutionNotification>>,
    capacity: usize,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
    next_id: AtomicU64,
    /// Serializes append + broadcast; reentrant so subscribers may notify.
    publish: ReentrantMutex<()>,
}

impl Default for ExecutionNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_CAPACITY)
    }
}

impl ExecutionNotifier {
    /// Create a notifier keeping at most `capacity` notifications.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            log: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            publish: ReentrantMutex::new(()),
        }
    }

    /// Maximum number of retained notifications.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a callback invoked synchronously for each new notification.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ExecutionNotification) + Send + Sync + 'static,
    {
        self.add_subscriber(Subscriber::Callback(Arc::new(callback)))
    }

    /// Register a channel subscriber. The subscription ends when the receiver
    /// is dropped.
    pub fn subscribe_channel(&self) -> (SubscriptionId, Receiver<ExecutionNotification>) {
        let (tx, rx) = unbounded();
        (self.add_subscriber(Subscriber::Channel(tx)), rx)
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// A job firing was accepted.
    pub fn notify_starting(&self, job_name: &str) {
        tracing::info!(job = job_name, "job starting");
        self.publish(ExecutionNotification::new(job_name, ExecutionState::Starting));
    }

    /// Resources are held and the process is launching.
    pub fn notify_running(&self, job_name: &str) {
        tracing::debug!(job = job_name, "job running");
        self.publish(ExecutionNotification::new(job_name, ExecutionState::Running));
    }

    /// The process exited. Exit code 0 maps to `Completed`, anything else to
    /// `Failed`.
    pub fn notify_completed(
        &self,
        job_name: &str,
        duration: Duration,
        exit_code: i32,
        message: Option<String>,
    ) {
        let state = if exit_code == 0 {
            ExecutionState::Completed
        } else {
            ExecutionState::Failed
        };
        tracing::info!(
            job = job_name,
            "job finished in {}ms with exit code {}",
            duration.as_millis(),
            exit_code
        );
        self.publish(ExecutionNotification {
            message,
            duration: Some(duration),
            exit_code: Some(exit_code),
            ..ExecutionNotification::new(job_name, state)
        });
    }

    /// The run failed outside the process itself (resource wait, launch).
    pub fn notify_failed(&self, job_name: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(job = job_name, "job failed: {}", message);
        self.publish(ExecutionNotification {
            message: Some(message),
            ..ExecutionNotification::new(job_name, ExecutionState::Failed)
        });
    }

    /// The run was cancelled while the process was running.
    pub fn notify_cancelled(&self, job_name: &str, duration: Duration) {
        tracing::warn!(job = job_name, "job cancelled after {}ms", duration.as_millis());
        self.publish(ExecutionNotification {
            duration: Some(duration),
            ..ExecutionNotification::new(job_name, ExecutionState::Cancelled)
        });
    }

    /// Up to `count` most recent notifications, newest first.
    #[must_use]
    pub fn recent_executions(&self, count: usize) -> Vec<ExecutionNotification> {
        self.log.lock().iter().rev().take(count).cloned().collect()
    }

    /// Number of retained notifications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.lock().is_empty()
    }

    fn add_subscriber(&self, subscriber: Subscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, subscriber));
        id
    }

    fn publish(&self, notification: ExecutionNotification) {
        let _order = self.publish.lock();
        {
            let mut log = self.log.lock();
            while log.len() >= self.capacity {
                log.pop_front();
            }
            log.push_back(notification.clone());
        }

        let targets: Vec<(SubscriptionId, Subscriber)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, sub)| (*id, sub.clone()))
            .collect();

        let mut disconnected = Vec::new();
        for (id, subscriber) in targets {
            match subscriber {
                Subscriber::Callback(callback) => callback(&notification),
                Subscriber::Channel(sender) => {
                    if sender.send(notification.clone()).is_err() {
                        disconnected.push(id);
                    }
                }
            }
        }
        if !disconnected.is_empty() {
            self.subscribers
                .write()
                .retain(|(id, _)| !disconnected.contains(id));
        }
    }
}
