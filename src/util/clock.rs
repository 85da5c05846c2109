//! Wall-clock helpers.

use chrono::{DateTime, Utc};

/// Convert the distance from now to `at` into a sleepable duration.
///
/// Instants in the past map to a zero duration.
#[must_use]
pub fn until(at: DateTime<Utc>) -> std::time::Duration {
    (at - Utc::now()).to_std().unwrap_or_default()
}
