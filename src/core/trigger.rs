//! Trigger policy: maps a definition's schedule fields to a concrete fire rule.
//!
//! | Kind      | Rule                                                        |
//! |-----------|-------------------------------------------------------------|
//! | `MINUTES` | fire now, then every `max(1, interval)` minutes             |
//! | `DAILY`   | every day at `run_at_time` (00:00:00 when absent)           |
//! | `WEEKLY`  | masked weekdays at `run_at_time`, empty mask = Monday–Friday |
//! | `ONCE`    | today at `run_at_time` (now + 10s when absent), past = now + 5s |
//! | other     | same as `MINUTES` with a 5 minute interval                  |

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, NaiveTime, TimeZone, Utc, Weekday};

use crate::core::definition::{JobDefinition, ScheduleKind};

/// Interval used when a `MINUTES` schedule has no interval, and for unknown kinds.
pub const FALLBACK_INTERVAL_MINUTES: u32 = 5;
/// Mask applied to `WEEKLY` schedules with no selected day (Monday–Friday).
pub const BUSINESS_DAYS_MASK: u8 = 0b0011_1110;
/// Delay applied to `ONCE` schedules without a time of day.
pub const ONCE_DEFAULT_DELAY: Duration = Duration::from_secs(10);
/// Delay applied to `ONCE` schedules whose instant already passed.
pub const ONCE_PAST_DELAY: Duration = Duration::from_secs(5);

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

/// Concrete fire-time rule registered with the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireRule {
    /// Fire immediately, then repeat forever.
    Interval {
        /// Distance between firings.
        every: Duration,
    },
    /// Fire once per day.
    Daily {
        /// Local time of day.
        at: NaiveTime,
    },
    /// Fire on selected weekdays.
    Weekly {
        /// Local time of day.
        at: NaiveTime,
        /// Weekday mask, bit 0 = Sunday. Never empty.
        days: u8,
    },
    /// Fire a single time.
    Once {
        /// Absolute instant.
        at: DateTime<Utc>,
    },
}

/// Derive the fire rule for a definition. `now` anchors `ONCE` schedules and
/// supplies the local timezone.
pub fn fire_rule_for<Tz: TimeZone>(def: &JobDefinition, now: &DateTime<Tz>) -> FireRule {
    let at = def.run_at_time.unwrap_or(NaiveTime::MIN);
    match def.schedule_kind() {
        ScheduleKind::Minutes => {
            let minutes = def
                .interval_minutes
                .map_or(FALLBACK_INTERVAL_MINUTES, |m| u32::try_from(m.max(1)).unwrap_or(1));
            FireRule::every_minutes(minutes)
        }
        ScheduleKind::Daily => FireRule::Daily { at },
        ScheduleKind::Weekly => {
            let mask = def.days_of_week_mask.unwrap_or(0) & 0x7F;
            FireRule::Weekly {
                at,
                days: if mask == 0 { BUSINESS_DAYS_MASK } else { mask },
            }
        }
        ScheduleKind::Once => FireRule::Once {
            at: once_instant(def.run_at_time, now),
        },
        ScheduleKind::Unknown(_) => FireRule::every_minutes(FALLBACK_INTERVAL_MINUTES),
    }
}

fn once_instant<Tz: TimeZone>(run_at: Option<NaiveTime>, now: &DateTime<Tz>) -> DateTime<Utc> {
    let now_utc = now.with_timezone(&Utc);
    let Some(time) = run_at else {
        return now_utc + delta(ONCE_DEFAULT_DELAY);
    };
    let today = now
        .timezone()
        .from_local_datetime(&now.date_naive().and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc));
    match today {
        Some(at) if at >= now_utc => at,
        _ => now_utc + delta(ONCE_PAST_DELAY),
    }
}

fn delta(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}

impl FireRule {
    /// Repeat rule with a minute interval.
    #[must_use]
    pub fn every_minutes(minutes: u32) -> Self {
        Self::Interval {
            every: Duration::from_secs(u64::from(minutes.max(1)) * 60),
        }
    }

    /// Weekdays selected by a `Weekly` rule, Sunday first.
    #[must_use]
    pub fn weekdays(&self) -> Vec<Weekday> {
        match self {
            Self::Weekly { days, .. } => WEEKDAYS
                .iter()
                .filter(|d| days & weekday_bit(**d) != 0)
                .copied()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// First firing at or after `now`.
    pub fn first_fire<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { .. } => Some(now.with_timezone(&Utc)),
            Self::Once { at } => Some(*at),
            Self::Daily { at } => next_occurrence(now, *at, 0x7F, true),
            Self::Weekly { at, days } => next_occurrence(now, *at, *days, true),
        }
    }

    /// Firing strictly after `last`, or `None` once the rule is exhausted.
    pub fn next_after<Tz: TimeZone>(&self, last: &DateTime<Tz>) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { every } => {
                Some(last.with_timezone(&Utc) + delta(*every))
            }
            Self::Once { .. } => None,
            Self::Daily { at } => next_occurrence(last, *at, 0x7F, false),
            Self::Weekly { at, days } => next_occurrence(last, *at, *days, false),
        }
    }
}

impl fmt::Display for FireRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval { every } => write!(f, "every {}m", every.as_secs() / 60),
            Self::Daily { at } => write!(f, "daily at {}", at.format("%H:%M:%S")),
            Self::Weekly { at, .. } => {
                let days: Vec<String> = self.weekdays().iter().map(ToString::to_string).collect();
                write!(f, "weekly {} at {}", days.join(","), at.format("%H:%M:%S"))
            }
            Self::Once { at } => write!(f, "once at {}", at.to_rfc3339()),
        }
    }
}

fn weekday_bit(day: Weekday) -> u8 {
    1 << day.num_days_from_sunday()
}

/// Next local `at` on a masked weekday, relative to `from` in its own timezone.
/// Local times skipped by a DST gap are skipped.
fn next_occurrence<Tz: TimeZone>(
    from: &DateTime<Tz>,
    at: NaiveTime,
    mask: u8,
    inclusive: bool,
) -> Option<DateTime<Utc>> {
    let tz = from.timezone();
    let start = from.date_naive();
    (0..=8u64).find_map(|offset| {
        let date = start.checked_add_days(Days::new(offset))?;
        if mask & weekday_bit(date.weekday()) == 0 {
            return None;
        }
        let candidate = tz.from_local_datetime(&date.and_time(at)).earliest()?;
        let due = if inclusive {
            candidate >= *from
        } else {
            candidate > *from
        };
        due.then(|| candidate.with_timezone(&Utc))
    })
}
