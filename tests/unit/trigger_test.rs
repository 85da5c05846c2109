//! Tests for the trigger policy worked examples

use std::time::Duration;

use chrono::{NaiveTime, TimeZone, Utc, Weekday};
use prometheus_automation_scheduler::core::{fire_rule_for, FireRule, JobDefinition};

#[test]
fn test_minutes_five_fires_now_then_every_five_minutes() {
    let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 17, 0).unwrap();
    let def = JobDefinition::new(1, "poll", "POLL").every_minutes(5);
    let rule = fire_rule_for(&def, &now);

    assert_eq!(
        rule,
        FireRule::Interval {
            every: Duration::from_secs(300)
        }
    );
    let first = rule.first_fire(&now).unwrap();
    assert_eq!(first, now);
    assert_eq!(
        rule.next_after(&first).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 22, 0).unwrap()
    );
}

#[test]
fn test_weekly_empty_mask_runs_monday_to_friday() {
    // Saturday
    let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
    let at = NaiveTime::from_hms_opt(6, 30, 0).unwrap();
    let def = JobDefinition::new(2, "weekly", "WK").weekly_at(at, 0);
    let rule = fire_rule_for(&def, &now);

    assert_eq!(
        rule.weekdays(),
        vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
    );
    let first = rule.first_fire(&now).unwrap();
    assert_eq!(first, Utc.with_ymd_and_hms(2024, 3, 11, 6, 30, 0).unwrap());
    let second = rule.next_after(&first).unwrap();
    assert_eq!(second, Utc.with_ymd_and_hms(2024, 3, 12, 6, 30, 0).unwrap());
}

#[test]
fn test_once_rule_is_exhausted_after_first_fire() {
    let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
    let def = JobDefinition::new(3, "once", "ONE").once_at(NaiveTime::from_hms_opt(10, 0, 0));
    let rule = fire_rule_for(&def, &now);
    let first = rule.first_fire(&now).unwrap();
    assert_eq!(first, Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap());
    assert!(rule.next_after(&first).is_none());
}
