//! Tests for the execution notifier

use std::sync::Arc;
use std::time::Duration;

use prometheus_automation_scheduler::core::{ExecutionNotifier, ExecutionState};

#[test]
fn test_capacity_is_never_exceeded() {
    let notifier = ExecutionNotifier::new(5);
    for i in 0..20 {
        notifier.notify_completed(&format!("job{i}"), Duration::from_millis(1), 0, None);
        assert!(notifier.len() <= 5);
    }
    let recent = notifier.recent_executions(100);
    assert_eq!(recent.len(), 5);
    assert_eq!(recent[0].job_name, "job19");
    assert_eq!(recent[4].job_name, "job15");
}

#[test]
fn test_recent_executions_respects_count() {
    let notifier = ExecutionNotifier::default();
    assert_eq!(notifier.capacity(), 500);
    notifier.notify_starting("a");
    notifier.notify_running("a");
    notifier.notify_cancelled("a", Duration::from_secs(1));
    let recent = notifier.recent_executions(2);
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].state, ExecutionState::Cancelled);
    assert_eq!(recent[0].duration, Some(Duration::from_secs(1)));
    assert_eq!(recent[1].state, ExecutionState::Running);
}

#[test]
fn test_channel_order_matches_log_under_contention() {
    let notifier = Arc::new(ExecutionNotifier::new(1_000));
    let (_, rx) = notifier.subscribe_channel();

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let notifier = Arc::clone(&notifier);
            std::thread::spawn(move || {
                for i in 0..50 {
                    notifier.notify_starting(&format!("t{t}-{i}"));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let delivered: Vec<String> = rx.try_iter().map(|n| n.job_name).collect();
    let mut logged: Vec<String> = notifier
        .recent_executions(1_000)
        .into_iter()
        .map(|n| n.job_name)
        .collect();
    logged.reverse();
    assert_eq!(delivered.len(), 200);
    assert_eq!(delivered, logged);
}

#[test]
fn test_failed_notification_carries_message() {
    let notifier = ExecutionNotifier::new(10);
    notifier.notify_failed("sap export", "could not acquire resource 'Sap'");
    let last = &notifier.recent_executions(1)[0];
    assert_eq!(last.state, ExecutionState::Failed);
    assert_eq!(last.message.as_deref(), Some("could not acquire resource 'Sap'"));
    assert_eq!(last.exit_code, None);
}
