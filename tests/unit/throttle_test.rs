//! Tests for resource throttling under concurrency

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use prometheus_automation_scheduler::config::ResourceLimitsConfig;
use prometheus_automation_scheduler::core::{ResourceThrottle, SchedulerError};
use tokio_util::sync::CancellationToken;

fn throttle(resource_type: &str, limit: u32) -> Arc<ResourceThrottle> {
    Arc::new(ResourceThrottle::new(
        ResourceLimitsConfig::default().with_limit(resource_type, limit),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_holders_never_exceed_limit() {
    let throttle = throttle("Sap", 2);
    let active = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let throttle = Arc::clone(&throttle);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let mut lease = throttle.acquire(Some("Sap"), &cancel).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(throttle.current_usage("Sap") <= 2);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                throttle.release(&mut lease);
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        result.unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(throttle.current_usage("Sap"), 0);
}

#[tokio::test]
async fn test_waiter_proceeds_after_release() {
    let throttle = throttle("Excel", 1);
    let cancel = CancellationToken::new();
    let held = throttle.acquire(Some("Excel"), &cancel).await.unwrap();

    let waiter = {
        let throttle = Arc::clone(&throttle);
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            throttle.acquire(Some("Excel"), &cancel).await.map(|lease| lease.resource_type().to_string())
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    drop(held);
    let acquired = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should be admitted")
        .unwrap()
        .unwrap();
    assert_eq!(acquired, "Excel");
}

#[tokio::test]
async fn test_cancel_while_waiting() {
    let throttle = throttle("Sap", 1);
    let cancel = CancellationToken::new();
    let mut held = throttle.acquire(Some("Sap"), &cancel).await.unwrap();

    let waiter_cancel = CancellationToken::new();
    let waiter = {
        let throttle = Arc::clone(&throttle);
        let waiter_cancel = waiter_cancel.clone();
        tokio::spawn(async move { throttle.acquire(Some("Sap"), &waiter_cancel).await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    waiter_cancel.cancel();
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, SchedulerError::Cancelled));

    assert!(held.release());
    assert_eq!(throttle.current_usage("Sap"), 0);
    let again = throttle.acquire(Some("Sap"), &cancel).await.unwrap();
    assert!(again.is_throttled());
    assert_eq!(throttle.current_usage("Sap"), 1);
}

#[tokio::test]
async fn test_pool_capacity_fixed_at_creation() {
    let throttle = throttle("Sap", 3);
    let cancel = CancellationToken::new();
    let _lease = throttle.acquire(Some("Sap"), &cancel).await.unwrap();
    assert_eq!(throttle.limit("Sap"), 3);

    let usage = throttle.usage();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].resource_type, "Sap");
    assert_eq!(usage[0].in_use, 1);
    assert_eq!(usage[0].limit, 3);
}
