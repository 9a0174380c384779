use std::sync::Arc;
use std::time::Duration;

use paper_harvester::harvester::{FeedOrchestrator, FeedPhase, HarvestError, PageFailure, PageRetrier};
use paper_harvester::resume::CheckpointStore;
use paper_harvester::shutdown::{cancellable_sleep, ShutdownCoordinator};
use tempfile::TempDir;

use crate::support::{fast_config, feed, publish_date, records, timeout, window, FakeProvider};

#[tokio::test]
async fn shutdown_notifies_waiters() {
    let shutdown = ShutdownCoordinator::shared();
    let waiter = {
        let handle = shutdown.clone();
        tokio::spawn(async move {
            handle.wait_for_shutdown().await;
            true
        })
    };

    // Give the task time to start waiting
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok());
}

/// A request made before anyone waits must still release later waiters.
#[tokio::test]
async fn shutdown_requested_before_wait_does_not_deadlock() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let handle = shutdown.clone();
    let waiter = tokio::spawn(async move {
        handle.wait_for_shutdown().await;
        true
    });

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok(), "wait_for_shutdown() deadlocked despite shutdown already requested");
}

#[tokio::test]
async fn shutdown_concurrent_waiters_all_notified() {
    let shutdown = ShutdownCoordinator::shared();

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let handle = shutdown.clone();
        waiters.push(tokio::spawn(async move {
            handle.wait_for_shutdown().await;
        }));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.request_shutdown();

    for waiter in waiters {
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(result.is_ok(), "A waiter was not notified of shutdown");
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_cycle_sleep() {
    let shutdown = ShutdownCoordinator::shared();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.request_shutdown();
    });

    let start = tokio::time::Instant::now();
    let completed = cancellable_sleep(Duration::from_secs(24 * 60 * 60), Some(&shutdown)).await;

    assert!(!completed);
    assert!(start.elapsed() < Duration::from_secs(60));
}

/// A shutdown during page backoff abandons the page without burning the
/// remaining attempts.
#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_page_backoff() {
    let shutdown = ShutdownCoordinator::shared();
    let provider = FakeProvider::new()
        .with_records("cs.AI", records(1, 10))
        .failing("cs.AI", 0, 5, timeout());
    let retrier = PageRetrier::new(5, Duration::from_secs(60), Duration::from_secs(300));

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        trigger.request_shutdown();
    });

    let mut phase = FeedPhase::Idle;
    let result = retrier
        .fetch(&provider, &window("cs.AI"), 0, 100, &mut phase, Some(&shutdown))
        .await;

    assert!(matches!(
        result,
        Err(PageFailure::Cancelled { offset: 0 })
    ));
    assert_eq!(provider.call_count(), 1);
}

/// Interrupted harvests leave a checkpoint the next run resumes from.
#[tokio::test]
async fn shutdown_saves_checkpoint_before_returning() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let provider = Arc::new(
        FakeProvider::new()
            .with_records("cs.AI", records(1, 300))
            .shutdown_on_call(1, shutdown.clone()),
    );
    let orchestrator = FeedOrchestrator::new(
        provider.clone(),
        CheckpointStore::new(dir.path()),
        fast_config(),
    )
    .with_shutdown(shutdown);

    let result = orchestrator.harvest(&window("cs.AI")).await;
    assert!(matches!(result, Err(HarvestError::Cancelled)));

    let checkpoint = CheckpointStore::new(dir.path())
        .load(&feed("cs.AI"), publish_date())
        .unwrap()
        .unwrap();
    assert!(!checkpoint.is_complete());
    assert_eq!(checkpoint.accumulated(), 100);
    assert_eq!(checkpoint.cursor, Some(100));
}
