//! Multi-feed scheduling and dataset output

use chrono::{NaiveDate, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use paper_harvester::fetcher::FetcherError;
use paper_harvester::harvester::{
    ContinuousScheduler, FeedOrchestrator, HarvestError, HarvestStatus, TerminationReason,
};
use paper_harvester::output::{dataset_path, Dataset};
use paper_harvester::resume::CheckpointStore;
use paper_harvester::shutdown::ShutdownCoordinator;
use paper_harvester::PublishCalendar;

use crate::support::{fast_config, feed, publish_date, records, FakeProvider};

fn scheduler(provider: &Arc<FakeProvider>, checkpoints: &TempDir, data: &TempDir, feeds: &[&str]) -> ContinuousScheduler {
    let orchestrator = FeedOrchestrator::new(
        provider.clone(),
        CheckpointStore::new(checkpoints.path()),
        fast_config(),
    );
    ContinuousScheduler::new(
        orchestrator,
        PublishCalendar::default(),
        feeds.iter().map(|raw| feed(raw)).collect(),
        data.path(),
    )
}

#[tokio::test]
async fn harvest_dates_merges_feeds_into_one_dataset() {
    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    // 2401.00150..2401.00159 are cross-listed in both feeds
    let provider = Arc::new(
        FakeProvider::new()
            .with_records("cs.AI", records(1, 159))
            .with_records("cs.LG", records(150, 60)),
    );

    let datasets = scheduler(&provider, &checkpoints, &data, &["cs.AI", "cs.LG"])
        .harvest_dates(&[publish_date()])
        .await
        .unwrap();

    assert_eq!(datasets.len(), 1);
    let dataset = &datasets[0];
    assert_eq!(dataset.overall_status, HarvestStatus::Complete);
    assert_eq!(dataset.total_records, 209);
    let shared = dataset
        .records
        .iter()
        .find(|r| r.record.id.as_str() == "2401.00150")
        .unwrap();
    assert_eq!(shared.feeds.len(), 2);

    let written = Dataset::load(&dataset_path(data.path(), publish_date())).unwrap();
    assert_eq!(written.total_records, 209);
    assert_eq!(written.feeds.len(), 2);
}

#[tokio::test]
async fn failed_feed_does_not_block_siblings() {
    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let provider = Arc::new(
        FakeProvider::new()
            .with_records("cs.AI", records(1, 30))
            .with_records("cs.LG", records(500, 30))
            .failing("cs.LG", 0, 1, FetcherError::ApiError("malformed query".to_string())),
    );

    let datasets = scheduler(&provider, &checkpoints, &data, &["cs.AI", "cs.LG"])
        .harvest_dates(&[publish_date()])
        .await
        .unwrap();

    let dataset = &datasets[0];
    assert_eq!(dataset.overall_status, HarvestStatus::PartialComplete);
    assert_eq!(dataset.feeds[&feed("cs.AI")].status, HarvestStatus::Complete);
    assert_eq!(dataset.feeds[&feed("cs.LG")].status, HarvestStatus::Failed);
    assert_eq!(dataset.total_records, 30);
}

#[tokio::test]
async fn errored_feed_is_listed_as_failed() {
    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let provider = Arc::new(
        FakeProvider::new()
            .with_records("cs.AI", records(1, 30))
            .with_records("cs.LG", records(500, 30)),
    );
    let store = CheckpointStore::new(checkpoints.path());
    std::fs::write(store.checkpoint_path(&feed("cs.LG"), publish_date()), "{ not json").unwrap();

    let datasets = scheduler(&provider, &checkpoints, &data, &["cs.AI", "cs.LG"])
        .harvest_dates(&[publish_date()])
        .await
        .unwrap();

    let dataset = &datasets[0];
    assert_eq!(dataset.overall_status, HarvestStatus::PartialComplete);
    assert_eq!(dataset.feeds[&feed("cs.AI")].status, HarvestStatus::Complete);
    let errored = &dataset.feeds[&feed("cs.LG")];
    assert_eq!(errored.status, HarvestStatus::Failed);
    assert_eq!(errored.reason, TerminationReason::LocalError);
    assert!(errored
        .last_error
        .as_deref()
        .is_some_and(|e| e.starts_with("checkpoint error")));
    assert!(provider.offsets("cs.LG").is_empty());

    let written = Dataset::load(&dataset_path(data.path(), publish_date())).unwrap();
    assert_eq!(written.feeds.len(), 2);
}

#[tokio::test]
async fn non_operating_date_rejected_before_any_fetch() {
    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let provider = Arc::new(FakeProvider::new().with_records("cs.AI", records(1, 10)));
    let saturday = NaiveDate::from_ymd_opt(2024, 1, 13).unwrap();

    let result = scheduler(&provider, &checkpoints, &data, &["cs.AI"])
        .harvest_dates(&[publish_date(), saturday])
        .await;

    assert!(matches!(result, Err(HarvestError::Window(_))));
    assert_eq!(provider.call_count(), 0);
    assert!(!dataset_path(data.path(), publish_date()).exists());
}

#[tokio::test]
async fn completed_windows_are_reused_across_cycles() {
    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let provider = Arc::new(FakeProvider::new().with_records("cs.AI", records(1, 40)));
    let scheduler = scheduler(&provider, &checkpoints, &data, &["cs.AI"]);

    scheduler.harvest_dates(&[publish_date()]).await.unwrap();
    let datasets = scheduler.harvest_dates(&[publish_date()]).await.unwrap();

    assert_eq!(provider.call_count(), 1);
    assert_eq!(datasets[0].overall_status, HarvestStatus::Complete);
    assert_eq!(datasets[0].total_records, 40);
}

#[test]
fn cycle_covers_latest_closed_window_and_its_predecessor() {
    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let provider = Arc::new(FakeProvider::new());
    let scheduler = scheduler(&provider, &checkpoints, &data, &["cs.AI"]);
    let date = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();

    // Monday 15:00 New York, after the cutoff
    let after_cutoff = Utc.with_ymd_and_hms(2024, 1, 15, 20, 0, 0).unwrap();
    assert_eq!(
        scheduler.windows_for_cycle(after_cutoff).unwrap(),
        vec![date(12), date(15)]
    );

    // Monday 13:00 New York, before the cutoff
    let before_cutoff = Utc.with_ymd_and_hms(2024, 1, 15, 18, 0, 0).unwrap();
    assert_eq!(
        scheduler.windows_for_cycle(before_cutoff).unwrap(),
        vec![date(11), date(12)]
    );
}

#[tokio::test]
async fn cancelled_cycle_publishes_no_dataset() {
    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let provider = Arc::new(
        FakeProvider::new()
            .with_records("cs.AI", records(1, 250))
            .shutdown_on_call(1, shutdown.clone()),
    );

    let result = scheduler(&provider, &checkpoints, &data, &["cs.AI"])
        .with_shutdown(shutdown)
        .harvest_dates(&[publish_date()])
        .await;

    assert!(matches!(result, Err(HarvestError::Cancelled)));
    assert!(!dataset_path(data.path(), publish_date()).exists());
    let checkpoint = CheckpointStore::new(checkpoints.path())
        .load(&feed("cs.AI"), publish_date())
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.accumulated(), 100);
}

#[tokio::test]
async fn date_missing_an_interrupted_feed_is_not_published() {
    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let provider = Arc::new(
        FakeProvider::new()
            .with_records("cs.LG", records(1, 5))
            .with_records("cs.AI", records(100, 5))
            .shutdown_on_call(3, shutdown.clone()),
    );
    let earlier = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();

    let result = scheduler(&provider, &checkpoints, &data, &["cs.LG", "cs.AI"])
        .with_shutdown(shutdown)
        .harvest_dates(&[earlier, publish_date()])
        .await;

    assert!(matches!(result, Err(HarvestError::Cancelled)));
    // The third request lands before both feeds have finished the later date
    assert!(!dataset_path(data.path(), publish_date()).exists());
    for date in [earlier, publish_date()] {
        let path = dataset_path(data.path(), date);
        if path.exists() {
            let dataset = Dataset::load(&path).unwrap();
            assert_eq!(dataset.feeds.len(), 2);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn run_returns_when_shutdown_requested_during_sleep() {
    let checkpoints = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let provider = Arc::new(FakeProvider::new().with_records("cs.AI", records(1, 5)));
    let scheduler = scheduler(&provider, &checkpoints, &data, &["cs.AI"])
        .with_interval(Duration::from_secs(3600))
        .with_shutdown(shutdown.clone());

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(600)).await;
        trigger.request_shutdown();
    });

    let result = tokio::time::timeout(Duration::from_secs(7200), scheduler.run()).await;
    assert!(matches!(result, Ok(Ok(()))));
    // One cycle covers two windows
    assert_eq!(provider.call_count(), 2);
}
