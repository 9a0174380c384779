//! Continuous multi-feed harvesting
//!
//! Each cycle harvests the latest closed publish window and the one before
//! it for every configured feed. Feeds run concurrently, one future each;
//! the shared throttle is the only thing bounding them. Within a feed the
//! dates run oldest first.

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use super::config::DEFAULT_CYCLE_INTERVAL_SECS;
use super::job::HarvestResult;
use super::orchestrator::FeedOrchestrator;
use super::HarvestError;
use crate::identifier::FeedId;
use crate::output::Dataset;
use crate::shutdown::{self, cancellable_sleep, SharedShutdown};
use crate::window::{PublishCalendar, Window};

/// Runs feed harvests for the latest windows, once or on an interval
pub struct ContinuousScheduler {
    orchestrator: FeedOrchestrator,
    calendar: PublishCalendar,
    feeds: Vec<FeedId>,
    output_dir: PathBuf,
    interval: Duration,
    shutdown: Option<SharedShutdown>,
}

impl ContinuousScheduler {
    /// Create a scheduler writing datasets into `output_dir`
    pub fn new(
        orchestrator: FeedOrchestrator,
        calendar: PublishCalendar,
        feeds: Vec<FeedId>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            orchestrator,
            calendar,
            feeds,
            output_dir: output_dir.into(),
            interval: Duration::from_secs(DEFAULT_CYCLE_INTERVAL_SECS),
            shutdown: shutdown::get_global_shutdown(),
        }
    }

    /// Set the sleep between cycles
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Attach a shared shutdown handle; it is passed on to the orchestrator
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.orchestrator = self.orchestrator.with_shutdown(shutdown.clone());
        self.shutdown = Some(shutdown);
        self
    }

    /// Configured feeds
    pub fn feeds(&self) -> &[FeedId] {
        &self.feeds
    }

    /// Directory datasets are written to
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Publish dates one cycle at `now` covers, oldest first
    pub fn windows_for_cycle(&self, now: DateTime<Utc>) -> Result<Vec<NaiveDate>, HarvestError> {
        let latest = self.calendar.latest_closed_date(now)?;
        let previous = self.calendar.previous_operating_day(latest)?;
        Ok(vec![previous, latest])
    }

    /// Run one cycle for the windows closed at `now`
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<Vec<Dataset>, HarvestError> {
        let dates = self.windows_for_cycle(now)?;
        info!(
            dates = ?dates,
            feeds = self.feeds.len(),
            "Starting harvest cycle"
        );
        self.harvest_dates(&dates).await
    }

    /// Harvest every feed for `dates` and write one dataset per date
    ///
    /// All windows are computed before the first request, so a date that
    /// is not an operating day fails the call without touching the network.
    /// A failed feed never stops the others, and a feed whose harvest
    /// errored is still listed as Failed. A date on which any feed was
    /// interrupted by a shutdown request gets no dataset and the call
    /// returns [`HarvestError::Cancelled`].
    pub async fn harvest_dates(&self, dates: &[NaiveDate]) -> Result<Vec<Dataset>, HarvestError> {
        let mut plan: Vec<(FeedId, Vec<Window>)> = Vec::with_capacity(self.feeds.len());
        for feed in &self.feeds {
            let mut windows = Vec::with_capacity(dates.len());
            for date in dates {
                windows.push(self.calendar.window_for(*date, feed)?);
            }
            plan.push((feed.clone(), windows));
        }

        let outcomes = join_all(
            plan.iter()
                .map(|(feed, windows)| self.harvest_feed(feed, windows)),
        )
        .await;

        let mut cancelled = false;
        let mut datasets = Vec::new();
        for date in dates {
            let mut results: Vec<HarvestResult> = Vec::new();
            let mut errors: Vec<(FeedId, String)> = Vec::new();
            let mut date_cancelled = false;
            for ((feed, _), feed_outcomes) in plan.iter().zip(&outcomes) {
                let outcome = feed_outcomes
                    .iter()
                    .find(|(window, _)| window.publish_date() == *date)
                    .map(|(_, outcome)| outcome);
                match outcome {
                    Some(Ok(result)) => results.push(result.clone()),
                    Some(Err(HarvestError::Cancelled)) | None => date_cancelled = true,
                    Some(Err(e)) => errors.push((feed.clone(), e.to_string())),
                }
            }

            if date_cancelled {
                warn!(publish_date = %date, "Harvest interrupted; dataset not written");
                cancelled = true;
                continue;
            }

            let mut dataset = Dataset::merge(*date, &results);
            for (feed, error) in errors {
                dataset.record_feed_error(feed, &error);
            }
            dataset.write(&self.output_dir)?;
            datasets.push(dataset);
        }

        if cancelled {
            return Err(HarvestError::Cancelled);
        }
        Ok(datasets)
    }

    /// Harvest one feed's windows in order, stopping at cancellation
    async fn harvest_feed(
        &self,
        feed: &FeedId,
        windows: &[Window],
    ) -> Vec<(Window, Result<HarvestResult, HarvestError>)> {
        let mut outcomes = Vec::with_capacity(windows.len());
        for (index, window) in windows.iter().enumerate() {
            let outcome = self.orchestrator.harvest(window).await;
            match &outcome {
                Ok(result) => info!(
                    feed = %feed,
                    publish_date = %window.publish_date(),
                    status = %result.status,
                    records = result.records.len(),
                    "Feed harvest finished"
                ),
                Err(HarvestError::Cancelled) => {
                    // Later windows are never started and count as interrupted too
                    outcomes.extend(
                        windows[index..]
                            .iter()
                            .map(|window| (window.clone(), Err(HarvestError::Cancelled))),
                    );
                    break;
                }
                Err(e) => error!(
                    feed = %feed,
                    publish_date = %window.publish_date(),
                    error = %e,
                    "Feed harvest failed"
                ),
            }
            outcomes.push((window.clone(), outcome));
        }
        outcomes
    }

    /// Run cycles until shutdown is requested
    ///
    /// Cycle-level failures other than configuration errors are logged and
    /// retried on the next cycle.
    pub async fn run(&self) -> Result<(), HarvestError> {
        info!(
            interval_secs = self.interval.as_secs(),
            feeds = ?self.feeds.iter().map(FeedId::as_str).collect::<Vec<_>>(),
            "Continuous harvesting started"
        );

        loop {
            if self.shutdown_requested() {
                break;
            }

            match self.run_cycle(Utc::now()).await {
                Ok(datasets) => info!(
                    datasets = datasets.len(),
                    records = datasets.iter().map(|d| d.total_records).sum::<usize>(),
                    "Harvest cycle finished"
                ),
                Err(HarvestError::Cancelled) => break,
                Err(e @ (HarvestError::Configuration(_) | HarvestError::Window(_))) => {
                    return Err(e)
                }
                Err(e) => error!(error = %e, "Harvest cycle failed"),
            }

            info!(
                sleep_secs = self.interval.as_secs(),
                "Sleeping until next cycle"
            );
            if !cancellable_sleep(self.interval, self.shutdown.as_ref()).await {
                break;
            }
        }

        info!("Continuous harvesting stopped");
        Ok(())
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}
