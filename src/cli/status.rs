//! Status command
//!
//! Reports checkpoint progress for one publish window without touching the
//! network. Feeds that have never been harvested show as not started.

use chrono::{NaiveDate, Utc};
use clap::Parser;
use serde::Serialize;

use super::{parse_date, parse_feeds, Cli, CliError, OutputFormat};
use crate::harvester::{HarvestStatus, TerminationReason};
use crate::identifier::FeedId;
use crate::output::OutputError;
use crate::resume::Checkpoint;

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Publish date to report on (YYYY-MM-DD); defaults to the latest closed window
    #[arg(long, value_parser = parse_date)]
    pub date: Option<NaiveDate>,

    /// Feeds to report on (comma separated); defaults to the standard set
    #[arg(long, value_delimiter = ',')]
    pub feeds: Vec<String>,
}

/// Progress of one feed for the requested window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedProgress {
    /// Feed
    pub feed: FeedId,
    /// Whether a checkpoint exists
    pub started: bool,
    /// Whether the window was verified complete
    pub complete: bool,
    /// Records accumulated
    pub accumulated: u64,
    /// Latest provider total
    pub reported_total: Option<u64>,
    /// Unresolved gap offsets
    pub gap_offsets: Vec<u64>,
    /// Passes run
    pub attempts: u32,
    /// Outcome of the last finished invocation
    pub last_status: Option<HarvestStatus>,
    /// Termination reason of the last finished invocation
    pub last_reason: Option<TerminationReason>,
    /// Most recent fetch error
    pub last_error: Option<String>,
}

impl FeedProgress {
    fn not_started(feed: FeedId) -> Self {
        Self {
            feed,
            started: false,
            complete: false,
            accumulated: 0,
            reported_total: None,
            gap_offsets: Vec::new(),
            attempts: 0,
            last_status: None,
            last_reason: None,
            last_error: None,
        }
    }

    fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            feed: checkpoint.feed.clone(),
            started: true,
            complete: checkpoint.is_complete(),
            accumulated: checkpoint.accumulated(),
            reported_total: checkpoint.reported_total,
            gap_offsets: checkpoint.gaps.iter().map(|gap| gap.offset).collect(),
            attempts: checkpoint.attempts,
            last_status: checkpoint.last_status,
            last_reason: checkpoint.last_reason,
            last_error: checkpoint.last_error.clone(),
        }
    }

    fn label(&self) -> &'static str {
        match (self.started, self.complete, self.last_status) {
            (false, _, _) => "not started",
            (_, true, _) => "complete",
            (_, _, Some(HarvestStatus::PartialComplete)) => "partial",
            (_, _, Some(HarvestStatus::Failed)) => "failed",
            _ => "in progress",
        }
    }
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let feeds = parse_feeds(&self.feeds)?;
        let date = match self.date {
            Some(date) => date,
            None => cli.calendar().latest_closed_date(Utc::now())?,
        };

        let progress = collect_progress(cli, &feeds, date)?;
        match cli.output_format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "publish_date": date,
                    "feeds": progress,
                });
                let line = serde_json::to_string(&output)
                    .map_err(|e| OutputError::SerializationError(e.to_string()))?;
                println!("{line}");
            }
            OutputFormat::Human => {
                println!("Publish date {date}");
                for feed in &progress {
                    let total = feed
                        .reported_total
                        .map(|total| total.to_string())
                        .unwrap_or_else(|| "?".to_string());
                    println!(
                        "  {:<12} {:<12} {:>6}/{:<6} attempts {}",
                        feed.feed.as_str(),
                        feed.label(),
                        feed.accumulated,
                        total,
                        feed.attempts
                    );
                    if !feed.gap_offsets.is_empty() {
                        println!("  {:<12} gaps at offsets {:?}", "", feed.gap_offsets);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Checkpoint progress for each feed, in the order given
pub fn collect_progress(
    cli: &Cli,
    feeds: &[FeedId],
    date: NaiveDate,
) -> Result<Vec<FeedProgress>, CliError> {
    let store = cli.checkpoint_store();
    let mut progress = Vec::with_capacity(feeds.len());
    for feed in feeds {
        let entry = match store.load(feed, date)? {
            Some(checkpoint) => FeedProgress::from_checkpoint(&checkpoint),
            None => FeedProgress::not_started(feed.clone()),
        };
        progress.push(entry);
    }
    Ok(progress)
}
