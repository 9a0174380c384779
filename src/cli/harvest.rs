//! Harvest commands

use chrono::{NaiveDate, Utc};
use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};

use super::{parse_date, parse_feeds, Cli, CliError, OutputFormat};
use crate::harvester::{ContinuousScheduler, HarvestStatus};
use crate::output::{dataset_path, Dataset, OutputError};
use crate::resume::InstanceLock;
use crate::shutdown::SharedShutdown;

/// Arguments for a single harvest run
#[derive(Parser, Debug)]
pub struct RunOnceArgs {
    /// Publish date to harvest (YYYY-MM-DD); defaults to the latest closed window
    #[arg(long, value_parser = parse_date)]
    pub date: Option<NaiveDate>,

    /// Feeds to harvest (comma separated, e.g. cs.AI,stat.ML); defaults to the standard set
    #[arg(long, value_delimiter = ',')]
    pub feeds: Vec<String>,
}

/// Arguments for continuous harvesting
#[derive(Parser, Debug)]
pub struct RunContinuousArgs {
    /// Hours between cycles
    #[arg(long, default_value = "24", value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_hours: u64,

    /// Feeds to harvest (comma separated); defaults to the standard set
    #[arg(long, value_delimiter = ',')]
    pub feeds: Vec<String>,
}

impl RunOnceArgs {
    /// Execute the run-once command
    ///
    /// Fails when any feed ends Failed or when interrupted; partially
    /// complete feeds are reported but do not fail the command.
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let feeds = parse_feeds(&self.feeds)?;
        let calendar = cli.calendar();
        let date = match self.date {
            Some(date) => date,
            None => calendar.latest_closed_date(Utc::now())?,
        };
        // Reject non-operating dates before touching the checkpoint directory
        for feed in &feeds {
            calendar.window_for(date, feed)?;
        }

        let _lock = InstanceLock::try_acquire(&cli.checkpoint_dir)?;
        let store = cli.checkpoint_store();
        if cli.force {
            for feed in &feeds {
                info!(feed = %feed, publish_date = %date, "Discarding checkpoint (--force)");
                store.remove(feed, date)?;
            }
        }

        cli.init_metrics().await;
        let scheduler = ContinuousScheduler::new(
            cli.orchestrator(shutdown.clone())?,
            calendar,
            feeds,
            &cli.data_dir,
        )
        .with_shutdown(shutdown);

        let datasets = scheduler.harvest_dates(&[date]).await?;
        for dataset in &datasets {
            print_dataset_report(dataset, &dataset_path(&cli.data_dir, dataset.publish_date), cli.output_format)?;
        }

        let failed: Vec<String> = datasets
            .iter()
            .flat_map(|dataset| dataset.feeds.iter())
            .filter(|(_, summary)| summary.status == HarvestStatus::Failed)
            .map(|(feed, _)| feed.to_string())
            .collect();
        if !failed.is_empty() {
            return Err(CliError::Incomplete(format!(
                "harvest failed for {}",
                failed.join(", ")
            )));
        }
        Ok(())
    }
}

impl RunContinuousArgs {
    /// Execute the run-continuous command; returns once shutdown is requested
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let feeds = parse_feeds(&self.feeds)?;
        if cli.force {
            warn!("--force has no effect in continuous mode");
        }

        let _lock = InstanceLock::try_acquire(&cli.checkpoint_dir)?;
        cli.init_metrics().await;

        let scheduler = ContinuousScheduler::new(
            cli.orchestrator(shutdown.clone())?,
            cli.calendar(),
            feeds,
            &cli.data_dir,
        )
        .with_interval(Duration::from_secs(self.interval_hours * 60 * 60))
        .with_shutdown(shutdown);

        scheduler.run().await?;
        Ok(())
    }
}

fn print_dataset_report(
    dataset: &Dataset,
    path: &std::path::Path,
    format: OutputFormat,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "publish_date": dataset.publish_date,
                "window_from": dataset.window_from,
                "window_to": dataset.window_to,
                "overall_status": dataset.overall_status,
                "total_records": dataset.total_records,
                "output": path.display().to_string(),
                "feeds": dataset.feeds,
            });
            let line = serde_json::to_string(&output)
                .map_err(|e| OutputError::SerializationError(e.to_string()))?;
            println!("{line}");
        }
        OutputFormat::Human => {
            println!(
                "\nWindow {}: {} ({} records)",
                dataset.publish_date, dataset.overall_status, dataset.total_records
            );
            if let (Some(from), Some(to)) = (dataset.window_from, dataset.window_to) {
                println!("Submitted: {} .. {}", from.to_rfc3339(), to.to_rfc3339());
            }
            for (feed, summary) in &dataset.feeds {
                let total = summary
                    .reported_total
                    .map(|total| total.to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "  {:<12} {:<17} {:>6}/{:<6} attempts {}",
                    feed.as_str(),
                    summary.status.as_str(),
                    summary.records,
                    total,
                    summary.attempts
                );
                if !summary.gap_offsets.is_empty() {
                    println!("  {:<12} gaps at offsets {:?}", "", summary.gap_offsets);
                }
                if summary.status != HarvestStatus::Complete {
                    if let Some(error) = &summary.last_error {
                        println!("  {:<12} last error: {error}", "");
                    }
                }
            }
            println!("Output: {}", path.display());
        }
    }
    Ok(())
}
