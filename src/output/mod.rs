//! Dataset output
//!
//! Merges the per-feed results for one publish date into a single
//! globally deduplicated dataset and writes it as `papers_<date>.json`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::harvester::job::{HarvestResult, HarvestStatus, TerminationReason};
use crate::identifier::FeedId;
use crate::{metrics, Record, RecordId};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Dataset file path for a publish date
pub fn dataset_path(dir: &Path, publish_date: NaiveDate) -> PathBuf {
    dir.join(format!("papers_{}.json", publish_date.format("%Y-%m-%d")))
}

/// A record plus the feeds that returned it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    /// The record, newest revision seen
    #[serde(flatten)]
    pub record: Record,
    /// Feeds whose harvest yielded this record
    pub feeds: BTreeSet<FeedId>,
}

/// Per-feed outcome carried in the dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSummary {
    /// Terminal status
    pub status: HarvestStatus,
    /// Why the harvest stopped
    pub reason: TerminationReason,
    /// Records the feed harvested, before cross-feed dedup
    pub records: usize,
    /// Latest provider total
    pub reported_total: Option<u64>,
    /// Offsets of unresolved pages
    pub gap_offsets: Vec<u64>,
    /// Most recent fetch error
    pub last_error: Option<String>,
    /// Passes run across all invocations
    pub attempts: u32,
}

/// Cross-feed merge for one publish date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Publish date
    pub publish_date: NaiveDate,
    /// Window lower bound
    pub window_from: Option<DateTime<Utc>>,
    /// Window upper bound
    pub window_to: Option<DateTime<Utc>>,
    /// When the dataset was assembled
    pub generated_at: DateTime<Utc>,
    /// Complete only when every feed is complete
    pub overall_status: HarvestStatus,
    /// Outcome per feed
    pub feeds: BTreeMap<FeedId, FeedSummary>,
    /// Number of distinct records
    pub total_records: usize,
    /// Distinct records ordered by submission time
    pub records: Vec<DatasetRecord>,
}

impl Dataset {
    /// Merge feed results for one publish date
    ///
    /// Records are deduplicated by identifier across feeds; when two feeds
    /// returned different revisions the most recently updated one is kept.
    pub fn merge(publish_date: NaiveDate, results: &[HarvestResult]) -> Self {
        let mut merged: BTreeMap<RecordId, DatasetRecord> = BTreeMap::new();
        let mut feeds = BTreeMap::new();

        for result in results {
            for record in &result.records {
                match merged.get_mut(&record.id) {
                    Some(existing) => {
                        existing.feeds.insert(result.feed.clone());
                        if record.updated_at > existing.record.updated_at {
                            existing.record = record.clone();
                        }
                    }
                    None => {
                        merged.insert(
                            record.id.clone(),
                            DatasetRecord {
                                record: record.clone(),
                                feeds: [result.feed.clone()].into_iter().collect(),
                            },
                        );
                    }
                }
            }

            feeds.insert(
                result.feed.clone(),
                FeedSummary {
                    status: result.status,
                    reason: result.diagnostic.reason,
                    records: result.records.len(),
                    reported_total: result.diagnostic.reported_total,
                    gap_offsets: result.diagnostic.gap_offsets(),
                    last_error: result.diagnostic.last_error.clone(),
                    attempts: result.attempts,
                },
            );
        }

        let mut records: Vec<DatasetRecord> = merged.into_values().collect();
        records.sort_by(|a, b| {
            (a.record.submitted_at, &a.record.id).cmp(&(b.record.submitted_at, &b.record.id))
        });

        let first_window = results.first().map(|result| &result.window);
        Self {
            publish_date,
            window_from: first_window.map(|window| window.from()),
            window_to: first_window.map(|window| window.to()),
            generated_at: Utc::now(),
            overall_status: overall_status(results.iter().map(|result| result.status)),
            feeds,
            total_records: records.len(),
            records,
        }
    }

    /// List a feed whose harvest ended in an error instead of a result
    ///
    /// The feed is reported Failed with the error text and the overall
    /// status is recomputed over every listed feed.
    pub fn record_feed_error(&mut self, feed: FeedId, error: &str) {
        self.feeds.insert(
            feed,
            FeedSummary {
                status: HarvestStatus::Failed,
                reason: TerminationReason::LocalError,
                records: 0,
                reported_total: None,
                gap_offsets: Vec::new(),
                last_error: Some(error.to_string()),
                attempts: 0,
            },
        );
        self.overall_status = overall_status(self.feeds.values().map(|summary| summary.status));
    }

    /// Write the dataset atomically into `dir`, returning the file path
    pub fn write(&self, dir: &Path) -> OutputResult<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| OutputError::IoError(e.to_string()))?;
        let path = dataset_path(dir, self.publish_date);

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| OutputError::IoError(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(&json)
            .map_err(|e| OutputError::IoError(format!("Failed to write dataset: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync dataset: {e}")))?;
        temp_file
            .persist(&path)
            .map_err(|e| OutputError::IoError(format!("Failed to persist dataset: {e}")))?;

        metrics::record_dataset_written(self.total_records);
        info!(
            path = %path.display(),
            records = self.total_records,
            status = %self.overall_status,
            "Dataset written"
        );
        Ok(path)
    }

    /// Read a dataset file
    pub fn load(path: &Path) -> OutputResult<Self> {
        debug!(path = %path.display(), "Loading dataset");
        let contents =
            std::fs::read_to_string(path).map_err(|e| OutputError::IoError(e.to_string()))?;
        serde_json::from_str(&contents).map_err(|e| OutputError::SerializationError(e.to_string()))
    }
}

/// Combined status of several feeds
///
/// Complete only if every feed is; Failed if every feed failed or there
/// were none; otherwise PartialComplete.
pub fn overall_status<I: IntoIterator<Item = HarvestStatus>>(statuses: I) -> HarvestStatus {
    let mut any = false;
    let mut all_complete = true;
    let mut all_failed = true;
    for status in statuses {
        any = true;
        all_complete &= status == HarvestStatus::Complete;
        all_failed &= status == HarvestStatus::Failed;
    }
    match (any, all_complete, all_failed) {
        (false, _, _) | (_, _, true) => HarvestStatus::Failed,
        (_, true, _) => HarvestStatus::Complete,
        _ => HarvestStatus::PartialComplete,
    }
}
