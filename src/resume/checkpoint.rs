//! Per-(feed, window) checkpoint
//!
//! The accumulated identifier set only grows; a checkpoint is marked
//! completed only after the completeness verifier accepts it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::store::CheckpointError;
use crate::harvester::job::{HarvestStatus, TerminationReason};
use crate::identifier::FeedId;
use crate::window::Window;
use crate::RecordId;

/// Current checkpoint schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// A page offset that failed every attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageGap {
    /// Page offset
    pub offset: u64,
    /// Attempts spent on this page, across passes
    pub attempts: u32,
    /// Last error seen for this page
    pub last_error: String,
}

/// Checkpoint key for a (feed, publish date) pair
pub fn checkpoint_key(feed: &FeedId, publish_date: NaiveDate) -> String {
    format!("{}__{}", feed.to_filesystem_safe(), publish_date.format("%Y-%m-%d"))
}

/// Durable harvest progress for one (feed, window)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    schema_version: String,
    /// Feed harvested
    pub feed: FeedId,
    /// Publish date of the window
    pub publish_date: NaiveDate,
    /// Window lower bound
    pub window_from: DateTime<Utc>,
    /// Window upper bound
    pub window_to: DateTime<Utc>,
    /// Distinct record identifiers accumulated so far
    pub record_ids: BTreeSet<RecordId>,
    /// Latest provider total
    pub reported_total: Option<u64>,
    /// Passes started, across invocations
    pub attempts: u32,
    /// Consecutive full passes without new records or gaps
    pub zero_delta_passes: u32,
    /// Unresolved page gaps
    pub gaps: Vec<PageGap>,
    /// Next offset of an interrupted pass
    pub cursor: Option<u64>,
    /// Highest offset a pass has swept past
    pub frontier: u64,
    /// When the last pass started
    pub last_attempt: Option<DateTime<Utc>>,
    /// Outcome of the last finished invocation
    pub last_status: Option<HarvestStatus>,
    /// Termination reason of the last finished invocation
    pub last_reason: Option<TerminationReason>,
    /// Most recent fetch error
    pub last_error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last save time
    pub updated_at: DateTime<Utc>,
    /// Set once the verifier declared the window complete
    pub completed_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Fresh checkpoint for a window
    pub fn new(window: &Window) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            feed: window.feed().clone(),
            publish_date: window.publish_date(),
            window_from: window.from(),
            window_to: window.to(),
            record_ids: BTreeSet::new(),
            reported_total: None,
            attempts: 0,
            zero_delta_passes: 0,
            gaps: Vec::new(),
            cursor: None,
            frontier: 0,
            last_attempt: None,
            last_status: None,
            last_reason: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Storage key
    pub fn key(&self) -> String {
        checkpoint_key(&self.feed, self.publish_date)
    }

    /// Schema version this checkpoint was written with
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Validate schema version (accepts current version only)
    pub fn validate_schema_version(&self) -> Result<(), CheckpointError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(CheckpointError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }

    /// Whether the checkpoint belongs to this window
    pub fn matches(&self, window: &Window) -> bool {
        &self.feed == window.feed()
            && self.publish_date == window.publish_date()
            && self.window_from == window.from()
            && self.window_to == window.to()
    }

    /// Distinct records accumulated
    pub fn accumulated(&self) -> u64 {
        self.record_ids.len() as u64
    }

    /// Whether the window was declared complete
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Add identifiers; existing ones are kept
    pub fn absorb_ids<'a, I: IntoIterator<Item = &'a RecordId>>(&mut self, ids: I) {
        self.record_ids.extend(ids.into_iter().cloned());
    }

    /// Record or refresh a gap at `offset`
    pub fn record_gap(&mut self, offset: u64, attempts: u32, last_error: String) {
        match self.gaps.iter_mut().find(|gap| gap.offset == offset) {
            Some(gap) => {
                gap.attempts += attempts;
                gap.last_error = last_error.clone();
            }
            None => {
                self.gaps.push(PageGap {
                    offset,
                    attempts,
                    last_error: last_error.clone(),
                });
                self.gaps.sort_by_key(|gap| gap.offset);
            }
        }
        self.last_error = Some(last_error);
    }

    /// Remove a gap that has been fetched; returns whether one was present
    pub fn resolve_gap(&mut self, offset: u64) -> bool {
        let before = self.gaps.len();
        self.gaps.retain(|gap| gap.offset != offset);
        self.gaps.len() != before
    }

    /// Record the outcome of an invocation
    pub fn finish(&mut self, status: HarvestStatus, reason: TerminationReason) {
        self.last_status = Some(status);
        self.last_reason = Some(reason);
        self.cursor = None;
        if status == HarvestStatus::Complete {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Bump the update timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
