//! Deduplicating page accumulation
//!
//! Records are keyed by their revision-insensitive identifier. The provider
//! total is a live value: it is replaced by every page, so a total seen on an
//! earlier page is never used as an upper bound.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::fetcher::FetchedPage;
use crate::{Record, RecordId};

/// Incremental, deduplicated record accumulator for one (feed, window)
#[derive(Debug, Clone)]
pub struct IncrementalAccumulator {
    page_size: usize,
    ids: HashSet<RecordId>,
    records: Vec<Record>,
    reported_total: Option<u64>,
    last_page_len: Option<usize>,
}

impl IncrementalAccumulator {
    /// Empty accumulator
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            ids: HashSet::new(),
            records: Vec::new(),
            reported_total: None,
            last_page_len: None,
        }
    }

    /// Rebuild from persisted state
    ///
    /// `spooled` records come first in their stored order; `ids` may name
    /// records whose bodies were never spooled, and they still count as
    /// accumulated.
    pub fn resume<'a, I>(
        page_size: usize,
        spooled: Vec<Record>,
        ids: I,
        reported_total: Option<u64>,
    ) -> Self
    where
        I: IntoIterator<Item = &'a RecordId>,
    {
        let mut accumulator = Self::new(page_size);
        for record in spooled {
            if accumulator.ids.insert(record.id.clone()) {
                accumulator.records.push(record);
            }
        }
        accumulator.ids.extend(ids.into_iter().cloned());
        accumulator.reported_total = reported_total;
        accumulator
    }

    /// Merge a page and return the records it added
    ///
    /// Records already accumulated are skipped, whatever their revision.
    pub fn merge(&mut self, page: FetchedPage) -> Vec<Record> {
        self.last_page_len = Some(page.records.len());

        if let Some(previous) = self.reported_total {
            if page.reported_total < previous {
                warn!(
                    previous = previous,
                    reported = page.reported_total,
                    accumulated = self.accumulated(),
                    "Provider total shrank; keeping accumulated records"
                );
            }
        }
        self.reported_total = Some(page.reported_total);

        let mut added = Vec::new();
        for record in page.records {
            if self.ids.insert(record.id.clone()) {
                added.push(record);
            }
        }
        self.records.extend(added.iter().cloned());

        debug!(
            added = added.len(),
            accumulated = self.accumulated(),
            reported_total = page.reported_total,
            "Page merged"
        );
        added
    }

    /// Whether the current pass should request another page
    ///
    /// False once a short page came back or the accumulated count reached
    /// the latest total.
    pub fn should_continue_paging(&self) -> bool {
        if self.last_page_len.is_some_and(|len| len < self.page_size) {
            return false;
        }
        match self.reported_total {
            Some(total) => self.accumulated() < total,
            None => true,
        }
    }

    /// Forget the last page length at the start of a new pass
    pub fn start_pass(&mut self) {
        self.last_page_len = None;
    }

    /// Distinct records accumulated
    pub fn accumulated(&self) -> u64 {
        self.ids.len() as u64
    }

    /// Latest provider total
    pub fn reported_total(&self) -> Option<u64> {
        self.reported_total
    }

    /// Accumulated identifiers
    pub fn ids(&self) -> impl Iterator<Item = &RecordId> {
        self.ids.iter()
    }

    /// Consume into the retained records
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// `accumulated / reported_total`, or `None` while the total is unknown or zero
    pub fn completion_ratio(&self) -> Option<f64> {
        match self.reported_total {
            Some(total) if total > 0 => Some(self.accumulated() as f64 / total as f64),
            _ => None,
        }
    }
}
