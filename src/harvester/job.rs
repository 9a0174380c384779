//! Harvest outcome structures and phase tracking

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::identifier::FeedId;
use crate::resume::checkpoint::PageGap;
use crate::window::Window;
use crate::Record;

/// Terminal status of a feed harvest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestStatus {
    /// Every record the provider reports was captured
    Complete,
    /// Usable but not proven complete
    PartialComplete,
    /// Nothing usable, or a permanent error
    Failed,
}

impl HarvestStatus {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            HarvestStatus::Complete => "complete",
            HarvestStatus::PartialComplete => "partial_complete",
            HarvestStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for HarvestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a harvest stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Accumulated count reached the reported total with no gaps
    CountReached,
    /// Consecutive full passes found nothing new
    Saturated,
    /// Attempts ran out with a high enough ratio and no gaps
    AcceptedPartial,
    /// Attempt budget exhausted
    AttemptsExhausted,
    /// Wall-clock ceiling reached
    WallClockCeiling,
    /// Offset ceiling reached
    OffsetCeiling,
    /// Provider rejected the request
    PermanentError,
    /// Checkpoint or spool could not be read or written
    LocalError,
}

/// Details attached to every harvest result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Why the harvest stopped
    pub reason: TerminationReason,
    /// Pages still missing
    pub gaps: Vec<PageGap>,
    /// Most recent fetch error, if any
    pub last_error: Option<String>,
    /// Distinct records captured
    pub accumulated: u64,
    /// Latest provider total
    pub reported_total: Option<u64>,
    /// Consecutive zero-delta passes at termination
    pub zero_delta_passes: u32,
}

impl Diagnostic {
    /// Offsets of the outstanding gaps
    pub fn gap_offsets(&self) -> Vec<u64> {
        self.gaps.iter().map(|gap| gap.offset).collect()
    }
}

/// Result of harvesting one feed for one window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestResult {
    /// Feed harvested
    pub feed: FeedId,
    /// Window harvested
    pub window: Window,
    /// Terminal status
    pub status: HarvestStatus,
    /// Deduplicated records in first-seen order
    pub records: Vec<Record>,
    /// Termination details
    pub diagnostic: Diagnostic,
    /// Passes run, across all invocations
    pub attempts: u32,
    /// Time spent in this invocation, in milliseconds
    pub elapsed_ms: u64,
}

/// Lifecycle of one feed harvest
///
/// `Idle → Fetching ⇄ Retrying → {Complete | PartialComplete | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum FeedPhase {
    /// Not started
    #[default]
    Idle,
    /// Waiting on a page
    Fetching {
        /// Page offset
        offset: u64,
    },
    /// Backing off before another try of a page
    Retrying {
        /// Page offset
        offset: u64,
        /// Attempt about to be made
        attempt: u32,
    },
    /// Terminal: complete
    Complete,
    /// Terminal: partially complete
    PartialComplete,
    /// Terminal: failed
    Failed,
}

impl FeedPhase {
    /// Whether the phase is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FeedPhase::Complete | FeedPhase::PartialComplete | FeedPhase::Failed
        )
    }

    /// Whether `next` is a legal successor
    pub fn can_transition_to(&self, next: &FeedPhase) -> bool {
        match (self, next) {
            (current, _) if current.is_terminal() => false,
            (_, FeedPhase::Idle) => false,
            (FeedPhase::Idle, FeedPhase::Retrying { .. }) => false,
            (FeedPhase::Retrying { offset, .. }, FeedPhase::Fetching { offset: next }) => offset == next,
            _ => true,
        }
    }

    /// Move to `next`, returning whether the transition was legal
    ///
    /// Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: FeedPhase) -> bool {
        if self.can_transition_to(&next) {
            *self = next;
            true
        } else {
            warn!(from = ?self, to = ?next, "Ignoring illegal phase transition");
            false
        }
    }

    /// Terminal phase for a status
    pub fn terminal(status: HarvestStatus) -> FeedPhase {
        match status {
            HarvestStatus::Complete => FeedPhase::Complete,
            HarvestStatus::PartialComplete => FeedPhase::PartialComplete,
            HarvestStatus::Failed => FeedPhase::Failed,
        }
    }
}
