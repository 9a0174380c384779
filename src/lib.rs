//! # Paper Harvester Library
//!
//! Harvests bibliographic metadata records from the arXiv query API, one
//! category feed at a time, and keeps harvesting a publication window until
//! every record the provider reports for it has been captured exactly once.
//!
//! ## Features
//!
//! - **Window Calendar**: DST-aware submission windows that widen across weekends and holidays
//! - **Shared Throttle**: one minimum inter-request spacing across all concurrent feeds
//! - **Bounded Retries**: per-page retry with linear backoff, failed pages recorded as gaps
//! - **Completeness Verification**: count, saturation and partial-acceptance rules
//! - **Resume Capability**: crash-safe checkpoints plus a record spool per (feed, window)
//! - **Continuous Mode**: repeated cycles over the latest closed windows with graceful shutdown
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use paper_harvester::fetcher::arxiv_http::ArxivClient;
//! use paper_harvester::harvester::{FeedOrchestrator, HarvestConfig};
//! use paper_harvester::resume::CheckpointStore;
//! use paper_harvester::{FeedId, PublishCalendar};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let feed = FeedId::parse("cs.AI")?;
//! let date = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
//! let window = PublishCalendar::default().window_for(date, &feed)?;
//!
//! let orchestrator = FeedOrchestrator::new(
//!     Arc::new(ArxivClient::shared()),
//!     CheckpointStore::new(".checkpoints"),
//!     HarvestConfig::default(),
//! );
//! let result = orchestrator.harvest(&window).await?;
//! println!("{}: {:?} with {} records", feed, result.status, result.records.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`window`] - Submission window calendar
//! - [`identifier`] - Feed identifier parsing and validation
//! - [`fetcher`] - Page sources (the arXiv Atom client and its parser)
//! - [`harvester`] - Rate limiting, retries, accumulation, verification and orchestration
//! - [`resume`] - Checkpoint persistence and the single-instance lock
//! - [`output`] - Cross-feed dataset merge and file output

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// CLI command implementations
pub mod cli;

/// Page sources
pub mod fetcher;

/// Harvest orchestration
pub mod harvester;

/// Feed identifier parsing and validation
pub mod identifier;

/// Observability metrics
pub mod metrics;

/// Dataset output
pub mod output;

/// Checkpoint persistence
pub mod resume;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Submission window calendar
pub mod window;

// Re-export commonly used types
pub use identifier::FeedId;
pub use window::{PublishCalendar, Window};

/// Revision-insensitive record identifier
///
/// `2401.01234v3` and `2401.01234` name the same record, as do
/// `hep-th/9901001v1` and `hep-th/9901001`.
///
/// # Examples
///
/// ```
/// use paper_harvester::RecordId;
///
/// let id = RecordId::from_url("http://arxiv.org/abs/2401.01234v3");
/// assert_eq!(id.as_str(), "2401.01234");
/// assert_eq!(id, RecordId::new("2401.01234"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create an identifier, dropping any revision suffix
    pub fn new(raw: &str) -> Self {
        let (base, _) = split_version(raw.trim());
        Self(base.to_string())
    }

    /// Create an identifier from an abstract URL such as `http://arxiv.org/abs/2401.01234v2`
    pub fn from_url(url: &str) -> Self {
        Self::new(strip_abs_prefix(url))
    }

    /// Identifier text without revision suffix
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn strip_abs_prefix(url: &str) -> &str {
    match url.rfind("/abs/") {
        Some(idx) => &url[idx + "/abs/".len()..],
        None => url,
    }
}

/// Split `2401.01234v3` into (`2401.01234`, Some(3))
///
/// A trailing `v<digits>` only counts as a revision when it follows a digit,
/// so archive names that happen to end in `v` are left alone.
pub fn split_version(raw: &str) -> (&str, Option<u32>) {
    if let Some(idx) = raw.rfind('v') {
        let (base, suffix) = raw.split_at(idx);
        let digits = &suffix[1..];
        let follows_digit = base.chars().last().is_some_and(|c| c.is_ascii_digit());
        if follows_digit && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(version) = digits.parse::<u32>() {
                return (base, Some(version));
            }
        }
    }
    (raw, None)
}

/// Revision number carried by an abstract URL, if any
pub fn version_from_url(url: &str) -> Option<u32> {
    split_version(strip_abs_prefix(url).trim()).1
}

/// Kind of link attached to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Abstract landing page
    Abstract,
    /// PDF rendition
    Pdf,
    /// DOI resolver link
    Doi,
    /// Anything else the provider attaches
    Other,
}

/// Source link of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLink {
    /// Link target
    pub href: String,
    /// Link kind
    pub kind: LinkKind,
}

/// One bibliographic metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Revision-insensitive identity
    pub id: RecordId,
    /// Revision number the provider returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Title with whitespace collapsed
    pub title: String,
    /// Authors in provider order
    pub authors: Vec<String>,
    /// Abstract text
    pub summary: String,
    /// Category tags
    pub categories: BTreeSet<String>,
    /// First submission instant
    pub submitted_at: DateTime<Utc>,
    /// Last revision instant
    pub updated_at: DateTime<Utc>,
    /// Source links
    #[serde(default)]
    pub links: Vec<RecordLink>,
}

impl Record {
    /// Validate record integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("Record identifier cannot be empty".to_string());
        }
        if self.updated_at < self.submitted_at {
            return Err(format!(
                "Record {} revised ({}) before it was submitted ({})",
                self.id, self.updated_at, self.submitted_at
            ));
        }
        Ok(())
    }

    /// First link of the given kind
    pub fn link(&self, kind: LinkKind) -> Option<&str> {
        self.links
            .iter()
            .find(|link| link.kind == kind)
            .map(|link| link.href.as_str())
    }
}
