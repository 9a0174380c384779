//! Page sources
//!
//! A [`PageSource`] returns one page of records for a window plus the
//! provider's current total for the query. Failures are classified once,
//! here, as transient or permanent; everything above this layer decides
//! retries from [`FetcherError::kind`] alone.

use crate::window::Window;
use crate::Record;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod arxiv_http;
pub mod arxiv_parser;
pub mod shared_resources;

/// Failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worth retrying after a backoff
    Transient,
    /// Retrying cannot help
    Permanent,
}

/// Fetcher errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetcherError {
    /// Request timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Connection-level failure
    #[error("network error: {0}")]
    NetworkError(String),

    /// Provider asked us to slow down (429 or 503)
    #[error("throttled by provider (HTTP {status})")]
    Throttled {
        /// HTTP status
        status: u16,
    },

    /// Provider-side failure
    #[error("server error {status}: {body}")]
    ServerError {
        /// HTTP status
        status: u16,
        /// Response body excerpt
        body: String,
    },

    /// Request rejected by the provider
    #[error("client error {status}: {body}")]
    ClientError {
        /// HTTP status
        status: u16,
        /// Response body excerpt
        body: String,
    },

    /// Response body could not be parsed
    #[error("parse error: {0}")]
    ParseError(String),

    /// Provider returned an error entry instead of results
    #[error("API error: {0}")]
    ApiError(String),

    /// Request could not be built
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetcherError {
    /// Classify the failure
    pub fn kind(&self) -> FailureKind {
        match self {
            FetcherError::Timeout(_)
            | FetcherError::NetworkError(_)
            | FetcherError::Throttled { .. }
            | FetcherError::ServerError { .. }
            | FetcherError::ParseError(_) => FailureKind::Transient,
            FetcherError::ClientError { status, .. } if *status == 408 => FailureKind::Transient,
            FetcherError::ClientError { .. }
            | FetcherError::ApiError(_)
            | FetcherError::InvalidRequest(_) => FailureKind::Permanent,
        }
    }

    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Short label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            FetcherError::Timeout(_) => "timeout",
            FetcherError::NetworkError(_) => "network",
            FetcherError::Throttled { .. } => "throttled",
            FetcherError::ServerError { .. } => "server",
            FetcherError::ClientError { .. } => "client",
            FetcherError::ParseError(_) => "parse",
            FetcherError::ApiError(_) => "api",
            FetcherError::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// One page of provider results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedPage {
    /// Records on this page, in provider order
    pub records: Vec<Record>,
    /// Provider's total for the whole query at the time of this page
    pub reported_total: u64,
}

/// Source of paginated records for a window
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page
    ///
    /// # Arguments
    /// * `window` - Feed and submission interval to query
    /// * `offset` - Zero-based index of the first result
    /// * `page_size` - Maximum number of results to return
    ///
    /// # Note
    /// Implementations suspend until the shared throttle grants a slot.
    async fn fetch_page(&self, window: &Window, offset: u64, page_size: usize)
        -> FetcherResult<FetchedPage>;

    /// Human-readable source name for logs
    fn name(&self) -> &str;
}
