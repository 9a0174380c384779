//! Bounded per-page retry
//!
//! [`PageRetrier::decide`] is the whole retry policy as a pure function of
//! the attempt number and the last outcome; [`PageRetrier::fetch`] drives it
//! against a [`PageSource`], sleeping between attempts and keeping the feed
//! phase in step.

use std::time::Duration;
use tracing::{debug, warn};

use super::config::{page_backoff, HarvestConfig};
use super::job::FeedPhase;
use crate::fetcher::{FetchedPage, FetcherError, FetcherResult, PageSource};
use crate::metrics;
use crate::shutdown::{cancellable_sleep, SharedShutdown};
use crate::window::Window;

/// Next step after one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Page fetched
    Done,
    /// Transient failure; try again after the delay
    RetryAfter(Duration),
    /// Transient failure and no attempts left
    GiveUp,
    /// Permanent failure
    Abort,
}

/// A page that failed every attempt
#[derive(Debug, Clone, PartialEq)]
pub struct FailedPage {
    /// Page offset
    pub offset: u64,
    /// Error of the final attempt
    pub last_error: FetcherError,
    /// Attempts made
    pub attempts: u32,
}

/// Why a page could not be returned
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PageFailure {
    /// Transient failures used up every attempt
    #[error("page at offset {} failed after {} attempts: {}", .0.offset, .0.attempts, .0.last_error)]
    Exhausted(FailedPage),

    /// Provider rejected the request
    #[error("page at offset {offset} failed permanently: {error}")]
    Permanent {
        /// Page offset
        offset: u64,
        /// Provider error
        error: FetcherError,
    },

    /// Shutdown requested while the page was in flight or backing off
    #[error("page at offset {offset} cancelled")]
    Cancelled {
        /// Page offset
        offset: u64,
    },
}

/// Retry policy for one page fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRetrier {
    max_attempts: u32,
    backoff_base: Duration,
    max_backoff: Duration,
}

impl PageRetrier {
    /// Policy allowing `max_attempts` total attempts per page
    pub fn new(max_attempts: u32, backoff_base: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            max_backoff,
        }
    }

    /// Policy taken from a harvest configuration
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(
            config.max_page_attempts,
            config.page_backoff_base,
            config.max_backoff,
        )
    }

    /// Total attempts per page
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what follows attempt number `attempt` (1-based)
    pub fn decide(&self, attempt: u32, result: &FetcherResult<FetchedPage>) -> RetryDecision {
        match result {
            Ok(_) => RetryDecision::Done,
            Err(e) if !e.is_transient() => RetryDecision::Abort,
            Err(_) if attempt >= self.max_attempts => RetryDecision::GiveUp,
            Err(_) => RetryDecision::RetryAfter(page_backoff(
                self.backoff_base,
                attempt,
                self.max_backoff,
            )),
        }
    }

    /// Fetch one page, retrying transient failures
    ///
    /// `phase` moves to `Fetching` before every attempt and to `Retrying`
    /// while backing off.
    pub async fn fetch(
        &self,
        source: &dyn PageSource,
        window: &Window,
        offset: u64,
        page_size: usize,
        phase: &mut FeedPhase,
        shutdown: Option<&SharedShutdown>,
    ) -> Result<FetchedPage, PageFailure> {
        let feed = window.feed().as_str();
        let mut attempt = 1;

        loop {
            if shutdown.is_some_and(|s| s.is_shutdown_requested()) {
                return Err(PageFailure::Cancelled { offset });
            }
            phase.advance(FeedPhase::Fetching { offset });

            let result = match shutdown {
                Some(shutdown) => tokio::select! {
                    result = source.fetch_page(window, offset, page_size) => result,
                    _ = shutdown.wait_for_shutdown() => return Err(PageFailure::Cancelled { offset }),
                },
                None => source.fetch_page(window, offset, page_size).await,
            };

            let decision = self.decide(attempt, &result);
            let error = match result {
                Ok(page) => {
                    if attempt > 1 {
                        debug!(feed = %feed, offset = offset, attempt = attempt, "Page recovered after retry");
                    }
                    return Ok(page);
                }
                Err(error) => error,
            };

            match decision {
                RetryDecision::Done | RetryDecision::Abort => {
                    warn!(feed = %feed, offset = offset, error = %error, "Page failed permanently");
                    return Err(PageFailure::Permanent { offset, error });
                }
                RetryDecision::GiveUp => {
                    warn!(
                        feed = %feed,
                        offset = offset,
                        attempts = attempt,
                        error = %error,
                        "Page retries exhausted; recording gap"
                    );
                    metrics::record_gap(feed, offset);
                    return Err(PageFailure::Exhausted(FailedPage {
                        offset,
                        last_error: error,
                        attempts: attempt,
                    }));
                }
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        feed = %feed,
                        offset = offset,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %error,
                        "Page fetch failed; retrying after backoff"
                    );
                    metrics::record_retry_backoff(feed, delay, attempt);
                    attempt += 1;
                    phase.advance(FeedPhase::Retrying { offset, attempt });
                    if !cancellable_sleep(delay, shutdown).await {
                        return Err(PageFailure::Cancelled { offset });
                    }
                }
            }
        }
    }
}
