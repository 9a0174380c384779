//! Harvest orchestration and rate limiting
//!
//! This module drives one feed's window to a terminal status and runs the
//! continuous multi-feed cycle on top of it.
//!
//! # Overview
//!
//! 1. **Throttle**: every request waits on the shared [`rate_limit::RateLimiter`]
//! 2. **Page retries**: [`retry::PageRetrier`] retries transient failures with linear backoff
//! 3. **Accumulation**: [`accumulator::IncrementalAccumulator`] merges pages by record identifier
//! 4. **Verification**: [`verifier::CompletenessVerifier`] decides when a window is done
//! 5. **Orchestration**: [`orchestrator::FeedOrchestrator`] runs passes and checkpoints after every page
//! 6. **Scheduling**: [`scheduler::ContinuousScheduler`] harvests all feeds for the latest windows
//!
//! # Error Handling
//!
//! Fetch failures never escape as errors; they end up in the
//! [`job::Diagnostic`] of a [`job::HarvestResult`]. [`HarvestError`] covers
//! what stops a harvest from producing a result at all:
//! - configuration errors (before any request is sent)
//! - checkpoint and output IO errors
//! - cancellation
//!
//! # Related Modules
//!
//! - [`crate::fetcher`] - Page sources
//! - [`crate::resume`] - Checkpoint persistence
//! - [`crate::output`] - Dataset files

pub mod accumulator;
pub mod config;
pub mod job;
pub mod orchestrator;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod verifier;

pub use accumulator::IncrementalAccumulator;
pub use config::HarvestConfig;
pub use job::{Diagnostic, FeedPhase, HarvestResult, HarvestStatus, TerminationReason};
pub use orchestrator::FeedOrchestrator;
pub use rate_limit::RateLimiter;
pub use retry::{FailedPage, PageFailure, PageRetrier, RetryDecision};
pub use scheduler::ContinuousScheduler;
pub use verifier::{CompletenessVerifier, Verdict, VerificationInput};

use crate::output::OutputError;
use crate::resume::CheckpointError;
use crate::window::WindowError;

/// Harvest errors
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Window could not be computed
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// Checkpoint could not be read or written
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Dataset could not be written
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Shutdown was requested before the harvest finished
    #[error("harvest cancelled by shutdown request")]
    Cancelled,
}
