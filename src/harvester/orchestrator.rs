//! Per-feed harvest loop
//!
//! One call to [`FeedOrchestrator::harvest`] drives a (feed, window) pair
//! from whatever its checkpoint says to a terminal status. Every attempt is
//! one pass: outstanding gaps are re-fetched first, then the window is paged
//! forward. Each page is merged, spooled and checkpointed before the next
//! request goes out, so a crash or Ctrl+C never loses a merged page.

use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use super::accumulator::IncrementalAccumulator;
use super::config::{attempt_backoff, HarvestConfig};
use super::job::{Diagnostic, FeedPhase, HarvestResult, HarvestStatus, TerminationReason};
use super::retry::{PageFailure, PageRetrier};
use super::verifier::{CompletenessVerifier, Verdict, VerificationInput};
use super::HarvestError;
use crate::fetcher::{FetchedPage, FetcherError, PageSource};
use crate::metrics::HarvestMetrics;
use crate::resume::{Checkpoint, CheckpointStore};
use crate::shutdown::{self, cancellable_sleep, SharedShutdown};
use crate::window::Window;

/// How one pass ended
#[derive(Debug)]
enum PassEnd {
    /// The pass ran to its natural end or to a ceiling
    Finished {
        /// Records the pass added
        delta: u64,
        /// Whether the sweep reached the end of the window
        full: bool,
        /// Whether the sweep stopped at the offset ceiling
        offset_ceiling: bool,
        /// Pages requested, gap retries included
        requests: u32,
    },
    /// The provider rejected a request
    Permanent(FetcherError),
    /// Shutdown requested
    Cancelled,
}

/// Mutable state of one invocation
struct HarvestRun {
    checkpoint: Checkpoint,
    accumulator: IncrementalAccumulator,
    phase: FeedPhase,
    started: Instant,
    metrics: HarvestMetrics,
}

/// Drives one feed's harvest for one window
#[derive(Clone)]
pub struct FeedOrchestrator {
    source: Arc<dyn PageSource>,
    store: CheckpointStore,
    config: HarvestConfig,
    verifier: CompletenessVerifier,
    retrier: PageRetrier,
    shutdown: Option<SharedShutdown>,
}

impl FeedOrchestrator {
    /// Create an orchestrator; picks up the global shutdown handle if one is registered
    pub fn new(source: Arc<dyn PageSource>, store: CheckpointStore, config: HarvestConfig) -> Self {
        Self {
            source,
            store,
            verifier: CompletenessVerifier::new(
                config.verification_passes,
                config.partial_threshold,
            ),
            retrier: PageRetrier::from_config(&config),
            config,
            shutdown: shutdown::get_global_shutdown(),
        }
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Harvest configuration
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Checkpoint store
    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Harvest `window` until the verifier, a ceiling or the attempt budget stops it
    ///
    /// # Errors
    /// Configuration and checkpoint errors, and [`HarvestError::Cancelled`]
    /// once progress has been flushed after a shutdown request. Fetch
    /// failures are reported through the result's diagnostic instead.
    pub async fn harvest(&self, window: &Window) -> Result<HarvestResult, HarvestError> {
        let span = info_span!(
            "harvest",
            feed = %window.feed(),
            publish_date = %window.publish_date(),
            source = self.source.name()
        );
        self.run(window).instrument(span).await
    }

    async fn run(&self, window: &Window) -> Result<HarvestResult, HarvestError> {
        self.config.validate()?;

        let started = Instant::now();
        let checkpoint = self.load_checkpoint(window)?;
        let spooled = self
            .store
            .load_records(window.feed(), window.publish_date())?;

        if checkpoint.is_complete() {
            info!(
                accumulated = checkpoint.accumulated(),
                "Window already complete; reusing checkpoint"
            );
            return Ok(self.stored_result(window, checkpoint, spooled));
        }

        let accumulator = IncrementalAccumulator::resume(
            self.config.page_size,
            spooled,
            checkpoint.record_ids.iter(),
            checkpoint.reported_total,
        );
        let mut run = HarvestRun {
            checkpoint,
            accumulator,
            phase: FeedPhase::Idle,
            started,
            metrics: HarvestMetrics::start(
                window.feed().as_str(),
                window.publish_date().to_string(),
            ),
        };
        // Spooled records whose checkpoint save was interrupted still count
        run.checkpoint.absorb_ids(run.accumulator.ids());

        if run.checkpoint.accumulated() > 0 || !run.checkpoint.gaps.is_empty() {
            info!(
                accumulated = run.checkpoint.accumulated(),
                gaps = run.checkpoint.gaps.len(),
                frontier = run.checkpoint.frontier,
                cursor = ?run.checkpoint.cursor,
                "Resuming from checkpoint"
            );
        }

        let mut attempts_this_run = 0u32;
        let mut pending_stop: Option<TerminationReason> = None;

        loop {
            if self.shutdown_requested() {
                return self.cancel(run);
            }

            let input = VerificationInput {
                accumulated: run.accumulator.accumulated(),
                reported_total: run.accumulator.reported_total(),
                outstanding_gaps: run.checkpoint.gaps.len(),
                zero_delta_passes: run.checkpoint.zero_delta_passes,
                attempts_exhausted: attempts_this_run >= self.config.max_attempts,
            };
            match self.verifier.verify(&input) {
                Verdict::Complete(reason) => {
                    return self.finish(window, run, HarvestStatus::Complete, reason)
                }
                Verdict::AcceptPartial => {
                    return self.finish(
                        window,
                        run,
                        HarvestStatus::PartialComplete,
                        TerminationReason::AcceptedPartial,
                    )
                }
                Verdict::Continue => {}
            }

            let stop = pending_stop.or_else(|| {
                if attempts_this_run >= self.config.max_attempts {
                    Some(TerminationReason::AttemptsExhausted)
                } else if run.started.elapsed() >= self.config.wall_clock_ceiling {
                    Some(TerminationReason::WallClockCeiling)
                } else {
                    None
                }
            });
            if let Some(reason) = stop {
                let status = self.classify_stop(&run);
                return self.finish(window, run, status, reason);
            }

            if attempts_this_run > 0 {
                let delay = attempt_backoff(
                    self.config.attempt_backoff_base,
                    attempts_this_run,
                    self.config.max_backoff,
                );
                info!(
                    attempt = attempts_this_run + 1,
                    max_attempts = self.config.max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    accumulated = run.accumulator.accumulated(),
                    reported_total = ?run.accumulator.reported_total(),
                    gaps = run.checkpoint.gaps.len(),
                    "Window not verified complete; waiting before next attempt"
                );
                if !cancellable_sleep(delay, self.shutdown.as_ref()).await {
                    return self.cancel(run);
                }
            }

            attempts_this_run += 1;
            run.checkpoint.attempts += 1;
            run.checkpoint.last_attempt = Some(Utc::now());

            match self.run_pass(window, &mut run).await? {
                PassEnd::Finished {
                    delta,
                    full,
                    offset_ceiling,
                    requests,
                } => {
                    // A pass that requested nothing says nothing about saturation
                    if requests > 0 {
                        if full && delta == 0 && run.checkpoint.gaps.is_empty() {
                            run.checkpoint.zero_delta_passes += 1;
                        } else {
                            run.checkpoint.zero_delta_passes = 0;
                        }
                    }
                    if offset_ceiling {
                        warn!(
                            max_offset = self.config.max_offset,
                            reported_total = ?run.accumulator.reported_total(),
                            "Offset ceiling reached; window cannot be paged further"
                        );
                        pending_stop = Some(TerminationReason::OffsetCeiling);
                    }
                    run.checkpoint.touch();
                    self.store.save(&run.checkpoint)?;
                    debug!(
                        attempt = attempts_this_run,
                        delta = delta,
                        full = full,
                        requests = requests,
                        zero_delta_passes = run.checkpoint.zero_delta_passes,
                        "Pass finished"
                    );
                }
                PassEnd::Permanent(error) => {
                    run.checkpoint.last_error = Some(error.to_string());
                    return self.finish(
                        window,
                        run,
                        HarvestStatus::Failed,
                        TerminationReason::PermanentError,
                    );
                }
                PassEnd::Cancelled => return self.cancel(run),
            }
        }
    }

    /// One sweep: outstanding gaps first, then forward paging
    async fn run_pass(&self, window: &Window, run: &mut HarvestRun) -> Result<PassEnd, HarvestError> {
        let page_size = self.config.page_size as u64;
        let before = run.accumulator.accumulated();
        let mut requests = 0u32;

        let gap_offsets: Vec<u64> = run.checkpoint.gaps.iter().map(|gap| gap.offset).collect();
        for offset in gap_offsets {
            debug!(offset = offset, "Retrying gap");
            requests += 1;
            match self.fetch(window, offset, &mut run.phase).await {
                Ok(page) => {
                    let fetched = page.records.len() as u64;
                    self.absorb(window, run, page)?;
                    run.checkpoint.resolve_gap(offset);
                    run.checkpoint.frontier = run.checkpoint.frontier.max(offset + fetched);
                    info!(offset = offset, "Gap resolved");
                }
                Err(PageFailure::Exhausted(failed)) => {
                    run.checkpoint
                        .record_gap(offset, failed.attempts, failed.last_error.to_string());
                }
                Err(PageFailure::Permanent { error, .. }) => return Ok(PassEnd::Permanent(error)),
                Err(PageFailure::Cancelled { .. }) => return Ok(PassEnd::Cancelled),
            }
            run.checkpoint.touch();
            self.store.save(&run.checkpoint)?;
        }

        let mut offset = self.pass_start(run);
        run.accumulator.start_pass();
        let mut full = false;
        let mut offset_ceiling = false;

        loop {
            if run
                .accumulator
                .reported_total()
                .is_some_and(|total| offset >= total)
            {
                full = true;
                break;
            }
            if offset >= self.config.max_offset {
                offset_ceiling = true;
                break;
            }

            run.checkpoint.cursor = Some(offset);
            requests += 1;
            match self.fetch(window, offset, &mut run.phase).await {
                Ok(page) => {
                    let fetched = page.records.len() as u64;
                    self.absorb(window, run, page)?;
                    run.checkpoint.frontier = run.checkpoint.frontier.max(offset + fetched);
                    offset += page_size;
                    run.checkpoint.cursor = Some(offset);
                    run.checkpoint.touch();
                    self.store.save(&run.checkpoint)?;

                    if !run.accumulator.should_continue_paging() {
                        full = true;
                        break;
                    }
                }
                Err(PageFailure::Exhausted(failed)) => {
                    run.checkpoint
                        .record_gap(offset, failed.attempts, failed.last_error.to_string());
                    run.checkpoint.frontier = run.checkpoint.frontier.max(offset + page_size);
                    offset += page_size;
                    run.checkpoint.cursor = Some(offset);
                    run.checkpoint.touch();
                    self.store.save(&run.checkpoint)?;

                    if run.accumulator.reported_total().is_none() {
                        // Without a total the extent of the window is unknown
                        warn!(
                            offset = offset - page_size,
                            "Page failed before the provider total was known; ending pass"
                        );
                        break;
                    }
                }
                Err(PageFailure::Permanent { error, .. }) => return Ok(PassEnd::Permanent(error)),
                Err(PageFailure::Cancelled { .. }) => return Ok(PassEnd::Cancelled),
            }
        }

        run.checkpoint.cursor = None;
        Ok(PassEnd::Finished {
            delta: run.accumulator.accumulated() - before,
            full,
            offset_ceiling,
            requests,
        })
    }

    /// Offset the forward sweep starts from
    ///
    /// An interrupted pass continues at its cursor. While the count is
    /// short of the total, the window is rescanned from the start after a
    /// pass that found nothing new, or once the frontier has already reached
    /// the total; otherwise paging continues past everything already swept.
    fn pass_start(&self, run: &HarvestRun) -> u64 {
        if let Some(cursor) = run.checkpoint.cursor {
            return cursor;
        }
        let frontier = run.checkpoint.frontier;
        if let Some(total) = run.accumulator.reported_total() {
            if run.accumulator.accumulated() < total
                && (run.checkpoint.zero_delta_passes > 0 || frontier >= total)
            {
                debug!(
                    frontier = frontier,
                    reported_total = total,
                    "Count is short of the total with nothing left past the frontier; rescanning"
                );
                return 0;
            }
        }
        frontier
    }

    async fn fetch(
        &self,
        window: &Window,
        offset: u64,
        phase: &mut FeedPhase,
    ) -> Result<FetchedPage, PageFailure> {
        self.retrier
            .fetch(
                self.source.as_ref(),
                window,
                offset,
                self.config.page_size,
                phase,
                self.shutdown.as_ref(),
            )
            .await
    }

    /// Merge a page, spool what it added and fold it into the checkpoint
    fn absorb(&self, window: &Window, run: &mut HarvestRun, page: FetchedPage) -> Result<(), HarvestError> {
        let added = run.accumulator.merge(page);
        self.store
            .append_records(window.feed(), window.publish_date(), &added)?;
        run.checkpoint.absorb_ids(added.iter().map(|record| &record.id));
        run.checkpoint.reported_total = run.accumulator.reported_total();
        Ok(())
    }

    /// Status for a harvest stopped by a budget or ceiling
    fn classify_stop(&self, run: &HarvestRun) -> HarvestStatus {
        let accumulated = run.accumulator.accumulated();
        let ratio_met = match run.accumulator.completion_ratio() {
            Some(ratio) => ratio >= self.verifier.partial_threshold(),
            None => run.accumulator.reported_total() == Some(0),
        };
        if !run.checkpoint.gaps.is_empty() {
            if accumulated > 0 {
                HarvestStatus::PartialComplete
            } else {
                HarvestStatus::Failed
            }
        } else if accumulated > 0 && ratio_met {
            HarvestStatus::PartialComplete
        } else {
            HarvestStatus::Failed
        }
    }

    fn finish(
        &self,
        window: &Window,
        mut run: HarvestRun,
        status: HarvestStatus,
        reason: TerminationReason,
    ) -> Result<HarvestResult, HarvestError> {
        run.checkpoint.finish(status, reason);
        run.checkpoint.touch();
        if status == HarvestStatus::Complete {
            self.store.retire(&mut run.checkpoint)?;
        } else {
            self.store.save(&run.checkpoint)?;
        }
        run.phase.advance(FeedPhase::terminal(status));

        let diagnostic = Diagnostic {
            reason,
            gaps: run.checkpoint.gaps.clone(),
            last_error: run.checkpoint.last_error.clone(),
            accumulated: run.accumulator.accumulated(),
            reported_total: run.accumulator.reported_total(),
            zero_delta_passes: run.checkpoint.zero_delta_passes,
        };
        run.metrics
            .record_outcome(status.as_str(), diagnostic.accumulated, diagnostic.gaps.len());
        if status != HarvestStatus::Complete {
            warn!(
                status = %status,
                reason = ?reason,
                gaps = ?diagnostic.gap_offsets(),
                last_error = ?diagnostic.last_error,
                "Harvest did not verify complete"
            );
        }

        Ok(HarvestResult {
            feed: window.feed().clone(),
            window: window.clone(),
            status,
            records: run.accumulator.into_records(),
            diagnostic,
            attempts: run.checkpoint.attempts,
            elapsed_ms: run.started.elapsed().as_millis() as u64,
        })
    }

    fn cancel(&self, mut run: HarvestRun) -> Result<HarvestResult, HarvestError> {
        info!(
            accumulated = run.checkpoint.accumulated(),
            cursor = ?run.checkpoint.cursor,
            "Shutdown requested - saving progress before exiting"
        );
        run.checkpoint.touch();
        self.store.save(&run.checkpoint)?;
        run.metrics.record_error("cancelled");
        Err(HarvestError::Cancelled)
    }

    fn load_checkpoint(&self, window: &Window) -> Result<Checkpoint, HarvestError> {
        match self.store.load(window.feed(), window.publish_date())? {
            Some(checkpoint) if checkpoint.matches(window) => Ok(checkpoint),
            Some(stale) => {
                warn!(
                    stored_from = %stale.window_from,
                    stored_to = %stale.window_to,
                    window_from = %window.from(),
                    window_to = %window.to(),
                    "Checkpoint belongs to a different window; starting over"
                );
                self.store.remove(window.feed(), window.publish_date())?;
                Ok(Checkpoint::new(window))
            }
            None => Ok(Checkpoint::new(window)),
        }
    }

    fn stored_result(
        &self,
        window: &Window,
        checkpoint: Checkpoint,
        records: Vec<crate::Record>,
    ) -> HarvestResult {
        let accumulator = IncrementalAccumulator::resume(
            self.config.page_size,
            records,
            checkpoint.record_ids.iter(),
            checkpoint.reported_total,
        );
        HarvestResult {
            feed: window.feed().clone(),
            window: window.clone(),
            status: HarvestStatus::Complete,
            diagnostic: Diagnostic {
                reason: checkpoint
                    .last_reason
                    .unwrap_or(TerminationReason::CountReached),
                gaps: Vec::new(),
                last_error: checkpoint.last_error.clone(),
                accumulated: accumulator.accumulated(),
                reported_total: checkpoint.reported_total,
                zero_delta_passes: checkpoint.zero_delta_passes,
            },
            records: accumulator.into_records(),
            attempts: checkpoint.attempts,
            elapsed_ms: 0,
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}
