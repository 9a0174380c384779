//! Completeness verification
//!
//! A window is complete when either the accumulated count reaches the
//! provider total with no outstanding gaps, or enough consecutive full
//! passes came back with nothing new. Anything weaker is at most partial.

use super::config::{PARTIAL_ACCEPT_THRESHOLD, VERIFICATION_PASSES};
use super::job::TerminationReason;

/// Harvest state the verifier looks at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerificationInput {
    /// Distinct records accumulated
    pub accumulated: u64,
    /// Latest provider total
    pub reported_total: Option<u64>,
    /// Unresolved page gaps
    pub outstanding_gaps: usize,
    /// Consecutive full passes with zero delta and zero gaps
    pub zero_delta_passes: u32,
    /// Whether the attempt budget is spent
    pub attempts_exhausted: bool,
}

/// Verifier decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Done; carries the rule that fired
    Complete(TerminationReason),
    /// Done, but only partially
    AcceptPartial,
    /// Keep harvesting
    Continue,
}

/// Decides when a (feed, window) harvest is done
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletenessVerifier {
    required_passes: u32,
    partial_threshold: f64,
}

impl Default for CompletenessVerifier {
    fn default() -> Self {
        Self::new(VERIFICATION_PASSES, PARTIAL_ACCEPT_THRESHOLD)
    }
}

impl CompletenessVerifier {
    /// Verifier requiring `required_passes` zero-delta passes for saturation
    pub fn new(required_passes: u32, partial_threshold: f64) -> Self {
        Self {
            required_passes: required_passes.max(1),
            partial_threshold,
        }
    }

    /// Zero-delta passes required for saturation
    pub fn required_passes(&self) -> u32 {
        self.required_passes
    }

    /// Minimum ratio for partial acceptance
    pub fn partial_threshold(&self) -> f64 {
        self.partial_threshold
    }

    /// Whether `accumulated / total` meets the partial threshold
    pub fn meets_threshold(&self, accumulated: u64, reported_total: Option<u64>) -> bool {
        match reported_total {
            Some(0) => true,
            Some(total) => accumulated as f64 / total as f64 >= self.partial_threshold,
            None => false,
        }
    }

    /// Evaluate the current state
    pub fn verify(&self, input: &VerificationInput) -> Verdict {
        if input.outstanding_gaps == 0 {
            if let Some(total) = input.reported_total {
                if input.accumulated >= total {
                    return Verdict::Complete(TerminationReason::CountReached);
                }
            }
            if input.zero_delta_passes >= self.required_passes {
                return Verdict::Complete(TerminationReason::Saturated);
            }
            if input.attempts_exhausted
                && self.meets_threshold(input.accumulated, input.reported_total)
            {
                return Verdict::AcceptPartial;
            }
        }
        Verdict::Continue
    }
}
