//! Harvest configuration constants and backoff calculation

use std::time::Duration;

use super::HarvestError;

/// Records requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Largest page the provider serves in one response.
pub const MAX_PAGE_SIZE: usize = 2_000;

/// Total attempts for one page before it is recorded as a gap.
pub const MAX_PAGE_ATTEMPTS: u32 = 5;

/// Base of the linear per-page backoff (`base × attempt`).
pub const PAGE_BACKOFF_BASE_SECS: u64 = 10;

/// Base of the geometric backoff between harvest attempts.
pub const ATTEMPT_BACKOFF_BASE_SECS: u64 = 10;

/// Growth factor of the backoff between harvest attempts.
pub const ATTEMPT_BACKOFF_FACTOR: f64 = 1.5;

/// Cap applied to every backoff.
pub const MAX_BACKOFF_SECS: u64 = 300;

/// Harvest attempts (passes) per invocation.
pub const MAX_HARVEST_ATTEMPTS: u32 = 10;

/// Consecutive zero-delta passes that prove a window saturated.
pub const VERIFICATION_PASSES: u32 = 3;

/// Minimum accumulated/reported ratio accepted once attempts run out.
pub const PARTIAL_ACCEPT_THRESHOLD: f64 = 0.9;

/// Wall-clock ceiling for one feed harvest.
pub const WALL_CLOCK_CEILING_SECS: u64 = 24 * 60 * 60;

/// Offsets at or beyond this are never requested; the provider refuses deep paging.
pub const MAX_OFFSET: u64 = 10_000;

/// Minimum spacing between provider requests, in milliseconds.
pub const MIN_REQUEST_INTERVAL_MS: u64 = 3_000;

/// Interval between continuous-mode cycles.
pub const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Linear per-page backoff: `base × attempt`, capped at `max`
pub fn page_backoff(base: Duration, attempt: u32, max: Duration) -> Duration {
    base.saturating_mul(attempt.max(1)).min(max)
}

/// Geometric backoff before harvest attempt `attempt + 1`: `base × 1.5^(attempt-1)`, capped at `max`
pub fn attempt_backoff(base: Duration, attempt: u32, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(64) as i32;
    let secs = base.as_secs_f64() * ATTEMPT_BACKOFF_FACTOR.powi(exponent);
    if !secs.is_finite() || secs >= max.as_secs_f64() {
        return max;
    }
    Duration::from_secs_f64(secs)
}

/// Tunables for one feed harvest
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestConfig {
    /// Records requested per page
    pub page_size: usize,
    /// Total attempts per page
    pub max_page_attempts: u32,
    /// Base of the per-page backoff
    pub page_backoff_base: Duration,
    /// Base of the inter-attempt backoff
    pub attempt_backoff_base: Duration,
    /// Cap for both backoffs
    pub max_backoff: Duration,
    /// Passes per invocation
    pub max_attempts: u32,
    /// Zero-delta passes required for saturation
    pub verification_passes: u32,
    /// Partial acceptance ratio
    pub partial_threshold: f64,
    /// Wall-clock ceiling
    pub wall_clock_ceiling: Duration,
    /// Offset ceiling
    pub max_offset: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_page_attempts: MAX_PAGE_ATTEMPTS,
            page_backoff_base: Duration::from_secs(PAGE_BACKOFF_BASE_SECS),
            attempt_backoff_base: Duration::from_secs(ATTEMPT_BACKOFF_BASE_SECS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECS),
            max_attempts: MAX_HARVEST_ATTEMPTS,
            verification_passes: VERIFICATION_PASSES,
            partial_threshold: PARTIAL_ACCEPT_THRESHOLD,
            wall_clock_ceiling: Duration::from_secs(WALL_CLOCK_CEILING_SECS),
            max_offset: MAX_OFFSET,
        }
    }
}

impl HarvestConfig {
    /// Set the page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the total attempts per page
    pub fn with_max_page_attempts(mut self, attempts: u32) -> Self {
        self.max_page_attempts = attempts;
        self
    }

    /// Set both backoff bases
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.page_backoff_base = base;
        self.attempt_backoff_base = base;
        self
    }

    /// Set the passes per invocation
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the zero-delta passes required for saturation
    pub fn with_verification_passes(mut self, passes: u32) -> Self {
        self.verification_passes = passes;
        self
    }

    /// Set the partial acceptance ratio
    pub fn with_partial_threshold(mut self, threshold: f64) -> Self {
        self.partial_threshold = threshold;
        self
    }

    /// Set the wall-clock ceiling
    pub fn with_wall_clock_ceiling(mut self, ceiling: Duration) -> Self {
        self.wall_clock_ceiling = ceiling;
        self
    }

    /// Set the offset ceiling
    pub fn with_max_offset(mut self, max_offset: u64) -> Self {
        self.max_offset = max_offset;
        self
    }

    /// Reject configurations the harvest loop cannot run with
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(HarvestError::Configuration(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        if self.max_page_attempts == 0 {
            return Err(HarvestError::Configuration(
                "page attempts must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(HarvestError::Configuration(
                "harvest attempts must be at least 1".to_string(),
            ));
        }
        if self.verification_passes == 0 {
            return Err(HarvestError::Configuration(
                "verification passes must be at least 1".to_string(),
            ));
        }
        if !(self.partial_threshold > 0.0 && self.partial_threshold <= 1.0) {
            return Err(HarvestError::Configuration(format!(
                "partial threshold must be in (0, 1], got {}",
                self.partial_threshold
            )));
        }
        Ok(())
    }
}
