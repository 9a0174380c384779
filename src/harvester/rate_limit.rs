//! Minimum-spacing rate limiting
//!
//! arXiv asks clients to leave at least three seconds between requests.
//! Every caller reserves the next free slot under a mutex and then sleeps
//! until that slot outside of it, so concurrent feeds are served in
//! reservation order and never closer together than the configured spacing.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::metrics::RateLimiterMetrics;

/// Rate limiter enforcing a minimum interval between requests
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter that spaces requests at least `min_interval` apart
    pub fn min_interval(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Configured spacing
    pub fn interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for the next request slot
    ///
    /// # Returns
    /// How long the caller was suspended
    ///
    /// # Note
    /// A caller that is dropped while waiting still consumes its slot, so
    /// cancellation can only make the effective spacing wider.
    pub async fn acquire(&self) -> Duration {
        let mut metrics = RateLimiterMetrics::new();
        metrics.start_acquire();
        let requested = Instant::now();

        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };

        if slot > requested {
            debug!(
                wait_ms = (slot - requested).as_millis(),
                "Waiting for rate limit slot"
            );
        }
        sleep_until(slot).await;

        metrics.record_acquired();
        requested.elapsed()
    }
}
