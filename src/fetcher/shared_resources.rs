//! Shared resources for all fetcher instances
//!
//! arXiv's request spacing applies per client, not per feed. Every feed
//! harvest therefore goes through the same HTTP client and the same rate
//! limiter, no matter how many feeds run concurrently.

use once_cell::sync::{Lazy, OnceCell};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::harvester::config::MIN_REQUEST_INTERVAL_MS;
use crate::harvester::rate_limit::RateLimiter;

/// HTTP connect timeout (seconds) - time to establish TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds) - overall time for the entire request
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Global HTTP client shared by all fetcher instances
///
/// Configured with explicit timeouts to prevent indefinite hangs:
/// - Connect timeout: 10 seconds
/// - Request timeout: 60 seconds (large result pages are slow to render)
pub static GLOBAL_HTTP_CLIENT: Lazy<Arc<Client>> = Lazy::new(|| {
    Arc::new(
        Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("paper-harvester/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                panic!("FATAL: Failed to build HTTP client: {}. Check system TLS configuration.", e);
            }),
    )
});

static GLOBAL_ARXIV_RATE_LIMITER: OnceCell<Arc<RateLimiter>> = OnceCell::new();

/// Get the global HTTP client
pub fn global_http_client() -> Arc<Client> {
    GLOBAL_HTTP_CLIENT.clone()
}

/// Install the global arXiv rate limiter with a custom spacing
///
/// Must run before the first [`global_arxiv_rate_limiter`] call; later calls
/// keep the limiter that is already installed.
pub fn init_global_rate_limiter(min_interval: Duration) -> Arc<RateLimiter> {
    let limiter = GLOBAL_ARXIV_RATE_LIMITER
        .get_or_init(|| Arc::new(RateLimiter::min_interval(min_interval)))
        .clone();
    if limiter.interval() != min_interval {
        warn!(
            requested_ms = min_interval.as_millis(),
            active_ms = limiter.interval().as_millis(),
            "Global rate limiter already installed, keeping existing spacing"
        );
    }
    limiter
}

/// Get the global arXiv rate limiter, installing the default spacing if needed
pub fn global_arxiv_rate_limiter() -> Arc<RateLimiter> {
    GLOBAL_ARXIV_RATE_LIMITER
        .get_or_init(|| {
            Arc::new(RateLimiter::min_interval(Duration::from_millis(
                MIN_REQUEST_INTERVAL_MS,
            )))
        })
        .clone()
}
