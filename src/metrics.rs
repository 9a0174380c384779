//! Observability metrics for the harvester
//!
//! Covers provider requests, page retries, throttle waits, recorded gaps and
//! per-feed harvest outcomes.
//!
//! ## Architecture
//!
//! - Uses the `metrics` facade, so recording is a no-op until an exporter is installed
//! - Optional Prometheus exporter for a scrape endpoint (`--metrics-addr`)

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<RwLock<bool>> = Lazy::new(|| RwLock::new(false));

/// Correlation ID source for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls are no-ops once an exporter is installed.
///
/// # Arguments
/// * `addr` - Socket address to bind the scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "provider_requests_total",
        Unit::Count,
        "Total number of requests sent to the provider"
    );
    describe_histogram!(
        "provider_request_duration_seconds",
        Unit::Seconds,
        "Provider request duration in seconds"
    );
    describe_counter!(
        "page_retries_total",
        Unit::Count,
        "Total number of page retry attempts"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of page retry backoff in seconds"
    );
    describe_histogram!(
        "rate_limit_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for a throttle slot"
    );
    describe_counter!(
        "page_gaps_total",
        Unit::Count,
        "Pages that exhausted their retries and were recorded as gaps"
    );
    describe_counter!(
        "harvests_finished_total",
        Unit::Count,
        "Feed harvests finished, by terminal status"
    );
    describe_gauge!(
        "harvest_records_accumulated",
        Unit::Count,
        "Records accumulated by the most recent harvest of a feed"
    );
    describe_counter!(
        "datasets_written_total",
        Unit::Count,
        "Dataset files written"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn next_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and outcome of one provider request
pub struct ProviderRequestMetrics {
    feed: String,
    offset: u64,
    start_time: Instant,
    correlation_id: String,
}

impl ProviderRequestMetrics {
    /// Start recording a request
    pub fn start(feed: impl Into<String>, offset: u64) -> Self {
        Self {
            feed: feed.into(),
            offset,
            start_time: Instant::now(),
            correlation_id: next_correlation_id(),
        }
    }

    /// Record a request that produced an HTTP status
    pub fn record_complete(&self, status_code: u16) {
        self.record(status_code.to_string());

        if status_code == 429 || status_code == 503 {
            warn!(
                correlation_id = %self.correlation_id,
                feed = %self.feed,
                offset = self.offset,
                status = status_code,
                "Provider throttle signal recorded"
            );
        }
    }

    /// Record a request that failed before producing a status
    pub fn record_failure(&self, label: &str) {
        self.record(label.to_string());
    }

    fn record(&self, status: String) {
        let duration = self.start_time.elapsed();

        counter!(
            "provider_requests_total",
            "feed" => self.feed.clone(),
            "status" => status.clone(),
        )
        .increment(1);

        histogram!(
            "provider_request_duration_seconds",
            "feed" => self.feed.clone(),
        )
        .record(duration.as_secs_f64());

        debug!(
            correlation_id = %self.correlation_id,
            feed = %self.feed,
            offset = self.offset,
            status = %status,
            duration_ms = duration.as_millis(),
            "Provider request completed"
        );
    }

    /// Get the correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record a page retry backoff
pub fn record_retry_backoff(feed: &str, duration: Duration, attempt: u32) {
    counter!(
        "page_retries_total",
        "feed" => feed.to_string(),
    )
    .increment(1);

    histogram!(
        "retry_backoff_duration_seconds",
        "attempt" => attempt.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record a page that was given up on
pub fn record_gap(feed: &str, offset: u64) {
    counter!(
        "page_gaps_total",
        "feed" => feed.to_string(),
    )
    .increment(1);

    debug!(feed = %feed, offset = offset, "Gap recorded");
}

/// Record a dataset file
pub fn record_dataset_written(records: usize) {
    counter!("datasets_written_total").increment(1);
    debug!(records = records, "Dataset write recorded");
}

/// Throttle wait measurement
#[derive(Default)]
pub struct RateLimiterMetrics {
    start_time: Option<Instant>,
}

impl RateLimiterMetrics {
    /// Create a new rate limiter metrics instance
    pub fn new() -> Self {
        Self { start_time: None }
    }

    /// Start measuring queue wait time
    pub fn start_acquire(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Record that a slot was granted
    pub fn record_acquired(&mut self) {
        if let Some(start) = self.start_time.take() {
            histogram!("rate_limit_wait_seconds").record(start.elapsed().as_secs_f64());
        }
    }
}

/// Per-feed harvest metrics
pub struct HarvestMetrics {
    feed: String,
    publish_date: String,
    start_time: Instant,
}

impl HarvestMetrics {
    /// Start tracking a feed harvest
    pub fn start(feed: impl Into<String>, publish_date: impl Into<String>) -> Self {
        let feed = feed.into();
        let publish_date = publish_date.into();

        info!(feed = %feed, publish_date = %publish_date, "Harvest started");

        Self {
            feed,
            publish_date,
            start_time: Instant::now(),
        }
    }

    /// Record a terminal outcome
    pub fn record_outcome(&self, status: &str, accumulated: u64, gaps: usize) {
        counter!(
            "harvests_finished_total",
            "feed" => self.feed.clone(),
            "status" => status.to_string(),
        )
        .increment(1);

        gauge!(
            "harvest_records_accumulated",
            "feed" => self.feed.clone(),
        )
        .set(accumulated as f64);

        info!(
            feed = %self.feed,
            publish_date = %self.publish_date,
            status = %status,
            accumulated = accumulated,
            gaps = gaps,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Harvest finished"
        );
    }

    /// Record a harvest that ended with an error instead of an outcome
    pub fn record_error(&self, error: &str) {
        counter!(
            "harvests_finished_total",
            "feed" => self.feed.clone(),
            "status" => "error",
        )
        .increment(1);

        error!(
            feed = %self.feed,
            publish_date = %self.publish_date,
            error = %error,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Harvest aborted"
        );
    }
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}
