//! arXiv query API client
//!
//! Provides the rate-limited [`PageSource`] used in production:
//! - Query construction for one (category, submission window) pair
//! - Global throttle acquisition before every request
//! - Failure classification (transient vs permanent)
//! - Atom decoding through [`arxiv_parser`](super::arxiv_parser)
//!
//! The client issues exactly one HTTP request per call. Retrying is the
//! page retrier's job, not the client's.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tracing::{debug, warn};

use super::arxiv_parser::parse_feed;
use super::shared_resources::{global_arxiv_rate_limiter, global_http_client};
use super::{FetchedPage, FetcherError, FetcherResult, PageSource};
use crate::harvester::rate_limit::RateLimiter;
use crate::metrics::ProviderRequestMetrics;
use crate::window::Window;

/// Public arXiv query endpoint
pub const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";

/// Longest response body excerpt kept in error messages
const ERROR_BODY_EXCERPT: usize = 200;

/// Rate-limited arXiv client
pub struct ArxivClient {
    client: Arc<Client>,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
}

impl ArxivClient {
    /// Create new client
    ///
    /// # Arguments
    /// * `client` - Shared HTTP client (Arc for cheap cloning)
    /// * `base_url` - Full query endpoint URL (e.g., "<http://export.arxiv.org/api/query>")
    /// * `rate_limiter` - Shared rate limiter (Arc so every feed draws from one throttle)
    pub fn new(client: Arc<Client>, base_url: impl Into<String>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            rate_limiter,
        }
    }

    /// Client on the public endpoint using the global HTTP client and throttle
    pub fn shared() -> Self {
        Self::new(global_http_client(), ARXIV_API_URL, global_arxiv_rate_limiter())
    }

    /// Query endpoint
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Throttle this client draws from
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }
}

fn format_bound(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%d%H%M").to_string()
}

/// `search_query` value for a window
///
/// arXiv treats both ends of a `submittedDate` range as inclusive at minute
/// resolution, so the upper bound is pulled back one minute to keep the
/// window half-open.
pub fn search_query(window: &Window) -> String {
    let upper = window.to() - ChronoDuration::minutes(1);
    format!(
        "cat:{} AND submittedDate:[{} TO {}]",
        window.feed(),
        format_bound(window.from()),
        format_bound(upper)
    )
}

/// Full query string parameters for one page
///
/// Results are sorted by submission time ascending so pages that were
/// already harvested keep their offsets while new submissions append.
pub fn query_params(window: &Window, offset: u64, page_size: usize) -> Vec<(&'static str, String)> {
    vec![
        ("search_query", search_query(window)),
        ("start", offset.to_string()),
        ("max_results", page_size.to_string()),
        ("sortBy", "submittedDate".to_string()),
        ("sortOrder", "ascending".to_string()),
    ]
}

fn excerpt(body: &str) -> String {
    body.chars().take(ERROR_BODY_EXCERPT).collect()
}

fn classify_transport(error: &reqwest::Error) -> FetcherError {
    if error.is_timeout() {
        FetcherError::Timeout(error.to_string())
    } else if error.is_builder() {
        FetcherError::InvalidRequest(error.to_string())
    } else {
        FetcherError::NetworkError(error.to_string())
    }
}

/// Map a non-success HTTP status to a fetcher error
pub fn classify_status(status: StatusCode, body: &str) -> FetcherError {
    match status.as_u16() {
        429 | 503 => FetcherError::Throttled {
            status: status.as_u16(),
        },
        code if status.is_server_error() => FetcherError::ServerError {
            status: code,
            body: excerpt(body),
        },
        code => FetcherError::ClientError {
            status: code,
            body: excerpt(body),
        },
    }
}

#[async_trait]
impl PageSource for ArxivClient {
    async fn fetch_page(
        &self,
        window: &Window,
        offset: u64,
        page_size: usize,
    ) -> FetcherResult<FetchedPage> {
        let params = query_params(window, offset, page_size);

        // Consult the shared throttle before touching the network
        let waited = self.rate_limiter.acquire().await;

        let request_metrics = ProviderRequestMetrics::start(window.feed().as_str(), offset);
        debug!(
            correlation_id = %request_metrics.correlation_id(),
            feed = %window.feed(),
            offset = offset,
            page_size = page_size,
            throttle_wait_ms = waited.as_millis(),
            "Requesting page"
        );

        let response = match self.client.get(&self.base_url).query(&params).send().await {
            Ok(response) => response,
            Err(e) => {
                let error = classify_transport(&e);
                request_metrics.record_failure(error.label());
                warn!(feed = %window.feed(), offset = offset, error = %error, "Request failed");
                return Err(error);
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                let error = classify_transport(&e);
                request_metrics.record_failure(error.label());
                return Err(error);
            }
        };
        request_metrics.record_complete(status.as_u16());

        if !status.is_success() {
            let error = classify_status(status, &body);
            warn!(
                feed = %window.feed(),
                offset = offset,
                status = status.as_u16(),
                transient = error.is_transient(),
                "Provider returned error status"
            );
            return Err(error);
        }

        let parsed = parse_feed(&body)?;
        debug!(
            feed = %window.feed(),
            offset = offset,
            records = parsed.records.len(),
            reported_total = parsed.total_results,
            "Page decoded"
        );

        Ok(FetchedPage {
            records: parsed.records,
            reported_total: parsed.total_results,
        })
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}
