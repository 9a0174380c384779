//! CLI command implementations

pub mod error;
pub mod harvest;
pub mod status;

pub use error::CliError;
pub use harvest::{RunContinuousArgs, RunOnceArgs};
pub use status::StatusArgs;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::fetcher::arxiv_http::{ArxivClient, ARXIV_API_URL};
use crate::fetcher::shared_resources::{global_http_client, init_global_rate_limiter};
use crate::harvester::config::{
    DEFAULT_PAGE_SIZE, MAX_HARVEST_ATTEMPTS, MAX_PAGE_SIZE, MIN_REQUEST_INTERVAL_MS,
};
use crate::harvester::{FeedOrchestrator, HarvestConfig};
use crate::identifier::{default_feeds, FeedId};
use crate::resume::CheckpointStore;
use crate::shutdown::SharedShutdown;
use crate::window::PublishCalendar;

/// Parse and validate a page size
fn parse_page_size(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("page size must be at least 1".to_string());
    }
    if value > MAX_PAGE_SIZE {
        return Err(format!(
            "page size {value} exceeds maximum of {MAX_PAGE_SIZE}"
        ));
    }
    Ok(value)
}

/// Parse a YYYY-MM-DD date
pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| format!("Invalid date '{s}' (expected YYYY-MM-DD): {e}"))
}

/// Parse feed arguments, falling back to the default feed set when none are given
pub fn parse_feeds(raw: &[String]) -> Result<Vec<FeedId>, CliError> {
    if raw.is_empty() {
        return Ok(default_feeds());
    }
    let mut feeds = Vec::with_capacity(raw.len());
    for value in raw {
        let feed = FeedId::parse(value)?;
        if !feeds.contains(&feed) {
            feeds.push(feed);
        }
    }
    Ok(feeds)
}

/// Paper Harvester CLI
#[derive(Parser, Debug)]
#[command(name = "paper-harvester")]
#[command(about = "Harvest complete arXiv metadata for each publish window", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Directory dataset files are written to
    #[arg(long, global = true, default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory holding checkpoints and record spools
    #[arg(long, global = true, default_value = ".checkpoints")]
    pub checkpoint_dir: PathBuf,

    /// Records requested per page (max: 2000)
    #[arg(long, global = true, default_value_t = DEFAULT_PAGE_SIZE, value_parser = parse_page_size)]
    pub page_size: usize,

    /// Total attempts per page before it is recorded as a gap (range: 1-20)
    #[arg(long, global = true, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_page_retries: u32,

    /// Harvest passes per feed and window in one invocation
    #[arg(long, global = true, default_value_t = MAX_HARVEST_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    /// Minimum spacing between provider requests, in milliseconds
    ///
    /// arXiv asks for at least three seconds between requests from one client.
    #[arg(long, global = true, default_value_t = MIN_REQUEST_INTERVAL_MS)]
    pub min_request_interval_ms: u64,

    /// Query endpoint
    #[arg(long, global = true, default_value = ARXIV_API_URL)]
    pub base_url: String,

    /// Non-operating dates in addition to weekends (comma separated YYYY-MM-DD)
    #[arg(long, global = true, value_delimiter = ',', value_parser = parse_date)]
    pub holidays: Vec<NaiveDate>,

    /// Serve Prometheus metrics on this address (e.g., 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Discard existing checkpoints for the requested windows and start over
    #[arg(long, global = true, default_value_t = false)]
    pub force: bool,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Harvest one publish window for every feed, then exit
    RunOnce(RunOnceArgs),

    /// Harvest the latest windows on an interval until interrupted
    RunContinuous(RunContinuousArgs),

    /// Show checkpoint progress for a publish window
    Status(StatusArgs),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

impl Cli {
    /// Harvest configuration from the global flags
    pub fn harvest_config(&self) -> HarvestConfig {
        HarvestConfig::default()
            .with_page_size(self.page_size)
            .with_max_page_attempts(self.max_page_retries)
            .with_max_attempts(self.max_attempts)
    }

    /// Publish calendar with any extra holidays
    pub fn calendar(&self) -> PublishCalendar {
        PublishCalendar::default().with_holidays(self.holidays.iter().copied())
    }

    /// Checkpoint store rooted at `--checkpoint-dir`
    pub fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new(&self.checkpoint_dir)
    }

    /// Orchestrator over the arXiv client with the global throttle
    pub fn orchestrator(&self, shutdown: SharedShutdown) -> Result<FeedOrchestrator, CliError> {
        let config = self.harvest_config();
        config
            .validate()
            .map_err(|e| CliError::ConfigurationError(e.to_string()))?;

        let limiter =
            init_global_rate_limiter(Duration::from_millis(self.min_request_interval_ms));
        let client = ArxivClient::new(global_http_client(), self.base_url.clone(), limiter);
        Ok(
            FeedOrchestrator::new(Arc::new(client), self.checkpoint_store(), config)
                .with_shutdown(shutdown),
        )
    }

    /// Start the metrics exporter if requested
    pub async fn init_metrics(&self) {
        if let Some(addr) = self.metrics_addr {
            match crate::metrics::init_metrics(addr).await {
                Ok(()) => info!(addr = %addr, "Metrics endpoint listening"),
                Err(e) => warn!(addr = %addr, error = %e, "Metrics exporter not started"),
            }
        }
    }
}
