//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use paper_harvester::fetcher::{FetchedPage, FetcherError, FetcherResult, PageSource};
use paper_harvester::harvester::HarvestConfig;
use paper_harvester::shutdown::SharedShutdown;
use paper_harvester::window::Window;
use paper_harvester::{FeedId, PublishCalendar, Record, RecordId};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Wednesday 2024-01-10, a plain one-day window
pub fn publish_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
}

pub fn feed(raw: &str) -> FeedId {
    FeedId::parse(raw).unwrap()
}

pub fn window(raw: &str) -> Window {
    PublishCalendar::default()
        .window_for(publish_date(), &feed(raw))
        .unwrap()
}

/// Harvest configuration with every backoff disabled
pub fn fast_config() -> HarvestConfig {
    HarvestConfig::default().with_backoff_base(Duration::ZERO)
}

/// `count` records with identifiers `2401.<first>..`, submitted a minute apart
pub fn records(first: u32, count: u32) -> Vec<Record> {
    let base = Utc.with_ymd_and_hms(2024, 1, 9, 19, 30, 0).unwrap();
    (0..count)
        .map(|i| {
            let n = first + i;
            let submitted = base + ChronoDuration::minutes(i64::from(i));
            Record {
                id: RecordId::new(&format!("2401.{n:05}v1")),
                version: Some(1),
                title: format!("Paper {n}"),
                authors: vec![format!("Author {n}")],
                summary: format!("Abstract of paper {n}."),
                categories: BTreeSet::from(["cs.AI".to_string()]),
                submitted_at: submitted,
                updated_at: submitted,
                links: Vec::new(),
            }
        })
        .collect()
}

/// Scripted in-memory provider
///
/// Serves a fixed record list per feed, optionally with an overridden total,
/// scripted failures per (feed, offset), and a shutdown trigger.
#[derive(Default)]
pub struct FakeProvider {
    records: HashMap<String, Vec<Record>>,
    totals: HashMap<String, u64>,
    failures: Mutex<HashMap<(String, u64), VecDeque<FetcherError>>>,
    calls: Mutex<Vec<(String, u64)>>,
    shutdown_on_call: Option<(usize, SharedShutdown)>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(mut self, feed: &str, records: Vec<Record>) -> Self {
        self.records.insert(feed.to_string(), records);
        self
    }

    /// Report `total` instead of the real record count
    pub fn with_reported_total(mut self, feed: &str, total: u64) -> Self {
        self.totals.insert(feed.to_string(), total);
        self
    }

    /// Fail the next `times` requests for (feed, offset) with `error`
    pub fn failing(self, feed: &str, offset: u64, times: usize, error: FetcherError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .entry((feed.to_string(), offset))
            .or_default()
            .extend(std::iter::repeat(error).take(times));
        self
    }

    /// Request shutdown while serving call number `call` (1-based)
    pub fn shutdown_on_call(mut self, call: usize, shutdown: SharedShutdown) -> Self {
        self.shutdown_on_call = Some((call, shutdown));
        self
    }

    /// Offsets requested for a feed, in order
    pub fn offsets(&self, feed: &str) -> Vec<u64> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _)| f == feed)
            .map(|(_, offset)| *offset)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

pub fn timeout() -> FetcherError {
    FetcherError::Timeout("operation timed out".to_string())
}

#[async_trait]
impl PageSource for FakeProvider {
    async fn fetch_page(
        &self,
        window: &Window,
        offset: u64,
        page_size: usize,
    ) -> FetcherResult<FetchedPage> {
        let feed = window.feed().as_str().to_string();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((feed.clone(), offset));
            calls.len()
        };
        if let Some((trigger, shutdown)) = &self.shutdown_on_call {
            if call == *trigger {
                shutdown.request_shutdown();
            }
        }

        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&(feed.clone(), offset))
            .and_then(|queue| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }

        let all = self.records.get(&feed).cloned().unwrap_or_default();
        let start = (offset as usize).min(all.len());
        let end = (start + page_size).min(all.len());
        Ok(FetchedPage {
            records: all[start..end].to_vec(),
            reported_total: self
                .totals
                .get(&feed)
                .copied()
                .unwrap_or(all.len() as u64),
        })
    }

    fn name(&self) -> &str {
        "fake"
    }
}
