//! Submission window calendar
//!
//! arXiv announces once per operating day. Everything submitted between the
//! cutoff of the previous operating day and the cutoff of the announcement
//! day belongs to that day's window, so a Monday window reaches back to
//! Friday's cutoff and spans three calendar days.
//!
//! Cutoffs are computed in the provider's local time and only then converted
//! to UTC, so the window edges follow daylight-saving transitions.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::identifier::FeedId;

/// Provider reference timezone
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;

/// Local cutoff hour (14:00 in the reference timezone)
pub const DEFAULT_CUTOFF_HOUR: u32 = 14;

/// How far back to search for the previous operating day
pub const MAX_LOOKBACK_DAYS: i64 = 14;

/// Window calendar errors
#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    /// The requested publish date has no announcement
    #[error("{0} is not an operating day")]
    NonOperatingDay(NaiveDate),

    /// No operating day found within the lookback
    #[error("no operating day within {days} days before {date}")]
    NoOperatingDay {
        /// Date the search started from
        date: NaiveDate,
        /// Days searched
        days: i64,
    },

    /// The cutoff could not be placed on the local timeline
    #[error("cutoff {time} on {date} does not exist in {timezone}")]
    InvalidLocalTime {
        /// Calendar date
        date: NaiveDate,
        /// Local cutoff time
        time: NaiveTime,
        /// Reference timezone
        timezone: String,
    },
}

/// Acceptance window for one (feed, publish date)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    feed: FeedId,
    publish_date: NaiveDate,
    opened_on: NaiveDate,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl Window {
    /// Create a window from explicit bounds
    pub fn new(
        feed: FeedId,
        publish_date: NaiveDate,
        opened_on: NaiveDate,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Self {
        Self {
            feed,
            publish_date,
            opened_on,
            from,
            to,
        }
    }

    /// Feed this window belongs to
    pub fn feed(&self) -> &FeedId {
        &self.feed
    }

    /// Announcement date the window closes on
    pub fn publish_date(&self) -> NaiveDate {
        self.publish_date
    }

    /// Operating day whose cutoff opened the window
    pub fn opened_on(&self) -> NaiveDate {
        self.opened_on
    }

    /// Inclusive lower bound
    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    /// Exclusive upper bound
    pub fn to(&self) -> DateTime<Utc> {
        self.to
    }

    /// Number of calendar days covered
    pub fn span_days(&self) -> i64 {
        (self.publish_date - self.opened_on).num_days()
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} [{} .. {})",
            self.feed,
            self.publish_date,
            self.from.format("%Y-%m-%dT%H:%MZ"),
            self.to.format("%Y-%m-%dT%H:%MZ")
        )
    }
}

/// Provider publication calendar
#[derive(Debug, Clone)]
pub struct PublishCalendar {
    timezone: Tz,
    cutoff: NaiveTime,
    non_operating_weekdays: Vec<Weekday>,
    holidays: BTreeSet<NaiveDate>,
}

impl Default for PublishCalendar {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE,
            cutoff: NaiveTime::from_hms_opt(DEFAULT_CUTOFF_HOUR, 0, 0).unwrap_or(NaiveTime::MIN),
            non_operating_weekdays: vec![Weekday::Sat, Weekday::Sun],
            holidays: BTreeSet::new(),
        }
    }
}

impl PublishCalendar {
    /// Use a different reference timezone
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Use a different local cutoff time
    pub fn with_cutoff(mut self, cutoff: NaiveTime) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Add non-operating holidays
    pub fn with_holidays<I: IntoIterator<Item = NaiveDate>>(mut self, holidays: I) -> Self {
        self.holidays.extend(holidays);
        self
    }

    /// Reference timezone
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Local cutoff time
    pub fn cutoff(&self) -> NaiveTime {
        self.cutoff
    }

    /// Whether the provider announces on this date
    pub fn is_operating_day(&self, date: NaiveDate) -> bool {
        !self.non_operating_weekdays.contains(&date.weekday()) && !self.holidays.contains(&date)
    }

    /// Most recent operating day strictly before `date`
    pub fn previous_operating_day(&self, date: NaiveDate) -> Result<NaiveDate, WindowError> {
        (1..=MAX_LOOKBACK_DAYS)
            .map(|back| date - Duration::days(back))
            .find(|candidate| self.is_operating_day(*candidate))
            .ok_or(WindowError::NoOperatingDay {
                date,
                days: MAX_LOOKBACK_DAYS,
            })
    }

    /// Cutoff instant of a calendar date, in UTC
    ///
    /// An ambiguous local time (clocks falling back) resolves to the earlier
    /// instant; a nonexistent one (clocks springing forward) moves one hour later.
    pub fn cutoff_instant(&self, date: NaiveDate) -> Result<DateTime<Utc>, WindowError> {
        let local = date.and_time(self.cutoff);
        let resolved = self
            .timezone
            .from_local_datetime(&local)
            .earliest()
            .or_else(|| {
                self.timezone
                    .from_local_datetime(&(local + Duration::hours(1)))
                    .earliest()
            })
            .ok_or_else(|| WindowError::InvalidLocalTime {
                date,
                time: self.cutoff,
                timezone: self.timezone.name().to_string(),
            })?;
        Ok(resolved.with_timezone(&Utc))
    }

    /// Acceptance window for a publish date
    ///
    /// # Errors
    ///
    /// Fails when `publish_date` is not an operating day, or no operating
    /// day precedes it within [`MAX_LOOKBACK_DAYS`].
    pub fn window_for(&self, publish_date: NaiveDate, feed: &FeedId) -> Result<Window, WindowError> {
        if !self.is_operating_day(publish_date) {
            return Err(WindowError::NonOperatingDay(publish_date));
        }
        let opened_on = self.previous_operating_day(publish_date)?;
        Ok(Window::new(
            feed.clone(),
            publish_date,
            opened_on,
            self.cutoff_instant(opened_on)?,
            self.cutoff_instant(publish_date)?,
        ))
    }

    /// Most recent publish date whose cutoff has passed at `now`
    pub fn latest_closed_date(&self, now: DateTime<Utc>) -> Result<NaiveDate, WindowError> {
        let today = now.with_timezone(&self.timezone).date_naive();
        for back in 0..=MAX_LOOKBACK_DAYS {
            let candidate = today - Duration::days(back);
            if self.is_operating_day(candidate) && self.cutoff_instant(candidate)? <= now {
                return Ok(candidate);
            }
        }
        Err(WindowError::NoOperatingDay {
            date: today,
            days: MAX_LOOKBACK_DAYS,
        })
    }
}
