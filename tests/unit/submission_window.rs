//! Unit tests for the publish calendar

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use pretty_assertions::assert_eq;

use paper_harvester::window::WindowError;
use paper_harvester::{FeedId, PublishCalendar};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn cs_ai() -> FeedId {
    FeedId::parse("cs.AI").unwrap()
}

#[test]
fn window_edges_follow_new_york_offset() {
    let calendar = PublishCalendar::default();

    // EST, UTC-5
    let winter = calendar.window_for(date(2024, 1, 10), &cs_ai()).unwrap();
    assert_eq!(winter.from(), Utc.with_ymd_and_hms(2024, 1, 9, 19, 0, 0).unwrap());
    assert_eq!(winter.to(), Utc.with_ymd_and_hms(2024, 1, 10, 19, 0, 0).unwrap());

    // EDT, UTC-4
    let summer = calendar.window_for(date(2024, 7, 10), &cs_ai()).unwrap();
    assert_eq!(summer.from(), Utc.with_ymd_and_hms(2024, 7, 9, 18, 0, 0).unwrap());
    assert_eq!(summer.to(), Utc.with_ymd_and_hms(2024, 7, 10, 18, 0, 0).unwrap());
}

#[test]
fn window_spanning_dst_change_is_one_hour_short() {
    // Clocks spring forward on Sunday 2024-03-10
    let window = PublishCalendar::default()
        .window_for(date(2024, 3, 11), &cs_ai())
        .unwrap();

    assert_eq!(window.opened_on(), date(2024, 3, 8));
    assert_eq!(window.span_days(), 3);
    assert_eq!((window.to() - window.from()).num_hours(), 71);
}

#[test]
fn consecutive_windows_tile_without_overlap() {
    let calendar = PublishCalendar::default().with_holidays([date(2024, 12, 25)]);
    let dates = [
        date(2024, 12, 20),
        date(2024, 12, 23),
        date(2024, 12, 24),
        date(2024, 12, 26),
        date(2024, 12, 27),
    ];

    let windows: Vec<_> = dates
        .iter()
        .map(|d| calendar.window_for(*d, &cs_ai()).unwrap())
        .collect();
    for pair in windows.windows(2) {
        assert_eq!(pair[0].to(), pair[1].from());
    }
    assert_eq!(windows[3].opened_on(), date(2024, 12, 24));
}

#[test]
fn window_crosses_year_boundary() {
    let calendar = PublishCalendar::default().with_holidays([date(2024, 1, 1)]);
    let window = calendar.window_for(date(2024, 1, 2), &cs_ai()).unwrap();

    assert_eq!(window.opened_on(), date(2023, 12, 29));
    assert_eq!(window.span_days(), 4);
}

#[test]
fn holiday_publish_date_is_rejected() {
    let calendar = PublishCalendar::default().with_holidays([date(2024, 12, 25)]);
    let result = calendar.window_for(date(2024, 12, 25), &cs_ai());
    assert!(matches!(result, Err(WindowError::NonOperatingDay(d)) if d == date(2024, 12, 25)));
}

#[test]
fn unbroken_holidays_exhaust_the_lookback() {
    let holidays = (1..=20).map(|d| date(2024, 8, d));
    let calendar = PublishCalendar::default().with_holidays(holidays);

    let result = calendar.window_for(date(2024, 8, 21), &cs_ai());
    assert!(matches!(result, Err(WindowError::NoOperatingDay { .. })));
}

#[test]
fn custom_cutoff_and_timezone() {
    let calendar = PublishCalendar::default()
        .with_timezone(chrono_tz::Europe::Berlin)
        .with_cutoff(NaiveTime::from_hms_opt(9, 30, 0).unwrap());

    let window = calendar.window_for(date(2024, 1, 10), &cs_ai()).unwrap();
    assert_eq!(window.to(), Utc.with_ymd_and_hms(2024, 1, 10, 8, 30, 0).unwrap());
}

#[test]
fn latest_closed_date_on_weekend_is_friday() {
    let calendar = PublishCalendar::default();
    let saturday_noon = Utc.with_ymd_and_hms(2024, 1, 13, 17, 0, 0).unwrap();
    assert_eq!(calendar.latest_closed_date(saturday_noon).unwrap(), date(2024, 1, 12));
}

#[test]
fn latest_closed_date_flips_exactly_at_cutoff() {
    let calendar = PublishCalendar::default();
    let cutoff = Utc.with_ymd_and_hms(2024, 1, 10, 19, 0, 0).unwrap();

    assert_eq!(calendar.latest_closed_date(cutoff).unwrap(), date(2024, 1, 10));
    let just_before = cutoff - chrono::Duration::seconds(1);
    assert_eq!(calendar.latest_closed_date(just_before).unwrap(), date(2024, 1, 9));
}
