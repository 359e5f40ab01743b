//! Trading-session calendar math.
//!
//! The pipeline's daily anchor is midnight America/New_York; a "trading day"
//! is the New York civil date an instant falls on. The opening window is
//! `[anchor, anchor + 4h)`. Bar indices are derived from the New York
//! minute-of-day so bar boundaries follow the session clock, not UTC.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

pub const SESSION_TZ: Tz = New_York;

/// Hours in the opening window, measured from the daily anchor.
pub const OPENING_WINDOW_HOURS: i64 = 4;

/// The trading day a UTC instant belongs to (its New York civil date).
pub fn trading_day(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&SESSION_TZ).date_naive()
}

/// UTC bounds of the opening window for the trading day containing `at`,
/// plus the trading day itself. The window is `[start, end)`.
///
/// New York DST transitions happen at 02:00, so the midnight anchor always
/// exists; `earliest()` resolves the (never-occurring) ambiguous case.
pub fn opening_window_utc(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>, NaiveDate) {
    let day = trading_day(at);
    let anchor = SESSION_TZ
        .from_local_datetime(&day.and_time(NaiveTime::MIN))
        .earliest()
        .expect("New York midnight is never skipped by DST")
        .with_timezone(&Utc);
    (anchor, anchor + Duration::hours(OPENING_WINDOW_HOURS), day)
}

/// Minute of the New York civil day (0..1440) for a UTC instant.
pub fn minute_of_day(at: DateTime<Utc>) -> u32 {
    let local = at.with_timezone(&SESSION_TZ);
    local.hour() * 60 + local.minute()
}

/// Index of the fixed-width bar containing `at`:
/// `floor(minute-of-day / bar_minutes)`.
pub fn bar_index(at: DateTime<Utc>, bar_minutes: u32) -> u32 {
    minute_of_day(at) / bar_minutes
}

/// UTC instant at which the bar containing `at` starts.
///
/// Computed arithmetically from the minute-of-day excess so the result is
/// well-defined even across DST transitions.
pub fn floor_to_bar(at: DateTime<Utc>, bar_minutes: u32) -> DateTime<Utc> {
    let excess_minutes = (minute_of_day(at) % bar_minutes) as i64;
    let local = at.with_timezone(&SESSION_TZ);
    let secs = at.timestamp() - excess_minutes * 60 - local.second() as i64;
    match Utc.timestamp_opt(secs, 0) {
        chrono::LocalResult::Single(dt) => dt,
        _ => at,
    }
}

/// End boundary (exclusive) of the bar containing `at`.
pub fn bar_end(at: DateTime<Utc>, bar_minutes: u32) -> DateTime<Utc> {
    floor_to_bar(at, bar_minutes) + Duration::minutes(bar_minutes as i64)
}
