//! Reference-calendar helpers for daily reward figures
//!
//! "Today" is the calendar day in a fixed UTC offset, independent of both
//! UTC and the process-local timezone.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};

/// Calendar day of `at` in the reference offset
pub fn reference_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    at.with_timezone(&offset).date_naive()
}

/// The reference day before the day of `at`
pub fn previous_reference_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    let today = reference_date(at, offset);
    today.pred_opt().unwrap_or(today)
}

/// UTC half-open bounds `[start, end)` of a reference-calendar day
pub fn day_bounds(date: NaiveDate, offset: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_midnight = date.and_time(NaiveTime::MIN);
    let utc_midnight = local_midnight - Duration::seconds(i64::from(offset.local_minus_utc()));
    let start = DateTime::<Utc>::from_naive_utc_and_offset(utc_midnight, Utc);
    (start, start + Duration::days(1))
}
