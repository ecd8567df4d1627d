//! Business-day arithmetic in a fixed reference timezone.
//!
//! A business day is any weekday (Mon-Fri) in the configured UTC offset.
//! Holidays are not modelled.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};

use crate::AnalysisError;

#[derive(Debug, Clone, Copy)]
pub struct BusinessCalendar {
    offset: FixedOffset,
}

impl BusinessCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Build from a signed offset in minutes east of UTC (e.g. `-300` for UTC-5).
    pub fn from_offset_minutes(minutes: i32) -> Result<Self, AnalysisError> {
        FixedOffset::east_opt(minutes * 60)
            .map(Self::new)
            .ok_or_else(|| AnalysisError::Validation(format!("invalid UTC offset: {minutes} minutes")))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn is_business_day(date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Calendar date of `now` in the reference timezone.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// The business day a run at `now` belongs to; weekends map back to Friday.
    pub fn current_business_day(&self, now: DateTime<Utc>) -> NaiveDate {
        let mut day = self.local_date(now);
        while !Self::is_business_day(day) {
            day -= Duration::days(1);
        }
        day
    }

    pub fn previous_business_day(date: NaiveDate) -> NaiveDate {
        let mut day = date - Duration::days(1);
        while !Self::is_business_day(day) {
            day -= Duration::days(1);
        }
        day
    }

    /// The `n`th most recent business day, counting `day` itself as the first.
    pub fn nth_recent_business_day(day: NaiveDate, n: u32) -> NaiveDate {
        let mut current = day;
        while !Self::is_business_day(current) {
            current -= Duration::days(1);
        }
        for _ in 1..n.max(1) {
            current = Self::previous_business_day(current);
        }
        current
    }

    /// `[start, end)` of `day` in the reference timezone, expressed in UTC.
    pub fn day_bounds_utc(&self, day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let shift = Duration::seconds(i64::from(self.offset.local_minus_utc()));
        let local_midnight = day.and_time(NaiveTime::MIN);
        let start = Utc.from_utc_datetime(&(local_midnight - shift));
        (start, start + Duration::days(1))
    }
}
