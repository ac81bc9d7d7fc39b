//! Week boundaries for chart periods.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};

use crate::models::WeekRange;

/// Splits time into 7-day chart periods starting on `anchor` at 00:00 UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeekCalendar {
    anchor: Weekday,
}

impl Default for WeekCalendar {
    fn default() -> Self {
        Self { anchor: Weekday::Fri }
    }
}

impl WeekCalendar {
    pub fn new(anchor: Weekday) -> Self {
        Self { anchor }
    }

    pub fn anchor(&self) -> Weekday {
        self.anchor
    }

    /// Start of the period containing `instant`.
    pub fn week_start(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let date = instant.date_naive();
        let days_back = (7 + date.weekday().num_days_from_monday() - self.anchor.num_days_from_monday()) % 7;
        let start = date - Duration::days(i64::from(days_back));
        Utc.from_utc_datetime(&start.and_time(chrono::NaiveTime::MIN))
    }

    /// Periods covering `[start, now)`, oldest first. With `year`, only the
    /// periods whose last second falls in that year are kept.
    pub fn weeks(&self, start: DateTime<Utc>, now: DateTime<Utc>, year: Option<i32>) -> Vec<WeekRange> {
        let mut weeks = Vec::new();
        let mut from = self.week_start(start).timestamp();
        let end = now.timestamp();

        while from < end {
            let week = WeekRange::starting_at(from);
            if year.map_or(true, |year| week.is_in_year(year)) {
                weeks.push(week);
            }
            from = week.to + 1;
        }

        weeks
    }

    /// Calendar years from `start` through `now`, ascending.
    pub fn years(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> Vec<i32> {
        if start > now {
            return Vec::new();
        }
        (start.year()..=now.year()).collect()
    }
}
