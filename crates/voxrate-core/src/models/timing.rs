//! Recurring schedule shared by rate intervals and action timings

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Days searched forward by [`Timing::next_start_time`]
const SCHEDULE_HORIZON_DAYS: i64 = 366 * 4;

/// Calendar filter plus a daily clock window
///
/// Empty filter lists match everything. A missing start time means midnight,
/// a missing end time (or `00:00:00`) means end of day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    #[serde(default)]
    pub years: Vec<i32>,

    #[serde(default)]
    pub months: Vec<u32>,

    #[serde(default)]
    pub month_days: Vec<u32>,

    #[serde(default)]
    pub week_days: Vec<Weekday>,

    #[serde(default)]
    pub start_time: Option<NaiveTime>,

    #[serde(default)]
    pub end_time: Option<NaiveTime>,
}

impl Timing {
    /// Monday to Friday starting at `start`
    pub fn workdays(start: NaiveTime) -> Self {
        Self {
            week_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            start_time: Some(start),
            ..Self::default()
        }
    }

    /// Saturday and Sunday, all day
    pub fn weekends() -> Self {
        Self {
            week_days: vec![Weekday::Sat, Weekday::Sun],
            ..Self::default()
        }
    }

    /// True when the calendar filters accept `date`
    pub fn matches_date(&self, date: NaiveDate) -> bool {
        (self.years.is_empty() || self.years.contains(&date.year()))
            && (self.months.is_empty() || self.months.contains(&date.month()))
            && (self.month_days.is_empty() || self.month_days.contains(&date.day()))
            && (self.week_days.is_empty() || self.week_days.contains(&date.weekday()))
    }

    fn effective_end(&self) -> Option<NaiveTime> {
        self.end_time.filter(|end| *end != NaiveTime::MIN)
    }

    /// True when the schedule covers the instant `t`
    pub fn is_active_at(&self, t: DateTime<Utc>) -> bool {
        if !self.matches_date(t.date_naive()) {
            return false;
        }
        let time = t.time();
        let after_start = self.start_time.map_or(true, |start| time >= start);
        let before_end = self.effective_end().map_or(true, |end| time < end);
        after_start && before_end
    }

    /// Earliest instant after `t` at which [`Timing::is_active_at`] may change
    pub fn next_boundary_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let date = t.date_naive();
        let mut next = next_midnight(t);
        for clock in [self.start_time, self.effective_end()].into_iter().flatten() {
            let candidate = Utc.from_utc_datetime(&date.and_time(clock));
            if candidate > t && candidate < next {
                next = candidate;
            }
        }
        next
    }

    /// Next instant strictly after `after` at which the schedule starts
    pub fn next_start_time(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = self.start_time.unwrap_or(NaiveTime::MIN);
        let mut date = after.date_naive();
        for _ in 0..SCHEDULE_HORIZON_DAYS {
            if let Some(max_year) = self.years.iter().max() {
                if date.year() > *max_year {
                    return None;
                }
            }
            if self.matches_date(date) {
                let candidate = Utc.from_utc_datetime(&date.and_time(start));
                if candidate > after {
                    return Some(candidate);
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

/// Midnight following `t`
pub fn next_midnight(t: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = t.date_naive() + Duration::days(1);
    Utc.from_utc_datetime(&tomorrow.and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_workday_evening_window() {
        let evening = Timing::workdays(hms(18, 0, 0));
        // 2012-02-02 is a Thursday
        assert!(!evening.is_active_at(at("2012-02-02T17:59:59Z")));
        assert!(evening.is_active_at(at("2012-02-02T18:00:00Z")));
        assert!(evening.is_active_at(at("2012-02-02T23:59:59Z")));
        assert!(!evening.is_active_at(at("2012-02-04T18:30:00Z")));
    }

    #[test]
    fn test_end_time_is_exclusive() {
        let day = Timing {
            start_time: Some(hms(8, 0, 0)),
            end_time: Some(hms(18, 0, 0)),
            ..Timing::default()
        };
        assert!(day.is_active_at(at("2012-02-02T17:59:59Z")));
        assert!(!day.is_active_at(at("2012-02-02T18:00:00Z")));
        assert!(!day.is_active_at(at("2012-02-02T07:00:00Z")));
    }

    #[test]
    fn test_midnight_end_means_end_of_day() {
        let late = Timing {
            start_time: Some(hms(20, 0, 0)),
            end_time: Some(NaiveTime::MIN),
            ..Timing::default()
        };
        assert!(late.is_active_at(at("2012-02-02T23:30:00Z")));
    }

    #[test]
    fn test_next_boundary_after() {
        let day = Timing {
            start_time: Some(hms(8, 0, 0)),
            end_time: Some(hms(18, 0, 0)),
            ..Timing::default()
        };
        assert_eq!(
            day.next_boundary_after(at("2012-02-02T07:00:00Z")),
            at("2012-02-02T08:00:00Z")
        );
        assert_eq!(
            day.next_boundary_after(at("2012-02-02T08:00:00Z")),
            at("2012-02-02T18:00:00Z")
        );
        assert_eq!(
            day.next_boundary_after(at("2012-02-02T19:00:00Z")),
            at("2012-02-03T00:00:00Z")
        );
    }

    #[test]
    fn test_next_start_time() {
        let monthly = Timing {
            month_days: vec![1],
            start_time: Some(hms(0, 0, 0)),
            ..Timing::default()
        };
        assert_eq!(
            monthly.next_start_time(at("2012-02-02T10:00:00Z")),
            Some(at("2012-03-01T00:00:00Z"))
        );

        let expired = Timing {
            years: vec![2010],
            ..Timing::default()
        };
        assert_eq!(expired.next_start_time(at("2012-02-02T10:00:00Z")), None);
    }
}
