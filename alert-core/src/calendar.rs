//! Business-calendar arithmetic.
//!
//! Every day/hour/weekday decision the schedulers make goes through
//! [`BusinessCalendar`], never through the process-local or UTC calendar.
//! Weekdays are numbered 0 (Sunday) to 6 (Saturday).

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Closed time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessCalendar {
    tz: FixedOffset,
}

impl BusinessCalendar {
    pub fn new(tz: FixedOffset) -> Self {
        Self { tz }
    }

    pub fn tz(&self) -> FixedOffset {
        self.tz
    }

    pub fn local(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.tz)
    }

    pub fn date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local(at).date_naive()
    }

    pub fn hour(&self, at: DateTime<Utc>) -> u32 {
        self.local(at).hour()
    }

    pub fn weekday(&self, at: DateTime<Utc>) -> u32 {
        self.local(at).weekday().num_days_from_sunday()
    }

    /// Business midnight of `date`, as a UTC instant.
    pub fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let local_midnight = date.and_time(NaiveTime::MIN);
        (local_midnight - Duration::seconds(i64::from(self.tz.local_minus_utc()))).and_utc()
    }

    pub fn same_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.date(a) == self.date(b)
    }

    /// Midnight of the most recent `weekday` at or before `now`.
    pub fn week_boundary(&self, now: DateTime<Utc>, weekday: u32) -> DateTime<Utc> {
        let today = self.date(now);
        let back = (self.weekday(now) + 7 - weekday % 7) % 7;
        self.start_of_day(today - Duration::days(i64::from(back)))
    }

    /// The `days` full business days ending at the previous midnight.
    pub fn previous_days(&self, now: DateTime<Utc>, days: i64) -> Period {
        let today = self.start_of_day(self.date(now));
        Period {
            start: today - Duration::days(days),
            end: today - Duration::nanoseconds(1),
        }
    }

    /// The window of equal length immediately preceding `period`.
    pub fn preceding(&self, period: &Period) -> Period {
        let len = period.end - period.start + Duration::nanoseconds(1);
        Period {
            start: period.start - len,
            end: period.start - Duration::nanoseconds(1),
        }
    }

    /// Whole calendar days from today until `expires_at`, clamped at zero.
    pub fn days_until(&self, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> i64 {
        (self.date(expires_at) - self.date(now)).num_days().max(0)
    }
}
