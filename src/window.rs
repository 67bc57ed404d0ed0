//! Time window resolution
//!
//! Caller bounds are parsed, moved into the configured timezone and
//! truncated to the top of the hour. Every aggregation works on the
//! resulting half-open `[start, end)` window.

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike,
};
use chrono_tz::Tz;
use thiserror::Error;

/// Window resolution failures. All of them are client errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field}: cannot parse '{value}' as an ISO 8601 date-time")]
    Malformed { field: &'static str, value: String },

    #[error("{field}: local time '{value}' does not exist in {tz}")]
    NonexistentLocalTime {
        field: &'static str,
        value: String,
        tz: String,
    },

    #[error("end_iso ({end}) is before start_iso ({start})")]
    EndBeforeStart { start: String, end: String },

    #[error("window of {requested_hours}h exceeds the maximum of {max_hours}h")]
    TooLarge { requested_hours: i64, max_hours: i64 },
}

/// Canonical `[start, end)` interval, hour aligned in a fixed timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Tz>,
    end: DateTime<Tz>,
}

impl TimeWindow {
    pub fn start(&self) -> DateTime<Tz> {
        self.start
    }

    pub fn end(&self) -> DateTime<Tz> {
        self.end
    }

    /// Whole hours covered by the window.
    pub fn hours(&self) -> i64 {
        (self.end - self.start).num_hours()
    }

    /// Start instant of every hour in the window, in order.
    pub fn hour_starts(&self) -> impl Iterator<Item = DateTime<Tz>> + '_ {
        (0..self.hours()).map(move |i| self.start + Duration::hours(i))
    }

    /// Wall-clock (date, hour) of every hour in the window, in order.
    pub fn local_buckets(&self) -> impl Iterator<Item = (NaiveDate, u32)> + '_ {
        self.hour_starts().map(|ts| (ts.date_naive(), ts.hour()))
    }

    /// Naive local bounds, as stored buckets are wall-clock values.
    pub fn naive_bounds(&self) -> (NaiveDateTime, NaiveDateTime) {
        (self.start.naive_local(), self.end.naive_local())
    }

    /// Whether a stored (date, hour) bucket falls inside the window.
    pub fn contains_bucket(&self, date: NaiveDate, hour: u32) -> bool {
        let Some(bucket) = date.and_hms_opt(hour, 0, 0) else {
            return false;
        };
        let (start, end) = self.naive_bounds();
        bucket >= start && bucket < end
    }
}

/// Parses caller bounds into canonical windows for one timezone
#[derive(Debug, Clone, Copy)]
pub struct WindowResolver {
    tz: Tz,
    max_span: Option<Duration>,
}

impl WindowResolver {
    pub fn new(tz: Tz) -> Self {
        Self { tz, max_span: None }
    }

    pub fn with_max_span(mut self, max_span: Duration) -> Self {
        self.max_span = Some(max_span);
        self
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn resolve(
        &self,
        start_iso: Option<&str>,
        end_iso: Option<&str>,
    ) -> Result<TimeWindow, WindowError> {
        let start = self.parse_bound("start_iso", start_iso)?;
        let end = self.parse_bound("end_iso", end_iso)?;

        if end < start {
            return Err(WindowError::EndBeforeStart {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }

        if let Some(max) = self.max_span {
            let span = end - start;
            if span > max {
                return Err(WindowError::TooLarge {
                    requested_hours: span.num_hours(),
                    max_hours: max.num_hours(),
                });
            }
        }

        Ok(TimeWindow { start, end })
    }

    /// Rolling window of `hours` starting at the hour containing `now`.
    pub fn next_hours(&self, now: DateTime<Tz>, hours: i64) -> TimeWindow {
        let start = self.truncate_to_hour(now);
        TimeWindow {
            start,
            end: start + Duration::hours(hours),
        }
    }

    pub fn now(&self) -> DateTime<Tz> {
        chrono::Utc::now().with_timezone(&self.tz)
    }

    fn parse_bound(
        &self,
        field: &'static str,
        raw: Option<&str>,
    ) -> Result<DateTime<Tz>, WindowError> {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty());
        let raw = raw.ok_or(WindowError::Missing { field })?;

        let local = match parse_iso(raw) {
            Some(Parsed::Offset(dt)) => dt.with_timezone(&self.tz),
            Some(Parsed::Naive(naive)) => self.localize(field, raw, naive)?,
            None => {
                return Err(WindowError::Malformed {
                    field,
                    value: raw.to_string(),
                })
            }
        };

        Ok(self.truncate_to_hour(local))
    }

    fn localize(
        &self,
        field: &'static str,
        raw: &str,
        naive: NaiveDateTime,
    ) -> Result<DateTime<Tz>, WindowError> {
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| WindowError::NonexistentLocalTime {
                field,
                value: raw.to_string(),
                tz: self.tz.name().to_string(),
            })
    }

    /// Drops the sub-hour part of the instant itself. Rebuilding the local
    /// wall-clock hour would pick the wrong side of a repeated hour.
    fn truncate_to_hour(&self, ts: DateTime<Tz>) -> DateTime<Tz> {
        ts - Duration::minutes(ts.minute().into())
            - Duration::seconds(ts.second().into())
            - Duration::nanoseconds(ts.nanosecond().into())
    }
}

enum Parsed {
    Offset(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

fn parse_iso(raw: &str) -> Option<Parsed> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(Parsed::Offset(dt));
    }

    let zulu;
    let raw = match raw.strip_suffix('Z').or_else(|| raw.strip_suffix('z')) {
        Some(rest) => {
            zulu = format!("{rest}+00:00");
            zulu.as_str()
        }
        None => raw,
    };

    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(Parsed::Offset(dt));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Parsed::Naive(naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(Parsed::Naive)
}

/// Fixed-offset view of a zoned timestamp, for serialization.
pub fn to_fixed(ts: DateTime<Tz>) -> DateTime<FixedOffset> {
    ts.with_timezone(&ts.offset().fix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn resolver() -> WindowResolver {
        WindowResolver::new(chrono_tz::Asia::Dubai)
    }

    fn local(y: i32, m: u32, d: u32, h: u32) -> DateTime<Tz> {
        chrono_tz::Asia::Dubai
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_naive_input_uses_default_timezone() {
        let w = resolver()
            .resolve(Some("2024-01-15T08:00"), Some("2024-01-15T16:00"))
            .unwrap();
        assert_eq!(w.start(), local(2024, 1, 15, 8));
        assert_eq!(w.end(), local(2024, 1, 15, 16));
        assert_eq!(w.hours(), 8);
    }

    #[test]
    fn test_offset_input_is_converted() {
        let w = resolver()
            .resolve(Some("2024-01-15T04:00:00Z"), Some("2024-01-15T10:00:00+00:00"))
            .unwrap();
        assert_eq!(w.start(), local(2024, 1, 15, 8));
        assert_eq!(w.end(), local(2024, 1, 15, 14));
    }

    #[test]
    fn test_truncates_to_hour() {
        let w = resolver()
            .resolve(Some("2024-01-15T08:59:59.999"), Some("2024-01-15 09:30"))
            .unwrap();
        assert_eq!(w.start(), local(2024, 1, 15, 8));
        assert_eq!(w.end(), local(2024, 1, 15, 9));
    }

    #[test]
    fn test_minute_precision_offset() {
        let w = resolver()
            .resolve(Some("2024-01-15T08:15+04:00"), Some("2024-01-15T09:00Z"))
            .unwrap();
        assert_eq!(w.start(), local(2024, 1, 15, 8));
        assert_eq!(w.end(), local(2024, 1, 15, 13));
    }

    #[test]
    fn test_date_only_is_midnight() {
        let w = resolver()
            .resolve(Some("2024-01-15"), Some("2024-01-16"))
            .unwrap();
        assert_eq!(w.hours(), 24);
    }

    #[test]
    fn test_end_before_start() {
        let err = resolver()
            .resolve(Some("2024-01-15T10:00"), Some("2024-01-15T09:00"))
            .unwrap_err();
        assert!(matches!(err, WindowError::EndBeforeStart { .. }));
    }

    #[test]
    fn test_empty_window_is_valid() {
        let w = resolver()
            .resolve(Some("2024-01-15T10:00"), Some("2024-01-15T10:45"))
            .unwrap();
        assert_eq!(w.hours(), 0);
        assert_eq!(w.hour_starts().count(), 0);
    }

    #[test]
    fn test_max_span() {
        let r = resolver().with_max_span(Duration::days(14));
        assert!(r
            .resolve(Some("2024-01-01T00:00"), Some("2024-01-15T00:00"))
            .is_ok());
        let err = r
            .resolve(Some("2024-01-01T00:00"), Some("2024-01-15T01:00"))
            .unwrap_err();
        assert_eq!(
            err,
            WindowError::TooLarge {
                requested_hours: 337,
                max_hours: 336
            }
        );
    }

    #[test]
    fn test_malformed_names_field() {
        let err = resolver()
            .resolve(Some("2024-01-15T08:00"), Some("yesterday"))
            .unwrap_err();
        assert!(err.to_string().starts_with("end_iso"));
        let err = resolver().resolve(None, Some("2024-01-15")).unwrap_err();
        assert_eq!(err, WindowError::Missing { field: "start_iso" });
    }

    #[test]
    fn test_nonexistent_local_time() {
        let r = WindowResolver::new(chrono_tz::America::New_York);
        let err = r
            .resolve(Some("2024-03-10T02:30"), Some("2024-03-10T05:00"))
            .unwrap_err();
        assert!(matches!(err, WindowError::NonexistentLocalTime { .. }));
    }

    #[test]
    fn test_offset_input_in_repeated_hour_keeps_its_side() {
        let r = WindowResolver::new(chrono_tz::America::New_York);
        let w = r
            .resolve(Some("2024-11-03T01:30:00-05:00"), Some("2024-11-03T03:00:00-05:00"))
            .unwrap();
        assert_eq!(w.start(), Utc.with_ymd_and_hms(2024, 11, 3, 6, 0, 0).unwrap());
        assert_eq!(w.end(), Utc.with_ymd_and_hms(2024, 11, 3, 8, 0, 0).unwrap());
        assert_eq!(w.hours(), 2);

        let w = r
            .resolve(Some("2024-11-03T01:59:59-04:00"), Some("2024-11-03T02:00:00-05:00"))
            .unwrap();
        assert_eq!(w.start(), Utc.with_ymd_and_hms(2024, 11, 3, 5, 0, 0).unwrap());
        assert_eq!(w.hours(), 2);
    }

    #[test]
    fn test_ambiguous_naive_time_takes_earliest() {
        let r = WindowResolver::new(chrono_tz::America::New_York);
        let w = r
            .resolve(Some("2024-11-03T01:30"), Some("2024-11-03T03:00"))
            .unwrap();
        // 01:30 EDT, the first of the two 01:30s
        assert_eq!(w.start(), Utc.with_ymd_and_hms(2024, 11, 3, 5, 0, 0).unwrap());
        assert_eq!(w.end(), Utc.with_ymd_and_hms(2024, 11, 3, 8, 0, 0).unwrap());
        assert_eq!(w.hours(), 3);
    }

    #[test]
    fn test_fractional_offset_truncates_local_hour() {
        let w = WindowResolver::new(chrono_tz::Asia::Kolkata)
            .resolve(Some("2024-01-15T03:15:00Z"), Some("2024-01-15T05:00:00Z"))
            .unwrap();
        // 08:45 IST truncates to 08:00 IST
        assert_eq!(w.start(), Utc.with_ymd_and_hms(2024, 1, 15, 2, 30, 0).unwrap());
        assert_eq!(w.end(), Utc.with_ymd_and_hms(2024, 1, 15, 4, 30, 0).unwrap());
    }

    #[test]
    fn test_next_hours_in_repeated_hour() {
        let now = Utc
            .with_ymd_and_hms(2024, 11, 3, 6, 41, 7)
            .unwrap()
            .with_timezone(&chrono_tz::America::New_York);
        let w = WindowResolver::new(chrono_tz::America::New_York).next_hours(now, 8);
        assert_eq!(w.start(), Utc.with_ymd_and_hms(2024, 11, 3, 6, 0, 0).unwrap());
        assert_eq!(w.hours(), 8);
    }

    #[test]
    fn test_local_buckets_cross_midnight() {
        let w = resolver()
            .resolve(Some("2024-01-15T22:00"), Some("2024-01-16T02:00"))
            .unwrap();
        let buckets: Vec<_> = w.local_buckets().collect();
        let d15 = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let d16 = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        assert_eq!(buckets, vec![(d15, 22), (d15, 23), (d16, 0), (d16, 1)]);
        assert!(w.contains_bucket(d16, 1));
        assert!(!w.contains_bucket(d16, 2));
        assert!(!w.contains_bucket(d15, 21));
    }

    #[test]
    fn test_next_hours() {
        let now = chrono_tz::Asia::Dubai
            .with_ymd_and_hms(2024, 1, 15, 9, 41, 7)
            .unwrap();
        let w = resolver().next_hours(now, 8);
        assert_eq!(w.start(), local(2024, 1, 15, 9));
        assert_eq!(w.end(), local(2024, 1, 15, 17));
    }

    #[test]
    fn test_to_fixed_keeps_offset() {
        let fixed = to_fixed(local(2024, 1, 15, 8));
        assert_eq!(fixed.to_rfc3339(), "2024-01-15T08:00:00+04:00");
    }
}
