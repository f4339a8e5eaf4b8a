//! Wall-clock types consumed by the window scheduler.
//!
//! Time arrives from an external synchronization collaborator. Until it has
//! completed one successful sync the reported calendar year sits at a default
//! (typically 1970), so plausibility is judged on the year alone.

use core::fmt;

use chrono::{DateTime, Datelike, Month, NaiveDate, NaiveDateTime, TimeDelta, Timelike};

/// Earliest calendar year accepted as a synchronized clock reading.
pub const MIN_VALID_YEAR: u16 = 2023;

/// Calendar date used to detect day rollover.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CalendarDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl CalendarDate {
    #[must_use]
    pub const fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Hour/minute pair at one-minute granularity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub const MIDNIGHT: Self = Self { hour: 0, minute: 0 };

    /// Builds a time of day, rejecting out-of-range fields.
    #[must_use]
    pub const fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    #[must_use]
    pub const fn hour(self) -> u8 {
        self.hour
    }

    #[must_use]
    pub const fn minute(self) -> u8 {
        self.minute
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Local time as reported by the clock collaborator.
///
/// Always within years `0..=u16::MAX`; every constructor enforces it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LocalTime(NaiveDateTime);

impl LocalTime {
    /// Builds a local time, validating every field against the calendar.
    #[must_use]
    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Option<Self> {
        NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))?
            .and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second))
            .map(Self)
    }

    fn from_naive(naive: NaiveDateTime) -> Option<Self> {
        u16::try_from(naive.year()).ok()?;
        Some(Self(naive))
    }

    #[must_use]
    pub fn year(&self) -> u16 {
        u16::try_from(self.0.year()).unwrap_or_default()
    }

    #[must_use]
    pub fn month(&self) -> u8 {
        narrow(self.0.month())
    }

    #[must_use]
    pub fn day(&self) -> u8 {
        narrow(self.0.day())
    }

    #[must_use]
    pub fn hour(&self) -> u8 {
        narrow(self.0.hour())
    }

    #[must_use]
    pub fn minute(&self) -> u8 {
        narrow(self.0.minute())
    }

    #[must_use]
    pub fn second(&self) -> u8 {
        narrow(self.0.second())
    }

    /// Returns `true` once the reported year indicates a completed sync.
    #[must_use]
    pub fn is_plausible(&self) -> bool {
        self.year() >= MIN_VALID_YEAR
    }

    #[must_use]
    pub fn date(&self) -> CalendarDate {
        CalendarDate::new(self.year(), self.month(), self.day())
    }

    #[must_use]
    pub fn time_of_day(&self) -> TimeOfDay {
        TimeOfDay {
            hour: self.hour(),
            minute: self.minute(),
        }
    }

    /// Seconds since 1970-01-01T00:00:00 in the same (local) timescale.
    #[must_use]
    pub fn to_local_seconds(&self) -> i64 {
        self.0.and_utc().timestamp()
    }

    /// Inverse of [`to_local_seconds`](Self::to_local_seconds).
    ///
    /// Returns `None` when the result falls outside the representable years.
    #[must_use]
    pub fn from_local_seconds(seconds: i64) -> Option<Self> {
        Self::from_naive(DateTime::from_timestamp(seconds, 0)?.naive_utc())
    }

    /// Advances the time by `seconds`, carrying into the calendar.
    #[must_use]
    pub fn advanced_by(&self, seconds: u64) -> Option<Self> {
        let delta = TimeDelta::try_seconds(i64::try_from(seconds).ok()?)?;
        Self::from_naive(self.0.checked_add_signed(delta)?)
    }
}

// Calendar fields from chrono are at most 60.
fn narrow(field: u32) -> u8 {
    u8::try_from(field).unwrap_or(u8::MAX)
}

impl fmt::Display for LocalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}:{:02}",
            self.date(),
            self.hour(),
            self.minute(),
            self.second()
        )
    }
}

/// Source of local wall-clock time.
pub trait ClockSource {
    /// Returns the current local time, or `None` while unsynchronized.
    fn local_time(&mut self) -> Option<LocalTime>;
}

impl<T: ClockSource + ?Sized> ClockSource for &mut T {
    fn local_time(&mut self) -> Option<LocalTime> {
        (**self).local_time()
    }
}

/// English month name or abbreviation to month number.
#[must_use]
pub fn month_from_abbrev(abbrev: &str) -> Option<u8> {
    let month: Month = abbrev.parse().ok()?;
    u8::try_from(month.number_from_month()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> LocalTime {
        LocalTime::new(year, month, day, hour, minute, second).expect("valid time")
    }

    #[test]
    fn epoch_round_trips_to_zero() {
        let epoch = at(1970, 1, 1, 0, 0, 0);
        assert_eq!(epoch.to_local_seconds(), 0);
        assert_eq!(LocalTime::from_local_seconds(0), Some(epoch));
        assert!(!epoch.is_plausible());
    }

    #[test]
    fn known_timestamp_matches_calendar() {
        // 2021-10-19T17:47:56 is 1_634_665_676 seconds after the epoch.
        let time = at(2021, 10, 19, 17, 47, 56);
        assert_eq!(time.to_local_seconds(), 1_634_665_676);
        assert_eq!(LocalTime::from_local_seconds(1_634_665_676), Some(time));
    }

    #[test]
    fn advancing_carries_across_midnight_and_leap_day() {
        let before = at(2024, 2, 28, 23, 59, 30);
        let after = before.advanced_by(45).expect("in range");
        assert_eq!(after, at(2024, 2, 29, 0, 0, 15));

        let new_year = at(2025, 12, 31, 23, 59, 59).advanced_by(1).expect("in range");
        assert_eq!(new_year, at(2026, 1, 1, 0, 0, 0));
        assert_ne!(new_year.date(), at(2025, 12, 31, 12, 0, 0).date());
    }

    #[test]
    fn results_outside_supported_years_are_rejected() {
        assert_eq!(
            LocalTime::from_local_seconds(-1),
            Some(at(1969, 12, 31, 23, 59, 59))
        );
        // One second before 0000-01-01T00:00:00.
        assert_eq!(LocalTime::from_local_seconds(-62_167_219_201), None);
        assert_eq!(at(65_535, 12, 31, 23, 59, 59).advanced_by(1), None);
        assert_eq!(at(2024, 1, 1, 0, 0, 0).advanced_by(u64::MAX), None);
    }

    #[test]
    fn rejects_impossible_fields() {
        assert!(LocalTime::new(2023, 2, 29, 0, 0, 0).is_none());
        assert!(LocalTime::new(2024, 13, 1, 0, 0, 0).is_none());
        assert!(LocalTime::new(2024, 1, 1, 24, 0, 0).is_none());
        assert!(TimeOfDay::new(23, 60).is_none());
        assert_eq!(TimeOfDay::new(5, 0).map(|t| (t.hour(), t.minute())), Some((5, 0)));
    }

    #[test]
    fn month_abbreviations_are_case_insensitive() {
        assert_eq!(month_from_abbrev("Jan"), Some(1));
        assert_eq!(month_from_abbrev("oct"), Some(10));
        assert_eq!(month_from_abbrev("Foo"), None);
        assert_eq!(month_from_abbrev(""), None);
    }
}
