//! Controller clock
//!
//! The controller shows its date as `05/12/14 MON` and its time as
//! `10:32 AM`. The clock is corrected field by field through the panel's
//! menu, so the correction is expressed as per-field differences.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;

/// Per-field difference between the controller clock and local time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ClockDelta {
    /// Years to add
    pub years: i32,
    /// Months to add
    pub months: i32,
    /// Days to add
    pub days: i32,
    /// Hours to add
    pub hours: i32,
    /// Minutes to add
    pub minutes: i32,
}

impl ClockDelta {
    /// Field-wise difference `now - controller`
    ///
    /// Fields are edited independently on the panel, so no carries between
    /// fields are applied.
    pub fn between(controller: NaiveDateTime, now: NaiveDateTime) -> Self {
        Self {
            years: now.year() - controller.year(),
            months: now.month() as i32 - controller.month() as i32,
            days: now.day() as i32 - controller.day() as i32,
            hours: now.hour() as i32 - controller.hour() as i32,
            minutes: now.minute() as i32 - controller.minute() as i32,
        }
    }

    /// Fields in the order the panel edits them: year, month, day, hour, minute
    pub fn fields(&self) -> [i32; 5] {
        [self.years, self.months, self.days, self.hours, self.minutes]
    }

    /// Whether every field is zero
    pub fn is_zero(&self) -> bool {
        self.fields().iter().all(|&f| f == 0)
    }
}

/// Parse the controller's date and time lines
///
/// The weekday is ignored; the controller's may be wrong.
pub fn parse_controller_time(date: &str, time: &str) -> Option<NaiveDateTime> {
    let day = date.split_whitespace().find(|t| t.contains('/'))?;
    let date = NaiveDate::parse_from_str(day, "%m/%d/%y").ok()?;
    let time = time.trim();
    let time = NaiveTime::parse_from_str(time, "%I:%M %p")
        .or_else(|_| NaiveTime::parse_from_str(time, "%I:%M%p"))
        .ok()?;
    Some(date.and_time(time))
}

/// Correction needed to bring `controller` to `now`, if it is off by more
/// than `tolerance_minutes`
pub fn clock_correction(
    controller: NaiveDateTime,
    now: NaiveDateTime,
    tolerance_minutes: i64,
) -> Option<ClockDelta> {
    // the controller only shows whole minutes
    let now = now.with_second(0)?.with_nanosecond(0)?;
    let drift = (now - controller).num_minutes().abs();
    if drift <= tolerance_minutes {
        return None;
    }
    Some(ClockDelta::between(controller, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_parse_controller_time() {
        assert_eq!(
            parse_controller_time("05/12/14 MON", "10:32 PM"),
            Some(at(2014, 5, 12, 22, 32, 0))
        );
        assert_eq!(
            parse_controller_time("01/02/25 SUN", "12:05 AM"),
            Some(at(2025, 1, 2, 0, 5, 0))
        );
        assert_eq!(parse_controller_time("", "10:32 PM"), None);
        assert_eq!(parse_controller_time("05/12/14 MON", "noon"), None);
    }

    #[test]
    fn test_within_tolerance() {
        let controller = at(2024, 6, 1, 9, 30, 0);
        assert_eq!(clock_correction(controller, at(2024, 6, 1, 9, 31, 45), 1), None);
        assert_eq!(clock_correction(controller, at(2024, 6, 1, 9, 29, 0), 1), None);
    }

    #[test]
    fn test_field_deltas() {
        let controller = at(2023, 12, 31, 23, 58, 0);
        let now = at(2024, 1, 1, 0, 2, 30);
        assert_eq!(
            clock_correction(controller, now, 1),
            Some(ClockDelta {
                years: 1,
                months: -11,
                days: -30,
                hours: -23,
                minutes: -56,
            })
        );
    }

    #[test]
    fn test_is_zero() {
        assert!(ClockDelta::default().is_zero());
        assert_eq!(
            ClockDelta { hours: 2, ..Default::default() }.fields(),
            [0, 0, 0, 2, 0]
        );
    }
}
