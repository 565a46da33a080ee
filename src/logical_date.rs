// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Logical tracking dates.
//!
//! A tracking day does not end at midnight: anything logged before the
//! cutoff hour still belongs to the previous calendar day, so a night's
//! sleep started at 01:30 lands on the same day as one started at 23:30.
//!
//! ```
//! use chrono::NaiveDate;
//! use daylog_engine::logical_date::resolve;
//!
//! let d = |day, h, m| NaiveDate::from_ymd_opt(2025, 6, day).unwrap().and_hms_opt(h, m, 0).unwrap();
//!
//! assert_eq!(resolve(d(1, 23, 30)), resolve(d(2, 1, 30)));
//! assert_eq!(resolve(d(2, 2, 30)), NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
//! ```

use chrono::{Days, NaiveDate, NaiveDateTime, Timelike};

/// Hour (local time) at which a new logical day starts.
pub const DAY_CUTOFF_HOUR: u32 = 2;

/// Map a local wall-clock timestamp to its logical tracking date.
#[must_use]
pub fn resolve(timestamp: NaiveDateTime) -> NaiveDate {
    let date = timestamp.date();
    if timestamp.hour() < DAY_CUTOFF_HOUR {
        date.checked_sub_days(Days::new(1)).unwrap_or(date)
    } else {
        date
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_midnight_belongs_to_previous_day() {
        assert_eq!(resolve(at(2, 0, 0)), NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
    }

    #[test]
    fn test_cutoff_edges() {
        let first = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let second = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
        assert_eq!(resolve(at(2, 1, 59)), first);
        assert_eq!(resolve(at(2, 2, 0)), second);
    }

    #[test]
    fn test_month_rollover() {
        let ts = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap().and_hms_opt(0, 45, 0).unwrap();
        assert_eq!(resolve(ts), NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    }

    #[test]
    fn test_earliest_date_does_not_underflow() {
        let ts = NaiveDate::MIN.and_hms_opt(1, 0, 0).unwrap();
        assert_eq!(resolve(ts), NaiveDate::MIN);
    }
}
