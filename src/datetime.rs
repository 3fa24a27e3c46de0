//! Serial-date conversions.
//!
//! Day 1 is 1900-01-01; the fractional part of a serial number is a
//! fraction of an 86,400-second day. Unlike some spreadsheet
//! implementations this does not reproduce the historical 1900-leap-year
//! off-by-one quirk — the epoch-to-serial mapping here is exact and
//! round-trips cleanly without it.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// 1900-01-01, serial number 1.
fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).expect("valid epoch date")
}

/// Converts a calendar date to its serial-day integer (no time fraction).
pub fn date_to_serial(date: NaiveDate) -> i64 {
    (date - epoch()).num_days() + 1
}

/// Converts a serial-day integer back to a calendar date.
pub fn serial_to_date(serial: i64) -> Option<NaiveDate> {
    epoch().checked_add_signed(Duration::days(serial - 1))
}

/// Converts a full serial number (integer day + time fraction) to a
/// `NaiveDateTime`.
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    let day = serial.trunc() as i64;
    let date = serial_to_date(day)?;
    let frac = serial.fract().abs();
    let secs_f = (frac * 86_400.0).round();
    let secs = (secs_f as i64).rem_euclid(86_400) as u32;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)?;
    Some(NaiveDateTime::new(date, time))
}

/// Converts a `NaiveDateTime` to a full serial number.
pub fn datetime_to_serial(dt: NaiveDateTime) -> f64 {
    let days = date_to_serial(dt.date()) as f64;
    let frac = time_fraction(dt.time());
    days + frac
}

/// The fraction of a day represented by a time-of-day value.
pub fn time_fraction(time: NaiveTime) -> f64 {
    time.num_seconds_from_midnight() as f64 / 86_400.0
}

/// Weekday number under one of the three `WEEKDAY` modes.
pub fn weekday_number(date: NaiveDate, mode: i64) -> i64 {
    // `chrono`'s `num_days_from_monday` is Monday=0..Sunday=6.
    let from_monday = date.weekday().num_days_from_monday() as i64;
    match mode {
        2 => from_monday + 1,          // Monday=1..Sunday=7
        3 => from_monday,              // Monday=0..Sunday=6
        _ => (from_monday + 1) % 7 + 1, // Sunday=1..Saturday=7
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_date_round_trip() {
        for serial in [1_i64, 2, 365, 36526, 45000] {
            let date = serial_to_date(serial).unwrap();
            assert_eq!(date_to_serial(date), serial);
        }
    }

    #[test]
    fn known_serials() {
        assert_eq!(date_to_serial(NaiveDate::from_ymd_opt(1900, 1, 1).unwrap()), 1);
        assert_eq!(date_to_serial(NaiveDate::from_ymd_opt(1900, 1, 2).unwrap()), 2);
        assert_eq!(date_to_serial(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()), 36525);
    }
}
