//! Date and time functions, built over [`crate::datetime`]'s serial-number
//! conversions so every function body works in terms of the serial
//! representation rather than calling into `chrono` directly.

use std::collections::HashMap;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::datetime::{
    date_to_serial, datetime_to_serial, serial_to_date, serial_to_datetime, time_fraction, weekday_number,
};
use crate::error::{FormulaError, FormulaResult};
use crate::registry::{FunctionSpec, UNBOUNDED};
use crate::value::Value;

use super::def;
use super::util::{arg_i64, arg_number, arg_string};

pub(super) fn register(map: &mut HashMap<String, FunctionSpec>) {
    def!(map, "TODAY", 0, 0, "The current date, as a serial number with no time fraction.", |_args, _| {
        Ok(Value::Number(date_to_serial(Local::now().date_naive()) as f64))
    });

    def!(map, "NOW", 0, 0, "The current date and time, as a full serial number.", |_args, _| {
        Ok(Value::Number(datetime_to_serial(Local::now().naive_local())))
    });

    def!(map, "DATE", 3, 3, "Builds a serial date from year/month/day, rolling over out-of-range months or days.", |args, _| {
        let y = arg_i64(args, 0)? as i32;
        let m = arg_i64(args, 1)?;
        let d = arg_i64(args, 2)?;
        let date = add_months(NaiveDate::from_ymd_opt(y, 1, 1).ok_or_else(FormulaError::num)?, m - 1)?;
        let date = date.checked_add_signed(chrono::Duration::days(d - 1)).ok_or_else(FormulaError::num)?;
        Ok(Value::Number(date_to_serial(date) as f64))
    });

    def!(map, "TIME", 3, 3, "Builds a time-fraction serial from hour/minute/second.", |args, _| {
        let h = arg_i64(args, 0)?;
        let m = arg_i64(args, 1)?;
        let s = arg_i64(args, 2)?;
        let total_secs = h * 3600 + m * 60 + s;
        Ok(Value::Number(total_secs as f64 / 86_400.0))
    });

    def!(map, "YEAR", 1, 1, "", |args, _| Ok(Value::Number(date_of(args)?.year() as f64)));
    def!(map, "MONTH", 1, 1, "", |args, _| Ok(Value::Number(date_of(args)?.month() as f64)));
    def!(map, "DAY", 1, 1, "", |args, _| Ok(Value::Number(date_of(args)?.day() as f64)));

    def!(map, "HOUR", 1, 1, "", |args, _| Ok(Value::Number(time_of(args)?.hour() as f64)));
    def!(map, "MINUTE", 1, 1, "", |args, _| Ok(Value::Number(time_of(args)?.minute() as f64)));
    def!(map, "SECOND", 1, 1, "", |args, _| Ok(Value::Number(time_of(args)?.second() as f64)));

    def!(map, "WEEKDAY", 1, 2, "The day of the week as a number, per one of three modes (default 1).", |args, _| {
        let date = date_of(args)?;
        let mode = if args.len() > 1 { arg_i64(args, 1)? } else { 1 };
        Ok(Value::Number(weekday_number(date, mode) as f64))
    });

    def!(map, "WEEKNUM", 1, 2, "A 1-based week-of-year number, with the week-start convention of `WEEKDAY`'s mode argument.", |args, _| {
        let date = date_of(args)?;
        let mode = if args.len() > 1 { arg_i64(args, 1)? } else { 1 };
        let jan1 = NaiveDate::from_ymd_opt(date.year(), 1, 1).ok_or_else(FormulaError::num)?;
        let jan1_weekday = weekday_number(jan1, mode);
        let days_since_jan1 = (date - jan1).num_days();
        Ok(Value::Number(((days_since_jan1 + jan1_weekday - 1) / 7 + 1) as f64))
    });

    def!(map, "ISOWEEKNUM", 1, 1, "The ISO-8601 week number (Monday-start weeks, week 1 contains the year's first Thursday).", |args, _| {
        Ok(Value::Number(date_of(args)?.iso_week().week() as f64))
    });

    def!(map, "EOMONTH", 2, 2, "The last day of the month `months` away from a date.", |args, _| {
        let date = date_of(args)?;
        let months = arg_i64(args, 1)?;
        let first_of_month = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).ok_or_else(FormulaError::num)?;
        let shifted = add_months(first_of_month, months + 1)?;
        let last_day = shifted.pred_opt().ok_or_else(FormulaError::num)?;
        Ok(Value::Number(date_to_serial(last_day) as f64))
    });

    def!(map, "EDATE", 2, 2, "A date shifted by a whole number of months.", |args, _| {
        let date = date_of(args)?;
        let months = arg_i64(args, 1)?;
        Ok(Value::Number(date_to_serial(add_months(date, months)?) as f64))
    });

    def!(map, "DAYS", 2, 2, "The day count from the second date to the first.", |args, _| {
        let end = date_of(&args[..1])?;
        let start = date_of(&args[1..])?;
        Ok(Value::Number((end - start).num_days() as f64))
    });

    def!(map, "DAYS360", 2, 3, "The day count between two dates under the 30/360 convention.", |args, _| {
        let start = date_of(&args[..1])?;
        let end = date_of(&args[1..2])?;
        let european = args.len() > 2 && crate::coerce::to_bool(&args[2])?;
        Ok(Value::Number(days360(start, end, european) as f64))
    });

    def!(map, "DATEDIF", 3, 3, "The difference between two dates in the given unit (`\"Y\"`, `\"M\"`, `\"D\"`, `\"MD\"`, `\"YM\"`, `\"YD\"`).", |args, _| {
        let start = date_of(&args[..1])?;
        let end = date_of(&args[1..2])?;
        let unit = arg_string(args, 2)?.to_uppercase();
        Ok(Value::Number(datedif(start, end, &unit)?))
    });

    def!(map, "NETWORKDAYS", 2, 3, "The count of weekdays (Mon-Fri) between two dates, excluding an optional holiday list.", |args, _| {
        let start = date_of(&args[..1])?;
        let end = date_of(&args[1..2])?;
        let holidays = holiday_set(args.get(2));
        Ok(Value::Number(networkdays(start, end, &holidays)? as f64))
    });

    def!(map, "WORKDAY", 2, 3, "The date `days` working days (Mon-Fri, excluding an optional holiday list) after a start date.", |args, _| {
        let start = date_of(&args[..1])?;
        let days = arg_i64(args, 1)?;
        let holidays = holiday_set(args.get(2));
        Ok(Value::Number(date_to_serial(workday(start, days, &holidays)?) as f64))
    });

    def!(map, "YEARFRAC", 2, 3, "The fraction of a year between two dates, via the 30/360 convention (basis argument is accepted but ignored beyond selecting 30/360 vs actual/365).", |args, _| {
        let start = date_of(&args[..1])?;
        let end = date_of(&args[1..2])?;
        let basis = if args.len() > 2 { arg_i64(args, 2)? } else { 0 };
        let days = if basis == 0 { days360(start, end, false) } else { (end - start).num_days() };
        Ok(Value::Number(days as f64 / 360.0))
    });

    def!(map, "DATEVALUE", 1, 1, "Parses an ISO (`YYYY-MM-DD`) or `YYYY/MM/DD` date string into a serial number.", |args, _| {
        let s = arg_string(args, 0)?;
        let date = parse_date(&s)?;
        Ok(Value::Number(date_to_serial(date) as f64))
    });

    def!(map, "TIMEVALUE", 1, 1, "Parses an `HH:MM:SS` or `HH:MM` string into a time-fraction serial.", |args, _| {
        let s = arg_string(args, 0)?;
        let time = NaiveTime::parse_from_str(&s, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
            .map_err(|_| FormulaError::value())?;
        Ok(Value::Number(time_fraction(time)))
    });
}

fn date_of(args: &[Value]) -> FormulaResult<NaiveDate> {
    let n = arg_number(args, 0)?;
    serial_to_date(n as i64).ok_or_else(FormulaError::num)
}

fn time_of(args: &[Value]) -> FormulaResult<NaiveTime> {
    let n = arg_number(args, 0)?;
    let dt: NaiveDateTime = serial_to_datetime(n).ok_or_else(FormulaError::num)?;
    Ok(dt.time())
}

fn add_months(date: NaiveDate, months: i64) -> FormulaResult<NaiveDate> {
    let total = date.year() as i64 * 12 + (date.month() as i64 - 1) + months;
    let year = total.div_euclid(12) as i32;
    let month = total.rem_euclid(12) as u32 + 1;
    let days_in_month = days_in_month(year, month);
    let day = date.day().min(days_in_month);
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(FormulaError::num)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid month boundary");
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month");
    (next - first).num_days() as u32
}

fn days360(start: NaiveDate, end: NaiveDate, european: bool) -> i64 {
    let (sy, sm, mut sd) = (start.year(), start.month() as i64, start.day() as i64);
    let (ey, em, mut ed) = (end.year(), end.month() as i64, end.day() as i64);
    if european {
        if sd == 31 {
            sd = 30;
        }
        if ed == 31 {
            ed = 30;
        }
    } else {
        if sd == 31 {
            sd = 30;
        }
        if ed == 31 && sd == 30 {
            ed = 30;
        }
    }
    (ey as i64 - sy as i64) * 360 + (em - sm) * 30 + (ed - sd)
}

fn datedif(start: NaiveDate, end: NaiveDate, unit: &str) -> FormulaResult<f64> {
    if start > end {
        return Err(FormulaError::num());
    }
    Ok(match unit {
        "Y" => ((end.year() - start.year()) as i64
            - if (end.month(), end.day()) < (start.month(), start.day()) { 1 } else { 0 }) as f64,
        "M" => {
            let months = (end.year() - start.year()) as i64 * 12 + end.month() as i64 - start.month() as i64;
            (if end.day() < start.day() { months - 1 } else { months }) as f64
        }
        "D" => (end - start).num_days() as f64,
        "MD" => {
            let mut d = end.day() as i64 - start.day() as i64;
            if d < 0 {
                d += days_in_month(end.year(), if end.month() == 1 { 12 } else { end.month() - 1 }) as i64;
            }
            d as f64
        }
        "YM" => {
            let mut m = end.month() as i64 - start.month() as i64;
            if end.day() < start.day() {
                m -= 1;
            }
            ((m % 12 + 12) % 12) as f64
        }
        "YD" => {
            let anniversary = add_months(start, ((end.year() - start.year()) as i64) * 12).map_err(|_| FormulaError::num())?;
            let anniversary = if anniversary > end { add_months(anniversary, -12)? } else { anniversary };
            (end - anniversary).num_days() as f64
        }
        _ => return Err(FormulaError::value()),
    })
}

fn holiday_set(arg: Option<&Value>) -> std::collections::HashSet<NaiveDate> {
    let Some(v) = arg else { return Default::default() };
    super::util::as_flat_vec(v)
        .into_iter()
        .filter_map(|x| match x {
            Value::Number(n) => serial_to_date(n as i64),
            _ => None,
        })
        .collect()
}

fn networkdays(start: NaiveDate, end: NaiveDate, holidays: &std::collections::HashSet<NaiveDate>) -> FormulaResult<i64> {
    let (lo, hi, sign) = if start <= end { (start, end, 1) } else { (end, start, -1) };
    let mut count = 0i64;
    let mut d = lo;
    while d <= hi {
        if !matches!(d.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) && !holidays.contains(&d) {
            count += 1;
        }
        d = d.succ_opt().ok_or_else(FormulaError::num)?;
    }
    Ok(count * sign)
}

fn workday(start: NaiveDate, days: i64, holidays: &std::collections::HashSet<NaiveDate>) -> FormulaResult<NaiveDate> {
    let step = if days >= 0 { 1 } else { -1 };
    let mut remaining = days.abs();
    let mut d = start;
    while remaining > 0 {
        d = if step > 0 { d.succ_opt() } else { d.pred_opt() }.ok_or_else(FormulaError::num)?;
        if !matches!(d.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) && !holidays.contains(&d) {
            remaining -= 1;
        }
    }
    Ok(d)
}

fn parse_date(s: &str) -> FormulaResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y/%m/%d"))
        .map_err(|_| FormulaError::value())
}

#[cfg(test)]
mod tests {
    use crate::context::{EvalContext, MemoryGrid};
    use crate::eval::evaluate;
    use crate::parser::parse;
    use crate::registry::Registry;
    use crate::value::Value;

    fn eval_str(src: &str) -> Value {
        let grid = MemoryGrid::new("Sheet1");
        let tree = parse(src).unwrap();
        let registry = Registry::with_builtins();
        let ctx = EvalContext::new(&grid, "Sheet1");
        evaluate(&tree, &ctx, &registry).value
    }

    #[test]
    fn date_parts_round_trip_through_date() {
        assert_eq!(eval_str("YEAR(DATE(2024,3,15))"), Value::Number(2024.0));
        assert_eq!(eval_str("MONTH(DATE(2024,3,15))"), Value::Number(3.0));
        assert_eq!(eval_str("DAY(DATE(2024,3,15))"), Value::Number(15.0));
    }

    #[test]
    fn date_rolls_over_an_out_of_range_month() {
        // month 13 rolls into January of the following year
        assert_eq!(eval_str("YEAR(DATE(2024,13,1))"), Value::Number(2025.0));
        assert_eq!(eval_str("MONTH(DATE(2024,13,1))"), Value::Number(1.0));
    }

    #[test]
    fn eomonth_finds_the_last_day_of_the_month() {
        assert_eq!(eval_str("DAY(EOMONTH(DATE(2024,2,10),0))"), Value::Number(29.0)); // 2024 is a leap year
        assert_eq!(eval_str("MONTH(EOMONTH(DATE(2024,2,10),1))"), Value::Number(3.0));
    }

    #[test]
    fn days_between_two_dates() {
        assert_eq!(eval_str("DAYS(DATE(2024,1,10),DATE(2024,1,1))"), Value::Number(9.0));
    }

    #[test]
    fn datedif_ym_ignores_the_year_component() {
        assert_eq!(eval_str(r#"DATEDIF(DATE(2020,5,1),DATE(2024,8,1),"YM")"#), Value::Number(3.0));
    }

    #[test]
    fn networkdays_excludes_weekends_and_listed_holidays() {
        // 2024-01-01 (Mon) .. 2024-01-05 (Fri): 5 weekdays, minus one holiday
        assert_eq!(
            eval_str(r#"NETWORKDAYS(DATE(2024,1,1),DATE(2024,1,5),DATE(2024,1,3))"#),
            Value::Number(4.0)
        );
    }

    #[test]
    fn workday_skips_weekends() {
        // 2024-01-05 is a Friday; +1 working day lands on Monday 2024-01-08
        assert_eq!(eval_str("WORKDAY(DATE(2024,1,5),1)"), eval_str("DATE(2024,1,8)"));
    }
}
