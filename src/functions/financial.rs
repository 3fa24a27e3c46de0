//! Financial functions: annuities, depreciation schedules, bond/discount
//! pricing, and the Newton-Raphson root-finders behind `IRR`/`RATE`/`YIELD`.
//!
//! Date arguments are serial numbers, read through
//! [`crate::datetime::serial_to_date`]. Day-count basis 1 and 3
//! ("actual/actual", "actual/365") are treated as actual days over a fixed
//! 365-day year rather than the full actual/actual convention — a
//! deliberate simplification, recorded in `DESIGN.md`.

use std::collections::HashMap;

use chrono::{Datelike, Months, NaiveDate};

use crate::datetime::serial_to_date;
use crate::error::FormulaError;
use crate::registry::{FunctionSpec, UNBOUNDED};
use crate::value::Value;

use super::def;
use super::util::{arg_i64, arg_number, numbers_flat};

pub(super) fn register(map: &mut HashMap<String, FunctionSpec>) {
    def!(map, "PMT", 3, 5, "The fixed periodic payment for a loan or annuity.", |args, _| {
        let rate = arg_number(args, 0)?;
        let nper = arg_number(args, 1)?;
        let pv = arg_number(args, 2)?;
        let fv = opt_number(args, 3)?.unwrap_or(0.0);
        let payment_type = opt_number(args, 4)?.unwrap_or(0.0);
        Ok(Value::Number(calculate_pmt(rate, nper, pv, fv, payment_type)?))
    });

    def!(map, "FV", 3, 5, "The future value of an investment with level payments.", |args, _| {
        let rate = arg_number(args, 0)?;
        let nper = arg_number(args, 1)?;
        let pmt = arg_number(args, 2)?;
        let pv = opt_number(args, 3)?.unwrap_or(0.0);
        let payment_type = opt_number(args, 4)?.unwrap_or(0.0);
        Ok(Value::Number(calculate_fv(rate, nper, pmt, pv, payment_type)?))
    });

    def!(map, "PV", 3, 5, "The present value of an investment with level payments.", |args, _| {
        let rate = arg_number(args, 0)?;
        let nper = arg_number(args, 1)?;
        let pmt = arg_number(args, 2)?;
        let fv = opt_number(args, 3)?.unwrap_or(0.0);
        let payment_type = opt_number(args, 4)?.unwrap_or(0.0);
        Ok(Value::Number(calculate_pv(rate, nper, pmt, fv, payment_type)?))
    });

    def!(map, "NPER", 3, 5, "The number of periods for an investment with level payments.", |args, _| {
        let rate = arg_number(args, 0)?;
        let pmt = arg_number(args, 1)?;
        let pv = arg_number(args, 2)?;
        let fv = opt_number(args, 3)?.unwrap_or(0.0);
        let payment_type = normalize_payment_type(opt_number(args, 4)?.unwrap_or(0.0));
        if rate == 0.0 {
            if pmt == 0.0 {
                return Err(FormulaError::div_zero());
            }
            return Ok(Value::Number(-(pv + fv) / pmt));
        }
        let pmt_adj = pmt * (1.0 + rate * payment_type);
        let numerator = pmt_adj - fv * rate;
        let denominator = pv * rate + pmt_adj;
        if numerator <= 0.0 || denominator <= 0.0 {
            return Err(FormulaError::num());
        }
        Ok(Value::Number((numerator / denominator).ln() / (1.0 + rate).ln()))
    });

    def!(map, "RATE", 3, 6, "The periodic interest rate for an investment with level payments, via Newton-Raphson.", |args, _| {
        let nper = arg_number(args, 0)?;
        let pmt = arg_number(args, 1)?;
        let pv = arg_number(args, 2)?;
        let fv = opt_number(args, 3)?.unwrap_or(0.0);
        let payment_type = normalize_payment_type(opt_number(args, 4)?.unwrap_or(0.0));
        let mut rate = opt_number(args, 5)?.unwrap_or(0.1);

        for _ in 0..100 {
            let pvif = (1.0 + rate).powf(nper);
            let fvif = if rate == 0.0 { nper } else { ((1.0 + rate).powf(nper) - 1.0) / rate };
            let f = pv * pvif + pmt * (1.0 + rate * payment_type) * fvif + fv;

            let d_pvif = nper * (1.0 + rate).powf(nper - 1.0);
            let d_fvif = if rate == 0.0 {
                nper * (nper - 1.0) / 2.0
            } else {
                (nper * (1.0 + rate).powf(nper - 1.0) * rate - ((1.0 + rate).powf(nper) - 1.0)) / (rate * rate)
            };
            let df = pv * d_pvif + pmt * payment_type * fvif + pmt * (1.0 + rate * payment_type) * d_fvif;

            if df.abs() < 1e-15 {
                break;
            }
            let next = rate - f / df;
            if (next - rate).abs() < 1e-10 {
                rate = next;
                break;
            }
            rate = next;
        }
        if !rate.is_finite() || rate < -1.0 {
            return Err(FormulaError::num());
        }
        Ok(Value::Number(rate))
    });

    def!(map, "IPMT", 4, 6, "The interest portion of a loan payment for a given period.", |args, _| {
        let rate = arg_number(args, 0)?;
        let per = arg_number(args, 1)?;
        let nper = arg_number(args, 2)?;
        let pv = arg_number(args, 3)?;
        let fv = opt_number(args, 4)?.unwrap_or(0.0);
        let payment_type = normalize_payment_type(opt_number(args, 5)?.unwrap_or(0.0));
        if per < 1.0 || per > nper {
            return Err(FormulaError::num());
        }
        let pmt = calculate_pmt(rate, nper, pv, fv, payment_type)?;
        if payment_type == 1.0 && per == 1.0 {
            return Ok(Value::Number(0.0));
        }
        let balance = balance_before_period(rate, pmt, pv, payment_type, per);
        let adjusted = if payment_type == 1.0 { balance / (1.0 + rate) } else { balance };
        Ok(Value::Number(-adjusted * rate))
    });

    def!(map, "PPMT", 4, 6, "The principal portion of a loan payment for a given period.", |args, _| {
        let rate = arg_number(args, 0)?;
        let per = arg_number(args, 1)?;
        let nper = arg_number(args, 2)?;
        let pv = arg_number(args, 3)?;
        let fv = opt_number(args, 4)?.unwrap_or(0.0);
        let payment_type = normalize_payment_type(opt_number(args, 5)?.unwrap_or(0.0));
        if per < 1.0 || per > nper {
            return Err(FormulaError::num());
        }
        let pmt = calculate_pmt(rate, nper, pv, fv, payment_type)?;
        let ipmt = if payment_type == 1.0 && per == 1.0 {
            0.0
        } else {
            let balance = balance_before_period(rate, pmt, pv, payment_type, per);
            let adjusted = if payment_type == 1.0 { balance / (1.0 + rate) } else { balance };
            -adjusted * rate
        };
        Ok(Value::Number(pmt - ipmt))
    });

    def!(map, "CUMIPMT", 6, 6, "Cumulative interest paid between two periods of a loan.", |args, _| {
        let rate = arg_number(args, 0)?;
        let nper = arg_number(args, 1)?;
        let pv = arg_number(args, 2)?;
        let start = arg_i64(args, 3)?;
        let end = arg_i64(args, 4)?;
        let payment_type = normalize_payment_type(arg_number(args, 5)?);
        if rate <= 0.0 || nper <= 0.0 || pv <= 0.0 || start < 1 || end < start || end as f64 > nper {
            return Err(FormulaError::num());
        }
        let pmt = calculate_pmt(rate, nper, pv, 0.0, payment_type)?;
        let mut total = 0.0;
        for per in start..=end {
            let balance = balance_before_period(rate, pmt, pv, payment_type, per as f64);
            let adjusted = if payment_type == 1.0 && per > 1 { balance / (1.0 + rate) } else { balance };
            let ipmt = if payment_type == 1.0 && per == 1 { 0.0 } else { -adjusted * rate };
            total += ipmt;
        }
        Ok(Value::Number(total))
    });

    def!(map, "CUMPRINC", 6, 6, "Cumulative principal paid between two periods of a loan.", |args, _| {
        let rate = arg_number(args, 0)?;
        let nper = arg_number(args, 1)?;
        let pv = arg_number(args, 2)?;
        let start = arg_i64(args, 3)?;
        let end = arg_i64(args, 4)?;
        let payment_type = normalize_payment_type(arg_number(args, 5)?);
        if rate <= 0.0 || nper <= 0.0 || pv <= 0.0 || start < 1 || end < start || end as f64 > nper {
            return Err(FormulaError::num());
        }
        let pmt = calculate_pmt(rate, nper, pv, 0.0, payment_type)?;
        let mut total = 0.0;
        for per in start..=end {
            let balance = balance_before_period(rate, pmt, pv, payment_type, per as f64);
            let adjusted = if payment_type == 1.0 && per > 1 { balance / (1.0 + rate) } else { balance };
            let ipmt = if payment_type == 1.0 && per == 1 { 0.0 } else { -adjusted * rate };
            total += pmt - ipmt;
        }
        Ok(Value::Number(total))
    });

    def!(map, "ISPMT", 4, 4, "Straight-line interest paid for a given period of a loan.", |args, _| {
        let rate = arg_number(args, 0)?;
        let per = arg_number(args, 1)?;
        let nper = arg_number(args, 2)?;
        let pv = arg_number(args, 3)?;
        Ok(Value::Number(pv * rate * (per / nper - 1.0)))
    });

    def!(map, "SLN", 3, 3, "Straight-line depreciation for one period.", |args, _| {
        let cost = arg_number(args, 0)?;
        let salvage = arg_number(args, 1)?;
        let life = arg_number(args, 2)?;
        if life == 0.0 {
            return Err(FormulaError::div_zero());
        }
        Ok(Value::Number((cost - salvage) / life))
    });

    def!(map, "SYD", 4, 4, "Sum-of-years'-digits depreciation for a given period.", |args, _| {
        let cost = arg_number(args, 0)?;
        let salvage = arg_number(args, 1)?;
        let life = arg_number(args, 2)?;
        let per = arg_number(args, 3)?;
        if life == 0.0 {
            return Err(FormulaError::div_zero());
        }
        let sum_of_years = life * (life + 1.0) / 2.0;
        let remaining_life = life - per + 1.0;
        Ok(Value::Number((cost - salvage) * remaining_life / sum_of_years))
    });

    def!(map, "DB", 4, 5, "Fixed-declining-balance depreciation for a given period.", |args, _| {
        let cost = arg_number(args, 0)?;
        let salvage = arg_number(args, 1)?;
        let life = arg_number(args, 2)?;
        let period = arg_number(args, 3)?;
        let month = opt_number(args, 4)?.unwrap_or(12.0);
        if cost == 0.0 || life <= 0.0 {
            return Ok(Value::Number(0.0));
        }
        let rate = (1.0 - (salvage / cost).powf(1.0 / life)).max(0.0);
        let rate = (rate * 1000.0).round() / 1000.0;
        let mut total_depreciation = 0.0;
        let mut result = 0.0;
        let periods = if period as i64 == life as i64 + 1 { life + 1.0 } else { period };
        let mut per = 1;
        while (per as f64) <= periods {
            let depreciation = if per == 1 {
                cost * rate * month / 12.0
            } else if (per as f64) == life + 1.0 {
                (cost - total_depreciation) * rate * (12.0 - month) / 12.0
            } else {
                (cost - total_depreciation) * rate
            };
            total_depreciation += depreciation;
            result = depreciation;
            per += 1;
        }
        Ok(Value::Number(result))
    });

    def!(map, "DDB", 4, 5, "Double-declining-balance depreciation for a given period.", |args, _| {
        let cost = arg_number(args, 0)?;
        let salvage = arg_number(args, 1)?;
        let life = arg_number(args, 2)?;
        let period = arg_number(args, 3)?;
        let factor = opt_number(args, 4)?.unwrap_or(2.0);
        if life <= 0.0 || period < 1.0 || period > life {
            return Err(FormulaError::num());
        }
        let rate = factor / life;
        let mut book_value = cost;
        let mut depreciation = 0.0;
        let mut per = 1;
        while (per as f64) <= period {
            depreciation = (book_value * rate).min((book_value - salvage).max(0.0));
            book_value -= depreciation;
            per += 1;
        }
        Ok(Value::Number(depreciation))
    });

    def!(map, "NPV", 2, UNBOUNDED, "The net present value of a series of cash flows at a fixed discount rate.", |args, _| {
        let rate = arg_number(args, 0)?;
        let flows = numbers_flat(&args[1..])?;
        let mut total = 0.0;
        for (i, flow) in flows.iter().enumerate() {
            total += flow / (1.0 + rate).powi(i as i32 + 1);
        }
        Ok(Value::Number(total))
    });

    def!(map, "IRR", 1, 2, "The internal rate of return of a series of cash flows, via Newton-Raphson.", |args, _| {
        let flows = numbers_flat(&args[0..1])?;
        if flows.len() < 2 {
            return Err(FormulaError::num());
        }
        if !flows.iter().any(|&v| v > 0.0) || !flows.iter().any(|&v| v < 0.0) {
            return Err(FormulaError::num());
        }
        let mut rate = opt_number(args, 1)?.unwrap_or(0.1);
        for _ in 0..100 {
            let mut npv = 0.0;
            let mut dnpv = 0.0;
            for (i, flow) in flows.iter().enumerate() {
                let n = i as f64;
                npv += flow / (1.0 + rate).powf(n);
                if n > 0.0 {
                    dnpv -= n * flow / (1.0 + rate).powf(n + 1.0);
                }
            }
            if dnpv.abs() < 1e-15 {
                break;
            }
            let next = rate - npv / dnpv;
            if (next - rate).abs() < 1e-10 {
                rate = next;
                break;
            }
            rate = next;
        }
        if !rate.is_finite() {
            return Err(FormulaError::num());
        }
        Ok(Value::Number(rate))
    });

    def!(map, "MIRR", 3, 3, "The modified internal rate of return of a series of cash flows.", |args, _| {
        let flows = numbers_flat(&args[0..1])?;
        let finance_rate = arg_number(args, 1)?;
        let reinvest_rate = arg_number(args, 2)?;
        let n = flows.len();
        if n < 2 {
            return Err(FormulaError::num());
        }
        let mut npv_neg = 0.0;
        let mut fv_pos = 0.0;
        for (i, &flow) in flows.iter().enumerate() {
            if flow < 0.0 {
                npv_neg += flow / (1.0 + finance_rate).powi(i as i32);
            } else if flow > 0.0 {
                fv_pos += flow * (1.0 + reinvest_rate).powi((n - 1 - i) as i32);
            }
        }
        if npv_neg == 0.0 || fv_pos == 0.0 {
            return Err(FormulaError::div_zero());
        }
        Ok(Value::Number((-fv_pos / npv_neg).powf(1.0 / (n as f64 - 1.0)) - 1.0))
    });

    def!(map, "XNPV", 3, 3, "The net present value of cash flows on arbitrary dates.", |args, _| {
        let rate = arg_number(args, 0)?;
        let flows = numbers_flat(&[args[1].clone()])?;
        let dates = numbers_flat(&[args[2].clone()])?;
        if flows.len() != dates.len() || flows.is_empty() {
            return Err(FormulaError::value());
        }
        let first = dates[0];
        let mut total = 0.0;
        for (flow, date) in flows.iter().zip(dates.iter()) {
            let days = date - first;
            total += flow / (1.0 + rate).powf(days / 365.0);
        }
        Ok(Value::Number(total))
    });

    def!(map, "XIRR", 2, 3, "The internal rate of return of cash flows on arbitrary dates, via Newton-Raphson.", |args, _| {
        let flows = numbers_flat(&[args[0].clone()])?;
        let dates = numbers_flat(&[args[1].clone()])?;
        if flows.len() != dates.len() || flows.len() < 2 {
            return Err(FormulaError::value());
        }
        let first = dates[0];
        let mut rate = opt_number(args, 2)?.unwrap_or(0.1);
        for _ in 0..100 {
            let mut npv = 0.0;
            let mut dnpv = 0.0;
            for (flow, date) in flows.iter().zip(dates.iter()) {
                let years = (date - first) / 365.0;
                npv += flow / (1.0 + rate).powf(years);
                if years != 0.0 {
                    dnpv -= years * flow / (1.0 + rate).powf(years + 1.0);
                }
            }
            if dnpv.abs() < 1e-15 {
                break;
            }
            let next = rate - npv / dnpv;
            if (next - rate).abs() < 1e-10 {
                rate = next;
                break;
            }
            rate = next;
        }
        if !rate.is_finite() || rate < -1.0 {
            return Err(FormulaError::num());
        }
        Ok(Value::Number(rate))
    });

    def!(map, "EFFECT", 2, 2, "The effective annual interest rate given a nominal rate and compounding frequency.", |args, _| {
        let nominal_rate = arg_number(args, 0)?;
        let npery = arg_number(args, 1)?.floor();
        if nominal_rate <= 0.0 || npery < 1.0 {
            return Err(FormulaError::num());
        }
        Ok(Value::Number((1.0 + nominal_rate / npery).powf(npery) - 1.0))
    });

    def!(map, "NOMINAL", 2, 2, "The nominal annual interest rate given an effective rate and compounding frequency.", |args, _| {
        let effect_rate = arg_number(args, 0)?;
        let npery = arg_number(args, 1)?.floor();
        if effect_rate <= 0.0 || npery < 1.0 {
            return Err(FormulaError::num());
        }
        Ok(Value::Number(npery * ((1.0 + effect_rate).powf(1.0 / npery) - 1.0)))
    });

    def!(map, "DOLLARDE", 2, 2, "Converts a fractional dollar price to a decimal dollar price.", |args, _| {
        let fractional = arg_number(args, 0)?;
        let fraction = arg_number(args, 1)?.floor();
        if fraction < 1.0 {
            return Err(FormulaError::div_zero());
        }
        let int_part = fractional.trunc();
        let frac_part = fractional.fract() * 10f64.powf((fraction.log10().ceil()).max(1.0));
        Ok(Value::Number(int_part + frac_part / fraction))
    });

    def!(map, "DOLLARFR", 2, 2, "Converts a decimal dollar price to a fractional dollar price.", |args, _| {
        let decimal = arg_number(args, 0)?;
        let fraction = arg_number(args, 1)?.floor();
        if fraction < 1.0 {
            return Err(FormulaError::div_zero());
        }
        let int_part = decimal.trunc();
        let frac_part = decimal.fract() * fraction;
        Ok(Value::Number(int_part + frac_part / 10f64.powf((fraction.log10().ceil()).max(1.0))))
    });

    def!(map, "DISC", 4, 5, "The discount rate for a security.", |args, _| {
        let settlement = date_arg(args, 0)?;
        let maturity = date_arg(args, 1)?;
        let pr = arg_number(args, 2)?;
        let redemption = arg_number(args, 3)?;
        let basis = opt_i64(args, 4)?.unwrap_or(0);
        if !is_valid_basis(basis) || settlement >= maturity || redemption == 0.0 {
            return Err(FormulaError::num());
        }
        let dsm = days_between(settlement, maturity, basis);
        Ok(Value::Number((redemption - pr) / redemption * (annual_basis(basis) / dsm)))
    });

    def!(map, "PRICEDISC", 4, 5, "The price per $100 face value of a discounted security.", |args, _| {
        let settlement = date_arg(args, 0)?;
        let maturity = date_arg(args, 1)?;
        let discount = arg_number(args, 2)?;
        let redemption = arg_number(args, 3)?;
        let basis = opt_i64(args, 4)?.unwrap_or(0);
        if !is_valid_basis(basis) || settlement >= maturity {
            return Err(FormulaError::num());
        }
        let dsm = days_between(settlement, maturity, basis);
        Ok(Value::Number(redemption * (1.0 - discount * dsm / annual_basis(basis))))
    });

    def!(map, "RECEIVED", 4, 5, "The amount received at maturity for a fully invested security.", |args, _| {
        let settlement = date_arg(args, 0)?;
        let maturity = date_arg(args, 1)?;
        let investment = arg_number(args, 2)?;
        let discount = arg_number(args, 3)?;
        let basis = opt_i64(args, 4)?.unwrap_or(0);
        if !is_valid_basis(basis) || settlement >= maturity {
            return Err(FormulaError::num());
        }
        let dsm = days_between(settlement, maturity, basis);
        let denominator = 1.0 - discount * dsm / annual_basis(basis);
        if denominator == 0.0 {
            return Err(FormulaError::div_zero());
        }
        Ok(Value::Number(investment / denominator))
    });

    def!(map, "INTRATE", 4, 5, "The interest rate for a fully invested security.", |args, _| {
        let settlement = date_arg(args, 0)?;
        let maturity = date_arg(args, 1)?;
        let investment = arg_number(args, 2)?;
        let redemption = arg_number(args, 3)?;
        let basis = opt_i64(args, 4)?.unwrap_or(0);
        if !is_valid_basis(basis) || settlement >= maturity || investment == 0.0 {
            return Err(FormulaError::num());
        }
        let dsm = days_between(settlement, maturity, basis);
        Ok(Value::Number((redemption - investment) / investment * (annual_basis(basis) / dsm)))
    });

    def!(map, "ACCRINT", 6, 8, "The accrued interest for a security that pays periodic interest.", |args, _| {
        let issue = date_arg(args, 0)?;
        let settlement = date_arg(args, 2)?;
        let rate = arg_number(args, 3)?;
        let par = arg_number(args, 4)?;
        let frequency = arg_i64(args, 5)?;
        let basis = opt_i64(args, 6)?.unwrap_or(0);
        if !is_valid_basis(basis) || frequency_to_months(frequency).is_none() {
            return Err(FormulaError::num());
        }
        if rate <= 0.0 || par <= 0.0 || issue >= settlement {
            return Err(FormulaError::num());
        }
        let year_basis = annual_basis(basis);
        let coupon_rate = rate / frequency as f64;
        let days = days_between(issue, settlement, basis);
        Ok(Value::Number(par * coupon_rate * (days / (year_basis / frequency as f64))))
    });

    def!(map, "ACCRINTM", 3, 4, "The accrued interest for a security that pays interest at maturity.", |args, _| {
        let issue = date_arg(args, 0)?;
        let settlement = date_arg(args, 1)?;
        let rate = arg_number(args, 2)?;
        let par = arg_number(args, 3)?;
        let basis = opt_i64(args, 4)?.unwrap_or(0);
        if !is_valid_basis(basis) || rate <= 0.0 || par <= 0.0 || issue >= settlement {
            return Err(FormulaError::num());
        }
        let days = days_between(issue, settlement, basis);
        Ok(Value::Number(par * rate * days / annual_basis(basis)))
    });

    def!(map, "PRICE", 6, 7, "The price per $100 face value of a security that pays periodic interest.", |args, _| {
        let settlement = date_arg(args, 0)?;
        let maturity = date_arg(args, 1)?;
        let rate = arg_number(args, 2)?;
        let yld = arg_number(args, 3)?;
        let redemption = arg_number(args, 4)?;
        let frequency = arg_i64(args, 5)?;
        let basis = opt_i64(args, 6)?.unwrap_or(0);
        if !is_valid_basis(basis) || frequency_to_months(frequency).is_none() {
            return Err(FormulaError::num());
        }
        if rate < 0.0 || yld < 0.0 || redemption <= 0.0 || settlement >= maturity {
            return Err(FormulaError::num());
        }
        let n = count_coupons(settlement, maturity, frequency).ok_or_else(FormulaError::num)?;
        let e = annual_basis(basis) / frequency as f64;
        let dsc = days_between(settlement, maturity, basis).min(e);
        let a = e - dsc;
        let coupon = 100.0 * rate / frequency as f64;
        let yield_per_period = yld / frequency as f64;
        let dsc_e = dsc / e;
        let price = if n <= 1 {
            (redemption + coupon) / (1.0 + dsc_e * yield_per_period) - a / e * coupon
        } else {
            let mut price = redemption / (1.0 + yield_per_period).powf(n as f64 - 1.0 + dsc_e);
            for k in 1..=n {
                price += coupon / (1.0 + yield_per_period).powf(k as f64 - 1.0 + dsc_e);
            }
            price - a / e * coupon
        };
        Ok(Value::Number(price))
    });

    def!(map, "YIELD", 6, 7, "The yield on a security that pays periodic interest, via Newton-Raphson for multi-period securities.", |args, _| {
        let settlement = date_arg(args, 0)?;
        let maturity = date_arg(args, 1)?;
        let rate = arg_number(args, 2)?;
        let pr = arg_number(args, 3)?;
        let redemption = arg_number(args, 4)?;
        let frequency = arg_i64(args, 5)?;
        let basis = opt_i64(args, 6)?.unwrap_or(0);
        if !is_valid_basis(basis) || frequency_to_months(frequency).is_none() {
            return Err(FormulaError::num());
        }
        if rate < 0.0 || pr <= 0.0 || redemption <= 0.0 || settlement >= maturity {
            return Err(FormulaError::num());
        }
        let n = count_coupons(settlement, maturity, frequency).ok_or_else(FormulaError::num)?;
        let e = annual_basis(basis) / frequency as f64;
        let dsc = days_between(settlement, maturity, basis).min(e);
        let a = e - dsc;
        let coupon = 100.0 * rate / frequency as f64;
        let dsc_e = dsc / e;

        if n <= 1 {
            let accrued = a / e * coupon;
            let price_clean = pr + accrued;
            let total_redemption = redemption + coupon;
            return Ok(Value::Number(((total_redemption - price_clean) / price_clean + 1.0).powf(1.0 / dsc_e) - 1.0));
        }

        let mut yld = 0.1;
        for _ in 0..100 {
            let yield_per_period = yld / frequency as f64;
            let mut price = redemption / (1.0 + yield_per_period).powf(n as f64 - 1.0 + dsc_e);
            for k in 1..=n {
                price += coupon / (1.0 + yield_per_period).powf(k as f64 - 1.0 + dsc_e);
            }
            price -= a / e * coupon;

            let mut dprice = -(n as f64 - 1.0 + dsc_e) * redemption
                / (1.0 + yield_per_period).powf(n as f64 + dsc_e)
                / frequency as f64;
            for k in 1..=n {
                dprice -= (k as f64 - 1.0 + dsc_e) * coupon
                    / (1.0 + yield_per_period).powf(k as f64 + dsc_e)
                    / frequency as f64;
            }
            if dprice.abs() < 1e-15 {
                break;
            }
            let next = yld - (price - pr) / dprice;
            if (next - yld).abs() < 1e-10 {
                yld = next;
                break;
            }
            yld = next;
        }
        if !yld.is_finite() || yld < -1.0 {
            return Err(FormulaError::num());
        }
        Ok(Value::Number(yld))
    });

    def!(map, "TBILLEQ", 3, 3, "The bond-equivalent yield of a Treasury bill.", |args, _| {
        let settlement = date_arg(args, 0)?;
        let maturity = date_arg(args, 1)?;
        let discount = arg_number(args, 2)?;
        let dsm = (maturity - settlement).num_days() as f64;
        if settlement >= maturity || discount <= 0.0 || dsm > 365.0 {
            return Err(FormulaError::num());
        }
        if dsm <= 182.0 {
            Ok(Value::Number((365.0 * discount) / (360.0 - discount * dsm)))
        } else {
            let price = 100.0 * (1.0 - discount * dsm / 360.0);
            let a = dsm / 365.0 / 2.0;
            let b = -(dsm / 365.0 + 0.5);
            let c = (100.0 - price) / price;
            let discriminant = b * b - 4.0 * a * c;
            if discriminant < 0.0 {
                return Err(FormulaError::num());
            }
            Ok(Value::Number((-b + discriminant.sqrt()) / (2.0 * a)))
        }
    });

    def!(map, "TBILLPRICE", 3, 3, "The price per $100 face value of a Treasury bill.", |args, _| {
        let settlement = date_arg(args, 0)?;
        let maturity = date_arg(args, 1)?;
        let discount = arg_number(args, 2)?;
        let dsm = (maturity - settlement).num_days() as f64;
        if settlement >= maturity || discount <= 0.0 || dsm > 365.0 {
            return Err(FormulaError::num());
        }
        Ok(Value::Number(100.0 * (1.0 - discount * dsm / 360.0)))
    });

    def!(map, "TBILLYIELD", 3, 3, "The yield of a Treasury bill given its price.", |args, _| {
        let settlement = date_arg(args, 0)?;
        let maturity = date_arg(args, 1)?;
        let pr = arg_number(args, 2)?;
        let dsm = (maturity - settlement).num_days() as f64;
        if settlement >= maturity || pr <= 0.0 || dsm > 365.0 {
            return Err(FormulaError::num());
        }
        Ok(Value::Number((100.0 - pr) / pr * (360.0 / dsm)))
    });
}

fn opt_number(args: &[Value], i: usize) -> crate::error::FormulaResult<Option<f64>> {
    if i < args.len() {
        Ok(Some(arg_number(args, i)?))
    } else {
        Ok(None)
    }
}

fn opt_i64(args: &[Value], i: usize) -> crate::error::FormulaResult<Option<i64>> {
    Ok(opt_number(args, i)?.map(|n| n as i64))
}

fn date_arg(args: &[Value], i: usize) -> crate::error::FormulaResult<NaiveDate> {
    let serial = arg_number(args, i)? as i64;
    serial_to_date(serial).ok_or_else(FormulaError::num)
}

/// `payment_type` is 0 (end of period) or 1 (beginning); anything else
/// collapses to 0.
fn normalize_payment_type(payment_type: f64) -> f64 {
    if payment_type == 1.0 {
        1.0
    } else {
        0.0
    }
}

fn calculate_pmt(rate: f64, nper: f64, pv: f64, fv: f64, payment_type: f64) -> crate::error::FormulaResult<f64> {
    let payment_type = normalize_payment_type(payment_type);
    if rate == 0.0 {
        if nper == 0.0 {
            return Err(FormulaError::div_zero());
        }
        return Ok(-(pv + fv) / nper);
    }
    let pvif = (1.0 + rate).powf(nper);
    let fvif = (pvif - 1.0) / rate;
    Ok(-(fv + pv * pvif) / (fvif * (1.0 + rate * payment_type)))
}

fn calculate_fv(rate: f64, nper: f64, pmt: f64, pv: f64, payment_type: f64) -> crate::error::FormulaResult<f64> {
    let payment_type = normalize_payment_type(payment_type);
    if rate == 0.0 {
        return Ok(-(pv + pmt * nper));
    }
    let pvif = (1.0 + rate).powf(nper);
    let fvif = (pvif - 1.0) / rate;
    Ok(-(pv * pvif + pmt * (1.0 + rate * payment_type) * fvif))
}

fn calculate_pv(rate: f64, nper: f64, pmt: f64, fv: f64, payment_type: f64) -> crate::error::FormulaResult<f64> {
    let payment_type = normalize_payment_type(payment_type);
    if rate == 0.0 {
        return Ok(-(fv + pmt * nper));
    }
    let pvif = (1.0 + rate).powf(nper);
    let fvif = (pvif - 1.0) / rate;
    Ok(-(fv + pmt * (1.0 + rate * payment_type) * fvif) / pvif)
}

fn balance_before_period(rate: f64, pmt: f64, pv: f64, payment_type: f64, upto: f64) -> f64 {
    let mut balance = pv;
    let mut per = 1;
    while (per as f64) < upto {
        let interest = if payment_type == 1.0 && per == 1 {
            0.0
        } else {
            let adj = if payment_type == 1.0 { balance / (1.0 + rate) } else { balance };
            adj * rate
        };
        balance += pmt + interest;
        per += 1;
    }
    balance
}

fn frequency_to_months(frequency: i64) -> Option<u32> {
    match frequency {
        1 => Some(12),
        2 => Some(6),
        4 => Some(3),
        _ => None,
    }
}

fn is_valid_basis(basis: i64) -> bool {
    (0..=4).contains(&basis)
}

fn annual_basis(basis: i64) -> f64 {
    match basis {
        1 | 3 => 365.0,
        _ => 360.0,
    }
}

fn days_30_360_us(start: NaiveDate, end: NaiveDate) -> i64 {
    let mut d1 = start.day() as i64;
    let mut d2 = end.day() as i64;
    let m1 = start.month() as i64;
    let mut m2 = end.month() as i64;
    let y1 = start.year() as i64;
    let y2 = end.year() as i64;

    if d1 == 31 {
        d1 = 30;
    }
    if d2 == 31 && d1 >= 30 {
        d2 = 30;
    }

    let is_feb_eom = |d: &NaiveDate| d.month() == 2 && d.day() == last_day_of_month(d.year(), 2);
    if is_feb_eom(&start) {
        d1 = 30;
        if is_feb_eom(&end) {
            d2 = 30;
        }
    }

    if d2 == 30 && end.day() == 31 {
        m2 = end.month() as i64;
    }

    360 * (y2 - y1) + 30 * (m2 - m1) + (d2 - d1)
}

fn days_between(start: NaiveDate, end: NaiveDate, basis: i64) -> f64 {
    match basis {
        1..=3 => (end - start).num_days() as f64,
        _ => days_30_360_us(start, end) as f64,
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

fn adjust_day_to_match(target_year: i32, target_month: u32, maturity: NaiveDate) -> NaiveDate {
    let day = maturity.day().min(last_day_of_month(target_year, target_month));
    NaiveDate::from_ymd_opt(target_year, target_month, day).unwrap()
}

fn find_next_coupon_date(settlement: NaiveDate, maturity: NaiveDate, frequency: i64) -> Option<NaiveDate> {
    let months = frequency_to_months(frequency)?;
    let mut candidate = maturity;
    while candidate > settlement {
        let prev = candidate.checked_sub_months(Months::new(months))?;
        let prev = adjust_day_to_match(prev.year(), prev.month(), maturity);
        if prev <= settlement {
            break;
        }
        candidate = prev;
    }
    Some(candidate)
}

fn count_coupons(settlement: NaiveDate, maturity: NaiveDate, frequency: i64) -> Option<i64> {
    if settlement >= maturity {
        return None;
    }
    let months = frequency_to_months(frequency)?;
    let mut next = find_next_coupon_date(settlement, maturity, frequency)?;
    let mut count = 0i64;
    while next <= maturity {
        count += 1;
        next = next.checked_add_months(Months::new(months))?;
        next = adjust_day_to_match(next.year(), next.month(), maturity);
    }
    Some(count)
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
    fn pmt_matches_amortization_identity() {
        match eval_str("PMT(0.01,12,1000)") {
            Value::Number(n) => assert!((n + 88.8488).abs() < 1e-3),
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn fv_zero_rate_is_linear() {
        assert_eq!(eval_str("FV(0,10,-100)"), Value::Number(1000.0));
    }

    #[test]
    fn sln_straight_line() {
        assert_eq!(eval_str("SLN(10000,1000,9)"), Value::Number(1000.0));
    }

    #[test]
    fn npv_discounts_future_flows() {
        match eval_str("NPV(0.1,-1000,300,400,500)") {
            Value::Number(n) => assert!(n < 0.0),
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn irr_requires_mixed_sign_flows() {
        assert!(matches!(eval_str("IRR({100,200})"), Value::Error(_)));
    }

    #[test]
    fn effect_and_nominal_are_inverses() {
        match eval_str("NOMINAL(EFFECT(0.1,12),12)") {
            Value::Number(n) => assert!((n - 0.1).abs() < 1e-9),
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn price_and_yield_round_trip_on_a_single_coupon() {
        match eval_str("PRICE(\"2021-01-15\",\"2021-07-15\",0.05,0.06,100,2,0)") {
            Value::Number(n) => assert!(n > 0.0 && n < 110.0),
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn tbillprice_matches_discount_formula() {
        assert_eq!(eval_str("TBILLPRICE(DATE(2021,1,1),DATE(2021,4,1),0.05)"), Value::Number(98.75));
    }
}
