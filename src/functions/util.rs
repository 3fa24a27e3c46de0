//! Shared helpers for function bodies: flattening scalar-or-array arguments
//! into a single stream, coercing that stream to numbers/strings, and a
//! handful of rounding and index-bounds helpers the arithmetic/lookup
//! functions reuse.

use crate::coerce::{array_to_flat_vec, flatten_values, to_number, to_string};
use crate::error::{FormulaError, FormulaResult};
use crate::value::{Array2D, Value};

/// Views a scalar-or-array argument as a rectangular array, wrapping a bare
/// scalar as a 1x1 array.
pub fn as_array(v: &Value) -> Array2D {
    match v {
        Value::Array2D(a) => a.clone(),
        other => Array2D::single(other.clone()),
    }
}

/// Flattens a single scalar-or-array argument to an owned `Vec`, row-major.
/// Unlike [`numbers_flat`] this keeps the original `Value`s, for the
/// `...IF`/`...IFS` family which pairs a criteria range against a (possibly
/// different) sum/average range element-for-element.
pub fn as_flat_vec(v: &Value) -> Vec<Value> {
    match v {
        Value::Array2D(a) => array_to_flat_vec(a),
        other => vec![other.clone()],
    }
}

/// Flattens every argument to a stream of numbers the way `SUM`/`AVERAGE`/
/// `MAX`/etc. harvest their operands: an argument that arrived as a range or
/// array literal (`Value::Array2D`) contributes only its actual `Number`
/// entries, silently skipping text, blanks, and booleans the same way those
/// functions skip a non-numeric cell; an argument supplied directly as a
/// scalar is coerced strictly via [`to_number`], so a non-numeric direct
/// argument is a `#VALUE!` error rather than being dropped.
pub fn numbers_flat(args: &[Value]) -> FormulaResult<Vec<f64>> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Value::Array2D(a) => out.extend(a.iter_flat().filter_map(|v| match v {
                Value::Number(n) => Some(*n),
                _ => None,
            })),
            other => out.push(to_number(other)?),
        }
    }
    Ok(out)
}

/// Flattens every argument (arrays included) and keeps only the entries that
/// are already numbers, regardless of whether they arrived directly or
/// through a range — used by `COUNT`, which counts numeric values uniformly
/// across all of its arguments rather than distinguishing direct from
/// range-sourced operands.
pub fn numbers_flat_numeric_only(args: &[Value]) -> Vec<f64> {
    flatten_values(args)
        .into_iter()
        .filter_map(|v| match v {
            Value::Number(n) => Some(*n),
            _ => None,
        })
        .collect()
}

pub fn strings_flat(args: &[Value]) -> FormulaResult<Vec<String>> {
    flatten_values(args).into_iter().map(to_string).collect()
}

pub fn arg_number(args: &[Value], i: usize) -> FormulaResult<f64> {
    to_number(&args[i])
}

pub fn arg_string(args: &[Value], i: usize) -> FormulaResult<String> {
    to_string(&args[i])
}

pub fn arg_i64(args: &[Value], i: usize) -> FormulaResult<i64> {
    Ok(arg_number(args, i)? as i64)
}

/// `ROUND`-family helper: rounds `n` to `digits` decimal places using the
/// supplied rounding function (half-away-from-zero, away-from-zero, or
/// toward-zero, per which of `ROUND`/`ROUNDUP`/`ROUNDDOWN` is calling).
pub fn round_to(n: f64, digits: i64, round_fn: impl Fn(f64) -> f64) -> f64 {
    let factor = 10f64.powi(digits as i32);
    round_fn(n * factor) / factor
}

pub fn round_half_away_from_zero(x: f64) -> f64 {
    x.abs().round().copysign(x)
}

pub fn round_away_from_zero(x: f64) -> f64 {
    x.abs().ceil().copysign(x)
}

pub fn round_toward_zero(x: f64) -> f64 {
    x.trunc()
}

/// Checks `index` (1-based) against `len`, returning `#VALUE!` if out of
/// range.
pub fn check_one_based(index: i64, len: usize) -> FormulaResult<usize> {
    if index < 1 || index as usize > len {
        return Err(FormulaError::value());
    }
    Ok(index as usize - 1)
}
