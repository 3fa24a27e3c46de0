//! Array / dynamic functions: reshaping, filtering, sorting, and stacking
//! `Array2D` values.

use std::collections::HashMap;

use crate::coerce::{compare_values, to_bool, to_number, values_equal};
use crate::error::{FormulaError, FormulaResult};
use crate::eval::Evaluator;
use crate::registry::{FunctionSpec, UNBOUNDED};
use crate::value::{Array2D, Value};

use super::def;
use super::util::{arg_i64, arg_number, as_array};

pub(super) fn register(map: &mut HashMap<String, FunctionSpec>) {
    def!(map, "FILTER", 2, 3, "Keeps the rows of `array` whose paired entry in `boolMask` is truthy.", |args, _| {
        let array = as_array(&args[0]);
        let mask = as_array(&args[1]);
        if mask.height() != array.height() {
            return Err(FormulaError::value());
        }
        let mut kept = Vec::new();
        for row in 0..array.height() {
            let keep = match mask.width() {
                1 => to_bool(mask.get(row, 0).unwrap_or(&Value::Null))?,
                w if w == array.width() => {
                    (0..w).any(|c| to_bool(mask.get(row, c).unwrap_or(&Value::Null)).unwrap_or(false))
                }
                _ => return Err(FormulaError::value()),
            };
            if keep {
                kept.push(array.rows()[row].clone());
            }
        }
        if kept.is_empty() {
            return if args.len() > 2 { Ok(args[2].clone()) } else { Err(FormulaError::not_available()) };
        }
        Ok(Value::Array2D(Array2D::from_rows_unchecked(kept)))
    });

    def!(map, "SORT", 1, 4, "Sorts the rows of `array` by one column (default the first), ascending unless `order` is -1.", |args, _| {
        let array = as_array(&args[0]);
        let key_index = if args.len() > 1 { arg_i64(args, 1)? } else { 1 };
        let order = if args.len() > 2 { arg_i64(args, 2)? } else { 1 };
        let by_column = args.len() > 3 && to_bool(&args[3])?;
        let source = if by_column { array.transpose() } else { array };
        if key_index < 1 || key_index as usize > source.width() {
            return Err(FormulaError::value());
        }
        let key_col = key_index as usize - 1;
        let mut rows = source.into_rows();
        let mut err = None;
        rows.sort_by(|a, b| match compare_values(&a[key_col], &b[key_col]) {
            Ok(ord) => if order < 0 { ord.reverse() } else { ord },
            Err(e) => {
                err = Some(e);
                std::cmp::Ordering::Equal
            }
        });
        if let Some(e) = err {
            return Err(e);
        }
        let result = Array2D::from_rows_unchecked(rows);
        Ok(Value::Array2D(if by_column { result.transpose() } else { result }))
    });

    def!(map, "SORTBY", 2, UNBOUNDED, "Sorts the rows of `array` by one or more paired key arrays.", |args, _| {
        if (args.len() - 1) % 2 != 0 {
            return Err(FormulaError::value());
        }
        let array = as_array(&args[0]);
        let key_pairs: Vec<(Array2D, i64)> = args[1..]
            .chunks(2)
            .map(|pair| -> FormulaResult<(Array2D, i64)> {
                let key = as_array(&pair[0]);
                let order = to_number(&pair[1])? as i64;
                Ok((key, order))
            })
            .collect::<FormulaResult<_>>()?;
        for (key, _) in &key_pairs {
            if key.height() != array.height() {
                return Err(FormulaError::value());
            }
        }
        let mut indices: Vec<usize> = (0..array.height()).collect();
        let mut err = None;
        indices.sort_by(|&a, &b| {
            for (key, order) in &key_pairs {
                match compare_values(key.get(a, 0).unwrap(), key.get(b, 0).unwrap()) {
                    Ok(std::cmp::Ordering::Equal) => continue,
                    Ok(ord) => return if *order < 0 { ord.reverse() } else { ord },
                    Err(e) => {
                        err = Some(e);
                        return std::cmp::Ordering::Equal;
                    }
                }
            }
            std::cmp::Ordering::Equal
        });
        if let Some(e) = err {
            return Err(e);
        }
        let rows: Vec<Vec<Value>> = indices.into_iter().map(|i| array.rows()[i].clone()).collect();
        Ok(Value::Array2D(Array2D::from_rows_unchecked(rows)))
    });

    def!(map, "UNIQUE", 1, 3, "The distinct rows (or columns) of `array`, in first-seen order.", |args, _| {
        let array = as_array(&args[0]);
        let by_column = args.len() > 1 && to_bool(&args[1])?;
        let exactly_once = args.len() > 2 && to_bool(&args[2])?;
        let source = if by_column { array.transpose() } else { array };
        let mut seen: Vec<(Vec<Value>, usize)> = Vec::new();
        for row in source.rows() {
            if let Some(entry) = seen.iter_mut().find(|(r, _)| rows_equal(r, row)) {
                entry.1 += 1;
            } else {
                seen.push((row.clone(), 1));
            }
        }
        let kept: Vec<Vec<Value>> = seen
            .into_iter()
            .filter(|(_, count)| !exactly_once || *count == 1)
            .map(|(row, _)| row)
            .collect();
        let result = Array2D::from_rows_unchecked(kept);
        Ok(Value::Array2D(if by_column { result.transpose() } else { result }))
    });

    def!(map, "SEQUENCE", 1, 4, "A generated array counting up from `start` by `step`.", |args, _| {
        let rows = arg_i64(args, 0)? as usize;
        let cols = if args.len() > 1 { arg_i64(args, 1)? as usize } else { 1 };
        let start = if args.len() > 2 { arg_number(args, 2)? } else { 1.0 };
        let step = if args.len() > 3 { arg_number(args, 3)? } else { 1.0 };
        let mut out = Vec::with_capacity(rows);
        let mut n = start;
        for _ in 0..rows {
            let mut row = Vec::with_capacity(cols);
            for _ in 0..cols {
                row.push(Value::Number(n));
                n += step;
            }
            out.push(row);
        }
        Ok(Value::Array2D(Array2D::from_rows_unchecked(out)))
    });

    def!(map, "RANDARRAY", 0, 5, "A generated array of random numbers, optionally integral, within [min, max).", |args, eval: &mut Evaluator| {
        let rows = if !args.is_empty() { arg_i64(args, 0)? as usize } else { 1 };
        let cols = if args.len() > 1 { arg_i64(args, 1)? as usize } else { 1 };
        let min = if args.len() > 2 { arg_number(args, 2)? } else { 0.0 };
        let max = if args.len() > 3 { arg_number(args, 3)? } else { 1.0 };
        let integer = args.len() > 4 && to_bool(&args[4])?;
        let mut out = Vec::with_capacity(rows);
        for _ in 0..rows {
            let mut row = Vec::with_capacity(cols);
            for _ in 0..cols {
                let r = min + eval.data().random() * (max - min);
                row.push(Value::Number(if integer { r.floor() } else { r }));
            }
            out.push(row);
        }
        Ok(Value::Array2D(Array2D::from_rows_unchecked(out)))
    });

    def!(map, "TRANSPOSE", 1, 1, "Swaps rows and columns.", |args, _| {
        Ok(Value::Array2D(as_array(&args[0]).transpose()))
    });

    def!(map, "FLATTEN", 1, UNBOUNDED, "All arguments flattened, row-major, into a single column.", |args, _| {
        let mut out = Vec::new();
        for a in args {
            out.extend(as_array(a).into_iter_flat());
        }
        Ok(Value::Array2D(Array2D::from_rows_unchecked(out.into_iter().map(|v| vec![v]).collect())))
    });

    def!(map, "TOCOL", 1, 2, "Flattens `array` into a single column, optionally skipping blanks/errors.", |args, _| {
        Ok(Value::Array2D(to_vector(&as_array(&args[0]), ignore_mode(args)?, false)?))
    });

    def!(map, "TOROW", 1, 2, "Flattens `array` into a single row, optionally skipping blanks/errors.", |args, _| {
        Ok(Value::Array2D(to_vector(&as_array(&args[0]), ignore_mode(args)?, true)?))
    });

    def!(map, "WRAPROWS", 2, 3, "Wraps a vector into rows of the given width, padding the last row.", |args, _| {
        let flat: Vec<Value> = as_array(&args[0]).into_iter_flat().collect();
        let width = arg_i64(args, 1)? as usize;
        let pad = args.get(2).cloned().unwrap_or(Value::Error(FormulaError::not_available()));
        Ok(Value::Array2D(wrap(flat, width, pad)))
    });

    def!(map, "WRAPCOLS", 2, 3, "Wraps a vector into columns of the given height, padding the last column.", |args, _| {
        let flat: Vec<Value> = as_array(&args[0]).into_iter_flat().collect();
        let height = arg_i64(args, 1)? as usize;
        let pad = args.get(2).cloned().unwrap_or(Value::Error(FormulaError::not_available()));
        Ok(Value::Array2D(wrap(flat, height, pad).transpose()))
    });

    def!(map, "TAKE", 2, 3, "The first (or last, if negative) `rows`/`cols` of `array`.", |args, _| {
        let array = as_array(&args[0]);
        let rows = arg_i64(args, 1)?;
        let cols = if args.len() > 2 { Some(arg_i64(args, 2)?) } else { None };
        take(&array, Some(rows), cols)
    });

    def!(map, "DROP", 2, 3, "`array` with the first (or last, if negative) `rows`/`cols` removed.", |args, _| {
        let array = as_array(&args[0]);
        let rows = arg_i64(args, 1)?;
        let cols = if args.len() > 2 { Some(arg_i64(args, 2)?) } else { None };
        drop_fn(&array, Some(rows), cols)
    });

    def!(map, "EXPAND", 2, 4, "Pads `array` out to `rows` x `cols`, filling new cells with `pad` (default `#N/A`).", |args, _| {
        let array = as_array(&args[0]);
        let rows = arg_i64(args, 1)? as usize;
        let cols = if args.len() > 2 { arg_i64(args, 2)? as usize } else { array.width() };
        let pad = args.get(3).cloned().unwrap_or(Value::Error(FormulaError::not_available()));
        if rows < array.height() || cols < array.width() {
            return Err(FormulaError::value());
        }
        let mut out = vec![vec![pad.clone(); cols]; rows];
        for r in 0..array.height() {
            for c in 0..array.width() {
                out[r][c] = array.get(r, c).unwrap().clone();
            }
        }
        Ok(Value::Array2D(Array2D::from_rows_unchecked(out)))
    });

    def!(map, "CHOOSECOLS", 2, UNBOUNDED, "Selects the given 1-based columns (negative = from the end) of `array`.", |args, _| {
        let array = as_array(&args[0]);
        let mut out_cols = Vec::new();
        for a in &args[1..] {
            let idx = choose_index(to_number(a)? as i64, array.width())?;
            out_cols.push(idx);
        }
        let rows: Vec<Vec<Value>> = array
            .rows()
            .iter()
            .map(|row| out_cols.iter().map(|&c| row[c].clone()).collect())
            .collect();
        Ok(Value::Array2D(Array2D::from_rows_unchecked(rows)))
    });

    def!(map, "CHOOSEROWS", 2, UNBOUNDED, "Selects the given 1-based rows (negative = from the end) of `array`.", |args, _| {
        let array = as_array(&args[0]);
        let mut rows = Vec::new();
        for a in &args[1..] {
            let idx = choose_index(to_number(a)? as i64, array.height())?;
            rows.push(array.rows()[idx].clone());
        }
        Ok(Value::Array2D(Array2D::from_rows_unchecked(rows)))
    });

    def!(map, "HSTACK", 1, UNBOUNDED, "Horizontally concatenates arrays, filling short columns with `#N/A`.", |args, _| {
        let arrays: Vec<Array2D> = args.iter().map(as_array).collect();
        let height = arrays.iter().map(Array2D::height).max().unwrap_or(0);
        let mut rows = vec![Vec::new(); height];
        for a in &arrays {
            for r in 0..height {
                match a.rows().get(r) {
                    Some(row) => rows[r].extend(row.iter().cloned()),
                    None => rows[r].extend(std::iter::repeat(Value::Error(FormulaError::not_available())).take(a.width())),
                }
            }
        }
        Ok(Value::Array2D(Array2D::from_rows_unchecked(rows)))
    });

    def!(map, "VSTACK", 1, UNBOUNDED, "Vertically concatenates arrays, filling short rows with `#N/A`.", |args, _| {
        let arrays: Vec<Array2D> = args.iter().map(as_array).collect();
        let width = arrays.iter().map(Array2D::width).max().unwrap_or(0);
        let mut rows = Vec::new();
        for a in &arrays {
            for row in a.rows() {
                let mut padded = row.clone();
                padded.resize(width, Value::Error(FormulaError::not_available()));
                rows.push(padded);
            }
        }
        Ok(Value::Array2D(Array2D::from_rows_unchecked(rows)))
    });
}

fn rows_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y).unwrap_or(false))
}

fn ignore_mode(args: &[Value]) -> FormulaResult<i64> {
    Ok(if args.len() > 1 { arg_i64(args, 1)? } else { 0 })
}

/// Flattens `array` into a single row or column, honoring `TOCOL`/`TOROW`'s
/// `ignore` parameter: 0 none, 1 blanks, 2 errors, 3 both.
fn to_vector(array: &Array2D, ignore: i64, as_row: bool) -> FormulaResult<Array2D> {
    let keep = |v: &Value| -> bool {
        match ignore {
            1 => !matches!(v, Value::Null),
            2 => !v.is_error(),
            3 => !matches!(v, Value::Null) && !v.is_error(),
            _ => true,
        }
    };
    let flat: Vec<Value> = array.iter_flat().filter(|v| keep(v)).cloned().collect();
    Ok(if as_row {
        Array2D::from_rows_unchecked(vec![flat])
    } else {
        Array2D::from_rows_unchecked(flat.into_iter().map(|v| vec![v]).collect())
    })
}

fn wrap(flat: Vec<Value>, width: usize, pad: Value) -> Array2D {
    if width == 0 {
        return Array2D::from_rows_unchecked(vec![]);
    }
    let mut rows: Vec<Vec<Value>> = flat.chunks(width).map(|c| c.to_vec()).collect();
    if let Some(last) = rows.last_mut() {
        while last.len() < width {
            last.push(pad.clone());
        }
    }
    Array2D::from_rows_unchecked(rows)
}

fn take(array: &Array2D, rows: Option<i64>, cols: Option<i64>) -> FormulaResult<Value> {
    let (r0, r1) = take_range(rows, array.height());
    let (c0, c1) = take_range(cols, array.width());
    let out: Vec<Vec<Value>> = array.rows()[r0..r1].iter().map(|row| row[c0..c1].to_vec()).collect();
    Ok(Value::Array2D(Array2D::from_rows_unchecked(out)))
}

fn drop_fn(array: &Array2D, rows: Option<i64>, cols: Option<i64>) -> FormulaResult<Value> {
    let (r0, r1) = drop_range(rows, array.height());
    let (c0, c1) = drop_range(cols, array.width());
    let out: Vec<Vec<Value>> = array.rows()[r0..r1].iter().map(|row| row[c0..c1].to_vec()).collect();
    Ok(Value::Array2D(Array2D::from_rows_unchecked(out)))
}

fn take_range(n: Option<i64>, len: usize) -> (usize, usize) {
    match n {
        None => (0, len),
        Some(n) if n >= 0 => (0, (n as usize).min(len)),
        Some(n) => {
            let k = (-n) as usize;
            (len.saturating_sub(k), len)
        }
    }
}

fn drop_range(n: Option<i64>, len: usize) -> (usize, usize) {
    match n {
        None => (0, len),
        Some(n) if n >= 0 => ((n as usize).min(len), len),
        Some(n) => {
            let k = (-n) as usize;
            (0, len.saturating_sub(k))
        }
    }
}

/// Resolves a `CHOOSECOLS`/`CHOOSEROWS` index: positive is 1-based from the
/// head, negative is 1-based from the tail.
fn choose_index(n: i64, len: usize) -> FormulaResult<usize> {
    if n > 0 {
        if n as usize > len {
            return Err(FormulaError::value());
        }
        Ok(n as usize - 1)
    } else if n < 0 {
        let k = (-n) as usize;
        if k > len {
            return Err(FormulaError::value());
        }
        Ok(len - k)
    } else {
        Err(FormulaError::value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{EvalContext, MemoryGrid};
    use crate::parser::parse;
    use crate::registry::Registry;

    fn eval_str(src: &str) -> Value {
        let grid = MemoryGrid::new("Sheet1");
        let tree = parse(src).unwrap();
        let registry = Registry::with_builtins();
        let ctx = EvalContext::new(&grid, "Sheet1");
        crate::eval::evaluate(&tree, &ctx, &registry).value
    }

    #[test]
    fn sequence_basic() {
        assert_eq!(
            eval_str("SEQUENCE(2,2)"),
            Value::Array2D(Array2D::from_rows_unchecked(vec![
                vec![Value::Number(1.0), Value::Number(2.0)],
                vec![Value::Number(3.0), Value::Number(4.0)],
            ]))
        );
    }

    #[test]
    fn transpose_swaps_dimensions() {
        let Value::Array2D(result) = eval_str("TRANSPOSE({1,2,3})") else { panic!("expected array") };
        assert_eq!(result.width(), 1);
        assert_eq!(result.height(), 3);
    }

    #[test]
    fn unique_first_seen_order() {
        assert_eq!(
            eval_str("UNIQUE({1,2,1,3})"),
            Value::Array2D(Array2D::from_rows_unchecked(vec![
                vec![Value::Number(1.0)],
                vec![Value::Number(2.0)],
                vec![Value::Number(3.0)],
            ]))
        );
    }

    #[test]
    fn take_negative_counts_from_end() {
        let Value::Array2D(result) = eval_str("TAKE({1,2,3,4},1,-2)") else { panic!("expected array") };
        assert_eq!(result.rows(), &[vec![Value::Number(3.0), Value::Number(4.0)]]);
    }
}
