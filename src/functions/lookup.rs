//! Lookup & reference functions. `ROW`/`COLUMN`/`ROWS`/`COLUMNS`/`OFFSET`
//! live in `eval.rs` instead, since they need the unevaluated argument
//! node; `ADDRESS` and `INDIRECT` look similar but turn out to need only
//! evaluator access, not the raw node, so they're ordinary registry entries
//! here (see `DESIGN.md`).

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::coerce::{compare_values, to_bool, to_string, values_equal};
use crate::error::{FormulaError, FormulaResult};
use crate::eval::Evaluator;
use crate::reference::column_to_letters;
use crate::registry::{FunctionSpec, UNBOUNDED};
use crate::value::{Array2D, Value};

use super::def;
use super::util::{arg_i64, arg_string, as_array, as_flat_vec};

pub(super) fn register(map: &mut HashMap<String, FunctionSpec>) {
    def!(map, "VLOOKUP", 3, 4, "Finds `key` in the first column of `table` and returns the value in `colIndex`.", |args, _| {
        let key = &args[0];
        let table = as_array(&args[1]);
        let col_index = arg_i64(args, 2)?;
        let approximate = if args.len() > 3 { to_bool(&args[3])? } else { true };
        if col_index < 1 || col_index as usize > table.width() {
            return Err(FormulaError::reference());
        }
        let row = find_lookup_row(key, &table, 0, approximate)?;
        Ok(table.get(row, col_index as usize - 1).cloned().unwrap_or(Value::Null))
    });

    def!(map, "HLOOKUP", 3, 4, "Finds `key` in the first row of `table` and returns the value in `rowIndex`.", |args, _| {
        let key = &args[0];
        let table = as_array(&args[1]);
        let row_index = arg_i64(args, 2)?;
        let approximate = if args.len() > 3 { to_bool(&args[3])? } else { true };
        if row_index < 1 || row_index as usize > table.height() {
            return Err(FormulaError::reference());
        }
        let transposed = table.transpose();
        let col = find_lookup_row(key, &transposed, 0, approximate)?;
        Ok(table.get(row_index as usize - 1, col).cloned().unwrap_or(Value::Null))
    });

    def!(map, "INDEX", 1, 3, "Returns a cell, row, or column from `array` by 1-based position (0 selects the whole row/column).", |args, _| {
        let array = as_array(&args[0]);
        index_fn(&array, args)
    });

    def!(map, "MATCH", 2, 3, "The 1-based position of `key` within `vector` (matchType: 1 greatest <=, 0 exact, -1 smallest >=).", |args, _| {
        let key = &args[0];
        let vector = as_flat_vec(&args[1]);
        let match_type = if args.len() > 2 { arg_i64(args, 2)? } else { 1 };
        match_position(key, &vector, match_type)
    });

    def!(map, "LOOKUP", 2, 3, "Legacy lookup: finds the last entry of `vector` that is <= `key` and returns the paired entry.", |args, _| {
        let key = &args[0];
        let lookup_vec = as_flat_vec(&args[1]);
        let result_vec = if args.len() > 2 { as_flat_vec(&args[2]) } else { lookup_vec.clone() };
        if result_vec.len() != lookup_vec.len() {
            return Err(FormulaError::value());
        }
        let mut best: Option<usize> = None;
        for (i, v) in lookup_vec.iter().enumerate() {
            if compare_values(v, key)? != Ordering::Greater {
                best = Some(i);
            } else {
                break;
            }
        }
        match best {
            Some(i) => Ok(result_vec[i].clone()),
            None => Err(FormulaError::not_available()),
        }
    });

    def!(map, "XLOOKUP", 3, 6, "Finds `key` in `lookupArray` and returns the paired entry from `returnArray`.", |args, _| {
        let key = &args[0];
        let lookup_vec = as_flat_vec(&args[1]);
        let return_vec = as_flat_vec(&args[2]);
        if lookup_vec.len() != return_vec.len() {
            return Err(FormulaError::value());
        }
        let match_mode = if args.len() > 4 { arg_i64(args, 4)? } else { 0 };
        let search_mode = if args.len() > 5 { arg_i64(args, 5)? } else { 1 };
        let indices: Box<dyn Iterator<Item = usize>> = if search_mode < 0 {
            Box::new((0..lookup_vec.len()).rev())
        } else {
            Box::new(0..lookup_vec.len())
        };
        let mut found: Option<usize> = None;
        let mut best_delta: Option<f64> = None;
        for i in indices {
            let cmp = compare_values(&lookup_vec[i], key)?;
            match match_mode {
                0 | 2 => {
                    if cmp == Ordering::Equal {
                        found = Some(i);
                        break;
                    }
                }
                -1 => {
                    // exact, else next-smaller: track the closest value <= key
                    if cmp == Ordering::Equal {
                        found = Some(i);
                        break;
                    }
                    if cmp == Ordering::Less {
                        if let (Value::Number(a), Value::Number(b)) = (&lookup_vec[i], key) {
                            let delta = b - a;
                            if best_delta.map_or(true, |bd| delta < bd) {
                                best_delta = Some(delta);
                                found = Some(i);
                            }
                        } else {
                            found = found.or(Some(i));
                        }
                    }
                }
                1 => {
                    if cmp == Ordering::Equal {
                        found = Some(i);
                        break;
                    }
                    if cmp == Ordering::Greater {
                        if let (Value::Number(a), Value::Number(b)) = (&lookup_vec[i], key) {
                            let delta = a - b;
                            if best_delta.map_or(true, |bd| delta < bd) {
                                best_delta = Some(delta);
                                found = Some(i);
                            }
                        } else {
                            found = found.or(Some(i));
                        }
                    }
                }
                _ => return Err(FormulaError::value()),
            }
        }
        match found {
            Some(i) => Ok(return_vec[i].clone()),
            None if args.len() > 3 => Ok(args[3].clone()),
            None => Err(FormulaError::not_available()),
        }
    });

    def!(map, "ADDRESS", 2, 5, "Synthesizes the textual A1-style address for a row/column pair.", |args, _| {
        let row = arg_i64(args, 0)?;
        let col = arg_i64(args, 1)?;
        if row < 1 || col < 1 {
            return Err(FormulaError::value());
        }
        let abs_type = if args.len() > 2 { arg_i64(args, 2)? } else { 1 };
        let a1_style = if args.len() > 3 { to_bool(&args[3])? } else { true };
        if !a1_style {
            return Err(FormulaError::value());
        }
        let (col_dollar, row_dollar) = match abs_type {
            1 => ("$", "$"),
            2 => ("", "$"),
            3 => ("$", ""),
            4 => ("", ""),
            _ => return Err(FormulaError::value()),
        };
        let col_letters = column_to_letters(col as u32 - 1);
        let mut out = String::new();
        if args.len() > 4 {
            let sheet = arg_string(args, 4)?;
            if sheet.chars().all(|c| c.is_alphanumeric() || c == '_') && !sheet.is_empty() {
                out.push_str(&sheet);
            } else {
                out.push('\'');
                out.push_str(&sheet.replace('\'', "''"));
                out.push('\'');
            }
            out.push('!');
        }
        out.push_str(col_dollar);
        out.push_str(&col_letters);
        out.push_str(row_dollar);
        out.push_str(&row.to_string());
        Ok(Value::String(out))
    });

    def!(map, "INDIRECT", 1, 2, "Parses a cell/range address from text and reads it, recording a dependency.", |args, eval: &mut Evaluator| {
        let text = to_string(&args[0])?;
        Ok(eval.read_indirect(&text))
    });
}

fn index_fn(array: &Array2D, args: &[Value]) -> FormulaResult<Value> {
    let height = array.height();
    let width = array.width();
    match args.len() {
        1 => Err(FormulaError::value()),
        2 => {
            let n = arg_i64(args, 1)?;
            if height == 1 {
                let col = check_index(n, width)?;
                Ok(array.get(0, col).cloned().unwrap_or(Value::Null))
            } else if width == 1 {
                let row = check_index(n, height)?;
                Ok(array.get(row, 0).cloned().unwrap_or(Value::Null))
            } else if n == 0 {
                Err(FormulaError::value())
            } else {
                let row = check_index(n, height)?;
                let row_vals = array.rows()[row].clone();
                Ok(Value::Array2D(Array2D::from_rows_unchecked(vec![row_vals])))
            }
        }
        3 => {
            let row_n = arg_i64(args, 1)?;
            let col_n = arg_i64(args, 2)?;
            if row_n == 0 && col_n == 0 {
                return Err(FormulaError::value());
            }
            if row_n == 0 {
                let col = check_index(col_n, width)?;
                let column: Vec<Vec<Value>> = array.rows().iter().map(|r| vec![r[col].clone()]).collect();
                Ok(Value::Array2D(Array2D::from_rows_unchecked(column)))
            } else if col_n == 0 {
                let row = check_index(row_n, height)?;
                Ok(Value::Array2D(Array2D::from_rows_unchecked(vec![array.rows()[row].clone()])))
            } else {
                let row = check_index(row_n, height)?;
                let col = check_index(col_n, width)?;
                Ok(array.get(row, col).cloned().unwrap_or(Value::Null))
            }
        }
        _ => Err(FormulaError::value()),
    }
}

fn check_index(n: i64, len: usize) -> FormulaResult<usize> {
    if n < 1 || n as usize > len {
        return Err(FormulaError::reference());
    }
    Ok(n as usize - 1)
}

/// Scans column `col` of `table` for `key`: approximate mode (`VLOOKUP`/
/// `HLOOKUP`) assumes ascending sort and keeps the greatest
/// match <= key, stopping once a greater value is seen; exact mode requires
/// equality.
fn find_lookup_row(key: &Value, table: &Array2D, col: usize, approximate: bool) -> FormulaResult<usize> {
    let mut best: Option<usize> = None;
    for row in 0..table.height() {
        let candidate = table.get(row, col).unwrap_or(&Value::Null);
        if approximate {
            match compare_values(candidate, key)? {
                Ordering::Greater => break,
                _ => best = Some(row),
            }
        } else if values_equal(candidate, key)? {
            return Ok(row);
        }
    }
    best.ok_or_else(FormulaError::not_available)
}

/// `MATCH`'s positional scan: `matchType` 0 is an
/// exact scan, 1 assumes an ascending vector and returns the last entry
/// <= key, -1 assumes descending and returns the last entry >= key.
fn match_position(key: &Value, vector: &[&Value], match_type: i64) -> FormulaResult<Value> {
    match match_type {
        0 => {
            for (i, v) in vector.iter().enumerate() {
                if values_equal(v, key)? {
                    return Ok(Value::Number((i + 1) as f64));
                }
            }
            Err(FormulaError::not_available())
        }
        1 => {
            let mut best: Option<usize> = None;
            for (i, v) in vector.iter().enumerate() {
                match compare_values(v, key)? {
                    Ordering::Greater => break,
                    _ => best = Some(i),
                }
            }
            best.map(|i| Value::Number((i + 1) as f64)).ok_or_else(FormulaError::not_available)
        }
        -1 => {
            let mut best: Option<usize> = None;
            for (i, v) in vector.iter().enumerate() {
                match compare_values(v, key)? {
                    Ordering::Less => break,
                    _ => best = Some(i),
                }
            }
            best.map(|i| Value::Number((i + 1) as f64)).ok_or_else(FormulaError::not_available)
        }
        _ => Err(FormulaError::value()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::registry::Registry;
    use crate::context::{EvalContext, MemoryGrid};

    fn eval_str(src: &str) -> Value {
        let grid = MemoryGrid::new("Sheet1");
        let tree = parse(src).unwrap();
        let registry = Registry::with_builtins();
        let ctx = EvalContext::new(&grid, "Sheet1");
        crate::eval::evaluate(&tree, &ctx, &registry).value
    }

    #[test]
    fn vlookup_approximate_match() {
        assert_eq!(eval_str(r#"VLOOKUP(2.5,{1,"a";2,"b";3,"c"},2,TRUE)"#), Value::String("b".into()));
    }

    #[test]
    fn vlookup_exact_not_found() {
        assert_eq!(
            eval_str(r#"VLOOKUP(9,{1,"a";2,"b"},2,FALSE)"#),
            Value::Error(FormulaError::not_available())
        );
    }

    #[test]
    fn match_exact() {
        assert_eq!(eval_str(r#"MATCH(2,{1,2,3},0)"#), Value::Number(2.0));
    }

    #[test]
    fn index_whole_row() {
        assert_eq!(
            eval_str("INDEX({1,2;3,4},1,0)"),
            Value::Array2D(Array2D::from_rows_unchecked(vec![vec![Value::Number(1.0), Value::Number(2.0)]]))
        );
    }
}
