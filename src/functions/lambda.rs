//! Higher-order lambda helpers. `LAMBDA`, `LET`, and `ISOMITTED` are special
//! forms handled directly in `eval.rs` (they need the unevaluated
//! body/parameter nodes); the functions here receive an already-evaluated
//! [`Value::Lambda`] as their last argument and invoke it through
//! [`Evaluator::invoke_lambda`].

use std::collections::HashMap;

use crate::error::{FormulaError, FormulaResult};
use crate::eval::Evaluator;
use crate::registry::{FunctionSpec, UNBOUNDED};
use crate::value::{Array2D, LambdaValue, Value};

use super::def;
use super::util::{arg_i64, as_array};

fn as_lambda(v: &Value) -> FormulaResult<&LambdaValue> {
    match v {
        Value::Lambda(l) => Ok(l),
        _ => Err(FormulaError::value()),
    }
}

pub(super) fn register(map: &mut HashMap<String, FunctionSpec>) {
    def!(map, "MAP", 2, UNBOUNDED, "Applies `lambda` element-wise across one or more equal-shaped arrays.", |args, eval: &mut Evaluator| {
        let (arrays_args, lambda_arg) = args.split_at(args.len() - 1);
        let lambda = as_lambda(&lambda_arg[0])?;
        let arrays: Vec<Array2D> = arrays_args.iter().map(as_array).collect();
        let height = arrays[0].height();
        let width = arrays[0].width();
        if arrays.iter().any(|a| a.height() != height || a.width() != width) {
            return Err(FormulaError::value());
        }
        let mut out = vec![vec![Value::Null; width]; height];
        for r in 0..height {
            for c in 0..width {
                let call_args: Vec<Value> = arrays.iter().map(|a| a.get(r, c).unwrap().clone()).collect();
                out[r][c] = eval.invoke_lambda(lambda, &call_args);
            }
        }
        Ok(Value::Array2D(Array2D::from_rows_unchecked(out)))
    });

    def!(map, "REDUCE", 3, 3, "Folds `lambda(accumulator, value)` over `array`, starting from `initial`.", |args, eval: &mut Evaluator| {
        let initial = args[0].clone();
        let array = as_array(&args[1]);
        let lambda = as_lambda(&args[2])?;
        let mut acc = initial;
        for v in array.into_iter_flat() {
            acc = eval.invoke_lambda(lambda, &[acc, v]);
            if acc.is_error() {
                return Ok(acc);
            }
        }
        Ok(acc)
    });

    def!(map, "SCAN", 3, 3, "Like `REDUCE`, but returns every intermediate accumulator value as an array shaped like `array`.", |args, eval: &mut Evaluator| {
        let initial = args[0].clone();
        let array = as_array(&args[1]);
        let lambda = as_lambda(&args[2])?;
        let height = array.height();
        let width = array.width();
        let mut acc = initial;
        let mut flat = Vec::with_capacity(height * width);
        for v in array.into_iter_flat() {
            acc = eval.invoke_lambda(lambda, &[acc, v]);
            flat.push(acc.clone());
            if acc.is_error() {
                break;
            }
        }
        while flat.len() < height * width {
            flat.push(Value::Error(FormulaError::not_available()));
        }
        let rows: Vec<Vec<Value>> = flat.chunks(width.max(1)).map(|c| c.to_vec()).collect();
        Ok(Value::Array2D(Array2D::from_rows_unchecked(rows)))
    });

    def!(map, "MAKEARRAY", 3, 3, "Builds a `rows` x `cols` array by calling `lambda(rowIndex, colIndex)` for every cell (1-based).", |args, eval: &mut Evaluator| {
        let rows = arg_i64(args, 0)?;
        let cols = arg_i64(args, 1)?;
        if rows < 1 || cols < 1 {
            return Err(FormulaError::value());
        }
        let lambda = as_lambda(&args[2])?;
        let mut out = vec![vec![Value::Null; cols as usize]; rows as usize];
        for r in 0..rows as usize {
            for c in 0..cols as usize {
                out[r][c] = eval.invoke_lambda(lambda, &[Value::Number((r + 1) as f64), Value::Number((c + 1) as f64)]);
            }
        }
        Ok(Value::Array2D(Array2D::from_rows_unchecked(out)))
    });

    def!(map, "BYROW", 2, 2, "Applies `lambda` to each row of `array` (as a 1-row array), returning a column of results.", |args, eval: &mut Evaluator| {
        let array = as_array(&args[0]);
        let lambda = as_lambda(&args[1])?;
        let mut out = Vec::with_capacity(array.height());
        for row in array.rows() {
            let row_array = Value::Array2D(Array2D::from_rows_unchecked(vec![row.clone()]));
            out.push(vec![eval.invoke_lambda(lambda, &[row_array])]);
        }
        Ok(Value::Array2D(Array2D::from_rows_unchecked(out)))
    });

    def!(map, "BYCOL", 2, 2, "Applies `lambda` to each column of `array` (as a 1-column array), returning a row of results.", |args, eval: &mut Evaluator| {
        let array = as_array(&args[0]);
        let lambda = as_lambda(&args[1])?;
        let transposed = array.transpose();
        let mut out = Vec::with_capacity(transposed.height());
        for col in transposed.rows() {
            let col_array = Value::Array2D(Array2D::from_rows_unchecked(col.iter().map(|v| vec![v.clone()]).collect()));
            out.push(eval.invoke_lambda(lambda, &[col_array]));
        }
        Ok(Value::Array2D(Array2D::from_rows_unchecked(vec![out])))
    });
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
    fn map_doubles_each_element() {
        assert_eq!(
            eval_str("MAP({1,2,3},LAMBDA(x,x*2))"),
            Value::Array2D(Array2D::from_rows_unchecked(vec![vec![
                Value::Number(2.0),
                Value::Number(4.0),
                Value::Number(6.0)
            ]]))
        );
    }

    #[test]
    fn reduce_sums_array() {
        assert_eq!(eval_str("REDUCE(0,{1;2;3},LAMBDA(a,v,a+v))"), Value::Number(6.0));
    }

    #[test]
    fn scan_yields_running_totals() {
        assert_eq!(
            eval_str("SCAN(0,{1;2;3},LAMBDA(a,v,a+v))"),
            Value::Array2D(Array2D::from_rows_unchecked(vec![
                vec![Value::Number(1.0)],
                vec![Value::Number(3.0)],
                vec![Value::Number(6.0)],
            ]))
        );
    }

    #[test]
    fn makearray_builds_multiplication_table() {
        assert_eq!(
            eval_str("MAKEARRAY(2,2,LAMBDA(r,c,r*c))"),
            Value::Array2D(Array2D::from_rows_unchecked(vec![
                vec![Value::Number(1.0), Value::Number(2.0)],
                vec![Value::Number(2.0), Value::Number(4.0)],
            ]))
        );
    }
}
