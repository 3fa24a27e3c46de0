//! Math & arithmetic aggregation: basic arithmetic, rounding, combinatorics,
//! and trigonometry, each as a plain closure over pre-flattened argument
//! vectors.

use std::collections::HashMap;

use crate::coerce::Criterion;
use crate::error::{FormulaError, FormulaResult};
use crate::eval::Evaluator;
use crate::registry::{FunctionSpec, UNBOUNDED};
use crate::value::Value;

use super::util::{
    arg_i64, arg_number, as_flat_vec, numbers_flat, round_away_from_zero, round_half_away_from_zero,
    round_to, round_toward_zero,
};
use super::def;

pub(super) fn register(map: &mut HashMap<String, FunctionSpec>) {
    def!(map, "SUM", 0, UNBOUNDED, "Sums all numeric arguments.", |args, _| {
        Ok(Value::Number(numbers_flat(args)?.into_iter().sum()))
    });

    def!(map, "PRODUCT", 0, UNBOUNDED, "Multiplies all numeric arguments.", |args, _| {
        Ok(Value::Number(numbers_flat(args)?.into_iter().product()))
    });

    def!(map, "SUMPRODUCT", 1, UNBOUNDED, "Sums the pairwise products of equal-shaped arrays.", |args, _| {
        let columns: Vec<Vec<Value>> = args.iter().map(as_flat_vec).collect();
        let len = columns[0].len();
        if columns.iter().any(|c| c.len() != len) {
            return Err(FormulaError::value());
        }
        let mut total = 0.0;
        for i in 0..len {
            let mut product = 1.0;
            for col in &columns {
                product *= crate::coerce::to_number(&col[i])?;
            }
            total += product;
        }
        Ok(Value::Number(total))
    });

    def!(map, "SUMIF", 2, 3, "Sums `sumRange` entries whose paired `range` entry matches a criterion.", |args, _| {
        let range = as_flat_vec(&args[0]);
        let criterion = Criterion::parse(&args[1])?;
        let sum_range = if args.len() > 2 { as_flat_vec(&args[2]) } else { range.clone() };
        let mut total = 0.0;
        for (key, value) in range.iter().zip(sum_range.iter()) {
            if criterion.matches(key) {
                total += crate::coerce::to_number(value)?;
            }
        }
        Ok(Value::Number(total))
    });

    def!(map, "SUMIFS", 3, UNBOUNDED, "Sums `sumRange` entries matching every criteria-range/criterion pair.", |args, _| {
        if (args.len() - 1) % 2 != 0 {
            return Err(FormulaError::value());
        }
        let sum_range = as_flat_vec(&args[0]);
        let pairs: Vec<(Vec<Value>, Criterion)> = args[1..]
            .chunks(2)
            .map(|pair| Ok((as_flat_vec(&pair[0]), Criterion::parse(&pair[1])?)))
            .collect::<FormulaResult<_>>()?;
        let mut total = 0.0;
        for i in 0..sum_range.len() {
            if pairs.iter().all(|(range, c)| range.get(i).map(|v| c.matches(v)).unwrap_or(false)) {
                total += crate::coerce::to_number(&sum_range[i])?;
            }
        }
        Ok(Value::Number(total))
    });

    def!(map, "POWER", 2, 2, "Raises a number to a power.", |args, _| {
        Ok(Value::Number(arg_number(args, 0)?.powf(arg_number(args, 1)?)))
    });

    def!(map, "SQRT", 1, 1, "Square root; negative input is `#NUM!`.", |args, _| {
        let n = arg_number(args, 0)?;
        if n < 0.0 {
            return Err(FormulaError::num());
        }
        Ok(Value::Number(n.sqrt()))
    });

    def!(map, "ABS", 1, 1, "Absolute value.", |args, _| Ok(Value::Number(arg_number(args, 0)?.abs())));

    def!(map, "SIGN", 1, 1, "-1, 0, or 1 depending on the sign of the argument.", |args, _| {
        let n = arg_number(args, 0)?;
        Ok(Value::Number(if n > 0.0 { 1.0 } else if n < 0.0 { -1.0 } else { 0.0 }))
    });

    def!(map, "TRUNC", 1, 2, "Truncates toward zero, optionally to a digit count.", |args, _| {
        let digits = if args.len() > 1 { arg_i64(args, 1)? } else { 0 };
        Ok(Value::Number(round_to(arg_number(args, 0)?, digits, round_toward_zero)))
    });

    def!(map, "INT", 1, 1, "Rounds down to the nearest integer (floor).", |args, _| {
        Ok(Value::Number(arg_number(args, 0)?.floor()))
    });

    def!(map, "MOD", 2, 2, "Remainder, sign matching the divisor.", |args, _| {
        let (n, d) = (arg_number(args, 0)?, arg_number(args, 1)?);
        if d == 0.0 {
            return Err(FormulaError::div_zero());
        }
        Ok(Value::Number(n - d * (n / d).floor()))
    });

    def!(map, "QUOTIENT", 2, 2, "Integer portion of a division.", |args, _| {
        let (n, d) = (arg_number(args, 0)?, arg_number(args, 1)?);
        if d == 0.0 {
            return Err(FormulaError::div_zero());
        }
        Ok(Value::Number((n / d).trunc()))
    });

    def!(map, "ROUND", 1, 2, "Rounds half-away-from-zero to a digit count.", |args, _| {
        let digits = if args.len() > 1 { arg_i64(args, 1)? } else { 0 };
        Ok(Value::Number(round_to(arg_number(args, 0)?, digits, round_half_away_from_zero)))
    });

    def!(map, "ROUNDUP", 1, 2, "Rounds away from zero to a digit count.", |args, _| {
        let digits = if args.len() > 1 { arg_i64(args, 1)? } else { 0 };
        Ok(Value::Number(round_to(arg_number(args, 0)?, digits, round_away_from_zero)))
    });

    def!(map, "ROUNDDOWN", 1, 2, "Rounds toward zero to a digit count.", |args, _| {
        let digits = if args.len() > 1 { arg_i64(args, 1)? } else { 0 };
        Ok(Value::Number(round_to(arg_number(args, 0)?, digits, round_toward_zero)))
    });

    def!(map, "CEILING", 2, 2, "Rounds up to the nearest multiple.", |args, _| {
        round_to_multiple(arg_number(args, 0)?, arg_number(args, 1)?, f64::ceil)
    });

    def!(map, "FLOOR", 2, 2, "Rounds down to the nearest multiple.", |args, _| {
        round_to_multiple(arg_number(args, 0)?, arg_number(args, 1)?, f64::floor)
    });

    def!(map, "MROUND", 2, 2, "Rounds to the nearest multiple.", |args, _| {
        round_to_multiple(arg_number(args, 0)?, arg_number(args, 1)?, f64::round)
    });

    def!(map, "EVEN", 1, 1, "Rounds away from zero to the nearest even integer.", |args, _| {
        Ok(Value::Number(round_to_parity(arg_number(args, 0)?, 0.0)))
    });

    def!(map, "ODD", 1, 1, "Rounds away from zero to the nearest odd integer.", |args, _| {
        Ok(Value::Number(round_to_parity(arg_number(args, 0)?, 1.0)))
    });

    def!(map, "FACT", 1, 1, "Factorial.", |args, _| {
        let n = arg_number(args, 0)?;
        if n < 0.0 {
            return Err(FormulaError::num());
        }
        Ok(Value::Number((1..=n.floor() as u64).fold(1.0, |acc, i| acc * i as f64)))
    });

    def!(map, "COMBIN", 2, 2, "Number of combinations of n items taken k at a time.", |args, _| {
        let (n, k) = (arg_i64(args, 0)?, arg_i64(args, 1)?);
        Ok(Value::Number(combin(n, k)?))
    });

    def!(map, "PERMUT", 2, 2, "Number of permutations of n items taken k at a time.", |args, _| {
        let (n, k) = (arg_i64(args, 0)?, arg_i64(args, 1)?);
        if k < 0 || n < 0 || k > n {
            return Err(FormulaError::num());
        }
        Ok(Value::Number(((n - k + 1)..=n).fold(1.0, |acc, i| acc * i as f64)))
    });

    def!(map, "GCD", 1, UNBOUNDED, "Greatest common divisor.", |args, _| {
        let ns: FormulaResult<Vec<i64>> = numbers_flat(args)?.into_iter().map(|n| Ok(n as i64)).collect();
        Ok(Value::Number(ns?.into_iter().fold(0i64, gcd) as f64))
    });

    def!(map, "LCM", 1, UNBOUNDED, "Least common multiple.", |args, _| {
        let ns: FormulaResult<Vec<i64>> = numbers_flat(args)?.into_iter().map(|n| Ok(n as i64)).collect();
        let ns = ns?;
        Ok(Value::Number(ns.into_iter().fold(1i64, |acc, n| {
            if acc == 0 || n == 0 { 0 } else { acc / gcd(acc, n) * n }
        }) as f64))
    });

    def!(map, "EXP", 1, 1, "e raised to a power.", |args, _| Ok(Value::Number(arg_number(args, 0)?.exp())));

    def!(map, "LN", 1, 1, "Natural log; non-positive input is `#NUM!`.", |args, _| {
        let n = arg_number(args, 0)?;
        if n <= 0.0 {
            return Err(FormulaError::num());
        }
        Ok(Value::Number(n.ln()))
    });

    def!(map, "LOG", 1, 2, "Logarithm with an optional base (default 10).", |args, _| {
        let n = arg_number(args, 0)?;
        let base = if args.len() > 1 { arg_number(args, 1)? } else { 10.0 };
        if n <= 0.0 {
            return Err(FormulaError::num());
        }
        Ok(Value::Number(n.log(base)))
    });

    def!(map, "LOG10", 1, 1, "Base-10 logarithm.", |args, _| {
        let n = arg_number(args, 0)?;
        if n <= 0.0 {
            return Err(FormulaError::num());
        }
        Ok(Value::Number(n.log10()))
    });

    def!(map, "PI", 0, 0, "3.14159...", |_, _| Ok(Value::Number(std::f64::consts::PI)));

    def!(map, "RAND", 0, 0, "A random number in [0, 1).", |_, eval: &mut Evaluator| {
        Ok(Value::Number(eval.data().random()))
    });

    def!(map, "RANDBETWEEN", 2, 2, "A random integer in [low, high].", |args, eval: &mut Evaluator| {
        let (lo, hi) = (arg_number(args, 0)?.ceil() as i64, arg_number(args, 1)?.floor() as i64);
        if hi < lo {
            return Err(FormulaError::num());
        }
        let span = (hi - lo + 1) as f64;
        Ok(Value::Number(lo as f64 + (eval.data().random() * span).floor()))
    });

    def!(map, "DEGREES", 1, 1, "Radians to degrees.", |args, _| Ok(Value::Number(arg_number(args, 0)?.to_degrees())));
    def!(map, "RADIANS", 1, 1, "Degrees to radians.", |args, _| Ok(Value::Number(arg_number(args, 0)?.to_radians())));

    def!(map, "SIN", 1, 1, "", |args, _| Ok(Value::Number(arg_number(args, 0)?.sin())));
    def!(map, "COS", 1, 1, "", |args, _| Ok(Value::Number(arg_number(args, 0)?.cos())));
    def!(map, "TAN", 1, 1, "", |args, _| Ok(Value::Number(arg_number(args, 0)?.tan())));
    def!(map, "ASIN", 1, 1, "", |args, _| Ok(Value::Number(arg_number(args, 0)?.asin())));
    def!(map, "ACOS", 1, 1, "", |args, _| Ok(Value::Number(arg_number(args, 0)?.acos())));
    def!(map, "ATAN", 1, 1, "", |args, _| Ok(Value::Number(arg_number(args, 0)?.atan())));
    def!(map, "ATAN2", 2, 2, "", |args, _| Ok(Value::Number(arg_number(args, 1)?.atan2(arg_number(args, 0)?))));
    def!(map, "SINH", 1, 1, "", |args, _| Ok(Value::Number(arg_number(args, 0)?.sinh())));
    def!(map, "COSH", 1, 1, "", |args, _| Ok(Value::Number(arg_number(args, 0)?.cosh())));
    def!(map, "TANH", 1, 1, "", |args, _| Ok(Value::Number(arg_number(args, 0)?.tanh())));

    def!(map, "MAX", 0, UNBOUNDED, "Largest numeric argument (0 if none).", |args, _| {
        Ok(Value::Number(numbers_flat(args)?.into_iter().fold(0.0, f64::max)))
    });
    def!(map, "MIN", 0, UNBOUNDED, "Smallest numeric argument (0 if none).", |args, _| {
        let nums = numbers_flat(args)?;
        Ok(Value::Number(if nums.is_empty() { 0.0 } else { nums.into_iter().fold(f64::INFINITY, f64::min) }))
    });
}

fn round_to_multiple(n: f64, multiple: f64, round_fn: impl Fn(f64) -> f64) -> FormulaResult<Value> {
    if multiple == 0.0 {
        return Ok(Value::Number(0.0));
    }
    Ok(Value::Number(round_fn(n / multiple) * multiple))
}

fn round_to_parity(n: f64, parity: f64) -> f64 {
    let rounded = round_away_from_zero(n);
    let rem = rounded.abs() % 2.0;
    if (rem - parity).abs() < f64::EPSILON {
        rounded
    } else {
        rounded + 1.0_f64.copysign(n)
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn combin(n: i64, k: i64) -> FormulaResult<f64> {
    if k < 0 || n < 0 || k > n {
        return Err(FormulaError::num());
    }
    let k = k.min(n - k);
    let mut result = 1.0;
    for i in 0..k {
        result = result * (n - i) as f64 / (i + 1) as f64;
    }
    Ok(result.round())
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
    fn sum_and_product_flatten_arrays() {
        assert_eq!(eval_str("SUM({1,2,3},4)"), Value::Number(10.0));
        assert_eq!(eval_str("PRODUCT({1,2,3},4)"), Value::Number(24.0));
    }

    #[test]
    fn sumproduct_pairs_elements_across_equal_shaped_arrays() {
        assert_eq!(eval_str("SUMPRODUCT({1,2,3},{4,5,6})"), Value::Number(32.0));
    }

    #[test]
    fn sumif_sums_only_matching_entries() {
        assert_eq!(eval_str("SUMIF({1,2,3,4},\">2\")"), Value::Number(7.0));
        assert_eq!(eval_str("SUMIF({1,2,3},\">1\",{10,20,30})"), Value::Number(50.0));
    }

    #[test]
    fn sqrt_of_negative_is_num_error() {
        assert_eq!(eval_str("SQRT(-1)"), Value::Error(FormulaError::num()));
    }

    #[test]
    fn round_family_rounds_as_documented() {
        assert_eq!(eval_str("ROUND(2.5,0)"), Value::Number(3.0));
        assert_eq!(eval_str("ROUNDUP(2.1,0)"), Value::Number(3.0));
        assert_eq!(eval_str("ROUNDDOWN(2.9,0)"), Value::Number(2.0));
    }

    #[test]
    fn mod_result_takes_the_divisor_sign() {
        assert_eq!(eval_str("MOD(-7,3)"), Value::Number(2.0));
        assert_eq!(eval_str("MOD(1,0)"), Value::Error(FormulaError::div_zero()));
    }

    #[test]
    fn gcd_and_lcm() {
        assert_eq!(eval_str("GCD(12,18)"), Value::Number(6.0));
        assert_eq!(eval_str("LCM(4,6)"), Value::Number(12.0));
    }

    #[test]
    fn combin_and_permut() {
        assert_eq!(eval_str("COMBIN(5,2)"), Value::Number(10.0));
        assert_eq!(eval_str("PERMUT(5,2)"), Value::Number(20.0));
    }

    #[test]
    fn even_and_odd_round_away_from_zero() {
        assert_eq!(eval_str("EVEN(3)"), Value::Number(4.0));
        assert_eq!(eval_str("ODD(4)"), Value::Number(5.0));
    }
}
