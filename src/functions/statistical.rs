//! Statistical aggregation and distribution functions. `MAX`/`MIN` are
//! registered in `math.rs` instead, alongside the rest of the arithmetic
//! aggregations (see `DESIGN.md`).

use std::collections::HashMap;

use statrs::distribution::{Continuous, ContinuousCDF, Normal, StudentsT};

use crate::coerce::{to_bool, Criterion};
use crate::error::{FormulaError, FormulaResult};
use crate::registry::{FunctionSpec, UNBOUNDED};
use crate::value::Value;

use super::def;
use super::util::{arg_number, as_flat_vec, numbers_flat, numbers_flat_numeric_only};

pub(super) fn register(map: &mut HashMap<String, FunctionSpec>) {
    def!(map, "AVERAGE", 1, UNBOUNDED, "Arithmetic mean of numeric arguments.", |args, _| {
        let nums = numbers_flat(args)?;
        if nums.is_empty() {
            return Err(FormulaError::div_zero());
        }
        Ok(Value::Number(nums.iter().sum::<f64>() / nums.len() as f64))
    });

    def!(map, "AVERAGEA", 1, UNBOUNDED, "Arithmetic mean, counting text/blank as 0 and booleans as 0/1.", |args, _| {
        let vals = crate::coerce::flatten_values(args);
        if vals.is_empty() {
            return Err(FormulaError::div_zero());
        }
        let total: f64 = vals
            .iter()
            .map(|v| match v {
                Value::Number(n) => *n,
                Value::Boolean(b) => if *b { 1.0 } else { 0.0 },
                _ => 0.0,
            })
            .sum();
        Ok(Value::Number(total / vals.len() as f64))
    });

    def!(map, "AVERAGEIF", 2, 3, "Averages `avgRange` entries whose paired `range` entry matches a criterion.", |args, _| {
        let range = as_flat_vec(&args[0]);
        let criterion = Criterion::parse(&args[1])?;
        let avg_range = if args.len() > 2 { as_flat_vec(&args[2]) } else { range.clone() };
        let mut total = 0.0;
        let mut count = 0usize;
        for (key, value) in range.iter().zip(avg_range.iter()) {
            if criterion.matches(key) {
                total += crate::coerce::to_number(value)?;
                count += 1;
            }
        }
        if count == 0 {
            return Err(FormulaError::div_zero());
        }
        Ok(Value::Number(total / count as f64))
    });

    def!(map, "AVERAGEIFS", 3, UNBOUNDED, "Averages `avgRange` entries matching every criteria-range/criterion pair.", |args, _| {
        if (args.len() - 1) % 2 != 0 {
            return Err(FormulaError::value());
        }
        let avg_range = as_flat_vec(&args[0]);
        let pairs: Vec<(Vec<Value>, Criterion)> = args[1..]
            .chunks(2)
            .map(|pair| Ok((as_flat_vec(&pair[0]), Criterion::parse(&pair[1])?)))
            .collect::<FormulaResult<_>>()?;
        let mut total = 0.0;
        let mut count = 0usize;
        for i in 0..avg_range.len() {
            if pairs.iter().all(|(range, c)| range.get(i).map(|v| c.matches(v)).unwrap_or(false)) {
                total += crate::coerce::to_number(&avg_range[i])?;
                count += 1;
            }
        }
        if count == 0 {
            return Err(FormulaError::div_zero());
        }
        Ok(Value::Number(total / count as f64))
    });

    def!(map, "COUNT", 0, UNBOUNDED, "Count of numeric entries, flattened.", |args, _| {
        Ok(Value::Number(numbers_flat_numeric_only(args).len() as f64))
    });

    def!(map, "COUNTA", 0, UNBOUNDED, "Count of non-blank entries, flattened.", |args, _| {
        Ok(Value::Number(crate::coerce::flatten_values(args).iter().filter(|v| !matches!(v, Value::Null)).count() as f64))
    });

    def!(map, "COUNTBLANK", 1, UNBOUNDED, "Count of blank entries, flattened.", |args, _| {
        Ok(Value::Number(crate::coerce::flatten_values(args).iter().filter(|v| matches!(v, Value::Null)).count() as f64))
    });

    def!(map, "COUNTIF", 2, 2, "Count of `range` entries matching a criterion.", |args, _| {
        let range = as_flat_vec(&args[0]);
        let criterion = Criterion::parse(&args[1])?;
        Ok(Value::Number(range.iter().filter(|v| criterion.matches(v)).count() as f64))
    });

    def!(map, "COUNTIFS", 2, UNBOUNDED, "Count of rows matching every criteria-range/criterion pair.", |args, _| {
        if args.len() % 2 != 0 {
            return Err(FormulaError::value());
        }
        let pairs: Vec<(Vec<Value>, Criterion)> = args
            .chunks(2)
            .map(|pair| Ok((as_flat_vec(&pair[0]), Criterion::parse(&pair[1])?)))
            .collect::<FormulaResult<_>>()?;
        let len = pairs[0].0.len();
        let mut count = 0usize;
        for i in 0..len {
            if pairs.iter().all(|(range, c)| range.get(i).map(|v| c.matches(v)).unwrap_or(false)) {
                count += 1;
            }
        }
        Ok(Value::Number(count as f64))
    });

    def!(map, "MAXIFS", 3, UNBOUNDED, "Max of `maxRange` entries matching every criteria-range/criterion pair.", |args, _| {
        minmax_ifs(args, f64::NEG_INFINITY, f64::max)
    });

    def!(map, "MINIFS", 3, UNBOUNDED, "Min of `minRange` entries matching every criteria-range/criterion pair.", |args, _| {
        minmax_ifs(args, f64::INFINITY, f64::min)
    });

    def!(map, "LARGE", 2, 2, "The kth largest value (1-based).", |args, _| {
        let mut nums = numbers_flat(&args[..1])?;
        let k = super::util::arg_i64(args, 1)? as usize;
        if k < 1 || k > nums.len() {
            return Err(FormulaError::num());
        }
        nums.sort_by(|a, b| b.partial_cmp(a).unwrap());
        Ok(Value::Number(nums[k - 1]))
    });

    def!(map, "SMALL", 2, 2, "The kth smallest value (1-based).", |args, _| {
        let mut nums = numbers_flat(&args[..1])?;
        let k = super::util::arg_i64(args, 1)? as usize;
        if k < 1 || k > nums.len() {
            return Err(FormulaError::num());
        }
        nums.sort_by(|a, b| a.partial_cmp(b).unwrap());
        Ok(Value::Number(nums[k - 1]))
    });

    def!(map, "MEDIAN", 1, UNBOUNDED, "The median of all numeric arguments.", |args, _| {
        let mut nums = numbers_flat(args)?;
        if nums.is_empty() {
            return Err(FormulaError::num());
        }
        nums.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mid = nums.len() / 2;
        Ok(Value::Number(if nums.len() % 2 == 0 { (nums[mid - 1] + nums[mid]) / 2.0 } else { nums[mid] }))
    });

    def!(map, "MODE", 1, UNBOUNDED, "The most frequently occurring numeric value.", |args, _| {
        let nums = numbers_flat(args)?;
        mode_of(&nums)
    });

    def!(map, "STDEV", 1, UNBOUNDED, "Sample standard deviation.", |args, _| {
        Ok(Value::Number(sample_variance(&numbers_flat(args)?)?.sqrt()))
    });

    def!(map, "STDEVP", 1, UNBOUNDED, "Population standard deviation.", |args, _| {
        Ok(Value::Number(population_variance(&numbers_flat(args)?)?.sqrt()))
    });

    def!(map, "VAR", 1, UNBOUNDED, "Sample variance.", |args, _| {
        Ok(Value::Number(sample_variance(&numbers_flat(args)?)?))
    });

    def!(map, "VARP", 1, UNBOUNDED, "Population variance.", |args, _| {
        Ok(Value::Number(population_variance(&numbers_flat(args)?)?))
    });

    def!(map, "RANK", 2, 3, "The rank of a value within a range, descending by default.", |args, _| {
        let target = arg_number(args, 0)?;
        let nums = numbers_flat(&args[1..2])?;
        let ascending = args.len() > 2 && to_bool(&args[2])?;
        let rank = if ascending {
            1 + nums.iter().filter(|&&n| n < target).count()
        } else {
            1 + nums.iter().filter(|&&n| n > target).count()
        };
        if !nums.contains(&target) {
            return Err(FormulaError::not_available());
        }
        Ok(Value::Number(rank as f64))
    });

    def!(map, "PERCENTILE", 2, 2, "The kth percentile (0-1) via linear interpolation.", |args, _| {
        let mut nums = numbers_flat(&args[..1])?;
        let k = arg_number(args, 1)?;
        if !(0.0..=1.0).contains(&k) || nums.is_empty() {
            return Err(FormulaError::num());
        }
        nums.sort_by(|a, b| a.partial_cmp(b).unwrap());
        Ok(Value::Number(percentile_interp(&nums, k)))
    });

    def!(map, "QUARTILE", 2, 2, "A quartile (0-4) of a range.", |args, _| {
        let mut nums = numbers_flat(&args[..1])?;
        let q = super::util::arg_i64(args, 1)?;
        if !(0..=4).contains(&q) || nums.is_empty() {
            return Err(FormulaError::num());
        }
        nums.sort_by(|a, b| a.partial_cmp(b).unwrap());
        Ok(Value::Number(percentile_interp(&nums, q as f64 / 4.0)))
    });

    def!(map, "TRIMMEAN", 2, 2, "The mean after discarding the top and bottom `percent`/2 fraction of values.", |args, _| {
        let mut nums = numbers_flat(&args[..1])?;
        let percent = arg_number(args, 1)?;
        if !(0.0..1.0).contains(&percent) || nums.is_empty() {
            return Err(FormulaError::num());
        }
        nums.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let cut = ((nums.len() as f64 * percent) / 2.0).floor() as usize;
        let trimmed = &nums[cut..nums.len() - cut];
        if trimmed.is_empty() {
            return Err(FormulaError::num());
        }
        Ok(Value::Number(trimmed.iter().sum::<f64>() / trimmed.len() as f64))
    });

    def!(map, "GEOMEAN", 1, UNBOUNDED, "Geometric mean; any non-positive entry is `#NUM!`.", |args, _| {
        let nums = numbers_flat(args)?;
        if nums.is_empty() || nums.iter().any(|&n| n <= 0.0) {
            return Err(FormulaError::num());
        }
        let product: f64 = nums.iter().product();
        Ok(Value::Number(product.powf(1.0 / nums.len() as f64)))
    });

    def!(map, "HARMEAN", 1, UNBOUNDED, "Harmonic mean; any non-positive entry is `#NUM!`.", |args, _| {
        let nums = numbers_flat(args)?;
        if nums.is_empty() || nums.iter().any(|&n| n <= 0.0) {
            return Err(FormulaError::num());
        }
        let recip_sum: f64 = nums.iter().map(|n| 1.0 / n).sum();
        Ok(Value::Number(nums.len() as f64 / recip_sum))
    });

    def!(map, "AVEDEV", 1, UNBOUNDED, "Mean absolute deviation from the mean.", |args, _| {
        let nums = numbers_flat(args)?;
        if nums.is_empty() {
            return Err(FormulaError::num());
        }
        let mean = nums.iter().sum::<f64>() / nums.len() as f64;
        Ok(Value::Number(nums.iter().map(|n| (n - mean).abs()).sum::<f64>() / nums.len() as f64))
    });

    def!(map, "DEVSQ", 1, UNBOUNDED, "Sum of squared deviations from the mean.", |args, _| {
        let nums = numbers_flat(args)?;
        if nums.is_empty() {
            return Err(FormulaError::num());
        }
        let mean = nums.iter().sum::<f64>() / nums.len() as f64;
        Ok(Value::Number(nums.iter().map(|n| (n - mean).powi(2)).sum()))
    });

    def!(map, "CORREL", 2, 2, "The Pearson correlation coefficient of two equal-length ranges.", |args, _| {
        let xs = numbers_flat(&args[..1])?;
        let ys = numbers_flat(&args[1..])?;
        Ok(Value::Number(correl(&xs, &ys)?))
    });

    def!(map, "COVAR", 2, 2, "Population covariance of two equal-length ranges.", |args, _| {
        let xs = numbers_flat(&args[..1])?;
        let ys = numbers_flat(&args[1..])?;
        Ok(Value::Number(covariance(&xs, &ys)?))
    });

    def!(map, "SLOPE", 2, 2, "The slope of the least-squares line through (x, y) pairs.", |args, _| {
        let ys = numbers_flat(&args[..1])?;
        let xs = numbers_flat(&args[1..])?;
        let (slope, _) = linear_fit(&xs, &ys)?;
        Ok(Value::Number(slope))
    });

    def!(map, "INTERCEPT", 2, 2, "The y-intercept of the least-squares line through (x, y) pairs.", |args, _| {
        let ys = numbers_flat(&args[..1])?;
        let xs = numbers_flat(&args[1..])?;
        let (_, intercept) = linear_fit(&xs, &ys)?;
        Ok(Value::Number(intercept))
    });

    def!(map, "RSQ", 2, 2, "The square of the Pearson correlation coefficient.", |args, _| {
        let xs = numbers_flat(&args[..1])?;
        let ys = numbers_flat(&args[1..])?;
        let r = correl(&xs, &ys)?;
        Ok(Value::Number(r * r))
    });

    def!(map, "TREND", 2, 2, "Fitted y-values for `newX` (or the original xs) via least-squares regression.", |args, _| {
        let ys = numbers_flat(&args[..1])?;
        let xs = numbers_flat(&args[1..])?;
        let (slope, intercept) = linear_fit(&xs, &ys)?;
        Ok(Value::Array2D(crate::value::Array2D::from_rows_unchecked(vec![
            xs.iter().map(|x| Value::Number(slope * x + intercept)).collect(),
        ])))
    });

    def!(map, "GROWTH", 2, 2, "Fitted y-values via exponential regression (`y = b * m^x`).", |args, _| {
        let ys = numbers_flat(&args[..1])?;
        let xs = numbers_flat(&args[1..])?;
        if ys.iter().any(|&y| y <= 0.0) {
            return Err(FormulaError::num());
        }
        let log_ys: Vec<f64> = ys.iter().map(|y| y.ln()).collect();
        let (slope, intercept) = linear_fit(&xs, &log_ys)?;
        Ok(Value::Array2D(crate::value::Array2D::from_rows_unchecked(vec![
            xs.iter().map(|x| Value::Number((slope * x + intercept).exp())).collect(),
        ])))
    });

    def!(map, "FREQUENCY", 2, 2, "Counts how many data values fall in each bin (bins given as upper bounds).", |args, _| {
        let data = numbers_flat(&args[..1])?;
        let mut bins = numbers_flat(&args[1..])?;
        bins.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mut counts = vec![0f64; bins.len() + 1];
        for v in &data {
            let slot = bins.iter().position(|b| v <= b).unwrap_or(bins.len());
            counts[slot] += 1.0;
        }
        Ok(Value::Array2D(crate::value::Array2D::from_rows_unchecked(vec![counts.into_iter().map(Value::Number).collect()])))
    });

    def!(map, "NORM.DIST", 3, 4, "The normal distribution's density or cumulative probability.", |args, _| {
        let x = arg_number(args, 0)?;
        let mean = arg_number(args, 1)?;
        let std_dev = arg_number(args, 2)?;
        let cumulative = args.len() < 4 || to_bool(&args[3])?;
        if std_dev <= 0.0 {
            return Err(FormulaError::num());
        }
        let dist = Normal::new(mean, std_dev).map_err(|_| FormulaError::num())?;
        Ok(Value::Number(if cumulative {
            dist.cdf(x)
        } else {
            normal_pdf(x, mean, std_dev)
        }))
    });

    def!(map, "NORM.INV", 3, 3, "The inverse normal cumulative distribution.", |args, _| {
        let p = arg_number(args, 0)?;
        let mean = arg_number(args, 1)?;
        let std_dev = arg_number(args, 2)?;
        if !(0.0..=1.0).contains(&p) || std_dev <= 0.0 {
            return Err(FormulaError::num());
        }
        let dist = Normal::new(mean, std_dev).map_err(|_| FormulaError::num())?;
        Ok(Value::Number(dist.inverse_cdf(p)))
    });

    def!(map, "T.DIST", 3, 3, "The Student's t cumulative distribution.", |args, _| {
        let x = arg_number(args, 0)?;
        let deg_freedom = arg_number(args, 1)?;
        let cumulative = to_bool(&args[2])?;
        if deg_freedom <= 0.0 {
            return Err(FormulaError::num());
        }
        let dist = StudentsT::new(0.0, 1.0, deg_freedom).map_err(|_| FormulaError::num())?;
        Ok(Value::Number(if cumulative { dist.cdf(x) } else { dist.pdf(x) }))
    });
}

fn minmax_ifs(args: &[Value], init: f64, fold: impl Fn(f64, f64) -> f64) -> FormulaResult<Value> {
    if (args.len() - 1) % 2 != 0 {
        return Err(FormulaError::value());
    }
    let value_range = as_flat_vec(&args[0]);
    let pairs: Vec<(Vec<Value>, Criterion)> = args[1..]
        .chunks(2)
        .map(|pair| Ok((as_flat_vec(&pair[0]), Criterion::parse(&pair[1])?)))
        .collect::<FormulaResult<_>>()?;
    let mut result = init;
    let mut any = false;
    for i in 0..value_range.len() {
        if pairs.iter().all(|(range, c)| range.get(i).map(|v| c.matches(v)).unwrap_or(false)) {
            result = fold(result, crate::coerce::to_number(&value_range[i])?);
            any = true;
        }
    }
    Ok(Value::Number(if any { result } else { 0.0 }))
}

fn mode_of(nums: &[f64]) -> FormulaResult<Value> {
    use std::collections::HashMap as Counts;
    let mut counts: Counts<u64, usize> = Counts::new();
    for &n in nums {
        *counts.entry(n.to_bits()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|&(_, c)| c > 1)
        .max_by_key(|&(_, c)| c)
        .map(|(bits, _)| Value::Number(f64::from_bits(bits)))
        .ok_or_else(FormulaError::not_available)
}

fn sample_variance(nums: &[f64]) -> FormulaResult<f64> {
    if nums.len() < 2 {
        return Err(FormulaError::div_zero());
    }
    let mean = nums.iter().sum::<f64>() / nums.len() as f64;
    Ok(nums.iter().map(|n| (n - mean).powi(2)).sum::<f64>() / (nums.len() - 1) as f64)
}

fn population_variance(nums: &[f64]) -> FormulaResult<f64> {
    if nums.is_empty() {
        return Err(FormulaError::div_zero());
    }
    let mean = nums.iter().sum::<f64>() / nums.len() as f64;
    Ok(nums.iter().map(|n| (n - mean).powi(2)).sum::<f64>() / nums.len() as f64)
}

fn percentile_interp(sorted: &[f64], k: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = k * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
    }
}

fn covariance(xs: &[f64], ys: &[f64]) -> FormulaResult<f64> {
    if xs.len() != ys.len() || xs.is_empty() {
        return Err(FormulaError::value());
    }
    let mx = xs.iter().sum::<f64>() / xs.len() as f64;
    let my = ys.iter().sum::<f64>() / ys.len() as f64;
    Ok(xs.iter().zip(ys).map(|(x, y)| (x - mx) * (y - my)).sum::<f64>() / xs.len() as f64)
}

fn correl(xs: &[f64], ys: &[f64]) -> FormulaResult<f64> {
    if xs.len() != ys.len() || xs.is_empty() {
        return Err(FormulaError::value());
    }
    let mx = xs.iter().sum::<f64>() / xs.len() as f64;
    let my = ys.iter().sum::<f64>() / ys.len() as f64;
    let cov: f64 = xs.iter().zip(ys).map(|(x, y)| (x - mx) * (y - my)).sum();
    let sx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum::<f64>().sqrt();
    let sy: f64 = ys.iter().map(|y| (y - my).powi(2)).sum::<f64>().sqrt();
    if sx == 0.0 || sy == 0.0 {
        return Err(FormulaError::div_zero());
    }
    Ok(cov / (sx * sy))
}

fn linear_fit(xs: &[f64], ys: &[f64]) -> FormulaResult<(f64, f64)> {
    if xs.len() != ys.len() || xs.is_empty() {
        return Err(FormulaError::value());
    }
    let mx = xs.iter().sum::<f64>() / xs.len() as f64;
    let my = ys.iter().sum::<f64>() / ys.len() as f64;
    let num: f64 = xs.iter().zip(ys).map(|(x, y)| (x - mx) * (y - my)).sum();
    let den: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    if den == 0.0 {
        return Err(FormulaError::div_zero());
    }
    let slope = num / den;
    Ok((slope, my - slope * mx))
}

fn normal_pdf(x: f64, mean: f64, std_dev: f64) -> f64 {
    let z = (x - mean) / std_dev;
    (-0.5 * z * z).exp() / (std_dev * (2.0 * std::f64::consts::PI).sqrt())
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

    fn eval_num(src: &str) -> f64 {
        match eval_str(src) {
            Value::Number(n) => n,
            other => panic!("expected a number, got {other:?}"),
        }
    }

    #[test]
    fn average_and_median_of_flattened_arguments() {
        assert_eq!(eval_str("AVERAGE(1,2,3)"), Value::Number(2.0));
        assert_eq!(eval_str("MEDIAN(1,2,3,4)"), Value::Number(2.5));
    }

    #[test]
    fn large_and_small_are_one_based_from_either_end() {
        assert_eq!(eval_str("LARGE({1,2,3,4},2)"), Value::Number(3.0));
        assert_eq!(eval_str("SMALL({1,2,3,4},2)"), Value::Number(2.0));
    }

    #[test]
    fn countif_counts_matches_by_criterion() {
        assert_eq!(eval_str(r#"COUNTIF({1,2,3,4},">2")"#), Value::Number(2.0));
    }

    #[test]
    fn stdev_and_varp_use_sample_vs_population_denominator() {
        assert_eq!(eval_str("STDEV(2,4,6)"), Value::Number(2.0));
        let population_var = eval_num("VARP(2,4,6)");
        assert!((population_var - 8.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn rank_counts_how_many_values_beat_the_target() {
        assert_eq!(eval_str("RANK(3,{1,2,3,4})"), Value::Number(2.0));
        assert_eq!(eval_str("RANK(3,{1,2,3,4},TRUE)"), Value::Number(3.0));
    }

    #[test]
    fn percentile_interpolates_between_sorted_neighbors() {
        assert_eq!(eval_str("PERCENTILE({1,2,3,4},0.5)"), Value::Number(2.5));
    }

    #[test]
    fn correl_of_a_perfectly_linear_pair_is_one() {
        let r = eval_num("CORREL({1,2,3},{2,4,6})");
        assert!((r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn slope_and_intercept_recover_a_known_line() {
        assert_eq!(eval_str("SLOPE({2,4,6},{1,2,3})"), Value::Number(2.0));
        assert_eq!(eval_str("INTERCEPT({2,4,6},{1,2,3})"), Value::Number(0.0));
    }

    #[test]
    fn norm_dist_at_the_mean_is_one_half_cumulative() {
        assert_eq!(eval_str("NORM.DIST(0,0,1,TRUE)"), Value::Number(0.5));
    }
}
