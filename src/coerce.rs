//! Coercion, comparison, and criteria matching. `Criterion` parses the
//! plain relational-prefix grammar (`>`, `<`, `>=`, `<=`, `<>`, `=`, or a
//! bare value for equality) used by `...IF`/`...IFS` functions; there is no
//! wildcard globbing.

use std::cmp::Ordering;

use crate::error::{FormulaError, FormulaResult};
use crate::value::{Array2D, Value};

/// Coerces a scalar value to a number.
pub fn to_number(value: &Value) -> FormulaResult<f64> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Null => Ok(0.0),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(0.0)
            } else {
                parse_strict_number(trimmed).ok_or_else(FormulaError::value)
            }
        }
        Value::Error(e) => Err(e.clone()),
        Value::Array2D(a) if a.width() == 1 && a.height() == 1 => {
            to_number(a.get(0, 0).expect("1x1 array has one cell"))
        }
        Value::Array2D(_) | Value::Lambda(_) => Err(FormulaError::value()),
    }
}

/// Strict floating-point parse, allowing a leading `%`/`$` currency/percent
/// marker the way `VALUE()` does, but rejecting
/// anything `f64::parse` alone wouldn't accept (no locale grouping).
fn parse_strict_number(s: &str) -> Option<f64> {
    s.parse::<f64>().ok()
}

/// Coerces a scalar value to a string.
pub fn to_string(value: &Value) -> FormulaResult<String> {
    match value {
        Value::Error(e) => Err(e.clone()),
        other => Ok(other.to_string()),
    }
}

/// Coerces a scalar value to a boolean.
pub fn to_bool(value: &Value) -> FormulaResult<bool> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Number(n) => Ok(*n != 0.0),
        Value::Null => Ok(false),
        Value::String(s) => {
            if s.eq_ignore_ascii_case("TRUE") {
                Ok(true)
            } else if s.eq_ignore_ascii_case("FALSE") {
                Ok(false)
            } else {
                Err(FormulaError::value())
            }
        }
        Value::Error(e) => Err(e.clone()),
        Value::Array2D(a) if a.width() == 1 && a.height() == 1 => {
            to_bool(a.get(0, 0).expect("1x1 array has one cell"))
        }
        Value::Array2D(_) | Value::Lambda(_) => Err(FormulaError::value()),
    }
}

/// Compares two scalar values: same-type
/// comparison when possible, otherwise a case-insensitive stringified
/// fallback; `Null` sorts strictly below every non-null value.
pub fn compare_values(a: &Value, b: &Value) -> FormulaResult<Ordering> {
    if let Value::Error(e) = a {
        return Err(e.clone());
    }
    if let Value::Error(e) = b {
        return Err(e.clone());
    }
    Ok(match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => {
            let sa = to_string(a)?.to_lowercase();
            let sb = to_string(b)?.to_lowercase();
            sa.cmp(&sb)
        }
    })
}

pub fn values_equal(a: &Value, b: &Value) -> FormulaResult<bool> {
    Ok(compare_values(a, b)? == Ordering::Equal)
}

/// Flattens a scalar-or-array argument into a stream of owned values,
/// row-major.
pub fn flatten_scalar<'a>(value: &'a Value) -> Box<dyn Iterator<Item = &'a Value> + 'a> {
    match value {
        Value::Array2D(a) => Box::new(a.iter_flat()),
        other => Box::new(std::iter::once(other)),
    }
}

pub fn flatten_values(values: &[Value]) -> Vec<&Value> {
    values.iter().flat_map(flatten_scalar).collect()
}

/// A relational comparison operator parsed from a criterion string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CompareOp {
    fn matches_ordering(self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::Ne => ord != Ordering::Equal,
            Self::Lt => ord == Ordering::Less,
            Self::Gt => ord == Ordering::Greater,
            Self::Le => ord != Ordering::Greater,
            Self::Ge => ord != Ordering::Less,
        }
    }
}

/// A criterion used by `SUMIF`/`COUNTIF`/etc. ("Criteria
/// language").
#[derive(Debug, Clone)]
pub struct Criterion {
    op: CompareOp,
    rhs: Value,
}

impl Criterion {
    /// Parses a criterion from a scalar argument value.
    pub fn parse(value: &Value) -> FormulaResult<Self> {
        match value {
            Value::Error(e) => Err(e.clone()),
            Value::String(s) => {
                let (op, rest) = strip_relational_prefix(s);
                let rhs = if rest.trim().is_empty() {
                    Value::Null
                } else if let Ok(n) = rest.trim().parse::<f64>() {
                    Value::Number(n)
                } else if rest.eq_ignore_ascii_case("TRUE") {
                    Value::Boolean(true)
                } else if rest.eq_ignore_ascii_case("FALSE") {
                    Value::Boolean(false)
                } else {
                    Value::String(rest.to_string())
                };
                Ok(Self { op, rhs })
            }
            other => Ok(Self { op: CompareOp::Eq, rhs: other.clone() }),
        }
    }

    /// Whether `value` satisfies this criterion.
    pub fn matches(&self, value: &Value) -> bool {
        match (&self.rhs, value) {
            (Value::Error(_), _) | (_, Value::Error(_)) => false,
            (Value::Null, Value::Null) => self.op.matches_ordering(Ordering::Equal),
            (Value::Null, _) => self.op == CompareOp::Ne,
            (Value::Number(r), Value::Number(v)) => {
                self.op.matches_ordering(v.partial_cmp(r).unwrap_or(Ordering::Equal))
            }
            (Value::Number(_), _) => self.op == CompareOp::Ne,
            (Value::Boolean(r), Value::Boolean(v)) => self.op.matches_ordering(v.cmp(r)),
            (Value::Boolean(_), _) => self.op == CompareOp::Ne,
            (Value::String(r), v) => {
                let Ok(vs) = to_string(v) else { return false };
                self.op.matches_ordering(vs.to_lowercase().cmp(&r.to_lowercase()))
            }
            _ => false,
        }
    }
}

fn strip_relational_prefix(s: &str) -> (CompareOp, &str) {
    for (prefix, op) in [
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        ("<>", CompareOp::Ne),
        ("!=", CompareOp::Ne),
        ("=", CompareOp::Eq),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ] {
        if let Some(rest) = s.strip_prefix(prefix) {
            return (op, rest);
        }
    }
    (CompareOp::Eq, s)
}

/// Flattens a rectangular array into a `Vec` (used by functions that need
/// owned scalars, e.g. `SORT`/`UNIQUE`).
pub fn array_to_flat_vec(array: &Array2D) -> Vec<Value> {
    array.iter_flat().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criterion_numeric_prefix() {
        let c = Criterion::parse(&Value::String(">10".into())).unwrap();
        assert!(c.matches(&Value::Number(11.0)));
        assert!(!c.matches(&Value::Number(10.0)));
    }

    #[test]
    fn criterion_plain_number_is_equality() {
        let c = Criterion::parse(&Value::Number(5.0)).unwrap();
        assert!(c.matches(&Value::Number(5.0)));
        assert!(!c.matches(&Value::Number(6.0)));
    }

    #[test]
    fn criterion_not_equal_string() {
        let c = Criterion::parse(&Value::String("<>INVALID".into())).unwrap();
        assert!(c.matches(&Value::String("ok".into())));
        assert!(!c.matches(&Value::String("invalid".into())));
    }

    #[test]
    fn null_sorts_below_everything() {
        assert_eq!(compare_values(&Value::Null, &Value::Number(-5.0)).unwrap(), Ordering::Less);
    }
}
