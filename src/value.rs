//! The value algebra: a single tagged union over
//! `Number | String | Boolean | Null | Error | Array2D | Lambda`.

use std::fmt;

use crate::ast::AstNode;
use crate::error::{FormulaError, FormulaResult};

/// A single spreadsheet value. `Null` and `""` are distinct, a value is
/// exactly one variant, and arrays are always rectangular.
#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    Error(FormulaError),
    Array2D(Array2D),
    Lambda(LambdaValue),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Null, Self::Null) => true,
            (Self::Error(a), Self::Error(b)) => a == b,
            (Self::Array2D(a), Self::Array2D(b)) => a == b,
            // Lambdas are never considered equal, even to themselves.
            (Self::Lambda(_), Self::Lambda(_)) => false,
            _ => false,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}
impl From<FormulaError> for Value {
    fn from(e: FormulaError) -> Self {
        Value::Error(e)
    }
}
impl From<Array2D> for Value {
    fn from(a: Array2D) -> Self {
        Value::Array2D(a)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s}"),
            Value::Boolean(true) => write!(f, "TRUE"),
            Value::Boolean(false) => write!(f, "FALSE"),
            Value::Null => write!(f, ""),
            Value::Error(e) => write!(f, "{}", e.kind.tag()),
            Value::Array2D(a) => write!(f, "{a}"),
            Value::Lambda(_) => write!(f, "#VALUE!"),
        }
    }
}

/// Shortest round-trip representation of a number.
pub fn format_number(n: f64) -> String {
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let mut s = format!("{n}");
        if s.contains('e') {
            s = format!("{n:e}");
        }
        s
    }
}

impl Value {
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn as_error(&self) -> Option<&FormulaError> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }

    /// If this value is an array, returns its 1x1-flattened contents if it
    /// happens to be a single cell; otherwise passes through unchanged.
    pub fn single(self) -> Value {
        match self {
            Value::Array2D(a) if a.width() == 1 && a.height() == 1 => a.get(0, 0).unwrap().clone(),
            other => other,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::String(_) => "text",
            Value::Boolean(_) => "boolean",
            Value::Null => "blank",
            Value::Error(_) => "error",
            Value::Array2D(_) => "array",
            Value::Lambda(_) => "lambda",
        }
    }
}

/// A rectangular 2-D array of values: every row has the same length.
/// Rows are the outer index.
#[derive(Debug, Clone, PartialEq)]
pub struct Array2D {
    rows: Vec<Vec<Value>>,
}

impl Array2D {
    /// Builds an array from rows, rejecting non-rectangular input.
    pub fn new(rows: Vec<Vec<Value>>) -> FormulaResult<Self> {
        if let Some(first) = rows.first() {
            let w = first.len();
            if rows.iter().any(|r| r.len() != w) {
                return Err(FormulaError::value());
            }
        }
        Ok(Self { rows })
    }

    /// Builds an array from rows, without checking rectangularity. Callers
    /// must guarantee the invariant themselves (used internally by
    /// constructors that already enforce it, e.g. from width/height).
    pub fn from_rows_unchecked(rows: Vec<Vec<Value>>) -> Self {
        Self { rows }
    }

    pub fn single(value: Value) -> Self {
        Self { rows: vec![vec![value]] }
    }

    pub fn filled(width: usize, height: usize, value: Value) -> Self {
        Self { rows: vec![vec![value; width]; height] }
    }

    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, |r| r.len())
    }
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Value> {
        self.rows.get(row)?.get(col)
    }

    /// Flattens to a row-major stream of scalars.
    pub fn iter_flat(&self) -> impl Iterator<Item = &Value> {
        self.rows.iter().flat_map(|r| r.iter())
    }

    pub fn into_iter_flat(self) -> impl Iterator<Item = Value> {
        self.rows.into_iter().flatten()
    }

    pub fn transpose(&self) -> Array2D {
        let w = self.width();
        let h = self.height();
        let mut rows = vec![Vec::with_capacity(h); w];
        for r in 0..h {
            for c in 0..w {
                rows[c].push(self.rows[r][c].clone());
            }
        }
        Array2D { rows }
    }
}

impl fmt::Display for Array2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                write!(f, ";")?;
            }
            for (j, v) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{v}")?;
            }
        }
        write!(f, "}}")
    }
}

/// A first-class function value created by `LAMBDA(...)`. Captures the
/// *unevaluated* body tree; evaluation binds parameter names in a fresh
/// scope on each call.
#[derive(Debug, Clone)]
pub struct LambdaValue {
    pub params: Vec<String>,
    pub body: Box<AstNode>,
}

impl LambdaValue {
    pub fn new(params: Vec<String>, body: AstNode) -> Self {
        Self { params, body: Box::new(body) }
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}
