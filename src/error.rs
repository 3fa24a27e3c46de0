//! Error values and the closed error-kind vocabulary.
//!
//! Errors in this engine are *values*, not exceptions: every operator,
//! coercion, and function body that can fail returns `Result<_, FormulaError>`
//! and the evaluator turns a `FormulaError` right back into a
//! [`Value::Error`](crate::value::Value::Error) instead of unwinding. Parser
//! and lexer faults are the one exception: malformed input cannot
//! be meaningfully reduced to a value, so `parse` returns `Result` up to the
//! caller instead of embedding the error in the tree.

use std::borrow::Cow;
use std::fmt;

use crate::span::Span;

/// The closed set of error tags a [`Value`](crate::value::Value) can carry.
/// Downstream callers match on `kind.tag()` for display/codec
/// purposes; the set is intentionally not extensible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Value,
    Ref,
    Name,
    DivZero,
    Null,
    NotAvailable,
    Num,
    /// Catch-all for parser/lexer faults and native-exception capture at the
    /// function-dispatch boundary. Carries a
    /// human-readable cause for diagnostics; the cause is not part of the
    /// wire-visible tag.
    Generic(Cow<'static, str>),
}

impl ErrorKind {
    /// The wire-visible tag, exactly one of the eight closed-vocabulary strings.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Value => "#VALUE!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::DivZero => "#DIV/0!",
            Self::Null => "#NULL!",
            Self::NotAvailable => "#N/A",
            Self::Num => "#NUM!",
            Self::Generic(_) => "#ERROR!",
        }
    }

    /// Maps a tag back to its `ErrorKind`, for `ERROR.TYPE` and error-literal
    /// lexing.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "#NULL!" => Self::Null,
            "#DIV/0!" => Self::DivZero,
            "#VALUE!" => Self::Value,
            "#REF!" => Self::Ref,
            "#NAME?" => Self::Name,
            "#NUM!" => Self::Num,
            "#N/A" => Self::NotAvailable,
            "#ERROR!" => Self::Generic(Cow::Borrowed("")),
            _ => return None,
        })
    }

    /// 1-based ordering used by `ERROR.TYPE`.
    pub fn error_type_number(&self) -> f64 {
        match self {
            Self::Null => 1.0,
            Self::DivZero => 2.0,
            Self::Value => 3.0,
            Self::Ref => 4.0,
            Self::Name => 5.0,
            Self::Num => 6.0,
            Self::NotAvailable => 7.0,
            Self::Generic(_) => 8.0,
        }
    }

    pub fn generic(cause: impl Into<Cow<'static, str>>) -> Self {
        Self::Generic(cause.into())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic(cause) if !cause.is_empty() => write!(f, "{cause}"),
            other => write!(f, "{}", other.tag()),
        }
    }
}

/// An error, optionally tagged with the span of source text that produced
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaError {
    pub span: Option<Span>,
    pub kind: ErrorKind,
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "column {} to {}: {}", span.start, span.end, self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}
impl std::error::Error for FormulaError {}

impl FormulaError {
    pub fn new(kind: ErrorKind) -> Self {
        Self { span: None, kind }
    }

    /// Attaches `span` to this error if it doesn't already have one.
    pub fn with_span(mut self, span: impl Into<Span>) -> Self {
        if self.span.is_none() {
            self.span = Some(span.into());
        }
        self
    }
}

impl From<ErrorKind> for FormulaError {
    fn from(kind: ErrorKind) -> Self {
        Self { span: None, kind }
    }
}

/// Convenience constructors mirroring the eight closed tags.
impl FormulaError {
    pub fn value() -> Self {
        ErrorKind::Value.into()
    }
    pub fn reference() -> Self {
        ErrorKind::Ref.into()
    }
    pub fn name() -> Self {
        ErrorKind::Name.into()
    }
    pub fn div_zero() -> Self {
        ErrorKind::DivZero.into()
    }
    pub fn null() -> Self {
        ErrorKind::Null.into()
    }
    pub fn not_available() -> Self {
        ErrorKind::NotAvailable.into()
    }
    pub fn num() -> Self {
        ErrorKind::Num.into()
    }
    pub fn generic(cause: impl Into<Cow<'static, str>>) -> Self {
        ErrorKind::generic(cause).into()
    }
}

pub type FormulaResult<T> = Result<T, FormulaError>;

/// Emits an internal error, panicking in debug builds (for the stack trace)
/// but returning a `#ERROR!` value in release builds.
macro_rules! internal_error_value {
    ( $( $args:expr ),+ $(,)? ) => {{
        #[cfg(debug_assertions)]
        #[allow(unused)]
        let ret: $crate::error::FormulaError = panic!($( $args ),+);
        #[cfg(not(debug_assertions))]
        #[allow(unused)]
        let ret: $crate::error::FormulaError =
            $crate::error::FormulaError::generic(format!($( $args ),+));
        #[allow(unreachable_code)]
        ret
    }};
}

macro_rules! internal_error {
    ( $( $args:expr ),+ $(,)? ) => {
        return Err(internal_error_value!($( $args ),+))
    };
}

pub(crate) use internal_error;
pub(crate) use internal_error_value;
