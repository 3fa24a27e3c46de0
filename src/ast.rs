//! The tagged syntax tree produced by the parser. Uses explicit
//! `BinaryOp`/`UnaryOp` variants rather than modeling operators as function
//! calls, and carries a `Display` impl that reconstructs canonical formula
//! text from any parsed tree.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::error::ErrorKind;
use crate::reference::CellAddress;
use crate::span::Spanned;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "^",
            Self::Concat => "&",
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Neg,
    Pos,
}

impl UnaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Pos => "+",
        }
    }
}

pub type AstNode = Spanned<AstNodeKind>;

#[derive(Debug, Clone)]
pub enum AstNodeKind {
    NumberLiteral(f64),
    StringLiteral(String),
    BooleanLiteral(bool),
    ErrorLiteral(ErrorKind),
    CellRef(CellAddress),
    RangeRef(CellAddress, CellAddress),
    FunctionCall { name_upper: Arc<str>, args: Vec<AstNode> },
    BinaryOp { op: BinaryOperator, left: Box<AstNode>, right: Box<AstNode> },
    UnaryOp { op: UnaryOperator, operand: Box<AstNode> },
    ArrayLiteral(Vec<Vec<AstNode>>),
    /// A parenthesized argument list applied directly to the value an
    /// expression evaluates to, rather than to a registered function name
    /// (e.g. `LAMBDA(x,y,x+y)(2,3)`). `callee` must
    /// evaluate to a `Lambda`; anything else is `#VALUE!`.
    Invoke { callee: Box<AstNode>, args: Vec<AstNode> },
}

impl fmt::Display for AstNodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NumberLiteral(n) => write!(f, "{n}"),
            Self::StringLiteral(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Self::BooleanLiteral(true) => write!(f, "TRUE"),
            Self::BooleanLiteral(false) => write!(f, "FALSE"),
            Self::ErrorLiteral(e) => write!(f, "{}", e.tag()),
            Self::CellRef(addr) => write!(f, "{addr}"),
            Self::RangeRef(start, end) => write!(f, "{start}:{end}"),
            Self::FunctionCall { name_upper, args } => {
                write!(f, "{name_upper}({})", args.iter().map(|a| a.inner.to_string()).join(","))
            }
            Self::BinaryOp { op, left, right } => {
                write!(f, "({}{}{})", left.inner, op.symbol(), right.inner)
            }
            Self::UnaryOp { op, operand } => write!(f, "({}{})", op.symbol(), operand.inner),
            Self::ArrayLiteral(rows) => write!(
                f,
                "{{{}}}",
                rows.iter()
                    .map(|row| row.iter().map(|c| c.inner.to_string()).join(","))
                    .join(";")
            ),
            Self::Invoke { callee, args } => {
                write!(f, "{}({})", callee.inner, args.iter().map(|a| a.inner.to_string()).join(","))
            }
        }
    }
}

impl AstNodeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::NumberLiteral(_) => "number literal",
            Self::StringLiteral(_) => "string literal",
            Self::BooleanLiteral(_) => "boolean literal",
            Self::ErrorLiteral(_) => "error literal",
            Self::CellRef(_) => "cell reference",
            Self::RangeRef(..) => "range reference",
            Self::FunctionCall { .. } => "function call",
            Self::BinaryOp { .. } => "binary operator expression",
            Self::UnaryOp { .. } => "unary operator expression",
            Self::ArrayLiteral(_) => "array literal",
            Self::Invoke { .. } => "invocation expression",
        }
    }
}
