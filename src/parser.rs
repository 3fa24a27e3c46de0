//! Recursive-descent parser. A `Parser` struct walks a token slice with a
//! cursor, with one method per precedence level from comparison (lowest)
//! down to primary (highest).
//!
//! Exponentiation is implemented **left-associative** (`2^3^2 == 64`),
//! matching common spreadsheet behavior rather than mathematical convention.

use std::sync::Arc;

use crate::ast::{AstNode, AstNodeKind, BinaryOperator, UnaryOperator};
use crate::error::{ErrorKind, FormulaError, FormulaResult};
use crate::lexer::{self, Token, TokenKind};
use crate::reference::parse_address;
use crate::span::{Span, Spanned};

/// Parses formula text into a syntax tree.
pub fn parse(formula_text: &str) -> FormulaResult<AstNode> {
    let tokens = lexer::tokenize(formula_text)?;
    let mut parser = Parser { tokens: &tokens, cursor: 0 };
    let tree = parser.parse_comparison()?;
    parser.expect_end()?;
    Ok(tree)
}

struct Parser<'a> {
    tokens: &'a [Token],
    cursor: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.cursor].inner
    }
    fn peek_span(&self) -> Span {
        self.tokens[self.cursor].span
    }
    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.cursor];
        if self.cursor + 1 < self.tokens.len() {
            self.cursor += 1;
        }
        tok
    }

    fn expect_end(&mut self) -> FormulaResult<()> {
        match self.peek() {
            TokenKind::End => Ok(()),
            other => Err(FormulaError::generic(format!(
                "unexpected trailing token {other:?}"
            ))
            .with_span(self.peek_span())),
        }
    }

    fn expect(&mut self, want: &TokenKind) -> FormulaResult<Span> {
        let span = self.peek_span();
        if self.peek() == want {
            self.advance();
            Ok(span)
        } else {
            Err(FormulaError::generic(format!(
                "expected {want:?}, got {:?}",
                self.peek()
            ))
            .with_span(span))
        }
    }

    fn operator_here(&self, ops: &[&str]) -> Option<&'static str> {
        match self.peek() {
            TokenKind::Operator(s) if ops.contains(s) => Some(s),
            _ => None,
        }
    }

    // comparison = concatenation ( ('=' | '<>' | '<' | '>' | '<=' | '>=') concatenation )*
    fn parse_comparison(&mut self) -> FormulaResult<AstNode> {
        let mut lhs = self.parse_concatenation()?;
        while let Some(op) = self.operator_here(&["=", "==", "<>", "<", ">", "<=", ">="]) {
            self.advance();
            let rhs = self.parse_concatenation()?;
            let op = match op {
                "=" | "==" => BinaryOperator::Eq,
                "<>" => BinaryOperator::Ne,
                "<" => BinaryOperator::Lt,
                ">" => BinaryOperator::Gt,
                "<=" => BinaryOperator::Le,
                ">=" => BinaryOperator::Ge,
                _ => unreachable!(),
            };
            let span = Span::merge(lhs.span, rhs.span);
            lhs = Spanned {
                span,
                inner: AstNodeKind::BinaryOp { op, left: Box::new(lhs), right: Box::new(rhs) },
            };
        }
        Ok(lhs)
    }

    // concatenation = additive ( '&' additive )*
    fn parse_concatenation(&mut self) -> FormulaResult<AstNode> {
        let mut lhs = self.parse_additive()?;
        while self.operator_here(&["&"]).is_some() {
            self.advance();
            let rhs = self.parse_additive()?;
            let span = Span::merge(lhs.span, rhs.span);
            lhs = Spanned {
                span,
                inner: AstNodeKind::BinaryOp {
                    op: BinaryOperator::Concat,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
            };
        }
        Ok(lhs)
    }

    // additive = multiplicative ( ('+' | '-') multiplicative )*
    fn parse_additive(&mut self) -> FormulaResult<AstNode> {
        let mut lhs = self.parse_multiplicative()?;
        while let Some(op) = self.operator_here(&["+", "-"]) {
            self.advance();
            let rhs = self.parse_multiplicative()?;
            let op = if op == "+" { BinaryOperator::Add } else { BinaryOperator::Sub };
            let span = Span::merge(lhs.span, rhs.span);
            lhs = Spanned {
                span,
                inner: AstNodeKind::BinaryOp { op, left: Box::new(lhs), right: Box::new(rhs) },
            };
        }
        Ok(lhs)
    }

    // multiplicative = exponent ( ('*' | '/' | '%') exponent )*
    //
    // Note: a trailing unary `%` is consumed by the lexer as part of a
    // number literal; the binary `%` here is spreadsheet modulo.
    fn parse_multiplicative(&mut self) -> FormulaResult<AstNode> {
        let mut lhs = self.parse_exponent()?;
        while let Some(op) = self.operator_here(&["*", "/", "%"]) {
            self.advance();
            let rhs = self.parse_exponent()?;
            let op = match op {
                "*" => BinaryOperator::Mul,
                "/" => BinaryOperator::Div,
                "%" => {
                    // Binary modulo is desugared to a MOD() call so the
                    // evaluator's single binary-op path stays exhaustive
                    // over arithmetic operators; see eval.rs.
                    let span = Span::merge(lhs.span, rhs.span);
                    lhs = Spanned {
                        span,
                        inner: AstNodeKind::FunctionCall {
                            name_upper: Arc::from("MOD"),
                            args: vec![lhs, rhs],
                        },
                    };
                    continue;
                }
                _ => unreachable!(),
            };
            let span = Span::merge(lhs.span, rhs.span);
            lhs = Spanned {
                span,
                inner: AstNodeKind::BinaryOp { op, left: Box::new(lhs), right: Box::new(rhs) },
            };
        }
        Ok(lhs)
    }

    // exponent = unary ( '^' unary )*   -- left-associative
    fn parse_exponent(&mut self) -> FormulaResult<AstNode> {
        let mut lhs = self.parse_unary()?;
        while self.operator_here(&["^"]).is_some() {
            self.advance();
            let rhs = self.parse_unary()?;
            let span = Span::merge(lhs.span, rhs.span);
            lhs = Spanned {
                span,
                inner: AstNodeKind::BinaryOp {
                    op: BinaryOperator::Pow,
                    left: Box::new(lhs),
                    right: Box::new(rhs),
                },
            };
        }
        Ok(lhs)
    }

    // unary = ('+' | '-') unary | primary
    fn parse_unary(&mut self) -> FormulaResult<AstNode> {
        if let Some(op) = self.operator_here(&["+", "-"]) {
            let start = self.peek_span();
            self.advance();
            let operand = self.parse_unary()?;
            let op = if op == "-" { UnaryOperator::Neg } else { UnaryOperator::Pos };
            let span = Span::merge(start, operand.span);
            return Ok(Spanned { span, inner: AstNodeKind::UnaryOp { op, operand: Box::new(operand) } });
        }
        self.parse_postfix()
    }

    // postfix = primary ( '(' args ')' )*
    //
    // The trailing call is how an immediately-invoked `LAMBDA(...)(...)`
    // parses: the primary is an ordinary
    // `FunctionCall { name_upper: "LAMBDA", .. }` node, and each further
    // `(...)` wraps it in an `Invoke` node instead of a second
    // `FunctionCall`, since the callee here is a value, not a registered
    // name.
    fn parse_postfix(&mut self) -> FormulaResult<AstNode> {
        let mut expr = self.parse_primary()?;
        while matches!(self.peek(), TokenKind::LeftParen) {
            self.advance();
            let args = self.parse_arg_list()?;
            let end_span = self.expect(&TokenKind::RightParen)?;
            let span = Span::merge(expr.span, end_span);
            expr = Spanned { span, inner: AstNodeKind::Invoke { callee: Box::new(expr), args } };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> FormulaResult<AstNode> {
        let span = self.peek_span();
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Spanned { span, inner: AstNodeKind::NumberLiteral(n) })
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Spanned { span, inner: AstNodeKind::StringLiteral(s) })
            }
            TokenKind::Boolean(b) => {
                self.advance();
                Ok(Spanned { span, inner: AstNodeKind::BooleanLiteral(b) })
            }
            TokenKind::ErrorLiteral(tag) => {
                self.advance();
                // The lexer only ever emits tags from its own closed set, so
                // this always resolves; fall back to a generic error rather
                // than panicking if that guarantee ever drifts.
                let kind = ErrorKind::from_tag(&tag).unwrap_or_else(|| ErrorKind::generic("unknown error literal"));
                Ok(Spanned { span, inner: AstNodeKind::ErrorLiteral(kind) })
            }
            TokenKind::Function(name) => {
                self.advance();
                let args = self.parse_arg_list()?;
                let end_span = self.expect(&TokenKind::RightParen)?;
                Ok(Spanned {
                    span: Span::merge(span, end_span),
                    inner: AstNodeKind::FunctionCall { name_upper: Arc::from(name.as_str()), args },
                })
            }
            TokenKind::CellAddress(text) => {
                self.advance();
                let start_addr = parse_address(&text).map_err(|e| e.with_span(span))?;
                if matches!(self.peek(), TokenKind::Colon) {
                    self.advance();
                    let end_span = self.peek_span();
                    let TokenKind::CellAddress(end_text) = self.peek().clone() else {
                        return Err(FormulaError::generic("expected address after ':'")
                            .with_span(end_span));
                    };
                    self.advance();
                    let end_addr = parse_address(&end_text).map_err(|e| e.with_span(end_span))?;
                    Ok(Spanned {
                        span: Span::merge(span, end_span),
                        inner: AstNodeKind::RangeRef(start_addr, end_addr),
                    })
                } else {
                    Ok(Spanned { span, inner: AstNodeKind::CellRef(start_addr) })
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_comparison()?;
                let end_span = self.expect(&TokenKind::RightParen)?;
                Ok(Spanned { span: Span::merge(span, end_span), inner: inner.inner })
            }
            TokenKind::Operator("{") => self.parse_array_literal(),
            other => Err(FormulaError::generic(format!("unexpected token {other:?}")).with_span(span)),
        }
    }

    fn parse_arg_list(&mut self) -> FormulaResult<Vec<AstNode>> {
        let mut args = Vec::new();
        if matches!(self.peek(), TokenKind::RightParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_comparison()?);
            if matches!(self.peek(), TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(args)
    }

    fn parse_array_literal(&mut self) -> FormulaResult<AstNode> {
        let start = self.peek_span();
        self.advance(); // consume '{'
        let mut rows: Vec<Vec<AstNode>> = vec![vec![]];
        loop {
            let elem = self.parse_comparison()?;
            rows.last_mut().unwrap().push(elem);
            match self.peek() {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::Operator(";") => {
                    self.advance();
                    rows.push(vec![]);
                }
                TokenKind::Operator("}") => break,
                other => {
                    return Err(FormulaError::generic(format!(
                        "unexpected token {other:?} in array literal"
                    ))
                    .with_span(self.peek_span()))
                }
            }
        }
        let end = self.peek_span();
        self.advance(); // consume '}'
        let width = rows[0].len();
        if rows.iter().any(|r| r.len() != width) {
            return Err(FormulaError::generic("array literal rows must have equal length")
                .with_span(Span::merge(start, end)));
        }
        Ok(Spanned { span: Span::merge(start, end), inner: AstNodeKind::ArrayLiteral(rows) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display(src: &str) -> String {
        parse(src).unwrap().inner.to_string()
    }

    #[test]
    fn precedence_respects_table() {
        // multiplicative binds tighter than additive
        assert_eq!(display("1+2*3"), "(1+(2*3))");
        // exponent is left-associative
        assert_eq!(display("2^3^2"), "((2^3)^2)");
        // unary minus binds tighter than exponentiation: `-2^2` is `(-2)^2`
        assert_eq!(display("-2^2"), "((-2)^2)");
        // comparison is the loosest
        assert_eq!(display("1+2=3"), "((1+2)=3)");
    }

    #[test]
    fn parses_ranges_and_function_calls() {
        assert_eq!(display("SUM(A1:A3,2)"), "SUM(A1:A3,2)");
    }

    #[test]
    fn parses_array_literal() {
        assert_eq!(display("{1,2;3,4}"), "{1,2;3,4}");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("SUM(1,2").is_err());
        assert!(parse("1 + ").is_err());
        assert!(parse("{1,2;3}").is_err());
    }

    #[test]
    fn canonical_reprint_round_trip() {
        for src in ["SUM(A1:A3,2)", "(1+2)*3", "IF(A1>0,1,-1)"] {
            let tree = parse(src).unwrap();
            let reprinted = tree.inner.to_string();
            let reparsed = parse(&reprinted).unwrap();
            assert_eq!(tree.inner.to_string(), reparsed.inner.to_string());
        }
    }
}
