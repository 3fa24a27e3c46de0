//! Lexical analysis. Turns formula text into a stream of positioned tokens
//! via a hand-rolled character scanner with a priority-ordered dispatch
//! table for each leading character.

use crate::error::{FormulaError, FormulaResult};
use crate::span::{Span, Spanned};

/// A lexical token kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    String(String),
    Boolean(bool),
    /// Raw lexeme of an identifier classified as a cell/range address
    /// (resolved later by [`crate::reference::parse_address`]).
    CellAddress(String),
    /// Function name, upper-cased lexeme without the trailing `(`.
    Function(String),
    /// Operator lexeme: one of `+ - * / ^ % & = <> < > <= >= { } ;`.
    Operator(&'static str),
    LeftParen,
    RightParen,
    Comma,
    Colon,
    ErrorLiteral(String),
    End,
}

pub type Token = Spanned<TokenKind>;

const CLOSED_ERROR_TAGS: &[&str] = &[
    "#NULL!", "#DIV/0!", "#VALUE!", "#REF!", "#NAME?", "#NUM!", "#N/A", "#ERROR!",
];

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    /// Offset added to every emitted span, to account for a stripped
    /// leading `=`.
    base_offset: usize,
}

/// Tokenizes `formula_text`, stripping a single leading `=` if present but
/// keeping every emitted [`Span`] relative to the *original* string. The
/// final token is always [`TokenKind::End`].
pub fn tokenize(formula_text: &str) -> FormulaResult<Vec<Token>> {
    let (base_offset, body) = match formula_text.strip_prefix('=') {
        Some(rest) => (1, rest),
        None => (0, formula_text),
    };
    let mut lexer = Lexer { src: body, bytes: body.as_bytes(), pos: 0, base_offset };
    let mut tokens = Vec::new();
    loop {
        lexer.skip_whitespace();
        let start = lexer.pos;
        let kind = lexer.next_token()?;
        let end = lexer.pos;
        let is_end = matches!(kind, TokenKind::End);
        tokens.push(Spanned {
            span: Span { start: start + base_offset, end: end + base_offset },
            inner: kind,
        });
        if is_end {
            break;
        }
    }
    Ok(tokens)
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }
    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }
    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')) {
            self.pos += 1;
        }
    }

    fn next_token(&mut self) -> FormulaResult<TokenKind> {
        let Some(c) = self.peek() else {
            return Ok(TokenKind::End);
        };

        match c {
            b'"' => self.lex_string(),
            b'#' => self.lex_error_literal(),
            b'0'..=b'9' => Ok(self.lex_number()),
            b'.' if self.peek_at(1).map(|b| b.is_ascii_digit()) == Some(true) => {
                Ok(self.lex_number())
            }
            c if c.is_ascii_alphabetic() || c == b'$' || c == b'\'' || c == b'_' => {
                self.lex_identifier()
            }
            b'(' => {
                self.pos += 1;
                Ok(TokenKind::LeftParen)
            }
            b')' => {
                self.pos += 1;
                Ok(TokenKind::RightParen)
            }
            b',' => {
                self.pos += 1;
                Ok(TokenKind::Comma)
            }
            b':' => {
                self.pos += 1;
                Ok(TokenKind::Colon)
            }
            b'{' => {
                self.pos += 1;
                Ok(TokenKind::Operator("{"))
            }
            b'}' => {
                self.pos += 1;
                Ok(TokenKind::Operator("}"))
            }
            b';' => {
                self.pos += 1;
                Ok(TokenKind::Operator(";"))
            }
            b'<' => {
                self.pos += 1;
                match self.peek() {
                    Some(b'=') => {
                        self.pos += 1;
                        Ok(TokenKind::Operator("<="))
                    }
                    Some(b'>') => {
                        self.pos += 1;
                        Ok(TokenKind::Operator("<>"))
                    }
                    _ => Ok(TokenKind::Operator("<")),
                }
            }
            b'>' => {
                self.pos += 1;
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Ok(TokenKind::Operator(">="))
                } else {
                    Ok(TokenKind::Operator(">"))
                }
            }
            b'=' => {
                self.pos += 1;
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Ok(TokenKind::Operator("=="))
                } else {
                    Ok(TokenKind::Operator("="))
                }
            }
            b'+' => {
                self.pos += 1;
                Ok(TokenKind::Operator("+"))
            }
            b'-' => {
                self.pos += 1;
                Ok(TokenKind::Operator("-"))
            }
            b'*' => {
                self.pos += 1;
                Ok(TokenKind::Operator("*"))
            }
            b'/' => {
                self.pos += 1;
                Ok(TokenKind::Operator("/"))
            }
            b'^' => {
                self.pos += 1;
                Ok(TokenKind::Operator("^"))
            }
            b'%' => {
                self.pos += 1;
                Ok(TokenKind::Operator("%"))
            }
            b'&' => {
                self.pos += 1;
                Ok(TokenKind::Operator("&"))
            }
            other => Err(FormulaError::generic(format!(
                "unexpected character {:?}",
                other as char
            ))),
        }
    }

    fn lex_string(&mut self) -> FormulaResult<TokenKind> {
        self.pos += 1; // opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Err(FormulaError::generic("unterminated string literal")),
                Some(b'"') => {
                    if self.peek() == Some(b'"') {
                        self.pos += 1;
                        s.push('"');
                    } else {
                        break;
                    }
                }
                Some(c) => {
                    // Re-decode as UTF-8 by scanning back; formulas are
                    // typically ASCII-heavy but we must not split multi-byte
                    // characters.
                    let start = self.pos - 1;
                    let mut end = self.pos;
                    while end < self.bytes.len() && (self.bytes[end] & 0b1100_0000) == 0b1000_0000
                    {
                        end += 1;
                    }
                    self.pos = end;
                    s.push_str(&self.src[start..end]);
                    let _ = c;
                }
            }
        }
        Ok(TokenKind::String(s))
    }

    fn lex_error_literal(&mut self) -> FormulaResult<TokenKind> {
        let start = self.pos;
        self.pos += 1;
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == b'!' || c == b'?' {
                break;
            }
            if !(c.is_ascii_alphanumeric() || c == b'/') {
                return Err(FormulaError::generic("malformed error literal"));
            }
        }
        let lexeme = &self.src[start..self.pos];
        if CLOSED_ERROR_TAGS.contains(&lexeme) {
            Ok(TokenKind::ErrorLiteral(lexeme.to_string()))
        } else {
            Err(FormulaError::generic(format!("unknown error literal {lexeme:?}")))
        }
    }

    fn lex_number(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if matches!(self.peek(), Some(b'0'..=b'9')) {
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
            } else {
                self.pos = save; // not actually an exponent
            }
        }
        let mut text = self.src[start..self.pos].to_string();
        // Trailing `%` is consumed only if not followed by a digit, so that
        // `A%B` still lexes as modulo.
        if self.peek() == Some(b'%') && !matches!(self.peek_at(1), Some(b'0'..=b'9')) {
            self.pos += 1;
            text.push('%');
        }
        let value = if let Some(stripped) = text.strip_suffix('%') {
            stripped.parse::<f64>().unwrap_or(0.0) / 100.0
        } else {
            text.parse::<f64>().unwrap_or(0.0)
        };
        TokenKind::Number(value)
    }

    fn lex_identifier(&mut self) -> FormulaResult<TokenKind> {
        let start = self.pos;
        loop {
            match self.peek() {
                Some(b'\'') => {
                    // Quoted sheet-name run: consume through the closing quote.
                    self.pos += 1;
                    loop {
                        match self.advance() {
                            None => return Err(FormulaError::generic("unterminated sheet name")),
                            Some(b'\'') if self.peek() == Some(b'\'') => self.pos += 1,
                            Some(b'\'') => break,
                            Some(_) => {}
                        }
                    }
                }
                Some(c)
                    if c.is_ascii_alphanumeric()
                        || c == b'$'
                        || c == b'!'
                        || c == b'.'
                        || c == b'_' =>
                {
                    self.pos += 1;
                }
                _ => break,
            }
        }
        let lexeme = &self.src[start..self.pos];
        if self.peek() == Some(b'(') {
            self.pos += 1;
            Ok(TokenKind::Function(lexeme.to_ascii_uppercase()))
        } else if lexeme.eq_ignore_ascii_case("TRUE") {
            Ok(TokenKind::Boolean(true))
        } else if lexeme.eq_ignore_ascii_case("FALSE") {
            Ok(TokenKind::Boolean(false))
        } else {
            Ok(TokenKind::CellAddress(lexeme.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.inner).collect()
    }

    #[test]
    fn tokenizes_simple_sum() {
        assert_eq!(
            kinds("=SUM(A1,2)"),
            vec![
                TokenKind::Function("SUM".into()),
                TokenKind::CellAddress("A1".into()),
                TokenKind::Comma,
                TokenKind::Number(2.0),
                TokenKind::RightParen,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn leading_equals_offsets_spans() {
        let tokens = tokenize("=A1").unwrap();
        assert_eq!(tokens[0].span.start, 1);
        assert_eq!(tokens[0].span.end, 3);
    }

    #[test]
    fn percent_vs_modulo() {
        assert_eq!(kinds("50%"), vec![TokenKind::Number(0.5), TokenKind::End]);
        assert_eq!(
            kinds("A%B"),
            vec![
                TokenKind::CellAddress("A".into()),
                TokenKind::Operator("%"),
                TokenKind::CellAddress("B".into()),
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn string_with_escaped_quote() {
        assert_eq!(kinds("\"a\"\"b\""), vec![TokenKind::String("a\"b".into()), TokenKind::End]);
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(
            kinds("A1<=B1"),
            vec![
                TokenKind::CellAddress("A1".into()),
                TokenKind::Operator("<="),
                TokenKind::CellAddress("B1".into()),
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn error_literal() {
        assert_eq!(kinds("#DIV/0!"), vec![TokenKind::ErrorLiteral("#DIV/0!".into()), TokenKind::End]);
        assert!(tokenize("#BOGUS!").is_err());
    }

    #[test]
    fn unterminated_string_errors() {
        assert!(tokenize("\"abc").is_err());
    }
}
