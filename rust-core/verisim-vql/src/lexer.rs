// SPDX-License-Identifier: PMPL-1.0-or-later
//! VQL lexer.
//!
//! Produces a token stream with byte spans. Identifiers are URL-safe ASCII,
//! strings are double-quoted UTF-8 with backslash escapes, numbers are
//! decimal. Glob tokens (`/...` paths and bare `*` after FEDERATION) are
//! lexed as ordinary tokens and recombined by the parser.

use serde::{Deserialize, Serialize};

use crate::{ParseError, ParseErrorKind};

/// Byte range of a token in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// A span covering both operands.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Bare identifier or keyword (keywords are matched case-insensitively
    /// by the parser).
    Ident(String),
    /// Double-quoted string, escapes resolved.
    Str(String),
    Int(i64),
    Float(f64),
    /// Glob path starting with `/`.
    Glob(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Star,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A token with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Tokenize a VQL statement.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
            }
            b'(' => {
                tokens.push(Token { kind: TokenKind::LParen, span: Span::new(i, i + 1) });
                i += 1;
            }
            b')' => {
                tokens.push(Token { kind: TokenKind::RParen, span: Span::new(i, i + 1) });
                i += 1;
            }
            b'{' => {
                tokens.push(Token { kind: TokenKind::LBrace, span: Span::new(i, i + 1) });
                i += 1;
            }
            b'}' => {
                tokens.push(Token { kind: TokenKind::RBrace, span: Span::new(i, i + 1) });
                i += 1;
            }
            b'[' => {
                tokens.push(Token { kind: TokenKind::LBracket, span: Span::new(i, i + 1) });
                i += 1;
            }
            b']' => {
                tokens.push(Token { kind: TokenKind::RBracket, span: Span::new(i, i + 1) });
                i += 1;
            }
            b',' => {
                tokens.push(Token { kind: TokenKind::Comma, span: Span::new(i, i + 1) });
                i += 1;
            }
            b':' => {
                tokens.push(Token { kind: TokenKind::Colon, span: Span::new(i, i + 1) });
                i += 1;
            }
            b'*' => {
                tokens.push(Token { kind: TokenKind::Star, span: Span::new(i, i + 1) });
                i += 1;
            }
            b'=' => {
                tokens.push(Token { kind: TokenKind::Eq, span: Span::new(i, i + 1) });
                i += 1;
            }
            b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Neq, span: Span::new(i, i + 2) });
                    i += 2;
                } else {
                    return Err(ParseError::new(
                        ParseErrorKind::UnexpectedCharacter('!'),
                        Span::new(i, i + 1),
                        "did you mean '!='?",
                    ));
                }
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Le, span: Span::new(i, i + 2) });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Lt, span: Span::new(i, i + 1) });
                    i += 1;
                }
            }
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Ge, span: Span::new(i, i + 2) });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Gt, span: Span::new(i, i + 1) });
                    i += 1;
                }
            }
            b'"' => {
                let (value, next) = lex_string(input, i)?;
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    span: Span::new(i, next),
                });
                i = next;
            }
            b'/' => {
                // Glob path: consume to whitespace.
                let start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Glob(input[start..i].to_string()),
                    span: Span::new(start, i),
                });
            }
            b'-' | b'0'..=b'9' => {
                let (token, next) = lex_number(input, i)?;
                tokens.push(token);
                i = next;
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric()
                        || matches!(bytes[i], b'_' | b'-' | b'.' | b'~'))
                {
                    // '.' separates MOD.field; stop so the parser sees Dot.
                    if bytes[i] == b'.' {
                        break;
                    }
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(input[start..i].to_string()),
                    span: Span::new(start, i),
                });
                if i < bytes.len() && bytes[i] == b'.' {
                    tokens.push(Token { kind: TokenKind::Dot, span: Span::new(i, i + 1) });
                    i += 1;
                }
            }
            other => {
                return Err(ParseError::new(
                    ParseErrorKind::UnexpectedCharacter(other as char),
                    Span::new(i, i + 1),
                    "identifiers are URL-safe ASCII; strings are double-quoted",
                ));
            }
        }
    }

    Ok(tokens)
}

/// Lex a double-quoted string with backslash escapes starting at `start`.
fn lex_string(input: &str, start: usize) -> Result<(String, usize), ParseError> {
    let bytes = input.as_bytes();
    let mut value = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => return Ok((value, i + 1)),
            b'\\' => {
                let escaped = bytes.get(i + 1).ok_or_else(|| {
                    ParseError::new(
                        ParseErrorKind::UnterminatedString,
                        Span::new(start, input.len()),
                        "string ends in a bare backslash",
                    )
                })?;
                match escaped {
                    b'"' => value.push('"'),
                    b'\\' => value.push('\\'),
                    b'n' => value.push('\n'),
                    b't' => value.push('\t'),
                    other => {
                        return Err(ParseError::new(
                            ParseErrorKind::InvalidEscape(*other as char),
                            Span::new(i, i + 2),
                            "supported escapes: \\\" \\\\ \\n \\t",
                        ))
                    }
                }
                i += 2;
            }
            _ => {
                // Consume a full UTF-8 scalar.
                let ch_len = input[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
                value.push_str(&input[i..i + ch_len]);
                i += ch_len;
            }
        }
    }
    Err(ParseError::new(
        ParseErrorKind::UnterminatedString,
        Span::new(start, input.len()),
        "missing closing '\"'",
    ))
}

/// Lex a decimal integer or float; floats are `[-]digits.digits`.
fn lex_number(input: &str, start: usize) -> Result<(Token, usize), ParseError> {
    let bytes = input.as_bytes();
    let mut i = start;
    if bytes[i] == b'-' {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return Err(ParseError::new(
            ParseErrorKind::InvalidNumber,
            Span::new(start, i + 1),
            "expected digits after '-'",
        ));
    }
    let mut is_float = false;
    if i < bytes.len() && bytes[i] == b'.' && bytes.get(i + 1).map_or(false, u8::is_ascii_digit) {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    let text = &input[start..i];
    let span = Span::new(start, i);
    let kind = if is_float {
        TokenKind::Float(text.parse().map_err(|_| {
            ParseError::new(ParseErrorKind::InvalidNumber, span, "float out of range")
        })?)
    } else {
        TokenKind::Int(text.parse().map_err(|_| {
            ParseError::new(ParseErrorKind::InvalidNumber, span, "integer out of range")
        })?)
    };
    Ok((Token { kind, span }, i))
}
