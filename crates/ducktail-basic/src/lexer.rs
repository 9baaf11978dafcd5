//! Tokenizer for the VBA dialect.
//!
//! Produces a lossless token stream: every byte of the input belongs to
//! exactly one token, trivia included, so token spans can be used directly
//! as edit targets.
//!
//! Lexical notes:
//! - Identifiers keep their type-hint suffix (`Format$`, `count&`).
//! - Keywords are matched case-insensitively, and only without a suffix
//!   (`String` is a keyword, `String$` an identifier).
//! - `'` and `Rem` start comments that run to the end of the line.
//! - ` _` at the end of a line is a line continuation (trivia).
//! - Strings escape `"` by doubling it.

use ducktail_core::patch::Span;
use ducktail_core::types::{Token, TokenKind};
use thiserror::Error;

/// A byte sequence that cannot start any token.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct LexError {
    /// Byte offset of the offending input.
    pub offset: usize,
    pub message: String,
}

/// Reserved words, lowercase.
const KEYWORDS: &[&str] = &[
    "alias", "and", "as", "attribute", "begin", "boolean", "byref", "byte", "byval", "call",
    "case", "const", "currency", "date", "decimal", "declare", "dim", "do", "double", "each",
    "else", "elseif", "empty", "end", "enum", "eqv", "erase", "error", "event", "exit", "false",
    "for", "friend", "function", "get", "global", "gosub", "goto", "if", "imp", "implements",
    "in", "integer", "is", "let", "lib", "like", "long", "longlong", "longptr", "loop", "me",
    "mod", "new", "next", "not", "nothing", "null", "object", "on", "option", "optional", "or",
    "paramarray", "preserve", "private", "property", "ptrsafe", "public", "raiseevent", "redim",
    "rem", "resume", "return", "select", "set", "single", "static", "step", "stop", "string",
    "sub", "then", "to", "true", "type", "typeof", "until", "variant", "wend", "while", "with",
    "withevents", "xor",
];

/// Built-in value types, lowercase. A subset of [`KEYWORDS`].
pub const INTRINSIC_TYPES: &[&str] = &[
    "boolean", "byte", "currency", "date", "decimal", "double", "integer", "long", "longlong",
    "longptr", "object", "single", "string", "variant",
];

/// Characters that may end an identifier as a type hint.
pub const TYPE_HINTS: &[char] = &['%', '&', '^', '!', '#', '@', '$'];

pub fn is_keyword(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    KEYWORDS.binary_search(&lower.as_str()).is_ok()
}

pub fn is_intrinsic_type(word: &str) -> bool {
    INTRINSIC_TYPES.contains(&word.to_ascii_lowercase().as_str())
}

/// The type a hint suffix stands for.
pub fn hint_type(hint: char) -> Option<&'static str> {
    match hint {
        '%' => Some("Integer"),
        '&' => Some("Long"),
        '^' => Some("LongLong"),
        '!' => Some("Single"),
        '#' => Some("Double"),
        '@' => Some("Currency"),
        '$' => Some("String"),
        _ => None,
    }
}

/// Split an identifier into its bare name and optional hint suffix.
pub fn split_hint(name: &str) -> (&str, Option<char>) {
    match name.chars().last() {
        Some(c) if TYPE_HINTS.contains(&c) && name.len() > 1 => (&name[..name.len() - 1], Some(c)),
        _ => (name, None),
    }
}

/// Text of `token` inside `text`.
pub fn token_text<'a>(text: &'a str, token: &Token) -> &'a str {
    &text[token.span.start as usize..token.span.end as usize]
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b >= 0x80
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

struct Lexer<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let index = self.tokens.len() as u32;
        self.tokens.push(Token {
            index,
            kind,
            span: Span::new(start as u64, self.pos as u64),
        });
    }

    fn at_line_start(&self) -> bool {
        self.tokens
            .iter()
            .rev()
            .find(|t| t.kind != TokenKind::Whitespace)
            .map(|t| matches!(t.kind, TokenKind::Newline | TokenKind::LineContinuation))
            .unwrap_or(true)
    }

    fn rest_of_line(&mut self) {
        while let Some(b) = self.peek(0) {
            if b == b'\n' || b == b'\r' {
                break;
            }
            self.pos += 1;
        }
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        while let Some(b) = self.peek(0) {
            let start = self.pos;
            match b {
                b' ' | b'\t' => {
                    while matches!(self.peek(0), Some(b' ' | b'\t')) {
                        self.pos += 1;
                    }
                    self.push(TokenKind::Whitespace, start);
                }
                b'\r' => {
                    self.pos += 1;
                    if self.peek(0) == Some(b'\n') {
                        self.pos += 1;
                    }
                    self.push(TokenKind::Newline, start);
                }
                b'\n' => {
                    self.pos += 1;
                    self.push(TokenKind::Newline, start);
                }
                b'\'' => {
                    self.rest_of_line();
                    self.push(TokenKind::Comment, start);
                }
                b'"' => self.string(start)?,
                b'_' if self.is_line_continuation() => {
                    self.pos += 1;
                    while matches!(self.peek(0), Some(b' ' | b'\t')) {
                        self.pos += 1;
                    }
                    if self.peek(0) == Some(b'\r') {
                        self.pos += 1;
                    }
                    if self.peek(0) == Some(b'\n') {
                        self.pos += 1;
                    }
                    self.push(TokenKind::LineContinuation, start);
                }
                b'[' => {
                    // Foreign identifier: [Some Name]
                    while let Some(c) = self.peek(0) {
                        self.pos += 1;
                        if c == b']' {
                            break;
                        }
                        if c == b'\n' || c == b'\r' {
                            return Err(LexError {
                                offset: start,
                                message: "unterminated bracketed identifier".into(),
                            });
                        }
                    }
                    self.push(TokenKind::Identifier, start);
                }
                b'{' => {
                    // Designer class id: {C62A69F0-16DC-11CE-9E98-00AA00574A4F}
                    while let Some(c) = self.peek(0) {
                        if c == b'\n' || c == b'\r' {
                            return Err(LexError {
                                offset: start,
                                message: "unterminated class id".into(),
                            });
                        }
                        self.pos += 1;
                        if c == b'}' {
                            break;
                        }
                    }
                    self.push(TokenKind::Identifier, start);
                }
                b'#' if self.date_literal_len().is_some() => {
                    self.pos += self.date_literal_len().unwrap_or(1);
                    self.push(TokenKind::DateLiteral, start);
                }
                b'&' if matches!(self.peek(1), Some(b'H' | b'h' | b'O' | b'o'))
                    && self.peek(2).map(|c| c.is_ascii_hexdigit()).unwrap_or(false) =>
                {
                    self.pos += 2;
                    while self.peek(0).map(|c| c.is_ascii_hexdigit()).unwrap_or(false) {
                        self.pos += 1;
                    }
                    if matches!(self.peek(0), Some(b'&' | b'%' | b'^')) {
                        self.pos += 1;
                    }
                    self.push(TokenKind::NumberLiteral, start);
                }
                b'0'..=b'9' => self.number(start),
                b'.' if self.peek(1).map(|c| c.is_ascii_digit()).unwrap_or(false)
                    && !self.follows_value() =>
                {
                    self.number(start)
                }
                b if is_ident_start(b) => self.word(start),
                b'<' => {
                    self.pos += 1;
                    if matches!(self.peek(0), Some(b'=' | b'>')) {
                        self.pos += 1;
                    }
                    self.push(TokenKind::Operator, start);
                }
                b'>' => {
                    self.pos += 1;
                    if self.peek(0) == Some(b'=') {
                        self.pos += 1;
                    }
                    self.push(TokenKind::Operator, start);
                }
                b':' => {
                    self.pos += 1;
                    if self.peek(0) == Some(b'=') {
                        self.pos += 1;
                        self.push(TokenKind::Operator, start);
                    } else {
                        self.push(TokenKind::Punctuation, start);
                    }
                }
                b'+' | b'-' | b'*' | b'/' | b'\\' | b'^' | b'&' | b'=' => {
                    self.pos += 1;
                    self.push(TokenKind::Operator, start);
                }
                b'(' | b')' | b',' | b';' | b'.' | b'!' | b'#' => {
                    self.pos += 1;
                    self.push(TokenKind::Punctuation, start);
                }
                _ => {
                    let ch = self.text[start..].chars().next().unwrap_or('?');
                    return Err(LexError {
                        offset: start,
                        message: format!("unexpected character '{}'", ch),
                    });
                }
            }
        }
        Ok(self.tokens)
    }

    fn is_line_continuation(&self) -> bool {
        let preceded_by_space = self.pos > 0 && matches!(self.bytes[self.pos - 1], b' ' | b'\t');
        if !preceded_by_space {
            return false;
        }
        let mut i = self.pos + 1;
        while matches!(self.bytes.get(i), Some(b' ' | b'\t')) {
            i += 1;
        }
        matches!(self.bytes.get(i), None | Some(b'\r' | b'\n'))
    }

    /// Whether the previous significant token ends a value, so a following
    /// `.` is member access rather than the start of a number.
    fn follows_value(&self) -> bool {
        match self.tokens.last() {
            Some(t) if t.kind == TokenKind::Identifier => true,
            Some(t) if t.kind == TokenKind::Punctuation => {
                &self.text[t.span.start as usize..t.span.end as usize] == ")"
            }
            _ => false,
        }
    }

    fn date_literal_len(&self) -> Option<usize> {
        let mut i = self.pos + 1;
        let mut saw_digit = false;
        while let Some(&c) = self.bytes.get(i) {
            match c {
                b'#' => {
                    return if saw_digit && i > self.pos + 1 {
                        Some(i + 1 - self.pos)
                    } else {
                        None
                    };
                }
                b'0'..=b'9' => saw_digit = true,
                b'/' | b'-' | b':' | b' ' | b'.' | b',' => {}
                c if c.is_ascii_alphabetic() => {}
                _ => return None,
            }
            i += 1;
        }
        None
    }

    fn number(&mut self, start: usize) {
        while self.peek(0).map(|c| c.is_ascii_digit()).unwrap_or(false) {
            self.pos += 1;
        }
        if self.peek(0) == Some(b'.') && self.peek(1).map(|c| c.is_ascii_digit()).unwrap_or(false)
        {
            self.pos += 1;
            while self.peek(0).map(|c| c.is_ascii_digit()).unwrap_or(false) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(0), Some(b'E' | b'e' | b'D' | b'd')) {
            let sign = usize::from(matches!(self.peek(1), Some(b'+' | b'-')));
            if self
                .peek(1 + sign)
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
            {
                self.pos += 1 + sign;
                while self.peek(0).map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    self.pos += 1;
                }
            }
        }
        if matches!(self.peek(0), Some(b'%' | b'&' | b'^' | b'!' | b'#' | b'@')) {
            self.pos += 1;
        }
        self.push(TokenKind::NumberLiteral, start);
    }

    fn word(&mut self, start: usize) {
        while self.peek(0).map(is_ident_continue).unwrap_or(false) {
            self.pos += 1;
        }
        let word = &self.text[start..self.pos];

        if word.eq_ignore_ascii_case("rem")
            && self.at_line_start_or_after_colon()
            && matches!(self.peek(0), None | Some(b' ' | b'\t' | b'\r' | b'\n'))
        {
            self.rest_of_line();
            self.push(TokenKind::Comment, start);
            return;
        }

        if let Some(hint) = self.peek(0) {
            let hint_char = hint as char;
            let next = self.peek(1);
            let attaches = TYPE_HINTS.contains(&hint_char)
                && !next.map(is_ident_continue).unwrap_or(false)
                && next != Some(b'[');
            if attaches {
                self.pos += 1;
                self.push(TokenKind::Identifier, start);
                return;
            }
        }

        let kind = if is_keyword(word) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        self.push(kind, start);
    }

    fn at_line_start_or_after_colon(&self) -> bool {
        if self.at_line_start() {
            return true;
        }
        self.tokens
            .iter()
            .rev()
            .find(|t| t.kind != TokenKind::Whitespace)
            .map(|t| {
                t.kind == TokenKind::Punctuation
                    && &self.text[t.span.start as usize..t.span.end as usize] == ":"
            })
            .unwrap_or(false)
    }

    fn string(&mut self, start: usize) -> Result<(), LexError> {
        self.pos += 1;
        loop {
            match self.peek(0) {
                Some(b'"') if self.peek(1) == Some(b'"') => self.pos += 2,
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\r' | b'\n') | None => {
                    return Err(LexError {
                        offset: start,
                        message: "unterminated string literal".into(),
                    });
                }
                Some(_) => self.pos += 1,
            }
        }
        self.push(TokenKind::StringLiteral, start);
        Ok(())
    }
}

/// Tokenize a whole module.
pub fn tokenize(text: &str) -> Result<Vec<Token>, LexError> {
    Lexer {
        text,
        bytes: text.as_bytes(),
        pos: 0,
        tokens: Vec::new(),
    }
    .run()
}
