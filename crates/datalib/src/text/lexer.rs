// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tokenizer for the JSON-superset text notation.
//!
//! Accepts `//` and `/* */` comments, `"` and `'` quoted strings with C
//! escapes, and bare words (numbers, keywords, unquoted keys). A bare word
//! runs until whitespace, a structural character or a quote.

use crate::error::{DlError, DlResult, Location, ParseError, ParseErrorKind};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Str(String),
    Word(String),
    Eof,
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::LBrace => "'{'".into(),
            Self::RBrace => "'}'".into(),
            Self::LBracket => "'['".into(),
            Self::RBracket => "']'".into(),
            Self::Colon => "':'".into(),
            Self::Comma => "','".into(),
            Self::Str(s) => format!("string \"{}\"", s),
            Self::Word(w) => format!("'{}'", w),
            Self::Eof => "end of input".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub start: usize,
}

pub(crate) struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

fn is_structural(b: u8) -> bool {
    matches!(b, b'{' | b'}' | b'[' | b']' | b':' | b',' | b'"' | b'\'')
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    pub(crate) fn error(&self, offset: usize, message: impl Into<String>) -> DlError {
        DlError::Parse(ParseError {
            kind: ParseErrorKind::Syntax,
            message: message.into(),
            location: Location::from_offset(self.src, offset),
        })
    }

    fn skip_trivia(&mut self) -> DlResult<()> {
        loop {
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.bytes[self.pos..].starts_with(b"//") {
                while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                    self.pos += 1;
                }
            } else if self.bytes[self.pos..].starts_with(b"/*") {
                let start = self.pos;
                match self.src[self.pos + 2..].find("*/") {
                    Some(end) => self.pos += 2 + end + 2,
                    None => return Err(self.error(start, "unterminated block comment")),
                }
            } else {
                return Ok(());
            }
        }
    }

    pub(crate) fn next_token(&mut self) -> DlResult<Token> {
        self.skip_trivia()?;
        let start = self.pos;
        let Some(&b) = self.bytes.get(self.pos) else {
            return Ok(Token {
                kind: TokenKind::Eof,
                start,
            });
        };

        let kind = match b {
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b':' => TokenKind::Colon,
            b',' => TokenKind::Comma,
            b'"' | b'\'' => return self.lex_string(b),
            _ => return Ok(self.lex_word()),
        };
        self.pos += 1;
        Ok(Token { kind, start })
    }

    fn lex_word(&mut self) -> Token {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            if b.is_ascii_whitespace()
                || is_structural(b)
                || self.bytes[self.pos..].starts_with(b"//")
                || self.bytes[self.pos..].starts_with(b"/*")
            {
                break;
            }
            self.pos += 1;
        }
        Token {
            kind: TokenKind::Word(self.src[start..self.pos].to_string()),
            start,
        }
    }

    fn lex_string(&mut self, quote: u8) -> DlResult<Token> {
        let start = self.pos;
        self.pos += 1;
        let mut out: Vec<u8> = Vec::new();
        loop {
            let Some(&b) = self.bytes.get(self.pos) else {
                return Err(self.error(start, "unterminated string"));
            };
            self.pos += 1;
            match b {
                b'\\' => {
                    let Some(&esc) = self.bytes.get(self.pos) else {
                        return Err(self.error(start, "unterminated string"));
                    };
                    self.pos += 1;
                    out.push(match esc {
                        b'\'' => b'\'',
                        b'"' => b'"',
                        b'\\' => b'\\',
                        b'/' => b'/',
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        b'b' => 0x08,
                        b'f' => 0x0C,
                        other => {
                            return Err(self.error(
                                self.pos - 2,
                                format!("unknown escape sequence '\\{}'", other as char),
                            ))
                        }
                    });
                }
                _ if b == quote => break,
                _ => out.push(b),
            }
        }
        // Escapes only replace ASCII, so the bytes are still valid UTF-8.
        let text = String::from_utf8(out).map_err(|_| self.error(start, "invalid utf-8 in string"))?;
        Ok(Token {
            kind: TokenKind::Str(text),
            start,
        })
    }
}
