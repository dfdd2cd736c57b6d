// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Untyped document tree built from the token stream.
//!
//! Both the schema loader and the instance reader work on this tree, so the
//! grammar (trailing commas, quoted or bare keys, comments) is identical for
//! both. Every node remembers its byte position for error reporting.

use super::lexer::{Lexer, Token, TokenKind};
use crate::config::MAX_TEXT_DEPTH;
use crate::error::DlResult;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeKind {
    Object(Vec<Entry>),
    Array(Vec<Node>),
    /// Quoted string.
    Str(String),
    /// Bare word: number, keyword, or unquoted name.
    Word(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Node {
    pub start: usize,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Entry {
    pub key: String,
    pub key_start: usize,
    pub value: Node,
}

impl Node {
    pub(crate) fn as_object(&self) -> Option<&[Entry]> {
        match &self.kind {
            NodeKind::Object(entries) => Some(entries),
            _ => None,
        }
    }

    pub(crate) fn as_array(&self) -> Option<&[Node]> {
        match &self.kind {
            NodeKind::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Quoted string or bare word.
    pub(crate) fn as_text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Str(s) | NodeKind::Word(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn is_null(&self) -> bool {
        matches!(&self.kind, NodeKind::Word(w) if w == "null")
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self.kind {
            NodeKind::Object(_) => "object",
            NodeKind::Array(_) => "array",
            NodeKind::Str(_) => "string",
            NodeKind::Word(_) => "value",
        }
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, max_depth: usize) -> DlResult<Self> {
        let mut lexer = Lexer::new(src);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            max_depth,
        })
    }

    fn advance(&mut self) -> DlResult<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn expect(&mut self, kind: &TokenKind) -> DlResult<()> {
        if &self.current.kind == kind {
            self.advance()?;
            Ok(())
        } else {
            Err(self.lexer.error(
                self.current.start,
                format!(
                    "expected {}, found {}",
                    kind.describe(),
                    self.current.kind.describe()
                ),
            ))
        }
    }

    /// `depth` counts the objects and arrays already open around this value.
    fn value(&mut self, depth: usize) -> DlResult<Node> {
        let start = self.current.start;
        if matches!(self.current.kind, TokenKind::LBrace | TokenKind::LBracket)
            && depth >= self.max_depth
        {
            return Err(self.lexer.error(
                start,
                format!("nesting deeper than {} levels", self.max_depth),
            ));
        }
        match self.current.kind {
            TokenKind::LBrace => return self.object(depth + 1),
            TokenKind::LBracket => return self.array(depth + 1),
            _ => {}
        }
        let kind = match self.current.kind {
            TokenKind::Str(_) | TokenKind::Word(_) => match self.advance()?.kind {
                TokenKind::Str(s) => NodeKind::Str(s),
                TokenKind::Word(w) => NodeKind::Word(w),
                other => {
                    return Err(self
                        .lexer
                        .error(start, format!("expected a value, found {}", other.describe())))
                }
            },
            _ => {
                return Err(self.lexer.error(
                    start,
                    format!("expected a value, found {}", self.current.kind.describe()),
                ))
            }
        };
        Ok(Node { start, kind })
    }

    fn object(&mut self, depth: usize) -> DlResult<Node> {
        let start = self.current.start;
        self.expect(&TokenKind::LBrace)?;
        let mut entries = Vec::new();
        while self.current.kind != TokenKind::RBrace {
            let key_start = self.current.start;
            let key = match self.advance()?.kind {
                TokenKind::Str(s) | TokenKind::Word(s) => s,
                other => {
                    return Err(self.lexer.error(
                        key_start,
                        format!("expected a key, found {}", other.describe()),
                    ))
                }
            };
            self.expect(&TokenKind::Colon)?;
            let value = self.value(depth)?;
            entries.push(Entry {
                key,
                key_start,
                value,
            });
            if self.current.kind == TokenKind::Comma {
                self.advance()?;
            } else if self.current.kind != TokenKind::RBrace {
                return Err(self.lexer.error(
                    self.current.start,
                    format!(
                        "expected ',' or '}}', found {}",
                        self.current.kind.describe()
                    ),
                ));
            }
        }
        self.advance()?;
        Ok(Node {
            start,
            kind: NodeKind::Object(entries),
        })
    }

    fn array(&mut self, depth: usize) -> DlResult<Node> {
        let start = self.current.start;
        self.expect(&TokenKind::LBracket)?;
        let mut items = Vec::new();
        while self.current.kind != TokenKind::RBracket {
            items.push(self.value(depth)?);
            if self.current.kind == TokenKind::Comma {
                self.advance()?;
            } else if self.current.kind != TokenKind::RBracket {
                return Err(self.lexer.error(
                    self.current.start,
                    format!(
                        "expected ',' or ']', found {}",
                        self.current.kind.describe()
                    ),
                ));
            }
        }
        self.advance()?;
        Ok(Node {
            start,
            kind: NodeKind::Array(items),
        })
    }
}

/// Parse a complete document: exactly one value followed by end of input.
pub(crate) fn parse_document(src: &str) -> DlResult<Node> {
    parse_document_with_depth(src, MAX_TEXT_DEPTH)
}

/// [`parse_document`] accepting at most `max_depth` nested objects and arrays.
pub(crate) fn parse_document_with_depth(src: &str, max_depth: usize) -> DlResult<Node> {
    let mut parser = Parser::new(src, max_depth)?;
    let node = parser.value(0)?;
    parser.expect(&TokenKind::Eof)?;
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DlError, ParseErrorKind};

    #[test]
    fn test_nested_document() {
        let doc = parse_document("{ \"a\": [1, 2,], b: { c: 'x' }, }").expect("parse");
        let entries = doc.as_object().expect("object");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "a");
        assert_eq!(entries[0].value.as_array().map(<[Node]>::len), Some(2));
        let inner = entries[1].value.as_object().expect("inner");
        assert_eq!(inner[0].value.as_text(), Some("x"));
        assert!(matches!(inner[0].value.kind, NodeKind::Str(_)));
    }

    #[test]
    fn test_missing_colon() {
        let err = parse_document("{ a 1 }").unwrap_err();
        assert_eq!(err.location().map(|l| l.column), Some(5));
    }

    #[test]
    fn test_trailing_garbage() {
        assert!(parse_document("{} {}").is_err());
        assert!(parse_document("").is_err());
    }

    #[test]
    fn test_nesting_depth() {
        let nested = |n: usize| format!("{}{}", "[".repeat(n), "]".repeat(n));
        parse_document(&nested(MAX_TEXT_DEPTH)).expect("at the limit");

        let err = parse_document(&nested(MAX_TEXT_DEPTH + 1)).unwrap_err();
        assert!(matches!(
            &err,
            DlError::Parse(p) if p.kind == ParseErrorKind::Syntax
        ));
        assert_eq!(err.location().map(|l| l.column), Some(MAX_TEXT_DEPTH + 1));

        parse_document_with_depth(&nested(3), 3).expect("custom limit");
        assert!(parse_document_with_depth("{ a: [ { } ] }", 2).is_err());
    }

    #[test]
    fn test_null_word() {
        let doc = parse_document("[null, \"null\"]").expect("parse");
        let items = doc.as_array().expect("array");
        assert!(items[0].is_null());
        assert!(!items[1].is_null());
    }
}
