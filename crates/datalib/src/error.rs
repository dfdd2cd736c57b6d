// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the registry, codecs and text front-end.
//!
//! `DlError` is the single error returned by public entry points. It wraps
//! one sub-error per failure family so callers can match on the family
//! (schema, format, capacity, parse, range) without string inspection.

use crate::registry::TypeId;
use std::fmt;

/// Byte position in a text source, with 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Location {
    /// Resolve a byte offset in `source` to line/column.
    pub fn from_offset(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let mut line = 1;
        let mut column = 1;
        for &b in &source.as_bytes()[..offset] {
            if b == b'\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        Self {
            offset,
            line,
            column,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, col {}", self.line, self.column)
    }
}

// =======================================================================
// Schema errors
// =======================================================================

/// What was wrong with a type library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Text schema is not well formed.
    Syntax,
    /// Unexpected or misplaced key in a schema object.
    UnexpectedKey,
    /// A type or enum name is defined twice.
    DuplicateName,
    /// A type declares no members.
    MissingMembers,
    /// A member references a type or enum that does not exist.
    TypeNotFound,
    /// A member type string could not be understood.
    InvalidType,
    /// An inline-array length names an enum value that does not exist.
    InvalidEnumValue,
    /// A default value failed to compile against its member.
    InvalidDefault,
    /// Bitfield group wider than 64 bits, or bad bit count.
    InvalidBitfield,
    /// Binary type library is truncated or inconsistent.
    MalformedLibrary,
    /// Binary type library has an unknown version.
    VersionMismatch,
}

impl SchemaErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Syntax => "syntax error",
            Self::UnexpectedKey => "unexpected key",
            Self::DuplicateName => "duplicate name",
            Self::MissingMembers => "type without members",
            Self::TypeNotFound => "type not found",
            Self::InvalidType => "invalid member type",
            Self::InvalidEnumValue => "invalid enum value",
            Self::InvalidDefault => "invalid default value",
            Self::InvalidBitfield => "invalid bitfield",
            Self::MalformedLibrary => "malformed type library",
            Self::VersionMismatch => "type library version mismatch",
        }
    }
}

/// Malformed, ambiguous or unresolvable schema.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
    pub location: Option<Location>,
}

impl SchemaError {
    pub fn new(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)?;
        if let Some(location) = &self.location {
            write!(f, " (at {})", location)?;
        }
        Ok(())
    }
}

// =======================================================================
// Format errors
// =======================================================================

/// Bad instance header or body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Magic id is neither the instance id nor its byte-swapped form.
    BadMagic { found: u32 },
    /// Instance written by another format version.
    VersionMismatch { expected: u32, found: u32 },
    /// Instance written in the other byte order.
    EndianMismatch,
    /// Root type in the header is not the requested type.
    TypeMismatch { expected: TypeId, found: TypeId },
    /// Type id not present in the registry.
    TypeNotFound(TypeId),
    /// Offsets, counts or sizes inside the instance are inconsistent.
    Malformed(String),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic { found } => write!(f, "bad instance magic 0x{:08X}", found),
            Self::VersionMismatch { expected, found } => {
                write!(f, "version mismatch: expected {}, found {}", expected, found)
            }
            Self::EndianMismatch => write!(f, "instance is stored in the other byte order"),
            Self::TypeMismatch { expected, found } => write!(
                f,
                "type mismatch: expected 0x{:08X}, found 0x{:08X}",
                expected, found
            ),
            Self::TypeNotFound(tid) => write!(f, "type 0x{:08X} not found", tid),
            Self::Malformed(reason) => write!(f, "malformed data: {}", reason),
        }
    }
}

// =======================================================================
// Capacity errors
// =======================================================================

/// Output buffer or working set too small.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    /// Caller buffer shorter than the produced data.
    BufferTooSmall { need: usize, have: usize },
    /// A configured codec limit was reached.
    LimitExceeded { what: &'static str, limit: usize },
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall { need, have } => {
                write!(f, "buffer too small: need {} bytes, have {}", need, have)
            }
            Self::LimitExceeded { what, limit } => {
                write!(f, "limit exceeded: more than {} {}", limit, what)
            }
        }
    }
}

// =======================================================================
// Text errors
// =======================================================================

/// What went wrong while reading an instance from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Syntax,
    InvalidMember,
    MemberSetTwice,
    MissingMember,
    MultipleUnionMembers,
    InvalidEnumValue,
    MissingSection,
    UnusedSubdata,
    UnknownReference,
    TooManyElements,
    TypeNotFound,
    TypeMismatch,
}

impl ParseErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Syntax => "syntax error",
            Self::InvalidMember => "invalid member",
            Self::MemberSetTwice => "member set twice",
            Self::MissingMember => "missing member",
            Self::MultipleUnionMembers => "multiple members in union set",
            Self::InvalidEnumValue => "invalid enum value",
            Self::MissingSection => "missing section",
            Self::UnusedSubdata => "unused subdata",
            Self::UnknownReference => "unknown reference",
            Self::TooManyElements => "too many elements",
            Self::TypeNotFound => "type not found",
            Self::TypeMismatch => "type mismatch",
        }
    }
}

/// Text instance failed to parse or validate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub location: Location,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (at {})",
            self.kind.as_str(),
            self.message,
            self.location
        )
    }
}

/// Numeric literal outside the domain of its target storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeError {
    pub message: String,
    pub location: Option<Location>,
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "range error: {}", self.message)?;
        if let Some(location) = &self.location {
            write!(f, " (at {})", location)?;
        }
        Ok(())
    }
}

// =======================================================================
// Top-level error
// =======================================================================

/// Error returned by every public datalib operation.
#[derive(Debug, Clone, PartialEq)]
pub enum DlError {
    Schema(SchemaError),
    Format(FormatError),
    Capacity(CapacityError),
    Parse(ParseError),
    Range(RangeError),
    /// Operation not supported for these arguments.
    Unsupported(String),
    /// A typed value does not match the schema it is stored against.
    InvalidInstance(String),
    /// File read or write failed.
    Io(String),
}

impl DlError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Format(FormatError::Malformed(reason.into()))
    }

    pub(crate) fn type_not_found(tid: TypeId) -> Self {
        Self::Format(FormatError::TypeNotFound(tid))
    }

    pub(crate) fn buffer_too_small(need: usize, have: usize) -> Self {
        Self::Capacity(CapacityError::BufferTooSmall { need, have })
    }

    pub(crate) fn limit(what: &'static str, limit: usize) -> Self {
        Self::Capacity(CapacityError::LimitExceeded { what, limit })
    }

    pub(crate) fn invalid_instance(reason: impl Into<String>) -> Self {
        Self::InvalidInstance(reason.into())
    }

    /// Text location attached to the error, if any.
    pub fn location(&self) -> Option<Location> {
        match self {
            Self::Schema(e) => e.location,
            Self::Parse(e) => Some(e.location),
            Self::Range(e) => e.location,
            _ => None,
        }
    }
}

impl fmt::Display for DlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema(e) => write!(f, "schema error: {}", e),
            Self::Format(e) => write!(f, "format error: {}", e),
            Self::Capacity(e) => write!(f, "capacity error: {}", e),
            Self::Parse(e) => write!(f, "parse error: {}", e),
            Self::Range(e) => write!(f, "{}", e),
            Self::Unsupported(reason) => write!(f, "unsupported operation: {}", reason),
            Self::InvalidInstance(reason) => write!(f, "invalid instance: {}", reason),
            Self::Io(reason) => write!(f, "i/o error: {}", reason),
        }
    }
}

impl std::error::Error for DlError {}

impl From<SchemaError> for DlError {
    fn from(e: SchemaError) -> Self {
        Self::Schema(e)
    }
}

impl From<FormatError> for DlError {
    fn from(e: FormatError) -> Self {
        Self::Format(e)
    }
}

impl From<CapacityError> for DlError {
    fn from(e: CapacityError) -> Self {
        Self::Capacity(e)
    }
}

impl From<ParseError> for DlError {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}

impl From<RangeError> for DlError {
    fn from(e: RangeError) -> Self {
        Self::Range(e)
    }
}

impl From<std::io::Error> for DlError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type DlResult<T> = core::result::Result<T, DlError>;
