// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # datalib - schema-driven binary data
//!
//! Describe structs, unions, enums, bitfields, arrays, strings and pointers
//! in a type library, then move instances of those types between three
//! forms: a typed in-memory graph, a compact relocatable binary buffer, and
//! a readable text document.
//!
//! ## Quick Start
//!
//! ```rust
//! use datalib::{codec, text, Registry};
//!
//! let registry = Registry::from_text(r#"{
//!     "types": { "Point": { "members": [
//!         { "name": "x", "type": "int32" },
//!         { "name": "y", "type": "int32" }
//!     ] } }
//! }"#)?;
//!
//! let bytes = text::pack(&registry, r#"{ "Point": { "x": 3, "y": 4 } }"#)?;
//! let info = codec::instance_info(&bytes)?;
//! assert_eq!(info.load_size, 20 + 8);
//!
//! let tid = registry.type_id_by_name("Point").expect("Point");
//! let instance = codec::load(&registry, tid, &bytes)?;
//! assert_eq!(instance.root().as_members().map(|m| m.len()), Some(2));
//! # Ok::<(), datalib::DlError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                  Registry (text / binary type libraries)            |
//! +-------------------------------+-------------------------------------+
//! |      Binary codec             |          Text codec                 |
//! |  store | load | calc_size     |   parse | pack | unpack             |
//! +-------------------------------+-------------------------------------+
//! |        Converter: byte order and pointer width, bytes to bytes      |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`registry`] - type libraries, layout, lookup
//! - [`instance`] - typed instance graph
//! - [`codec`] - binary store/load/convert
//! - [`text`] - text pack/unpack
//! - [`reflect`] - type and enum introspection
//! - [`util`] - file helpers

/// Format constants and codec limits.
pub mod config;
/// Error types.
pub mod error;
/// Name hashing.
pub mod hash;
/// Typed instance graph.
pub mod instance;
/// Type registry.
pub mod registry;
/// Registry introspection.
pub mod reflect;
/// Binary instance codec.
pub mod codec;
/// Text instance codec.
pub mod text;
/// File helpers.
pub mod util;

pub use config::CodecLimits;
pub use error::{DlError, DlResult, Location};
pub use instance::{Instance, NodeId, Value};
pub use registry::{Endian, Format, PtrSize, Registry, TypeId};
