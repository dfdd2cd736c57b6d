// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Text front-end: a JSON superset shared by type libraries and instances.
//!
//! On top of JSON the grammar accepts `//` and `/* */` comments, trailing
//! commas, bare or single-quoted keys and strings, hex and octal integers,
//! and the `min`, `max`, `inf` and `nan` keywords.
//!
//! - [`parse`] / [`pack`] / [`pack_with_format`]: text instance in
//! - [`unpack`] / [`write_text`]: text instance out

pub(crate) mod ast;
pub(crate) mod lexer;
pub(crate) mod number;
pub(crate) mod pack;

mod unpack;


pub use pack::{pack, pack_calc_size, pack_with_format, parse};
pub use unpack::{unpack, write_text};
