// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Binary instance codec.
//!
//! A stored instance is a 20-byte header followed by the payload: the root
//! struct first, then every string, array and pointer target it reaches.
//! Every offset inside the payload is relative to the payload start, and
//! null is the all-ones offset of the pointer width.
//!
//! ```text
//! +--------+---------+-----------+---------------+-------------+
//! |  DLDL  | version | root type | instance size | 64-bit flag |
//! +--------+---------+-----------+---------------+-------------+
//! | root struct | subdata ...                                  |
//! +-------------+----------------------------------------------+
//! ```
//!
//! - [`store`] / [`calc_size`] / [`store_into`]: typed instance to bytes
//! - [`load`]: bytes to typed instance
//! - [`convert`] / [`convert_calc_size`] / [`convert_in_place`]: change byte
//!   order and pointer width without a typed instance

pub(crate) mod reader;
pub(crate) mod writer;

mod convert;
mod header;
mod load;
mod store;

#[cfg(test)]
mod tests;

pub use convert::{convert, convert_calc_size, convert_in_place};
pub use header::{instance_info, is_instance, InstanceInfo};
pub use load::load;
pub use store::{calc_size, store, store_into};

pub(crate) use load::{decode_default, load_with_offsets};
pub(crate) use store::encode_default;
