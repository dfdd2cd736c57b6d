// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Name hashing for type ids and union discriminants.
//!
//! djb2 (`h = h * 33 + byte`) offset so that the empty name hashes to 0.

const SEED: u32 = 5381;

/// Hash a byte buffer.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash = SEED;
    for &b in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(u32::from(b));
    }
    hash.wrapping_sub(SEED)
}

/// Hash a type, enum or member name.
pub fn hash_name(name: &str) -> u32 {
    hash_bytes(name.as_bytes())
}
