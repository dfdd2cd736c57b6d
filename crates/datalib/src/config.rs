// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DataLibrary configuration - format constants and codec limits.
//!
//! Everything that describes the on-disk formats lives here so that the
//! registry, codec and text modules never hardcode magic values.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: format constants (magic ids, versions, header sizes)
//! - **Level 2 (Dynamic)**: [`CodecLimits`], owned by a `Registry`

// =======================================================================
// Type-library format
// =======================================================================

/// Type-library magic, `'DLTL'` as a big-endian four-cc read into a `u32`.
pub const TYPELIB_ID: u32 = u32::from_be_bytes(*b"DLTL");

/// [`TYPELIB_ID`] as seen by a reader of the opposite byte order.
pub const TYPELIB_ID_SWAPPED: u32 = TYPELIB_ID.swap_bytes();

/// Type-library format version.
pub const TYPELIB_VERSION: u32 = 4;

/// Size of the type-library header (nine `u32`).
pub const TYPELIB_HEADER_SIZE: usize = 9 * 4;

/// On-disk size of one type descriptor.
pub const TYPELIB_TYPE_DESC_SIZE: usize = 9 * 4;

/// On-disk size of one member descriptor.
pub const TYPELIB_MEMBER_DESC_SIZE: usize = 13 * 4;

/// On-disk size of one enum descriptor.
pub const TYPELIB_ENUM_DESC_SIZE: usize = 8 * 4;

/// On-disk size of one enum value descriptor (`u32` alias, `u32` pad, `u64` value).
pub const TYPELIB_ENUM_VALUE_DESC_SIZE: usize = 16;

/// On-disk size of one enum alias descriptor.
pub const TYPELIB_ENUM_ALIAS_DESC_SIZE: usize = 2 * 4;

/// String-table offset meaning "no string" (comments).
pub const NO_STRING: u32 = u32::MAX;

/// Default-value offset meaning "member has no default".
pub const NO_DEFAULT_VALUE: u32 = u32::MAX;

// =======================================================================
// Instance format
// =======================================================================

/// Instance magic, `'DLDL'`.
pub const INSTANCE_ID: u32 = u32::from_be_bytes(*b"DLDL");

/// [`INSTANCE_ID`] as seen by a reader of the opposite byte order.
pub const INSTANCE_ID_SWAPPED: u32 = INSTANCE_ID.swap_bytes();

/// Instance format version.
pub const INSTANCE_VERSION: u32 = 1;

/// Size of the instance header: id, version, root type, instance size,
/// `is_64_bit_ptr` and three bytes of padding.
pub const INSTANCE_HEADER_SIZE: usize = 20;

/// Null offset for 32-bit pointer slots.
pub const NULL_OFFSET_32: u64 = 0xFFFF_FFFF;

/// Null offset for 64-bit pointer slots.
pub const NULL_OFFSET_64: u64 = u64::MAX;

/// Size of the discriminant appended to every union.
pub const UNION_TAG_SIZE: u32 = 4;

// =======================================================================
// Text format
// =======================================================================

/// Reserved key holding named sub-instances in text form.
pub const SUBDATA_KEY: &str = "__subdata";

/// Reserved reference name for the root instance.
pub const ROOT_REFERENCE: &str = "__root";

/// Prefix used when naming pointer targets on unpack.
pub const POINTER_NAME_PREFIX: &str = "ptr_";

/// Indentation step of unpacked text.
pub const TEXT_INDENT: usize = 2;

/// Deepest object/array nesting the text parser accepts. Schemas are
/// always parsed with this bound; instances use
/// [`CodecLimits::max_text_depth`].
pub const MAX_TEXT_DEPTH: usize = 128;

// =======================================================================
// Codec limits
// =======================================================================

/// Default bound on distinct pointer targets tracked by store/load.
pub const DEFAULT_MAX_TRACKED_POINTERS: usize = 128;

/// Default bound on sub-instances collected by a single convert.
pub const DEFAULT_MAX_CONVERT_INSTANCES: usize = 128;

/// Default bound on offset slots patched by a single convert.
pub const DEFAULT_MAX_PATCH_POSITIONS: usize = 256;

/// Default bound on named references in one text instance.
pub const DEFAULT_MAX_SUBDATA_REFS: usize = 256;

/// Working-set bounds for the codecs.
///
/// Each bound caps a scratch table used during one operation. Running
/// past a bound fails the operation with a capacity error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CodecLimits {
    /// Distinct pointer targets tracked by store (de-dup) and load (visited set).
    pub max_tracked_pointers: usize,
    /// Sub-instances (root, strings, arrays, pointer targets) collected by convert.
    pub max_convert_instances: usize,
    /// Offset slots rewritten by convert.
    pub max_patch_positions: usize,
    /// Named `__subdata` references resolved by text pack.
    pub max_subdata_refs: usize,
    /// Object/array nesting accepted by the text instance parser.
    pub max_text_depth: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_tracked_pointers: DEFAULT_MAX_TRACKED_POINTERS,
            max_convert_instances: DEFAULT_MAX_CONVERT_INSTANCES,
            max_patch_positions: DEFAULT_MAX_PATCH_POSITIONS,
            max_subdata_refs: DEFAULT_MAX_SUBDATA_REFS,
            max_text_depth: MAX_TEXT_DEPTH,
        }
    }
}

impl CodecLimits {
    /// Limits large enough to never trigger in practice. Text nesting
    /// keeps its default: the parser recurses once per level.
    pub fn unbounded() -> Self {
        Self {
            max_tracked_pointers: usize::MAX,
            max_convert_instances: usize::MAX,
            max_patch_positions: usize::MAX,
            max_subdata_refs: usize::MAX,
            max_text_depth: MAX_TEXT_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_values_match_fourcc() {
        assert_eq!(TYPELIB_ID, (u32::from(b'D') << 24) | (u32::from(b'L') << 16) | (u32::from(b'T') << 8) | u32::from(b'L'));
        assert_eq!(INSTANCE_ID, 0x444C_444C);
        assert_eq!(INSTANCE_ID_SWAPPED, 0x4C44_4C44);
        assert_ne!(TYPELIB_ID, TYPELIB_ID_SWAPPED);
    }

    #[test]
    fn test_default_limits() {
        let limits = CodecLimits::default();
        assert_eq!(limits.max_tracked_pointers, 128);
        assert_eq!(limits.max_patch_positions, 256);
        assert!(CodecLimits::unbounded().max_subdata_refs > limits.max_subdata_refs);
        assert_eq!(limits.max_text_depth, MAX_TEXT_DEPTH);
        assert_eq!(CodecLimits::unbounded().max_text_depth, MAX_TEXT_DEPTH);
    }
}
