// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Descriptors stored in a [`Registry`](super::Registry).

use crate::instance::Value;

/// Hash-derived identifier of a type or enum.
pub type TypeId = u32;

// =======================================================================
// Formats
// =======================================================================

/// Byte order of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Byte order of the running process.
    pub const fn host() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }

    pub const fn other(self) -> Self {
        match self {
            Self::Little => Self::Big,
            Self::Big => Self::Little,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Little => "little",
            Self::Big => "big",
        }
    }
}

/// Pointer width of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PtrSize {
    Ptr32,
    Ptr64,
}

impl PtrSize {
    /// Pointer width of the running process.
    pub const fn host() -> Self {
        if cfg!(target_pointer_width = "32") {
            Self::Ptr32
        } else {
            Self::Ptr64
        }
    }

    /// Index into the per-width `size`/`alignment`/`offset` pairs.
    pub const fn index(self) -> usize {
        match self {
            Self::Ptr32 => 0,
            Self::Ptr64 => 1,
        }
    }

    pub const fn bytes(self) -> u32 {
        match self {
            Self::Ptr32 => 4,
            Self::Ptr64 => 8,
        }
    }

    pub fn from_bytes(bytes: usize) -> Option<Self> {
        match bytes {
            4 => Some(Self::Ptr32),
            8 => Some(Self::Ptr64),
            _ => None,
        }
    }

    /// Offset value stored for a null pointer/string/array.
    pub const fn null_offset(self) -> u64 {
        match self {
            Self::Ptr32 => crate::config::NULL_OFFSET_32,
            Self::Ptr64 => crate::config::NULL_OFFSET_64,
        }
    }
}

/// Endianness plus pointer width: everything that distinguishes two
/// encodings of the same instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Format {
    pub endian: Endian,
    pub ptr_size: PtrSize,
}

impl Format {
    pub const fn new(endian: Endian, ptr_size: PtrSize) -> Self {
        Self { endian, ptr_size }
    }

    pub const fn host() -> Self {
        Self::new(Endian::host(), PtrSize::host())
    }
}

impl Default for Format {
    fn default() -> Self {
        Self::host()
    }
}

// =======================================================================
// Atom / storage
// =======================================================================

/// Structural kind of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Atom {
    Pod = 0,
    Array = 1,
    InlineArray = 2,
    Bitfield = 3,
}

impl Atom {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Pod),
            1 => Some(Self::Array),
            2 => Some(Self::InlineArray),
            3 => Some(Self::Bitfield),
            _ => None,
        }
    }
}

/// Underlying representation of a member value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Storage {
    Int8 = 0,
    Int16 = 1,
    Int32 = 2,
    Int64 = 3,
    Uint8 = 4,
    Uint16 = 5,
    Uint32 = 6,
    Uint64 = 7,
    Fp32 = 8,
    Fp64 = 9,
    EnumInt8 = 10,
    EnumInt16 = 11,
    EnumInt32 = 12,
    EnumInt64 = 13,
    EnumUint8 = 14,
    EnumUint16 = 15,
    EnumUint32 = 16,
    EnumUint64 = 17,
    Str = 18,
    Ptr = 19,
    Struct = 20,
}

impl Storage {
    pub fn from_u8(v: u8) -> Option<Self> {
        use Storage::*;
        const ALL: [Storage; 21] = [
            Int8, Int16, Int32, Int64, Uint8, Uint16, Uint32, Uint64, Fp32, Fp64, EnumInt8,
            EnumInt16, EnumInt32, EnumInt64, EnumUint8, EnumUint16, EnumUint32, EnumUint64, Str,
            Ptr, Struct,
        ];
        ALL.get(usize::from(v)).copied()
    }

    /// Builtin type name used by the text schema, if any.
    pub fn builtin_name(self) -> Option<&'static str> {
        match self {
            Self::Int8 => Some("int8"),
            Self::Int16 => Some("int16"),
            Self::Int32 => Some("int32"),
            Self::Int64 => Some("int64"),
            Self::Uint8 => Some("uint8"),
            Self::Uint16 => Some("uint16"),
            Self::Uint32 => Some("uint32"),
            Self::Uint64 => Some("uint64"),
            Self::Fp32 => Some("fp32"),
            Self::Fp64 => Some("fp64"),
            Self::Str => Some("string"),
            _ => None,
        }
    }

    /// Resolve a builtin type name from the text schema.
    pub fn from_builtin_name(name: &str) -> Option<Self> {
        Some(match name {
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint8" => Self::Uint8,
            "uint16" => Self::Uint16,
            "uint32" => Self::Uint32,
            "uint64" => Self::Uint64,
            "fp32" => Self::Fp32,
            "fp64" => Self::Fp64,
            "string" => Self::Str,
            _ => return None,
        })
    }

    /// Enum storage of the given integer width, from an enum `type` key.
    pub fn enum_from_name(name: &str) -> Option<Self> {
        Some(match name {
            "int8" => Self::EnumInt8,
            "int16" => Self::EnumInt16,
            "int32" => Self::EnumInt32,
            "int64" => Self::EnumInt64,
            "uint8" => Self::EnumUint8,
            "uint16" => Self::EnumUint16,
            "uint32" => Self::EnumUint32,
            "uint64" => Self::EnumUint64,
            _ => return None,
        })
    }

    pub fn is_enum(self) -> bool {
        (Self::EnumInt8 as u8..=Self::EnumUint64 as u8).contains(&(self as u8))
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Fp32 | Self::Fp64)
    }

    /// Plain or enum integer.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::Uint8
                | Self::Uint16
                | Self::Uint32
                | Self::Uint64
        ) || self.is_enum()
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::EnumInt8
                | Self::EnumInt16
                | Self::EnumInt32
                | Self::EnumInt64
        )
    }

    /// Storage that is copied as raw bytes (no offsets, no sub-members).
    pub fn is_simple_pod(self) -> bool {
        !matches!(self, Self::Str | Self::Ptr | Self::Struct)
    }

    /// Size in bytes of one value; strings and pointers depend on width,
    /// structs on their type.
    pub fn pod_size(self, ptr: PtrSize) -> Option<u32> {
        match self {
            Self::Int8 | Self::Uint8 | Self::EnumInt8 | Self::EnumUint8 => Some(1),
            Self::Int16 | Self::Uint16 | Self::EnumInt16 | Self::EnumUint16 => Some(2),
            Self::Int32 | Self::Uint32 | Self::Fp32 | Self::EnumInt32 | Self::EnumUint32 => {
                Some(4)
            }
            Self::Int64 | Self::Uint64 | Self::Fp64 | Self::EnumInt64 | Self::EnumUint64 => {
                Some(8)
            }
            Self::Str | Self::Ptr => Some(ptr.bytes()),
            Self::Struct => None,
        }
    }

    /// Inclusive value range of an integer storage, as `i128` so signed and
    /// unsigned 64-bit bounds both fit.
    pub fn int_bounds(self) -> Option<(i128, i128)> {
        match self {
            Self::Int8 | Self::EnumInt8 => Some((i8::MIN.into(), i8::MAX.into())),
            Self::Int16 | Self::EnumInt16 => Some((i16::MIN.into(), i16::MAX.into())),
            Self::Int32 | Self::EnumInt32 => Some((i32::MIN.into(), i32::MAX.into())),
            Self::Int64 | Self::EnumInt64 => Some((i64::MIN.into(), i64::MAX.into())),
            Self::Uint8 | Self::EnumUint8 => Some((0, u8::MAX.into())),
            Self::Uint16 | Self::EnumUint16 => Some((0, u16::MAX.into())),
            Self::Uint32 | Self::EnumUint32 => Some((0, u32::MAX.into())),
            Self::Uint64 | Self::EnumUint64 => Some((0, u64::MAX.into())),
            _ => None,
        }
    }

    /// Name used in error messages.
    pub fn describe(self) -> &'static str {
        match self {
            Self::EnumInt8 => "enum int8",
            Self::EnumInt16 => "enum int16",
            Self::EnumInt32 => "enum int32",
            Self::EnumInt64 => "enum int64",
            Self::EnumUint8 => "enum uint8",
            Self::EnumUint16 => "enum uint16",
            Self::EnumUint32 => "enum uint32",
            Self::EnumUint64 => "enum uint64",
            Self::Ptr => "pointer",
            Self::Struct => "struct",
            other => other.builtin_name().unwrap_or("?"),
        }
    }
}

// =======================================================================
// Flags
// =======================================================================

/// Type descriptor flags.
pub mod type_flags {
    /// Type (transitively) holds strings, pointers or arrays.
    pub const HAS_SUBDATA: u32 = 1 << 0;
    /// Type is defined outside generated code.
    pub const IS_EXTERNAL: u32 = 1 << 1;
    /// Type is a union.
    pub const IS_UNION: u32 = 1 << 2;
    /// External size/alignment should be verified by generated code.
    pub const VERIFY_EXTERNAL_SIZE_ALIGN: u32 = 1 << 3;
}

/// Member descriptor flags.
pub mod member_flags {
    pub const IS_CONST: u32 = 1 << 0;
    pub const VERIFY_EXTERNAL_SIZE_OFFSET: u32 = 1 << 1;
}

// =======================================================================
// Descriptors
// =======================================================================

/// A struct or union type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDesc {
    pub id: TypeId,
    pub name: String,
    pub comment: Option<String>,
    pub flags: u32,
    /// Per pointer width (see [`PtrSize::index`]).
    pub size: [u32; 2],
    pub alignment: [u32; 2],
    /// First member in the registry's member table.
    pub member_start: u32,
    pub member_count: u32,
}

impl TypeDesc {
    pub fn is_union(&self) -> bool {
        self.flags & type_flags::IS_UNION != 0
    }

    pub fn is_external(&self) -> bool {
        self.flags & type_flags::IS_EXTERNAL != 0
    }

    pub fn has_subdata(&self) -> bool {
        self.flags & type_flags::HAS_SUBDATA != 0
    }

    pub fn size(&self, ptr: PtrSize) -> u32 {
        self.size[ptr.index()]
    }

    pub fn alignment(&self, ptr: PtrSize) -> u32 {
        self.alignment[ptr.index()]
    }

    pub fn member_range(&self) -> std::ops::Range<usize> {
        let start = self.member_start as usize;
        start..start + self.member_count as usize
    }
}

/// One member of a [`TypeDesc`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDesc {
    pub name: String,
    pub comment: Option<String>,
    pub atom: Atom,
    pub storage: Storage,
    /// Referenced struct/enum type, 0 for builtins.
    pub type_id: TypeId,
    pub size: [u32; 2],
    pub alignment: [u32; 2],
    pub offset: [u32; 2],
    /// Element count of an inline array.
    pub inline_count: u32,
    /// Bit width of a bitfield.
    pub bits: u32,
    /// Bit offset of a bitfield inside its group, counted from the least
    /// significant bit.
    pub bit_offset: u32,
    pub flags: u32,
    /// Value used when text omits this member.
    pub default: Option<Value>,
}

impl MemberDesc {
    pub(crate) fn new(name: impl Into<String>, atom: Atom, storage: Storage) -> Self {
        Self {
            name: name.into(),
            comment: None,
            atom,
            storage,
            type_id: 0,
            size: [0; 2],
            alignment: [0; 2],
            offset: [0; 2],
            inline_count: 0,
            bits: 0,
            bit_offset: 0,
            flags: 0,
            default: None,
        }
    }

    pub fn size(&self, ptr: PtrSize) -> u32 {
        self.size[ptr.index()]
    }

    pub fn alignment(&self, ptr: PtrSize) -> u32 {
        self.alignment[ptr.index()]
    }

    pub fn offset(&self, ptr: PtrSize) -> u32 {
        self.offset[ptr.index()]
    }

    pub fn is_const(&self) -> bool {
        self.flags & member_flags::IS_CONST != 0
    }

    /// Packed 32-bit type tag as stored in binary type libraries.
    pub fn type_tag(&self) -> u32 {
        let mut tag = (self.atom as u32) | ((self.storage as u32) << 8);
        match self.atom {
            Atom::Bitfield => {
                tag |= (self.bits & 0xFF) << 16;
                tag |= (self.bit_offset & 0xFF) << 24;
            }
            Atom::InlineArray => tag |= (self.inline_count & 0xFFFF) << 16,
            Atom::Pod | Atom::Array => {}
        }
        tag
    }

    /// Unpack a type tag into this member.
    pub(crate) fn apply_type_tag(&mut self, tag: u32) -> Option<()> {
        self.atom = Atom::from_u8((tag & 0xFF) as u8)?;
        self.storage = Storage::from_u8(((tag >> 8) & 0xFF) as u8)?;
        match self.atom {
            Atom::Bitfield => {
                self.bits = (tag >> 16) & 0xFF;
                self.bit_offset = (tag >> 24) & 0xFF;
            }
            Atom::InlineArray => self.inline_count = tag >> 16,
            Atom::Pod | Atom::Array => {}
        }
        Some(())
    }

    /// Size of a single element for arrays, the member size otherwise.
    pub fn element_size(&self, ptr: PtrSize) -> u32 {
        match self.atom {
            Atom::InlineArray if self.inline_count > 0 => self.size(ptr) / self.inline_count,
            _ => self.size(ptr),
        }
    }
}

/// An enum type.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDesc {
    pub id: TypeId,
    pub name: String,
    pub comment: Option<String>,
    pub flags: u32,
    pub storage: Storage,
    pub value_start: u32,
    pub value_count: u32,
    pub alias_start: u32,
    pub alias_count: u32,
}

impl EnumDesc {
    pub fn is_external(&self) -> bool {
        self.flags & type_flags::IS_EXTERNAL != 0
    }

    pub fn value_range(&self) -> std::ops::Range<usize> {
        let start = self.value_start as usize;
        start..start + self.value_count as usize
    }

    pub fn alias_range(&self) -> std::ops::Range<usize> {
        let start = self.alias_start as usize;
        start..start + self.alias_count as usize
    }
}

/// One value of an enum. Signed values are stored sign-extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumValue {
    pub value: u64,
    /// Index into the registry alias table of the value's primary name.
    pub main_alias: u32,
}

/// A name for an enum value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumAlias {
    pub name: String,
    /// Index into the registry value table.
    pub value_index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_roundtrip_bitfield() {
        let mut member = MemberDesc::new("flags", Atom::Bitfield, Storage::Uint16);
        member.bits = 5;
        member.bit_offset = 3;
        let tag = member.type_tag();
        assert_eq!(tag & 0xFF, Atom::Bitfield as u32);
        assert_eq!((tag >> 8) & 0xFF, Storage::Uint16 as u32);

        let mut decoded = MemberDesc::new("flags", Atom::Pod, Storage::Int8);
        decoded.apply_type_tag(tag).expect("valid tag");
        assert_eq!(decoded.atom, Atom::Bitfield);
        assert_eq!(decoded.storage, Storage::Uint16);
        assert_eq!(decoded.bits, 5);
        assert_eq!(decoded.bit_offset, 3);
    }

    #[test]
    fn test_type_tag_inline_count() {
        let mut member = MemberDesc::new("arr", Atom::InlineArray, Storage::Fp32);
        member.inline_count = 1000;
        let mut decoded = MemberDesc::new("arr", Atom::Pod, Storage::Int8);
        decoded.apply_type_tag(member.type_tag()).expect("valid tag");
        assert_eq!(decoded.inline_count, 1000);
        assert!(decoded.apply_type_tag(0xFF).is_none());
    }

    #[test]
    fn test_storage_properties() {
        assert!(Storage::EnumUint16.is_enum());
        assert!(!Storage::Uint16.is_enum());
        assert!(Storage::EnumInt8.is_signed());
        assert_eq!(Storage::Str.pod_size(PtrSize::Ptr32), Some(4));
        assert_eq!(Storage::Ptr.pod_size(PtrSize::Ptr64), Some(8));
        assert_eq!(Storage::Struct.pod_size(PtrSize::Ptr64), None);
        assert_eq!(Storage::Uint8.int_bounds(), Some((0, 255)));
        assert_eq!(Storage::from_u8(20), Some(Storage::Struct));
        assert_eq!(Storage::from_u8(21), None);
        assert_eq!(Storage::from_builtin_name("fp64"), Some(Storage::Fp64));
    }

    #[test]
    fn test_ptr_size_null_offsets() {
        assert_eq!(PtrSize::Ptr32.null_offset(), 0xFFFF_FFFF);
        assert_eq!(PtrSize::Ptr64.null_offset(), u64::MAX);
        assert_eq!(PtrSize::from_bytes(8), Some(PtrSize::Ptr64));
        assert_eq!(PtrSize::from_bytes(2), None);
    }
}
