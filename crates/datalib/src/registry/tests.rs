// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::*;
use crate::config::{NO_DEFAULT_VALUE, NO_STRING, TYPELIB_MEMBER_DESC_SIZE, TYPELIB_TYPE_DESC_SIZE};
use crate::error::{DlError, SchemaErrorKind};
use crate::instance::Value;

const LIB: &str = r#"{
    "module": "test",
    "enums": {
        "Mode": {
            "type": "int8",
            "values": {
                "OFF": 0,
                "ON": { "value": 1, "aliases": ["ENABLED"] },
                "BROKEN": -1
            }
        },
        "Sizes": { "values": { "SMALL": 2, "LARGE": 4 } }
    },
    "types": {
        // Embedded before declaration order on purpose.
        "Outer": { "members": [
            { "name": "tag", "type": "uint8" },
            { "name": "inner", "type": "Inner" },
            { "name": "mode", "type": "Mode", "default": "ON" },
            { "name": "slots", "type": "int16[LARGE]" }
        ] },
        "Inner": { "members": [
            { "name": "a", "type": "int8" },
            { "name": "b", "type": "int32", "default": 12 },
            { "name": "name", "type": "string", "default": "inner" }
        ] },
        "Flags": { "members": [
            { "name": "x", "type": "bitfield:3" },
            { "name": "y", "type": "bitfield:5" },
            { "name": "z", "type": "bitfield:8" },
            { "name": "after", "type": "uint8" }
        ] },
        "List": { "align": 16, "members": [
            { "name": "items", "type": "Inner[]" },
            { "name": "next", "type": "List*" }
        ] }
    },
    "unions": {
        "Either": { "members": [
            { "name": "small", "type": "uint8" },
            { "name": "big", "type": "fp64" }
        ] }
    }
}"#;

fn lib() -> Registry {
    Registry::from_text(LIB).expect("test library")
}

fn schema_kind(err: &DlError) -> Option<SchemaErrorKind> {
    match err {
        DlError::Schema(e) => Some(e.kind),
        _ => None,
    }
}

#[test]
fn test_struct_layout_both_widths() {
    let registry = lib();
    let inner = registry.find_type("Inner").expect("Inner");
    assert_eq!(inner.size(PtrSize::Ptr32), 12);
    assert_eq!(inner.size(PtrSize::Ptr64), 16);
    assert_eq!(inner.alignment(PtrSize::Ptr64), 8);

    let members = registry.members(inner);
    assert_eq!(members[1].offset(PtrSize::Ptr32), 4);
    assert_eq!(members[2].offset(PtrSize::Ptr32), 8);
    assert_eq!(members[2].offset(PtrSize::Ptr64), 8);
    assert!(inner.has_subdata());
}

#[test]
fn test_embedded_types_are_laid_out_first() {
    let registry = lib();
    let outer = registry.find_type("Outer").expect("Outer");
    let members = registry.members(outer);
    // tag, pad, inner(16 @ 8), mode, pad, slots int16[4]
    assert_eq!(members[1].offset(PtrSize::Ptr64), 8);
    assert_eq!(members[2].offset(PtrSize::Ptr64), 24);
    assert_eq!(members[3].offset(PtrSize::Ptr64), 26);
    assert_eq!(members[3].inline_count, 4);
    assert_eq!(outer.size(PtrSize::Ptr64), 40);
    assert!(outer.has_subdata());
}

#[test]
fn test_enum_members_take_enum_storage() {
    let registry = lib();
    let outer = registry.find_type("Outer").expect("Outer");
    let mode = &registry.members(outer)[2];
    assert_eq!(mode.storage, Storage::EnumInt8);
    assert_eq!(mode.size(PtrSize::Ptr32), 1);
    assert_eq!(mode.default, Some(Value::Enum(1)));

    let e = registry.find_enum("Mode").expect("Mode");
    assert_eq!(registry.enum_value_by_alias(e, "ENABLED"), Some(1));
    assert_eq!(registry.enum_value_name(e, 1), Some("ON"));
    assert_eq!(registry.enum_value_name(e, u64::MAX), Some("BROKEN"));
    assert_eq!(registry.find_enum_value("LARGE"), Some(4));
}

#[test]
fn test_bitfield_group_layout() {
    let registry = lib();
    let flags = registry.find_type("Flags").expect("Flags");
    let members = registry.members(flags);
    assert_eq!(members[0].storage, Storage::Uint16);
    assert_eq!(members[1].bit_offset, 3);
    assert_eq!(members[2].bit_offset, 8);
    assert!(members[..3].iter().all(|m| m.offset(PtrSize::Ptr32) == 0));
    assert_eq!(members[3].offset(PtrSize::Ptr32), 2);
    assert_eq!(flags.size(PtrSize::Ptr64), 4);
}

#[test]
fn test_array_pointer_and_align_key() {
    let registry = lib();
    let list = registry.find_type("List").expect("List");
    let members = registry.members(list);
    assert_eq!(members[0].size, [8, 16]);
    assert_eq!(members[0].alignment, [4, 8]);
    assert_eq!(members[1].storage, Storage::Ptr);
    assert_eq!(members[1].offset, [8, 16]);
    assert_eq!(list.alignment, [16, 16]);
    assert_eq!(list.size, [16, 32]);
}

#[test]
fn test_union_layout_and_tags() {
    let registry = lib();
    let either = registry.find_type("Either").expect("Either");
    assert!(either.is_union());
    let members = registry.members(either);
    assert!(members.iter().all(|m| m.offset == [0, 0]));
    assert_eq!(union_tag_offset(members, PtrSize::Ptr64), 8);
    assert_eq!(either.size(PtrSize::Ptr64), 16);
    assert_eq!(
        registry.union_member_by_tag(either, hash_name("big")),
        Some(1)
    );
    assert_eq!(registry.union_member_by_tag(either, 1234), None);
}

#[test]
fn test_defaults_are_compiled() {
    let registry = lib();
    let inner = registry.find_type("Inner").expect("Inner");
    let members = registry.members(inner);
    assert_eq!(members[0].default, None);
    assert_eq!(members[1].default, Some(Value::I32(12)));
    assert_eq!(members[2].default, Some(Value::Str(Some("inner".into()))));
}

#[test]
fn test_lookup_by_id_and_name() {
    let registry = lib();
    let by_name = registry.find_type("Inner").expect("by name");
    let by_id = registry.find_type(hash_name("Inner")).expect("by id");
    assert_eq!(by_name.id, by_id.id);
    assert!(registry.find_type("Mode").is_none());
    assert!(registry.find_enum("Mode").is_some());
    assert_eq!(registry.types().len(), 5);
    assert_eq!(registry.enums().len(), 2);
}

#[test]
fn test_unknown_member_type_reports_location() {
    let src = "{ \"types\": {\n  \"A\": { \"members\": [\n    { \"name\": \"b\", \"type\": \"Missing\" }\n  ] }\n} }";
    let err = Registry::from_text(src).expect_err("unknown type");
    assert_eq!(schema_kind(&err), Some(SchemaErrorKind::TypeNotFound));
    assert_eq!(err.location().map(|l| l.line), Some(3));
}

#[test]
fn test_schema_errors() {
    let cases = [
        (r#"{ "types": { "A": { "members": [] } } }"#, SchemaErrorKind::MissingMembers),
        (
            r#"{ "types": { "A": { "members": [ { "name": "p", "type": "int32*" } ] } } }"#,
            SchemaErrorKind::InvalidType,
        ),
        (
            r#"{ "types": { "A": { "members": [
                { "name": "a", "type": "bitfield:40" },
                { "name": "b", "type": "bitfield:30" } ] } } }"#,
            SchemaErrorKind::InvalidBitfield,
        ),
        (r#"{ "structs": {} }"#, SchemaErrorKind::UnexpectedKey),
        (
            r#"{ "types": { "A": { "members": [
                { "name": "a", "type": "int8" },
                { "name": "a", "type": "int8" } ] } } }"#,
            SchemaErrorKind::DuplicateName,
        ),
        (
            r#"{ "types": { "A": { "members": [ { "name": "a", "type": "int8", "default": 300 } ] } } }"#,
            SchemaErrorKind::InvalidDefault,
        ),
        (
            r#"{ "types": { "A": { "members": [ { "name": "a", "type": "int8[NOPE]" } ] } } }"#,
            SchemaErrorKind::InvalidEnumValue,
        ),
        (
            r#"{ "types": { "A": { "members": [ { "name": "a", "type": "A" } ] } } }"#,
            SchemaErrorKind::InvalidType,
        ),
        (r#"{ "types": { "A": "#, SchemaErrorKind::Syntax),
    ];
    for (src, kind) in cases {
        let err = Registry::from_text(src).expect_err(src);
        assert_eq!(schema_kind(&err), Some(kind), "{}", src);
    }
}

#[test]
fn test_failed_merge_leaves_registry_unchanged() {
    let mut registry = lib();
    let before = registry.types().len();
    let err = registry
        .load_text(r#"{ "types": { "Fresh": { "members": [ { "name": "a", "type": "int8" } ] },
                                   "Inner": { "members": [ { "name": "a", "type": "int8" } ] } } }"#)
        .expect_err("duplicate");
    assert_eq!(schema_kind(&err), Some(SchemaErrorKind::DuplicateName));
    assert_eq!(registry.types().len(), before);
    assert!(registry.find_type("Fresh").is_none());

    registry
        .load_text(r#"{ "types": { "Extra": { "members": [ { "name": "i", "type": "Inner" } ] } } }"#)
        .expect("merge referencing earlier library");
    let extra = registry.find_type("Extra").expect("Extra");
    assert_eq!(extra.size(PtrSize::Ptr64), 16);
}

#[test]
fn test_binary_library_round_trip() {
    let registry = lib();
    let bytes = registry.write_binary().expect("write");
    let loaded = Registry::from_binary(&bytes).expect("load");

    assert_eq!(loaded.types(), registry.types());
    assert_eq!(loaded.enums(), registry.enums());
    for ty in registry.types() {
        let other = loaded.find_type(ty.id).expect("same type");
        assert_eq!(loaded.members(other), registry.members(ty));
    }
    let either = loaded.find_type("Either").expect("Either");
    assert_eq!(loaded.union_member_by_tag(either, hash_name("small")), Some(0));

    let e = loaded.find_enum("Mode").expect("Mode");
    assert_eq!(loaded.enum_value_by_alias(e, "ENABLED"), Some(1));
}

#[test]
fn test_binary_library_merge_and_duplicates() {
    let a = Registry::from_text(r#"{ "types": { "A": { "members": [ { "name": "x", "type": "int8" } ] } } }"#)
        .expect("A");
    let b = Registry::from_text(r#"{ "types": { "B": { "members": [ { "name": "y", "type": "int64" } ] } } }"#)
        .expect("B");

    let mut merged = Registry::new();
    merged.load_binary(&a.write_binary().expect("a")).expect("load a");
    merged.load_binary(&b.write_binary().expect("b")).expect("load b");
    assert!(merged.find_type("A").is_some());
    assert!(merged.find_type("B").is_some());

    let err = merged
        .load_binary(&a.write_binary().expect("a"))
        .expect_err("A twice");
    assert_eq!(schema_kind(&err), Some(SchemaErrorKind::DuplicateName));
    assert_eq!(merged.types().len(), 2);
}

#[test]
fn test_binary_library_rejects_bad_input() {
    let bytes = lib().write_binary().expect("write");

    let err = Registry::from_binary(&bytes[..10]).expect_err("short");
    assert_eq!(schema_kind(&err), Some(SchemaErrorKind::MalformedLibrary));

    let err = Registry::from_binary(&bytes[..bytes.len() - 3]).expect_err("truncated");
    assert_eq!(schema_kind(&err), Some(SchemaErrorKind::MalformedLibrary));

    let mut bad_magic = bytes.clone();
    bad_magic[0] ^= 0xFF;
    let err = Registry::from_binary(&bad_magic).expect_err("magic");
    assert_eq!(schema_kind(&err), Some(SchemaErrorKind::MalformedLibrary));

    let mut bad_version = bytes;
    bad_version[4] = 99;
    let err = Registry::from_binary(&bad_version).expect_err("version");
    assert_eq!(schema_kind(&err), Some(SchemaErrorKind::VersionMismatch));
}

#[test]
fn test_limits_travel_with_registry() {
    let limits = CodecLimits {
        max_tracked_pointers: 4,
        ..CodecLimits::default()
    };
    let mut registry = Registry::with_limits(limits);
    assert_eq!(registry.limits().max_tracked_pointers, 4);
    registry.set_limits(CodecLimits::unbounded());
    assert!(registry.limits().max_tracked_pointers > 4);
}

#[test]
fn test_binary_library_golden_bytes() {
    let registry =
        Registry::from_text(r#"{ "types": { "A": { "members": [ { "name": "x", "type": "int8" } ] } } }"#)
            .expect("A");
    assert_eq!(hash_name("A"), 0x0002_A0E1);

    #[rustfmt::skip]
    let words: [u32; 32] = [
        // header
        0x444C_544C, 4, 1, 0, 1, 0, 0, 0, 4,
        // type ids
        0x0002_A0E1,
        // A: name, flags, size[2], alignment[2], member_count, member_start, comment
        0, 0, 1, 1, 1, 1, 1, 0, NO_STRING,
        // x: name, comment, type_tag, type_id, size[2], alignment[2], offset[2],
        //    default_offset, default_size, flags (const, verify)
        2, NO_STRING, 0, 0, 1, 1, 1, 1, 0, 0, NO_DEFAULT_VALUE, 0, 3,
    ];
    let mut golden: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    golden.extend_from_slice(b"A\0x\0");
    assert_eq!(golden.len(), 132);
    assert_eq!(&golden[..4], b"LTLD");

    let bytes = registry.write_binary().expect("write");
    assert_eq!(bytes, golden);

    let types = 36 + 4;
    let members = types + TYPELIB_TYPE_DESC_SIZE;
    assert_eq!(TYPELIB_MEMBER_DESC_SIZE, 52);
    assert_eq!(members + TYPELIB_MEMBER_DESC_SIZE + 4, bytes.len());

    let loaded = Registry::from_binary(&golden).expect("golden");
    let a = loaded.find_type("A").expect("A");
    assert_eq!(loaded.members(a), registry.members(registry.find_type("A").expect("A")));
}

/// `Bits { a: bitfield:3, b: bitfield:5 }` in a one-type library: the type
/// descriptor starts at 40, members at 76 with a 52 byte stride.
fn bitfield_lib() -> Vec<u8> {
    Registry::from_text(
        r#"{ "types": { "Bits": { "members": [
            { "name": "a", "type": "bitfield:3" },
            { "name": "b", "type": "bitfield:5" }
        ] } } }"#,
    )
    .expect("Bits")
    .write_binary()
    .expect("write")
}

const BITS_MEMBER_COUNT: usize = 40 + 6 * 4;
const BITS_MEMBER_START: usize = 40 + 7 * 4;
const BITS_MEMBER_A: usize = 76;
const BITS_MEMBER_B: usize = 76 + 52;

fn put_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn expect_malformed(bytes: &[u8], what: &str) {
    let err = Registry::from_binary(bytes).expect_err(what);
    assert_eq!(
        schema_kind(&err),
        Some(SchemaErrorKind::MalformedLibrary),
        "{}: {}",
        what,
        err
    );
}

#[test]
fn test_binary_library_checks_member_ranges() {
    let bytes = bitfield_lib();
    Registry::from_binary(&bytes).expect("untouched library loads");

    let mut empty = bytes.clone();
    put_u32(&mut empty, BITS_MEMBER_COUNT, 0);
    expect_malformed(&empty, "zero members");

    let mut past_end = bytes.clone();
    put_u32(&mut past_end, BITS_MEMBER_START, 1);
    expect_malformed(&past_end, "member range past the table");

    let mut huge = bytes;
    put_u32(&mut huge, BITS_MEMBER_COUNT, u32::MAX);
    expect_malformed(&huge, "member count overflow");
}

#[test]
fn test_binary_library_checks_bitfields() {
    let bytes = bitfield_lib();
    // Type tag bytes: atom, storage, bits, bit_offset.
    assert_eq!(bytes[BITS_MEMBER_A + 8], Atom::Bitfield as u8);
    assert_eq!(bytes[BITS_MEMBER_A + 10], 3);
    assert_eq!(bytes[BITS_MEMBER_B + 10], 5);
    assert_eq!(bytes[BITS_MEMBER_B + 11], 3);

    let mut no_bits = bytes.clone();
    no_bits[BITS_MEMBER_A + 10] = 0;
    expect_malformed(&no_bits, "zero width");

    let mut too_wide = bytes.clone();
    too_wide[BITS_MEMBER_A + 10] = 65;
    expect_malformed(&too_wide, "65 bits");

    // 4 + 5 bits no longer fit the one byte unit.
    let mut overflow = bytes.clone();
    overflow[BITS_MEMBER_B + 11] = 4;
    expect_malformed(&overflow, "past the unit");

    let mut odd_unit = bytes.clone();
    put_u32(&mut odd_unit, BITS_MEMBER_A + 16, 3);
    put_u32(&mut odd_unit, BITS_MEMBER_A + 20, 3);
    expect_malformed(&odd_unit, "three byte unit");

    let mut split_unit = bytes.clone();
    put_u32(&mut split_unit, BITS_MEMBER_A + 16, 1);
    put_u32(&mut split_unit, BITS_MEMBER_A + 20, 2);
    expect_malformed(&split_unit, "unit differs per pointer width");

    let mut mixed = bytes;
    put_u32(&mut mixed, BITS_MEMBER_B + 16, 2);
    put_u32(&mut mixed, BITS_MEMBER_B + 20, 2);
    expect_malformed(&mixed, "group disagrees on its unit");
}
