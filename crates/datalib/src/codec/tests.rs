// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::*;
use crate::config::{CodecLimits, INSTANCE_HEADER_SIZE};
use crate::error::{CapacityError, DlError, FormatError};
use crate::instance::{Instance, NodeId, Value};
use crate::registry::{Endian, Format, PtrSize, Registry, TypeId};

const SCHEMA: &str = r#"{
    "enums": {
        "Mode": { "type": "int16", "values": { "IDLE": 0, "RUN": 5, "BACK": -2 } }
    },
    "types": {
        "Point": { "members": [
            { "name": "x", "type": "int32" },
            { "name": "y", "type": "int32" }
        ] },
        "Node": { "members": [
            { "name": "value", "type": "int32" },
            { "name": "next", "type": "Node*" },
            { "name": "label", "type": "string" }
        ] },
        "Bag": { "members": [
            { "name": "id", "type": "uint16" },
            { "name": "name", "type": "string" },
            { "name": "nums", "type": "int32[]" },
            { "name": "points", "type": "Point[]" },
            { "name": "fixed", "type": "uint8[3]" },
            { "name": "a", "type": "bitfield:3" },
            { "name": "b", "type": "bitfield:5" },
            { "name": "c", "type": "bitfield:12" },
            { "name": "mode", "type": "Mode" },
            { "name": "d", "type": "fp64" },
            { "name": "either", "type": "Either" },
            { "name": "words", "type": "string[]" },
            { "name": "head", "type": "Node*" },
            { "name": "tail", "type": "Node*" }
        ] }
    },
    "unions": {
        "Either": { "members": [
            { "name": "i", "type": "int32" },
            { "name": "s", "type": "string" }
        ] }
    }
}"#;

const FORMATS: [Format; 4] = [
    Format::new(Endian::Little, PtrSize::Ptr32),
    Format::new(Endian::Little, PtrSize::Ptr64),
    Format::new(Endian::Big, PtrSize::Ptr32),
    Format::new(Endian::Big, PtrSize::Ptr64),
];

fn registry() -> Registry {
    Registry::from_text(SCHEMA).expect("test schema")
}

fn tid(registry: &Registry, name: &str) -> TypeId {
    registry.type_id_by_name(name).expect("type id")
}

fn point(x: i32, y: i32) -> Value {
    Value::Struct(vec![Value::I32(x), Value::I32(y)])
}

fn node(value: i32, next: Option<NodeId>, label: &str) -> Value {
    Value::Struct(vec![
        Value::I32(value),
        Value::Ptr(next),
        Value::Str(Some(label.to_string())),
    ])
}

/// A `Bag` exercising every member kind, with `head` and `tail` aliasing
/// the same node and a two-node cycle behind it.
fn bag(registry: &Registry) -> Instance {
    let node_t = tid(registry, "Node");
    let mut inst = Instance::new(tid(registry, "Bag"), Value::Struct(vec![]));
    let first = inst.add_node(node_t, Value::Struct(vec![]));
    let second = inst.add_node(node_t, node(2, Some(first), "second"));
    if let Some(n) = inst.node_mut(first) {
        n.value = node(1, Some(second), "first");
    }
    *inst.root_mut() = Value::Struct(vec![
        Value::U16(0xBEEF),
        Value::Str(Some("bag of things".into())),
        Value::Array(vec![Value::I32(-1), Value::I32(0), Value::I32(1 << 30)]),
        Value::Array(vec![point(1, 2), point(-3, 4)]),
        Value::Array(vec![Value::U8(7), Value::U8(8), Value::U8(9)]),
        Value::Bits(5),
        Value::Bits(17),
        Value::Bits(0xABC),
        Value::Enum(-2i64 as u64),
        Value::F64(2.5),
        Value::Union {
            member: 1,
            value: Box::new(Value::Str(Some("in union".into()))),
        },
        Value::Array(vec![
            Value::Str(Some("alpha".into())),
            Value::Str(None),
            Value::Str(Some(String::new())),
        ]),
        Value::Ptr(Some(first)),
        Value::Ptr(Some(first)),
    ]);
    inst
}

fn host(ptr: PtrSize) -> Format {
    Format::new(Endian::host(), ptr)
}

fn capacity(err: &DlError) -> Option<&CapacityError> {
    match err {
        DlError::Capacity(c) => Some(c),
        _ => None,
    }
}

// =======================================================================
// Store / load
// =======================================================================

#[test]
fn test_point_bytes() {
    let registry = registry();
    let point_t = tid(&registry, "Point");
    let inst = Instance::new(point_t, point(3, 4));

    let bytes = store(&registry, point_t, &inst, Format::host()).expect("store");
    assert_eq!(bytes.len(), INSTANCE_HEADER_SIZE + 8);
    assert!(is_instance(&bytes));

    let info = instance_info(&bytes).expect("info");
    assert_eq!(info.root_type, point_t);
    assert_eq!(info.load_size, 28);
    assert_eq!(info.endian, Endian::host());

    let mut x = [0u8; 4];
    x.copy_from_slice(&bytes[20..24]);
    assert_eq!(i32::from_ne_bytes(x), 3);

    let big = store(&registry, point_t, &inst, FORMATS[2]).expect("store big");
    assert_eq!(&big[20..24], &3i32.to_be_bytes());
    assert_eq!(&big[24..28], &4i32.to_be_bytes());
}

#[test]
fn test_point_golden_bytes() {
    let registry = registry();
    let point_t = tid(&registry, "Point");
    assert_eq!(point_t, 0x0DE5_3ECA);
    let inst = Instance::new(point_t, point(3, 4));

    #[rustfmt::skip]
    let little64: [u8; 28] = [
        0x4C, 0x44, 0x4C, 0x44, // "DLDL"
        0x01, 0x00, 0x00, 0x00, // version
        0xCA, 0x3E, 0xE5, 0x0D, // root type
        0x08, 0x00, 0x00, 0x00, // instance size
        0x01, 0x00, 0x00, 0x00, // 64-bit pointers, padding
        0x03, 0x00, 0x00, 0x00, // x
        0x04, 0x00, 0x00, 0x00, // y
    ];
    #[rustfmt::skip]
    let big32: [u8; 28] = [
        0x44, 0x4C, 0x44, 0x4C,
        0x00, 0x00, 0x00, 0x01,
        0x0D, 0xE5, 0x3E, 0xCA,
        0x00, 0x00, 0x00, 0x08,
        0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x03,
        0x00, 0x00, 0x00, 0x04,
    ];

    let bytes = store(&registry, point_t, &inst, FORMATS[1]).expect("store little");
    assert_eq!(bytes, little64);
    let bytes = store(&registry, point_t, &inst, FORMATS[2]).expect("store big");
    assert_eq!(bytes, big32);

    let info = instance_info(&big32).expect("golden info");
    assert_eq!(info.root_type, point_t);
    assert_eq!(info.endian, Endian::Big);
    assert_eq!(info.ptr_size, PtrSize::Ptr32);
    assert_eq!(info.load_size, 28);
    let converted = convert(&registry, point_t, &big32, FORMATS[1]).expect("convert");
    assert_eq!(converted, little64);
}

#[test]
fn test_round_trip_both_pointer_widths() {
    let registry = registry();
    let bag_t = tid(&registry, "Bag");
    let inst = bag(&registry);

    for ptr in [PtrSize::Ptr32, PtrSize::Ptr64] {
        let bytes = store(&registry, bag_t, &inst, host(ptr)).expect("store");
        assert_eq!(
            calc_size(&registry, bag_t, &inst, host(ptr)).expect("calc"),
            bytes.len()
        );
        assert_eq!(instance_info(&bytes).expect("info").ptr_size, ptr);
        let loaded = load(&registry, bag_t, &bytes).expect("load");
        assert_eq!(loaded, inst);
    }
}

#[test]
fn test_aliasing_and_cycles_survive() {
    let registry = registry();
    let bag_t = tid(&registry, "Bag");
    let bytes = store(&registry, bag_t, &bag(&registry), Format::host()).expect("store");
    let loaded = load(&registry, bag_t, &bytes).expect("load");

    assert_eq!(loaded.node_count(), 3);
    let members = loaded.root().as_members().expect("struct");
    let (Value::Ptr(Some(head)), Value::Ptr(Some(tail))) = (&members[12], &members[13]) else {
        panic!("head and tail must be set");
    };
    assert_eq!(head, tail);

    let first = loaded.node(*head).expect("first node");
    let Value::Ptr(Some(second)) = first.value.as_members().expect("node")[1] else {
        panic!("first.next must be set");
    };
    let back = loaded.node(second).expect("second node").value.as_members().expect("node")[1].clone();
    assert_eq!(back, Value::Ptr(Some(*head)));
}

#[test]
fn test_shared_target_is_stored_once() {
    let registry = registry();
    let bag_t = tid(&registry, "Bag");
    let node_t = tid(&registry, "Node");
    let shared = bag(&registry);

    // Same graph, but `tail` gets its own copy of the first node.
    let mut copied = shared.clone();
    let Some(Value::Ptr(Some(first))) = copied.root().as_members().map(|m| m[12].clone()) else {
        panic!("head must be set");
    };
    let first_value = copied.node(first).expect("first").value.clone();
    let copy = copied.add_node(node_t, first_value);
    if let Value::Struct(members) = copied.root_mut() {
        members[13] = Value::Ptr(Some(copy));
    }

    let a = calc_size(&registry, bag_t, &shared, Format::host()).expect("shared");
    let b = calc_size(&registry, bag_t, &copied, Format::host()).expect("copied");
    assert!(a < b);
}

#[test]
fn test_pointer_to_root() {
    let registry = registry();
    let node_t = tid(&registry, "Node");
    let inst = Instance::new(node_t, node(9, Some(NodeId::ROOT), "self"));

    let bytes = store(&registry, node_t, &inst, Format::host()).expect("store");
    let loaded = load(&registry, node_t, &bytes).expect("load");
    assert_eq!(loaded.node_count(), 1);
    assert_eq!(loaded.root().as_members().expect("node")[1], Value::Ptr(Some(NodeId::ROOT)));
}

#[test]
fn test_empty_array_and_null_string() {
    let registry = registry();
    let bag_t = tid(&registry, "Bag");
    let mut inst = bag(&registry);
    if let Value::Struct(members) = inst.root_mut() {
        members[1] = Value::Str(None);
        members[2] = Value::Array(vec![]);
        members[11] = Value::Array(vec![]);
        members[12] = Value::Ptr(None);
        members[13] = Value::Ptr(None);
    }
    let bytes = store(&registry, bag_t, &inst, Format::host()).expect("store");
    let loaded = load(&registry, bag_t, &bytes).expect("load");
    assert_eq!(loaded, inst);
    assert_eq!(loaded.node_count(), 1);
}

#[test]
fn test_store_rejects_bad_values() {
    let registry = registry();
    let bag_t = tid(&registry, "Bag");

    let edit = |index: usize, value: Value| {
        let mut inst = bag(&registry);
        if let Value::Struct(members) = inst.root_mut() {
            members[index] = value;
        }
        store(&registry, bag_t, &inst, Format::host())
    };

    assert!(matches!(edit(0, Value::I32(1)), Err(DlError::InvalidInstance(_))));
    assert!(matches!(edit(5, Value::Bits(8)), Err(DlError::InvalidInstance(_))));
    assert!(matches!(edit(8, Value::Enum(4)), Err(DlError::InvalidInstance(_))));
    assert!(matches!(
        edit(4, Value::Array(vec![Value::U8(1)])),
        Err(DlError::InvalidInstance(_))
    ));
    assert!(matches!(
        edit(12, Value::Ptr(Some(NodeId(42)))),
        Err(DlError::InvalidInstance(_))
    ));

    let mut wrong_target = bag(&registry);
    let point_node = wrong_target.add_node(tid(&registry, "Point"), point(0, 0));
    if let Value::Struct(members) = wrong_target.root_mut() {
        members[13] = Value::Ptr(Some(point_node));
    }
    let err = store(&registry, bag_t, &wrong_target, Format::host()).expect_err("wrong node type");
    assert!(matches!(err, DlError::Format(FormatError::TypeMismatch { .. })));

    let point_t = tid(&registry, "Point");
    let err = store(&registry, point_t, &bag(&registry), Format::host()).expect_err("wrong root");
    assert!(matches!(err, DlError::Format(FormatError::TypeMismatch { .. })));
}

#[test]
fn test_store_into_caller_buffer() {
    let registry = registry();
    let point_t = tid(&registry, "Point");
    let inst = Instance::new(point_t, point(1, 2));

    let mut small = [0u8; 27];
    let err = store_into(&registry, point_t, &inst, Format::host(), &mut small).expect_err("small");
    assert_eq!(
        capacity(&err),
        Some(&CapacityError::BufferTooSmall { need: 28, have: 27 })
    );

    let mut big = [0u8; 64];
    let n = store_into(&registry, point_t, &inst, Format::host(), &mut big).expect("fits");
    assert_eq!(n, 28);
    assert_eq!(&big[..n], &store(&registry, point_t, &inst, Format::host()).expect("store")[..]);
}

// =======================================================================
// Header checks
// =======================================================================

#[test]
fn test_header_errors() {
    let registry = registry();
    let point_t = tid(&registry, "Point");
    let bytes = store(&registry, point_t, &Instance::new(point_t, point(1, 2)), Format::host())
        .expect("store");

    let mut bad = bytes.clone();
    bad[0] = b'X';
    assert!(!is_instance(&bad));
    let err = load(&registry, point_t, &bad).expect_err("magic");
    assert!(matches!(err, DlError::Format(FormatError::BadMagic { .. })));

    let mut bad = bytes.clone();
    bad[4] ^= 0x40;
    bad[7] ^= 0x40;
    let err = instance_info(&bad).expect_err("version");
    assert!(matches!(err, DlError::Format(FormatError::VersionMismatch { .. })));

    let err = load(&registry, point_t, &bytes[..25]).expect_err("truncated payload");
    assert_eq!(
        capacity(&err),
        Some(&CapacityError::BufferTooSmall { need: 28, have: 25 })
    );

    let err = instance_info(&bytes[..12]).expect_err("short header");
    assert!(matches!(err, DlError::Format(FormatError::Malformed(_))));

    let err = load(&registry, tid(&registry, "Node"), &bytes).expect_err("root type");
    assert!(matches!(
        err,
        DlError::Format(FormatError::TypeMismatch { found, .. }) if found == point_t
    ));
}

#[test]
fn test_load_requires_host_byte_order() {
    let registry = registry();
    let bag_t = tid(&registry, "Bag");
    let inst = bag(&registry);
    let foreign = Format::new(Endian::host().other(), PtrSize::Ptr64);
    let bytes = store(&registry, bag_t, &inst, foreign).expect("store");

    let err = load(&registry, bag_t, &bytes).expect_err("foreign order");
    assert_eq!(err, DlError::Format(FormatError::EndianMismatch));

    let native = convert(&registry, bag_t, &bytes, Format::host()).expect("convert");
    assert_eq!(load(&registry, bag_t, &native).expect("load"), inst);
}

// =======================================================================
// Convert
// =======================================================================

#[test]
fn test_convert_matches_direct_store() {
    let registry = registry();
    let bag_t = tid(&registry, "Bag");
    let inst = bag(&registry);

    for from in FORMATS {
        let src = store(&registry, bag_t, &inst, from).expect("store source");
        for to in FORMATS {
            let expected = store(&registry, bag_t, &inst, to).expect("store target");
            let converted = convert(&registry, bag_t, &src, to).expect("convert");
            assert_eq!(converted, expected, "{:?} -> {:?}", from, to);
            assert_eq!(
                convert_calc_size(&registry, bag_t, &src, to).expect("calc"),
                expected.len()
            );
        }
    }
}

#[test]
fn test_convert_same_format_returns_input() {
    let registry = registry();
    let bag_t = tid(&registry, "Bag");
    let mut bytes = store(&registry, bag_t, &bag(&registry), Format::host()).expect("store");
    let len = bytes.len();
    // Trailing bytes past the instance are not part of it.
    bytes.extend_from_slice(&[0xAA; 5]);
    let out = convert(&registry, bag_t, &bytes, Format::host()).expect("convert");
    assert_eq!(out, &bytes[..len]);
}

#[test]
fn test_convert_bitfields_across_byte_order() {
    let registry = registry();
    let bag_t = tid(&registry, "Bag");
    let inst = bag(&registry);
    let big = store(&registry, bag_t, &inst, FORMATS[3]).expect("big");
    let little = convert(&registry, bag_t, &big, FORMATS[1]).expect("to little");
    let back = convert(&registry, bag_t, &little, FORMATS[3]).expect("to big");
    assert_eq!(back, big);

    let native = convert(&registry, bag_t, &big, Format::host()).expect("host");
    let members = load(&registry, bag_t, &native).expect("load").root().clone();
    let members = members.as_members().expect("struct");
    assert_eq!(&members[5..8], &[Value::Bits(5), Value::Bits(17), Value::Bits(0xABC)]);
}

#[test]
fn test_convert_in_place() {
    let registry = registry();
    let bag_t = tid(&registry, "Bag");
    let inst = bag(&registry);

    let mut buf = store(&registry, bag_t, &inst, host(PtrSize::Ptr64)).expect("store 64");
    let expected = store(&registry, bag_t, &inst, host(PtrSize::Ptr32)).expect("store 32");
    let n = convert_in_place(&registry, bag_t, &mut buf, host(PtrSize::Ptr32)).expect("shrink");
    assert_eq!(&buf[..n], &expected[..]);

    let mut narrow = expected.clone();
    let err = convert_in_place(&registry, bag_t, &mut narrow, host(PtrSize::Ptr64))
        .expect_err("grow");
    assert!(matches!(err, DlError::Unsupported(_)));
    assert_eq!(narrow, expected);

    let swapped = Format::new(Endian::host().other(), PtrSize::Ptr32);
    let n = convert_in_place(&registry, bag_t, &mut narrow, swapped).expect("swap");
    assert_eq!(n, expected.len());
    assert_eq!(&narrow[..n], &store(&registry, bag_t, &inst, swapped).expect("store")[..]);
}

#[test]
fn test_convert_checks_root_type() {
    let registry = registry();
    let point_t = tid(&registry, "Point");
    let bytes = store(&registry, point_t, &Instance::new(point_t, point(1, 2)), Format::host())
        .expect("store");
    let err = convert(&registry, tid(&registry, "Bag"), &bytes, FORMATS[3]).expect_err("type");
    assert!(matches!(err, DlError::Format(FormatError::TypeMismatch { .. })));
}

// =======================================================================
// Limits
// =======================================================================

#[test]
fn test_tracked_pointer_limit() {
    let mut registry = registry();
    let node_t = tid(&registry, "Node");
    let mut inst = Instance::new(node_t, Value::Struct(vec![]));
    let c = inst.add_node(node_t, node(3, None, "c"));
    let b = inst.add_node(node_t, node(2, Some(c), "b"));
    *inst.root_mut() = node(1, Some(b), "a");
    let bytes = store(&registry, node_t, &inst, Format::host()).expect("default limits");

    // root, b and c: exactly at the limit
    registry.set_limits(CodecLimits {
        max_tracked_pointers: 3,
        ..CodecLimits::default()
    });
    assert_eq!(store(&registry, node_t, &inst, Format::host()).expect("at limit"), bytes);
    assert_eq!(load(&registry, node_t, &bytes).expect("load at limit"), inst);

    registry.set_limits(CodecLimits {
        max_tracked_pointers: 2,
        ..CodecLimits::default()
    });
    let err = store(&registry, node_t, &inst, Format::host()).expect_err("store limit");
    assert!(matches!(
        capacity(&err),
        Some(CapacityError::LimitExceeded { limit: 2, .. })
    ));
    let err = load(&registry, node_t, &bytes).expect_err("load limit");
    assert!(matches!(
        capacity(&err),
        Some(CapacityError::LimitExceeded { limit: 2, .. })
    ));

    // three nodes plus three labels
    registry.set_limits(CodecLimits {
        max_convert_instances: 6,
        ..CodecLimits::default()
    });
    convert(&registry, node_t, &bytes, FORMATS[2]).expect("convert at limit");
    registry.set_limits(CodecLimits {
        max_convert_instances: 5,
        ..CodecLimits::default()
    });
    let err = convert(&registry, node_t, &bytes, FORMATS[2]).expect_err("convert limit");
    assert!(matches!(
        capacity(&err),
        Some(CapacityError::LimitExceeded { limit: 5, .. })
    ));

    // two next pointers plus three labels
    registry.set_limits(CodecLimits {
        max_patch_positions: 5,
        ..CodecLimits::default()
    });
    convert(&registry, node_t, &bytes, FORMATS[2]).expect("patches at limit");
    registry.set_limits(CodecLimits {
        max_patch_positions: 4,
        ..CodecLimits::default()
    });
    let err = convert(&registry, node_t, &bytes, FORMATS[2]).expect_err("patch limit");
    assert!(matches!(
        capacity(&err),
        Some(CapacityError::LimitExceeded { limit: 4, .. })
    ));
}

#[test]
fn test_convert_limits() {
    let mut registry = registry();
    let bag_t = tid(&registry, "Bag");
    let bytes = store(&registry, bag_t, &bag(&registry), FORMATS[1]).expect("store");

    registry.set_limits(CodecLimits {
        max_convert_instances: 3,
        ..CodecLimits::default()
    });
    let err = convert(&registry, bag_t, &bytes, FORMATS[2]).expect_err("instances");
    assert!(matches!(
        capacity(&err),
        Some(CapacityError::LimitExceeded { limit: 3, .. })
    ));

    registry.set_limits(CodecLimits {
        max_patch_positions: 2,
        ..CodecLimits::default()
    });
    let err = convert(&registry, bag_t, &bytes, FORMATS[2]).expect_err("patches");
    assert!(matches!(
        capacity(&err),
        Some(CapacityError::LimitExceeded { limit: 2, .. })
    ));

    registry.set_limits(CodecLimits::unbounded());
    convert(&registry, bag_t, &bytes, FORMATS[2]).expect("unbounded");
}
