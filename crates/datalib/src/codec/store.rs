// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed instance to binary.
//!
//! The root struct occupies the first bytes of the payload. Everything else
//! (strings, array contents, pointer targets) is appended after it, each
//! block aligned for its contents. Each pointer target is written once:
//! further pointers to the same node reuse its offset, so aliasing and
//! cycles survive.

use super::header::DataHeader;
use super::writer::BinaryWriter;
use crate::config::INSTANCE_HEADER_SIZE;
use crate::error::{DlError, DlResult, FormatError};
use crate::hash::hash_name;
use crate::instance::{Instance, NodeId, Value};
use crate::registry::layout::{bitfield_mask, bitfield_shift};
use crate::registry::{
    union_tag_offset, Atom, Endian, Format, MemberDesc, PtrSize, Registry, Storage, TypeDesc,
    TypeId,
};
use std::collections::HashMap;

struct Encoder<'r, 'i> {
    registry: &'r Registry,
    instance: Option<&'i Instance>,
    w: BinaryWriter,
    placed: HashMap<NodeId, u64>,
}

impl<'r, 'i> Encoder<'r, 'i> {
    fn new(registry: &'r Registry, instance: Option<&'i Instance>, w: BinaryWriter) -> Self {
        Self {
            registry,
            instance,
            w,
            placed: HashMap::new(),
        }
    }

    fn ptr(&self) -> PtrSize {
        self.w.ptr_size()
    }

    fn find_type(&self, id: TypeId) -> DlResult<&'r TypeDesc> {
        self.registry
            .find_type(id)
            .ok_or_else(|| DlError::type_not_found(id))
    }

    /// Write `value` as an instance of `ty` at `base`.
    fn write_struct(&mut self, ty: &TypeDesc, value: &Value, base: usize) -> DlResult<()> {
        let registry = self.registry;
        let members = registry.members(ty);

        if ty.is_union() {
            let Value::Union { member, value } = value else {
                return Err(DlError::invalid_instance(format!(
                    "union {} given a {} value",
                    ty.name,
                    value.kind_name()
                )));
            };
            let m = members.get(*member as usize).ok_or_else(|| {
                DlError::invalid_instance(format!("union {} has no member #{}", ty.name, member))
            })?;
            self.write_member(m, value, base + m.offset(self.ptr()) as usize)?;
            self.w
                .seek(base + union_tag_offset(members, self.ptr()) as usize);
            self.w.write_u32(hash_name(&m.name));
            return Ok(());
        }

        let Value::Struct(values) = value else {
            return Err(DlError::invalid_instance(format!(
                "struct {} given a {} value",
                ty.name,
                value.kind_name()
            )));
        };
        if values.len() != members.len() {
            return Err(DlError::invalid_instance(format!(
                "struct {} has {} members, value has {}",
                ty.name,
                members.len(),
                values.len()
            )));
        }

        let mut i = 0;
        while i < members.len() {
            let m = &members[i];
            if m.atom == Atom::Bitfield {
                let group = members[i..]
                    .iter()
                    .take_while(|g| g.atom == Atom::Bitfield && g.offset == m.offset)
                    .count();
                self.write_bitfield_group(
                    &members[i..i + group],
                    &values[i..i + group],
                    base + m.offset(self.ptr()) as usize,
                )?;
                i += group;
            } else {
                self.write_member(m, &values[i], base + m.offset(self.ptr()) as usize)?;
                i += 1;
            }
        }
        Ok(())
    }

    fn write_bitfield_group(
        &mut self,
        members: &[MemberDesc],
        values: &[Value],
        pos: usize,
    ) -> DlResult<()> {
        let unit = members[0].size(self.ptr());
        let endian = self.w.format().endian;
        let mut acc = 0u64;
        for (m, v) in members.iter().zip(values) {
            let Value::Bits(bits) = v else {
                return Err(mismatch(m, v));
            };
            if *bits > bitfield_mask(m.bits) {
                return Err(DlError::invalid_instance(format!(
                    "value {} does not fit in {}-bit field {}",
                    bits, m.bits, m.name
                )));
            }
            acc |= bits << bitfield_shift(endian, unit, m.bit_offset, m.bits);
        }
        self.w.seek(pos);
        self.w.write_uint(unit, acc);
        Ok(())
    }

    fn write_member(&mut self, m: &MemberDesc, value: &Value, pos: usize) -> DlResult<()> {
        match m.atom {
            Atom::Pod => self.write_pod(m, value, pos),
            Atom::Bitfield => self.write_bitfield_group(
                std::slice::from_ref(m),
                std::slice::from_ref(value),
                pos,
            ),
            Atom::InlineArray => {
                let Value::Array(elements) = value else {
                    return Err(mismatch(m, value));
                };
                if elements.len() != m.inline_count as usize {
                    return Err(DlError::invalid_instance(format!(
                        "inline array {} needs {} elements, has {}",
                        m.name,
                        m.inline_count,
                        elements.len()
                    )));
                }
                let stride = m.element_size(self.ptr()) as usize;
                for (i, e) in elements.iter().enumerate() {
                    self.write_pod(m, e, pos + i * stride)?;
                }
                Ok(())
            }
            Atom::Array => {
                let Value::Array(elements) = value else {
                    return Err(mismatch(m, value));
                };
                if elements.is_empty() {
                    self.w.seek(pos);
                    self.w.write_array_slot(self.ptr().null_offset(), 0);
                    return Ok(());
                }
                let (stride, align) = self.element_layout(m)?;
                self.w.seek_end();
                self.w.align(align as usize);
                let data = self.w.pos();
                self.w.reserve(stride as usize * elements.len());
                for (i, e) in elements.iter().enumerate() {
                    self.write_pod(m, e, data + i * stride as usize)?;
                }
                self.w.seek(pos);
                self.w.write_array_slot(data as u64, elements.len() as u32);
                Ok(())
            }
        }
    }

    /// Stride and alignment of one element of an out-of-line array.
    fn element_layout(&self, m: &MemberDesc) -> DlResult<(u32, u32)> {
        if m.storage == Storage::Struct {
            let sub = self.find_type(m.type_id)?;
            Ok((sub.size(self.ptr()), sub.alignment(self.ptr())))
        } else {
            let size = m.storage.pod_size(self.ptr()).unwrap_or(1);
            Ok((size, size))
        }
    }

    /// Write a single (non-array) value of the member's storage at `pos`.
    fn write_pod(&mut self, m: &MemberDesc, value: &Value, pos: usize) -> DlResult<()> {
        self.w.seek(pos);
        match (m.storage, value) {
            (Storage::Int8, Value::I8(v)) => self.w.write_u8(*v as u8),
            (Storage::Int16, Value::I16(v)) => self.w.write_u16(*v as u16),
            (Storage::Int32, Value::I32(v)) => self.w.write_u32(*v as u32),
            (Storage::Int64, Value::I64(v)) => self.w.write_u64(*v as u64),
            (Storage::Uint8, Value::U8(v)) => self.w.write_u8(*v),
            (Storage::Uint16, Value::U16(v)) => self.w.write_u16(*v),
            (Storage::Uint32, Value::U32(v)) => self.w.write_u32(*v),
            (Storage::Uint64, Value::U64(v)) => self.w.write_u64(*v),
            (Storage::Fp32, Value::F32(v)) => self.w.write_f32(*v),
            (Storage::Fp64, Value::F64(v)) => self.w.write_f64(*v),
            (s, Value::Enum(raw)) if s.is_enum() => {
                let e = self
                    .registry
                    .find_enum(m.type_id)
                    .ok_or_else(|| DlError::type_not_found(m.type_id))?;
                if self.registry.enum_value_name(e, *raw).is_none() {
                    return Err(DlError::invalid_instance(format!(
                        "{} is not a value of enum {}",
                        *raw as i64, e.name
                    )));
                }
                let size = s.pod_size(self.ptr()).unwrap_or(4);
                self.w.write_uint(size, *raw);
            }
            (Storage::Str, Value::Str(None)) => self.w.write_null_ptr(),
            (Storage::Str, Value::Str(Some(s))) => {
                self.w.seek_end();
                let offset = self.w.pos() as u64;
                self.w.write_bytes(s.as_bytes());
                self.w.write_u8(0);
                self.w.seek(pos);
                self.w.write_ptr(offset);
            }
            (Storage::Ptr, Value::Ptr(None)) => self.w.write_null_ptr(),
            (Storage::Ptr, Value::Ptr(Some(id))) => {
                let offset = self.place_node(*id, m.type_id)?;
                self.w.seek(pos);
                self.w.write_ptr(offset);
            }
            (Storage::Struct, v) => {
                let sub = self.find_type(m.type_id)?;
                self.write_struct(sub, v, pos)?;
            }
            (_, v) => return Err(mismatch(m, v)),
        }
        Ok(())
    }

    /// Offset of a pointer target, writing it on first reference.
    fn place_node(&mut self, id: NodeId, expected: TypeId) -> DlResult<u64> {
        if let Some(&offset) = self.placed.get(&id) {
            return self.check_node_type(id, expected).map(|()| offset);
        }
        let limit = self.registry.limits().max_tracked_pointers;
        if self.placed.len() >= limit {
            return Err(DlError::limit("tracked pointers", limit));
        }
        let instance = self
            .instance
            .ok_or_else(|| DlError::invalid_instance("pointer in a value without nodes"))?;
        let node = instance
            .node(id)
            .ok_or_else(|| DlError::invalid_instance(format!("pointer to missing node {}", id.0)))?;
        self.check_node_type(id, expected)?;
        let sub = self.find_type(node.type_id)?;

        self.w.seek_end();
        self.w.align(sub.alignment(self.ptr()) as usize);
        let offset = self.w.pos();
        self.w.reserve(sub.size(self.ptr()) as usize);
        self.placed.insert(id, offset as u64);
        self.write_struct(sub, &node.value, offset)?;
        Ok(offset as u64)
    }

    fn check_node_type(&self, id: NodeId, expected: TypeId) -> DlResult<()> {
        let found = self
            .instance
            .and_then(|i| i.node(id))
            .map(|n| n.type_id)
            .unwrap_or(0);
        if found != expected {
            return Err(FormatError::TypeMismatch { expected, found }.into());
        }
        Ok(())
    }
}

fn mismatch(m: &MemberDesc, v: &Value) -> DlError {
    DlError::invalid_instance(format!(
        "member {} ({}) given a {} value",
        m.name,
        m.storage.describe(),
        v.kind_name()
    ))
}

/// Encode the payload (without header) of `instance` in `w`'s format.
fn encode_payload(
    registry: &Registry,
    type_id: TypeId,
    instance: &Instance,
    w: BinaryWriter,
) -> DlResult<BinaryWriter> {
    if instance.root_type() != type_id {
        return Err(FormatError::TypeMismatch {
            expected: type_id,
            found: instance.root_type(),
        }
        .into());
    }
    let root = registry
        .find_type(type_id)
        .ok_or_else(|| DlError::type_not_found(type_id))?;
    let mut enc = Encoder::new(registry, Some(instance), w);
    enc.w.reserve(root.size(enc.ptr()) as usize);
    enc.placed.insert(NodeId::ROOT, 0);
    enc.write_struct(root, instance.root(), 0)?;
    Ok(enc.w)
}

/// Bytes needed to store `instance` in `format`, header included.
pub fn calc_size(
    registry: &Registry,
    type_id: TypeId,
    instance: &Instance,
    format: Format,
) -> DlResult<usize> {
    let w = encode_payload(registry, type_id, instance, BinaryWriter::dummy(format))?;
    Ok(INSTANCE_HEADER_SIZE + w.len())
}

/// Store `instance` as a self-contained buffer in `format`.
pub fn store(
    registry: &Registry,
    type_id: TypeId,
    instance: &Instance,
    format: Format,
) -> DlResult<Vec<u8>> {
    let payload =
        encode_payload(registry, type_id, instance, BinaryWriter::new(format))?.into_bytes();
    let header = DataHeader {
        root_type: type_id,
        instance_size: payload_size(payload.len())?,
        format,
    };
    let mut out = header.to_bytes();
    out.extend_from_slice(&payload);
    log::trace!(
        "[codec::store] type 0x{:08X} -> {} bytes ({:?})",
        type_id,
        out.len(),
        format
    );
    Ok(out)
}

/// Store into a caller buffer; returns the number of bytes written.
pub fn store_into(
    registry: &Registry,
    type_id: TypeId,
    instance: &Instance,
    format: Format,
    out: &mut [u8],
) -> DlResult<usize> {
    let need = calc_size(registry, type_id, instance, format)?;
    if need > out.len() {
        return Err(DlError::buffer_too_small(need, out.len()));
    }
    let bytes = store(registry, type_id, instance, format)?;
    out[..bytes.len()].copy_from_slice(&bytes);
    Ok(bytes.len())
}

fn payload_size(len: usize) -> DlResult<u32> {
    u32::try_from(len)
        .map_err(|_| DlError::Unsupported(format!("instance of {} bytes exceeds 4 GiB", len)))
}

/// Canonical encoding of a member default: payload of a single-member
/// struct with the member at offset 0, little-endian, 64-bit offsets.
pub(crate) fn encode_default(
    registry: &Registry,
    member: &MemberDesc,
    value: &Value,
) -> DlResult<Vec<u8>> {
    let format = Format::new(Endian::Little, PtrSize::Ptr64);
    let mut enc = Encoder::new(registry, None, BinaryWriter::new(format));
    let size = member.size(PtrSize::Ptr64) as usize;
    enc.w.reserve(size);
    if member.atom == Atom::Bitfield {
        // Standalone field: shift relative to its own width only.
        let mut alone = member.clone();
        alone.bit_offset = 0;
        enc.write_member(&alone, value, 0)?;
    } else {
        enc.write_member(member, value, 0)?;
    }
    Ok(enc.w.into_bytes())
}
