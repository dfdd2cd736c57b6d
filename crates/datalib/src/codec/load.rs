// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Binary to typed instance.
//!
//! Offsets are resolved into [`NodeId`]s instead of being patched into
//! addresses: every distinct pointer target offset becomes one node, so
//! shared targets and cycles decode to a shared node. Pointer targets are
//! decoded from a work queue, never by recursion.

use super::header::read_header;
use super::reader::{to_index, BinaryReader};
use crate::config::INSTANCE_HEADER_SIZE;
use crate::error::{DlError, DlResult, FormatError};
use crate::instance::{Instance, Node, NodeId, Value};
use crate::registry::layout::{bitfield_mask, bitfield_shift};
use crate::registry::{
    union_tag_offset, Atom, Endian, Format, MemberDesc, PtrSize, Registry, Storage, TypeDesc,
    TypeId,
};
use std::collections::{HashMap, VecDeque};

struct Decoder<'r, 'b> {
    registry: &'r Registry,
    r: BinaryReader<'b>,
    allow_pointers: bool,
    nodes: Vec<Option<Node>>,
    /// Payload offset of each node.
    offsets: Vec<u64>,
    visited: HashMap<u64, (NodeId, TypeId)>,
    queue: VecDeque<(NodeId, TypeId, u64)>,
}

impl<'r, 'b> Decoder<'r, 'b> {
    fn new(registry: &'r Registry, r: BinaryReader<'b>, allow_pointers: bool) -> Self {
        Self {
            registry,
            r,
            allow_pointers,
            nodes: Vec::new(),
            offsets: Vec::new(),
            visited: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    fn ptr(&self) -> PtrSize {
        self.r.ptr_size()
    }

    fn find_type(&self, id: TypeId) -> DlResult<&'r TypeDesc> {
        self.registry
            .find_type(id)
            .ok_or_else(|| DlError::type_not_found(id))
    }

    /// Check that a struct of `ty` fits at `offset`.
    fn check_fits(&self, ty: &TypeDesc, offset: usize) -> DlResult<()> {
        self.r.bytes_at(offset, ty.size(self.ptr()) as usize).map(|_| ())
    }

    fn decode_struct(&mut self, ty: &TypeDesc, base: usize) -> DlResult<Value> {
        let registry = self.registry;
        let members = registry.members(ty);

        if ty.is_union() {
            let tag = self
                .r
                .read_u32_at(base + union_tag_offset(members, self.ptr()) as usize)?;
            let index = registry.union_member_by_tag(ty, tag).ok_or_else(|| {
                DlError::malformed(format!("union {} has unknown tag 0x{:08X}", ty.name, tag))
            })?;
            let m = &members[index];
            let value = self.decode_member(m, base + m.offset(self.ptr()) as usize)?;
            return Ok(Value::Union {
                member: index as u32,
                value: Box::new(value),
            });
        }

        let mut values = Vec::with_capacity(members.len());
        let mut i = 0;
        while i < members.len() {
            let m = &members[i];
            let pos = base + m.offset(self.ptr()) as usize;
            if m.atom == Atom::Bitfield {
                let group = members[i..]
                    .iter()
                    .take_while(|g| g.atom == Atom::Bitfield && g.offset == m.offset)
                    .count();
                values.extend(self.decode_bitfield_group(&members[i..i + group], pos)?);
                i += group;
            } else {
                values.push(self.decode_member(m, pos)?);
                i += 1;
            }
        }
        Ok(Value::Struct(values))
    }

    fn decode_bitfield_group(&self, members: &[MemberDesc], pos: usize) -> DlResult<Vec<Value>> {
        let unit = members[0].size(self.ptr());
        let raw = self.r.read_uint_at(pos, unit)?;
        let endian = self.r.format().endian;
        Ok(members
            .iter()
            .map(|m| {
                let shift = bitfield_shift(endian, unit, m.bit_offset, m.bits);
                Value::Bits((raw >> shift) & bitfield_mask(m.bits))
            })
            .collect())
    }

    fn decode_member(&mut self, m: &MemberDesc, pos: usize) -> DlResult<Value> {
        match m.atom {
            Atom::Pod => self.decode_pod(m, pos),
            Atom::Bitfield => Ok(self
                .decode_bitfield_group(std::slice::from_ref(m), pos)?
                .remove(0)),
            Atom::InlineArray => {
                let stride = m.element_size(self.ptr()) as usize;
                (0..m.inline_count as usize)
                    .map(|i| self.decode_pod(m, pos + i * stride))
                    .collect::<DlResult<Vec<_>>>()
                    .map(Value::Array)
            }
            Atom::Array => {
                let (data, count) = self.r.read_array_slot(pos)?;
                let data = match (data, count) {
                    (_, 0) => return Ok(Value::Array(Vec::new())),
                    (None, n) => {
                        return Err(DlError::malformed(format!(
                            "array {} has {} elements but no data",
                            m.name, n
                        )))
                    }
                    (Some(offset), _) => to_index(offset)?,
                };
                let stride = if m.storage == Storage::Struct {
                    self.find_type(m.type_id)?.size(self.ptr())
                } else {
                    m.storage.pod_size(self.ptr()).unwrap_or(1)
                } as usize;
                let span = stride.checked_mul(count as usize).ok_or_else(|| {
                    DlError::malformed(format!("array {} is too large", m.name))
                })?;
                self.r.bytes_at(data, span)?;
                (0..count as usize)
                    .map(|i| self.decode_pod(m, data + i * stride))
                    .collect::<DlResult<Vec<_>>>()
                    .map(Value::Array)
            }
        }
    }

    fn decode_pod(&mut self, m: &MemberDesc, pos: usize) -> DlResult<Value> {
        let r = self.r;
        Ok(match m.storage {
            Storage::Int8 => Value::I8(r.read_u8_at(pos)? as i8),
            Storage::Int16 => Value::I16(r.read_u16_at(pos)? as i16),
            Storage::Int32 => Value::I32(r.read_u32_at(pos)? as i32),
            Storage::Int64 => Value::I64(r.read_u64_at(pos)? as i64),
            Storage::Uint8 => Value::U8(r.read_u8_at(pos)?),
            Storage::Uint16 => Value::U16(r.read_u16_at(pos)?),
            Storage::Uint32 => Value::U32(r.read_u32_at(pos)?),
            Storage::Uint64 => Value::U64(r.read_u64_at(pos)?),
            Storage::Fp32 => Value::F32(r.read_f32_at(pos)?),
            Storage::Fp64 => Value::F64(r.read_f64_at(pos)?),
            s if s.is_enum() => {
                let size = s.pod_size(self.ptr()).unwrap_or(4);
                let raw = r.read_uint_at(pos, size)?;
                Value::Enum(if s.is_signed() {
                    sign_extend(raw, size)
                } else {
                    raw
                })
            }
            Storage::Str => match r.read_ptr_at(pos)? {
                None => Value::Str(None),
                Some(offset) => Value::Str(Some(r.read_cstr_at(to_index(offset)?)?.to_string())),
            },
            Storage::Ptr => match r.read_ptr_at(pos)? {
                None => Value::Ptr(None),
                Some(offset) => Value::Ptr(Some(self.visit(offset, m.type_id)?)),
            },
            _ => {
                let sub = self.find_type(m.type_id)?;
                self.decode_struct(sub, pos)?
            }
        })
    }

    /// Node for the target at `offset`, queueing it on first sight.
    fn visit(&mut self, offset: u64, type_id: TypeId) -> DlResult<NodeId> {
        if !self.allow_pointers {
            return Err(DlError::malformed("non-null pointer in a default value"));
        }
        if let Some(&(id, seen_type)) = self.visited.get(&offset) {
            if seen_type != type_id {
                return Err(FormatError::TypeMismatch {
                    expected: type_id,
                    found: seen_type,
                }
                .into());
            }
            return Ok(id);
        }
        let limit = self.registry.limits().max_tracked_pointers;
        if self.visited.len() >= limit {
            return Err(DlError::limit("tracked pointers", limit));
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(None);
        self.offsets.push(offset);
        self.visited.insert(offset, (id, type_id));
        self.queue.push_back((id, type_id, offset));
        Ok(id)
    }

    fn finish(self) -> DlResult<(Instance, Vec<u64>)> {
        let nodes = self
            .nodes
            .into_iter()
            .map(|n| n.ok_or_else(|| DlError::malformed("pointer target was never decoded")))
            .collect::<DlResult<Vec<_>>>()?;
        Ok((Instance::with_nodes(nodes), self.offsets))
    }
}

fn sign_extend(raw: u64, size: u32) -> u64 {
    let shift = 64 - size * 8;
    (((raw << shift) as i64) >> shift) as u64
}

/// Load an instance and report the payload offset of each node.
pub(crate) fn load_with_offsets(
    registry: &Registry,
    type_id: TypeId,
    bytes: &[u8],
) -> DlResult<(Instance, Vec<u64>)> {
    let header = read_header(bytes)?;
    if header.format.endian != Endian::host() {
        return Err(FormatError::EndianMismatch.into());
    }
    if header.root_type != type_id {
        return Err(FormatError::TypeMismatch {
            expected: type_id,
            found: header.root_type,
        }
        .into());
    }
    let root = registry
        .find_type(type_id)
        .ok_or_else(|| DlError::type_not_found(type_id))?;

    let payload = &bytes[INSTANCE_HEADER_SIZE..header.total_size()];
    let mut dec = Decoder::new(registry, BinaryReader::new(payload, header.format), true);
    dec.check_fits(root, 0)?;
    dec.nodes.push(None);
    dec.offsets.push(0);
    dec.visited.insert(0, (NodeId::ROOT, type_id));

    let value = dec.decode_struct(root, 0)?;
    dec.nodes[0] = Some(Node { type_id, value });

    while let Some((id, tid, offset)) = dec.queue.pop_front() {
        let ty = dec.find_type(tid)?;
        let at = to_index(offset)?;
        dec.check_fits(ty, at)?;
        let value = dec.decode_struct(ty, at)?;
        dec.nodes[id.index()] = Some(Node {
            type_id: tid,
            value,
        });
    }

    log::trace!(
        "[codec::load] type 0x{:08X}: {} bytes, {} nodes",
        type_id,
        bytes.len(),
        dec.nodes.len()
    );
    dec.finish()
}

/// Load a binary instance of `type_id`.
///
/// The buffer must be in host byte order (see
/// [`convert`](super::convert::convert)); either pointer width is accepted.
pub fn load(registry: &Registry, type_id: TypeId, bytes: &[u8]) -> DlResult<Instance> {
    load_with_offsets(registry, type_id, bytes).map(|(instance, _)| instance)
}

/// Decode a member default written by `encode_default`.
pub(crate) fn decode_default(
    registry: &Registry,
    member: &MemberDesc,
    blob: &[u8],
) -> DlResult<Value> {
    let format = Format::new(Endian::Little, PtrSize::Ptr64);
    let mut dec = Decoder::new(registry, BinaryReader::new(blob, format), false);
    if member.atom == Atom::Bitfield {
        let mut alone = member.clone();
        alone.bit_offset = 0;
        dec.decode_member(&alone, 0)
    } else {
        dec.decode_member(member, 0)
    }
}
