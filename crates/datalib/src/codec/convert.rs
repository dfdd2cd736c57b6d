// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte order and pointer width conversion of stored instances.
//!
//! Works on the bytes alone, guided by the schema; no typed instance is
//! built. Conversion runs in three passes:
//!
//! 1. **Collect**: walk the root and every reachable block (pointer target,
//!    string, array contents) in the source layout, recording each block
//!    once by source offset.
//! 2. **Place**: sort blocks by source offset and assign destination
//!    offsets, aligned for the destination width. The output order only
//!    depends on the input bytes.
//! 3. **Emit**: re-encode every block at its destination offset, mapping
//!    each stored offset through the placement table.
//!
//! Bitfield groups are unpacked with the source bit order and repacked with
//! the destination bit order before the unit is written.

use super::header::{read_header, DataHeader};
use super::reader::{to_index, BinaryReader};
use super::writer::BinaryWriter;
use crate::config::INSTANCE_HEADER_SIZE;
use crate::error::{DlError, DlResult, FormatError};
use crate::registry::layout::{bitfield_mask, bitfield_shift};
use crate::registry::{
    union_tag_offset, Atom, Format, MemberDesc, PtrSize, Registry, Storage, TypeDesc,
    TypeId,
};
use std::collections::HashMap;

/// Contents of one out-of-line block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    /// A pointer target (or the root).
    Struct(TypeId),
    /// Array contents; `type_id` is only meaningful for struct and enum
    /// elements.
    Array {
        storage: Storage,
        type_id: TypeId,
        count: u32,
    },
    /// String bytes, terminator excluded.
    Str(u32),
}

#[derive(Debug, Clone, Copy)]
struct Block {
    src: u64,
    kind: BlockKind,
}

struct Converter<'r, 'b> {
    registry: &'r Registry,
    r: BinaryReader<'b>,
    blocks: Vec<Block>,
    by_offset: HashMap<u64, usize>,
    /// Source offset to destination offset, filled by `place`.
    moved: HashMap<u64, u64>,
    patches: usize,
}

impl<'r, 'b> Converter<'r, 'b> {
    fn new(registry: &'r Registry, r: BinaryReader<'b>) -> Self {
        Self {
            registry,
            r,
            blocks: Vec::new(),
            by_offset: HashMap::new(),
            moved: HashMap::new(),
            patches: 0,
        }
    }

    fn src_ptr(&self) -> PtrSize {
        self.r.ptr_size()
    }

    fn find_type(&self, id: TypeId) -> DlResult<&'r TypeDesc> {
        self.registry
            .find_type(id)
            .ok_or_else(|| DlError::type_not_found(id))
    }

    // =======================================================================
    // Collect
    // =======================================================================

    fn add_block(&mut self, src: u64, kind: BlockKind) -> DlResult<()> {
        if let Some(&index) = self.by_offset.get(&src) {
            if self.blocks[index].kind != kind {
                return Err(DlError::malformed(format!(
                    "offset {} is referenced as two different blocks",
                    src
                )));
            }
            return Ok(());
        }
        let limit = self.registry.limits().max_convert_instances;
        if self.blocks.len() >= limit {
            return Err(DlError::limit("convert instances", limit));
        }
        self.by_offset.insert(src, self.blocks.len());
        self.blocks.push(Block { src, kind });
        Ok(())
    }

    /// Record every block reachable from the root.
    fn collect(&mut self, root: TypeId) -> DlResult<()> {
        self.add_block(0, BlockKind::Struct(root))?;
        let mut next = 0;
        while next < self.blocks.len() {
            let block = self.blocks[next];
            next += 1;
            let at = to_index(block.src)?;
            match block.kind {
                BlockKind::Struct(tid) => {
                    let ty = self.find_type(tid)?;
                    self.r.bytes_at(at, ty.size(self.src_ptr()) as usize)?;
                    self.collect_struct(ty, at)?;
                }
                BlockKind::Array {
                    storage,
                    type_id,
                    count,
                } => {
                    let stride = self.element_layout(storage, type_id, self.src_ptr())?.0 as usize;
                    let span = stride.checked_mul(count as usize).ok_or_else(|| {
                        DlError::malformed(format!("array at offset {} is too large", at))
                    })?;
                    self.r.bytes_at(at, span)?;
                    for i in 0..count as usize {
                        self.collect_value(storage, type_id, at + i * stride)?;
                    }
                }
                BlockKind::Str(_) => {}
            }
        }
        Ok(())
    }

    fn collect_struct(&mut self, ty: &TypeDesc, base: usize) -> DlResult<()> {
        let registry = self.registry;
        let ptr = self.src_ptr();
        let members = registry.members(ty);
        if ty.is_union() {
            let m = self.active_member(ty, members, base)?;
            return self.collect_member(m, base + m.offset(ptr) as usize);
        }
        for m in members {
            self.collect_member(m, base + m.offset(ptr) as usize)?;
        }
        Ok(())
    }

    fn collect_member(&mut self, m: &MemberDesc, pos: usize) -> DlResult<()> {
        match m.atom {
            Atom::Bitfield => Ok(()),
            Atom::Pod => self.collect_value(m.storage, m.type_id, pos),
            Atom::InlineArray => {
                let stride = m.element_size(self.src_ptr()) as usize;
                for i in 0..m.inline_count as usize {
                    self.collect_value(m.storage, m.type_id, pos + i * stride)?;
                }
                Ok(())
            }
            Atom::Array => match self.r.read_array_slot(pos)? {
                (_, 0) => Ok(()),
                (None, count) => Err(DlError::malformed(format!(
                    "array {} has {} elements but no data",
                    m.name, count
                ))),
                (Some(data), count) => self.add_block(
                    data,
                    BlockKind::Array {
                        storage: m.storage,
                        type_id: m.type_id,
                        count,
                    },
                ),
            },
        }
    }

    fn collect_value(&mut self, storage: Storage, type_id: TypeId, pos: usize) -> DlResult<()> {
        match storage {
            Storage::Str => {
                if let Some(offset) = self.r.read_ptr_at(pos)? {
                    let len = self.r.read_cstr_at(to_index(offset)?)?.len();
                    self.add_block(offset, BlockKind::Str(len as u32))?;
                }
                Ok(())
            }
            Storage::Ptr => {
                if let Some(offset) = self.r.read_ptr_at(pos)? {
                    self.add_block(offset, BlockKind::Struct(type_id))?;
                }
                Ok(())
            }
            Storage::Struct => {
                let ty = self.find_type(type_id)?;
                self.collect_struct(ty, pos)
            }
            _ => Ok(()),
        }
    }

    fn active_member<'m>(
        &self,
        ty: &TypeDesc,
        members: &'m [MemberDesc],
        base: usize,
    ) -> DlResult<&'m MemberDesc> {
        let tag = self
            .r
            .read_u32_at(base + union_tag_offset(members, self.src_ptr()) as usize)?;
        self.registry
            .union_member_by_tag(ty, tag)
            .map(|index| &members[index])
            .ok_or_else(|| {
                DlError::malformed(format!("union {} has unknown tag 0x{:08X}", ty.name, tag))
            })
    }

    /// Stride and alignment of one array element for `ptr`.
    fn element_layout(&self, storage: Storage, type_id: TypeId, ptr: PtrSize) -> DlResult<(u32, u32)> {
        match storage.pod_size(ptr) {
            Some(size) => Ok((size, size)),
            None => {
                let ty = self.find_type(type_id)?;
                Ok((ty.size(ptr), ty.alignment(ptr)))
            }
        }
    }

    // =======================================================================
    // Place
    // =======================================================================

    /// Assign destination offsets in source order; returns the payload size.
    fn place(&mut self, target: PtrSize) -> DlResult<usize> {
        self.blocks.sort_by_key(|b| b.src);
        let mut end = 0u64;
        for block in &self.blocks {
            let (size, align) = match block.kind {
                BlockKind::Struct(tid) => {
                    let ty = self.find_type(tid)?;
                    (u64::from(ty.size(target)), ty.alignment(target))
                }
                BlockKind::Array {
                    storage,
                    type_id,
                    count,
                } => {
                    let (stride, align) = self.element_layout(storage, type_id, target)?;
                    (u64::from(stride) * u64::from(count), align)
                }
                BlockKind::Str(len) => (u64::from(len) + 1, 1),
            };
            let at = align_up_64(end, align);
            self.moved.insert(block.src, at);
            end = at + size;
        }
        to_index(end)
    }

    fn dst_offset(&mut self, src: u64) -> DlResult<u64> {
        let limit = self.registry.limits().max_patch_positions;
        if self.patches >= limit {
            return Err(DlError::limit("patch positions", limit));
        }
        self.patches += 1;
        self.moved
            .get(&src)
            .copied()
            .ok_or_else(|| DlError::malformed(format!("offset {} was not collected", src)))
    }

    // =======================================================================
    // Emit
    // =======================================================================

    fn emit(&mut self, w: &mut BinaryWriter) -> DlResult<()> {
        let blocks = std::mem::take(&mut self.blocks);
        for block in &blocks {
            let src = to_index(block.src)?;
            let dst = to_index(self.moved.get(&block.src).copied().unwrap_or(0))?;
            match block.kind {
                BlockKind::Struct(tid) => {
                    let ty = self.find_type(tid)?;
                    self.emit_struct(w, ty, src, dst)?;
                }
                BlockKind::Array {
                    storage,
                    type_id,
                    count,
                } => {
                    let (src_stride, _) = self.element_layout(storage, type_id, self.src_ptr())?;
                    let (dst_stride, _) = self.element_layout(storage, type_id, w.ptr_size())?;
                    for i in 0..count as usize {
                        self.emit_value(
                            w,
                            storage,
                            type_id,
                            src + i * src_stride as usize,
                            dst + i * dst_stride as usize,
                        )?;
                    }
                }
                BlockKind::Str(len) => {
                    let bytes = self.r.bytes_at(src, len as usize + 1)?;
                    w.seek(dst);
                    w.write_bytes(bytes);
                }
            }
        }
        self.blocks = blocks;
        Ok(())
    }

    fn emit_struct(
        &mut self,
        w: &mut BinaryWriter,
        ty: &TypeDesc,
        src: usize,
        dst: usize,
    ) -> DlResult<()> {
        let registry = self.registry;
        let members = registry.members(ty);
        let (sp, dp) = (self.src_ptr(), w.ptr_size());

        if ty.is_union() {
            let m = self.active_member(ty, members, src)?;
            let tag = self.r.read_u32_at(src + union_tag_offset(members, sp) as usize)?;
            self.emit_member(w, m, src + m.offset(sp) as usize, dst + m.offset(dp) as usize)?;
            w.seek(dst + union_tag_offset(members, dp) as usize);
            w.write_u32(tag);
            return Ok(());
        }

        let mut i = 0;
        while i < members.len() {
            let m = &members[i];
            let (s, d) = (src + m.offset(sp) as usize, dst + m.offset(dp) as usize);
            if m.atom == Atom::Bitfield {
                let group = members[i..]
                    .iter()
                    .take_while(|g| g.atom == Atom::Bitfield && g.offset == m.offset)
                    .count();
                self.emit_bitfield_group(w, &members[i..i + group], s, d)?;
                i += group;
            } else {
                self.emit_member(w, m, s, d)?;
                i += 1;
            }
        }
        Ok(())
    }

    fn emit_bitfield_group(
        &self,
        w: &mut BinaryWriter,
        members: &[MemberDesc],
        src: usize,
        dst: usize,
    ) -> DlResult<()> {
        let unit = members[0].size(self.src_ptr());
        let raw = self.r.read_uint_at(src, unit)?;
        let (from, to) = (self.r.format().endian, w.format().endian);
        let mut out = 0u64;
        for m in members {
            let mask = bitfield_mask(m.bits);
            let value = (raw >> bitfield_shift(from, unit, m.bit_offset, m.bits)) & mask;
            out |= value << bitfield_shift(to, unit, m.bit_offset, m.bits);
        }
        w.seek(dst);
        w.write_uint(unit, out);
        Ok(())
    }

    fn emit_member(
        &mut self,
        w: &mut BinaryWriter,
        m: &MemberDesc,
        src: usize,
        dst: usize,
    ) -> DlResult<()> {
        match m.atom {
            Atom::Pod => self.emit_value(w, m.storage, m.type_id, src, dst),
            Atom::Bitfield => self.emit_bitfield_group(w, std::slice::from_ref(m), src, dst),
            Atom::InlineArray => {
                let (ss, ds) = (
                    m.element_size(self.src_ptr()) as usize,
                    m.element_size(w.ptr_size()) as usize,
                );
                for i in 0..m.inline_count as usize {
                    self.emit_value(w, m.storage, m.type_id, src + i * ss, dst + i * ds)?;
                }
                Ok(())
            }
            Atom::Array => {
                let (data, count) = self.r.read_array_slot(src)?;
                let offset = match data {
                    Some(data) if count > 0 => self.dst_offset(data)?,
                    _ => w.ptr_size().null_offset(),
                };
                w.seek(dst);
                w.write_array_slot(offset, count);
                Ok(())
            }
        }
    }

    fn emit_value(
        &mut self,
        w: &mut BinaryWriter,
        storage: Storage,
        type_id: TypeId,
        src: usize,
        dst: usize,
    ) -> DlResult<()> {
        match storage {
            Storage::Str | Storage::Ptr => {
                let offset = match self.r.read_ptr_at(src)? {
                    Some(offset) => self.dst_offset(offset)?,
                    None => w.ptr_size().null_offset(),
                };
                w.seek(dst);
                w.write_ptr(offset);
            }
            Storage::Struct => {
                let ty = self.find_type(type_id)?;
                self.emit_struct(w, ty, src, dst)?;
            }
            pod => {
                let size = pod.pod_size(self.src_ptr()).unwrap_or(1);
                let raw = self.r.read_uint_at(src, size)?;
                w.seek(dst);
                w.write_uint(size, raw);
            }
        }
        Ok(())
    }
}

fn align_up_64(value: u64, alignment: u32) -> u64 {
    let alignment = u64::from(alignment.max(1));
    value.div_ceil(alignment) * alignment
}

/// Convert the instance in `src` to `target`, producing a payload writer.
fn convert_payload(
    registry: &Registry,
    type_id: TypeId,
    header: &DataHeader,
    payload: &[u8],
    w: BinaryWriter,
) -> DlResult<BinaryWriter> {
    let mut conv = Converter::new(registry, BinaryReader::new(payload, header.format));
    conv.collect(type_id)?;
    let size = conv.place(w.ptr_size())?;
    let mut w = w;
    w.reserve(size);
    conv.emit(&mut w)?;
    log::trace!(
        "[codec::convert] type 0x{:08X}: {} blocks, {} -> {} payload bytes",
        type_id,
        conv.blocks.len(),
        payload.len(),
        size
    );
    Ok(w)
}

fn checked_header(registry: &Registry, type_id: TypeId, src: &[u8]) -> DlResult<DataHeader> {
    let header = read_header(src)?;
    if header.root_type != type_id {
        return Err(FormatError::TypeMismatch {
            expected: type_id,
            found: header.root_type,
        }
        .into());
    }
    if registry.find_type(type_id).is_none() {
        return Err(DlError::type_not_found(type_id));
    }
    Ok(header)
}

/// Re-encode a stored instance of `type_id` in `target` format.
///
/// Converting to the buffer's own format returns its bytes unchanged.
pub fn convert(
    registry: &Registry,
    type_id: TypeId,
    src: &[u8],
    target: Format,
) -> DlResult<Vec<u8>> {
    let header = checked_header(registry, type_id, src)?;
    if header.format == target {
        return Ok(src[..header.total_size()].to_vec());
    }
    let payload = &src[INSTANCE_HEADER_SIZE..header.total_size()];
    let out = convert_payload(registry, type_id, &header, payload, BinaryWriter::new(target))?
        .into_bytes();
    let header = DataHeader {
        root_type: type_id,
        instance_size: u32::try_from(out.len()).map_err(|_| {
            DlError::Unsupported(format!("instance of {} bytes exceeds 4 GiB", out.len()))
        })?,
        format: target,
    };
    let mut bytes = header.to_bytes();
    bytes.extend_from_slice(&out);
    Ok(bytes)
}

/// Bytes `convert` would produce, header included.
pub fn convert_calc_size(
    registry: &Registry,
    type_id: TypeId,
    src: &[u8],
    target: Format,
) -> DlResult<usize> {
    let header = checked_header(registry, type_id, src)?;
    if header.format == target {
        return Ok(header.total_size());
    }
    let payload = &src[INSTANCE_HEADER_SIZE..header.total_size()];
    let w = convert_payload(registry, type_id, &header, payload, BinaryWriter::dummy(target))?;
    Ok(INSTANCE_HEADER_SIZE + w.len())
}

/// Convert the instance held in `buf` in place; returns the new length.
///
/// Growing the pointer width is not supported in place.
pub fn convert_in_place(
    registry: &Registry,
    type_id: TypeId,
    buf: &mut [u8],
    target: Format,
) -> DlResult<usize> {
    let header = checked_header(registry, type_id, buf)?;
    if target.ptr_size.bytes() > header.format.ptr_size.bytes() {
        return Err(DlError::Unsupported(format!(
            "cannot grow pointers from {} to {} bytes in place",
            header.format.ptr_size.bytes(),
            target.ptr_size.bytes()
        )));
    }
    let out = convert(registry, type_id, buf, target)?;
    if out.len() > buf.len() {
        return Err(DlError::buffer_too_small(out.len(), buf.len()));
    }
    buf[..out.len()].copy_from_slice(&out);
    Ok(out.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up_64() {
        assert_eq!(align_up_64(0, 8), 0);
        assert_eq!(align_up_64(9, 8), 16);
        assert_eq!(align_up_64(5, 0), 5);
        assert_eq!(u64::from(crate::registry::align_up(5, 4)), align_up_64(5, 4));
    }
}
