// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Size, alignment and offset calculation for both pointer widths.
//!
//! Struct members are laid out in declaration order, each at the next
//! offset aligned to its own alignment. Unions place every member at
//! offset 0 and append a 32-bit tag. Consecutive bitfield members share
//! one unsigned storage unit.

use super::types::{type_flags, Atom, Endian, MemberDesc, PtrSize, Storage};
use super::Registry;
use crate::config::UNION_TAG_SIZE;
use crate::error::{SchemaError, SchemaErrorKind};
use std::collections::{HashMap, HashSet};

const WIDTHS: [PtrSize; 2] = [PtrSize::Ptr32, PtrSize::Ptr64];

/// Round `value` up to a multiple of `alignment`.
pub fn align_up(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// Offset of the union tag: past the largest member, aligned to the
/// largest member alignment.
pub fn union_tag_offset(members: &[MemberDesc], ptr: PtrSize) -> u32 {
    let size = members.iter().map(|m| m.size(ptr)).max().unwrap_or(0);
    let align = members.iter().map(|m| m.alignment(ptr)).max().unwrap_or(1);
    align_up(size, align)
}

/// Shift of a bitfield inside its storage unit for the given byte order.
pub(crate) fn bitfield_shift(endian: Endian, unit_bytes: u32, bit_offset: u32, bits: u32) -> u32 {
    match endian {
        Endian::Little => bit_offset,
        Endian::Big => unit_bytes * 8 - bit_offset - bits,
    }
}

/// Mask of the low `bits` bits.
pub(crate) fn bitfield_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn bitfield_unit(total_bits: u32) -> Option<Storage> {
    match total_bits {
        0..=8 => Some(Storage::Uint8),
        9..=16 => Some(Storage::Uint16),
        17..=32 => Some(Storage::Uint32),
        33..=64 => Some(Storage::Uint64),
        _ => None,
    }
}

/// Assign bit offsets and the shared storage unit to every run of
/// consecutive bitfield members.
pub(crate) fn group_bitfields(type_name: &str, members: &mut [MemberDesc]) -> Result<(), SchemaError> {
    let mut i = 0;
    while i < members.len() {
        if members[i].atom != Atom::Bitfield {
            i += 1;
            continue;
        }
        let start = i;
        let mut total = 0u32;
        while i < members.len() && members[i].atom == Atom::Bitfield {
            let bits = members[i].bits;
            if bits == 0 || bits > 64 {
                return Err(SchemaError::new(
                    SchemaErrorKind::InvalidBitfield,
                    format!("{}.{} has {} bits", type_name, members[i].name, bits),
                ));
            }
            members[i].bit_offset = total;
            total += bits;
            i += 1;
        }
        let unit = bitfield_unit(total).ok_or_else(|| {
            SchemaError::new(
                SchemaErrorKind::InvalidBitfield,
                format!(
                    "bitfield group starting at {}.{} needs {} bits, more than 64",
                    type_name, members[start].name, total
                ),
            )
        })?;
        for m in &mut members[start..i] {
            m.storage = unit;
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Lay out the types at `positions` (freshly added to `registry`), sizing
/// embedded types first. Returns the positions in dependency order.
pub(crate) fn layout_types(
    registry: &mut Registry,
    positions: &[usize],
) -> Result<Vec<usize>, SchemaError> {
    let pending: HashSet<usize> = positions.iter().copied().collect();
    let mut state = HashMap::new();
    let mut order = Vec::with_capacity(positions.len());
    for &pos in positions {
        visit(registry, pos, &pending, &mut state, &mut order)?;
    }
    for &pos in &order {
        mark_subdata(registry, pos);
    }
    Ok(order)
}

fn visit(
    registry: &mut Registry,
    pos: usize,
    pending: &HashSet<usize>,
    state: &mut HashMap<usize, Visit>,
    order: &mut Vec<usize>,
) -> Result<(), SchemaError> {
    if !pending.contains(&pos) {
        return Ok(());
    }
    match state.get(&pos) {
        Some(Visit::Done) => return Ok(()),
        Some(Visit::InProgress) => {
            return Err(SchemaError::new(
                SchemaErrorKind::InvalidType,
                format!(
                    "type {} embeds itself by value",
                    registry.types[pos].name
                ),
            ))
        }
        None => {}
    }
    state.insert(pos, Visit::InProgress);

    let deps: Vec<usize> = registry.members[registry.types[pos].member_range()]
        .iter()
        .filter(|m| m.storage == Storage::Struct && m.atom != Atom::Array)
        .filter_map(|m| registry.type_position(m.type_id))
        .collect();
    for dep in deps {
        visit(registry, dep, pending, state, order)?;
    }

    compute_type(registry, pos)?;
    state.insert(pos, Visit::Done);
    order.push(pos);
    Ok(())
}

fn member_size_align(
    registry: &Registry,
    member: &MemberDesc,
    ptr: PtrSize,
) -> Result<(u32, u32), SchemaError> {
    let element = |m: &MemberDesc| -> Result<(u32, u32), SchemaError> {
        if m.storage == Storage::Struct {
            let sub = registry.find_type(m.type_id).ok_or_else(|| {
                SchemaError::new(
                    SchemaErrorKind::TypeNotFound,
                    format!("member {} references unknown type 0x{:08X}", m.name, m.type_id),
                )
            })?;
            Ok((sub.size(ptr), sub.alignment(ptr)))
        } else {
            let size = m.storage.pod_size(ptr).unwrap_or(0);
            Ok((size, size))
        }
    };

    match member.atom {
        Atom::Pod | Atom::Bitfield => element(member),
        Atom::InlineArray => {
            let (size, align) = element(member)?;
            let total = size.checked_mul(member.inline_count).ok_or_else(|| {
                SchemaError::new(
                    SchemaErrorKind::InvalidType,
                    format!("inline array {} is too large", member.name),
                )
            })?;
            Ok((total, align))
        }
        Atom::Array => Ok((ptr.bytes() * 2, ptr.bytes())),
    }
}

fn compute_type(registry: &mut Registry, pos: usize) -> Result<(), SchemaError> {
    let range = registry.types[pos].member_range();
    let is_union = registry.types[pos].is_union();
    let name = registry.types[pos].name.clone();
    group_bitfields(&name, &mut registry.members[range.clone()])?;

    for ptr in WIDTHS {
        let i = ptr.index();
        let mut offset = 0u32;
        let mut max_size = 0u32;
        let mut max_align = 1u32;
        let mut group_offset: Option<u32> = None;

        for mi in range.clone() {
            let (size, align) = member_size_align(registry, &registry.members[mi], ptr)?;
            let member = &mut registry.members[mi];
            member.size[i] = size;
            member.alignment[i] = align;
            max_align = max_align.max(align);

            if is_union {
                member.offset[i] = 0;
                max_size = max_size.max(size);
                continue;
            }

            if member.atom == Atom::Bitfield {
                if let Some(shared) = group_offset {
                    member.offset[i] = shared;
                    continue;
                }
            } else {
                group_offset = None;
            }

            offset = align_up(offset, align);
            member.offset[i] = offset;
            if member.atom == Atom::Bitfield {
                group_offset = Some(offset);
            }
            offset = offset.checked_add(size).ok_or_else(|| {
                SchemaError::new(
                    SchemaErrorKind::InvalidType,
                    format!("type {} is too large", name),
                )
            })?;
        }

        let ty = &mut registry.types[pos];
        let align = max_align.max(ty.alignment[i]);
        let size = if is_union {
            align_up(max_size, max_align) + UNION_TAG_SIZE
        } else {
            offset
        };
        ty.alignment[i] = align;
        ty.size[i] = align_up(size, align);
    }

    registry.index_union(pos);
    Ok(())
}

fn mark_subdata(registry: &mut Registry, pos: usize) {
    let has_subdata = registry.members[registry.types[pos].member_range()]
        .iter()
        .any(|m| {
            m.atom == Atom::Array
                || matches!(m.storage, Storage::Str | Storage::Ptr)
                || (m.storage == Storage::Struct
                    && registry
                        .find_type(m.type_id)
                        .is_some_and(|sub| sub.has_subdata()))
        });
    if has_subdata {
        registry.types[pos].flags |= type_flags::HAS_SUBDATA;
    }
}
