// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Binary type-library reader and writer.
//!
//! Layout (all fields `u32` unless noted):
//!
//! ```text
//! header        id, version, type_count, enum_count, member_count,
//!               enum_value_count, enum_alias_count, default_size, strings_size
//! type ids      [type_count]
//! enum ids      [enum_count]
//! types         name, flags, size[2], alignment[2], member_count, member_start, comment
//! enums         name, flags, storage, value_count, value_start, alias_count, alias_start, comment
//! members       name, comment, type_tag, type_id, size[2], alignment[2], offset[2],
//!               default_offset, default_size, flags
//! enum values   main_alias, pad, value: u64
//! enum aliases  name, value_index
//! defaults      default_size bytes
//! strings       strings_size bytes of NUL-terminated names and comments
//! ```
//!
//! Written little-endian. A library whose magic reads byte-swapped is read
//! as big-endian. Indices inside a library are relative to that library and
//! are rebased when merged into a registry that already holds types.

use super::types::{Atom, EnumAlias, EnumDesc, EnumValue, MemberDesc, Storage, TypeDesc, TypeId};
use super::Registry;
use crate::codec::reader::BinaryReader;
use crate::codec::writer::BinaryWriter;
use crate::codec::{decode_default, encode_default};
use crate::config::{
    NO_DEFAULT_VALUE, NO_STRING, TYPELIB_ENUM_ALIAS_DESC_SIZE, TYPELIB_ENUM_DESC_SIZE,
    TYPELIB_ENUM_VALUE_DESC_SIZE, TYPELIB_HEADER_SIZE, TYPELIB_ID, TYPELIB_ID_SWAPPED,
    TYPELIB_MEMBER_DESC_SIZE, TYPELIB_TYPE_DESC_SIZE, TYPELIB_VERSION,
};
use crate::error::{DlError, DlResult, SchemaError, SchemaErrorKind};
use crate::hash::hash_name;
use crate::registry::{Endian, Format, PtrSize};
use std::collections::HashMap;

fn malformed(reason: impl Into<String>) -> DlError {
    SchemaError::new(SchemaErrorKind::MalformedLibrary, reason).into()
}

// =======================================================================
// Writing
// =======================================================================

#[derive(Default)]
struct StringTable {
    bytes: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl StringTable {
    fn add(&mut self, s: &str) -> u32 {
        if let Some(&offset) = self.offsets.get(s) {
            return offset;
        }
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        self.offsets.insert(s.to_string(), offset);
        offset
    }

    fn add_opt(&mut self, s: Option<&str>) -> u32 {
        s.map_or(NO_STRING, |s| self.add(s))
    }
}

pub(crate) fn write(registry: &Registry) -> DlResult<Vec<u8>> {
    let mut strings = StringTable::default();
    let mut defaults: Vec<u8> = Vec::new();

    let mut w = BinaryWriter::new(Format::new(Endian::Little, PtrSize::Ptr64));
    w.write_u32(TYPELIB_ID);
    w.write_u32(TYPELIB_VERSION);
    w.write_u32(registry.types.len() as u32);
    w.write_u32(registry.enums.len() as u32);
    w.write_u32(registry.members.len() as u32);
    w.write_u32(registry.enum_values.len() as u32);
    w.write_u32(registry.enum_aliases.len() as u32);
    // Blob sizes are only known once every descriptor has been written.
    let sizes_pos = w.pos();
    w.write_u32(0);
    w.write_u32(0);

    for ty in &registry.types {
        w.write_u32(ty.id);
    }
    for e in &registry.enums {
        w.write_u32(e.id);
    }

    for ty in &registry.types {
        w.write_u32(strings.add(&ty.name));
        w.write_u32(ty.flags);
        w.write_u32(ty.size[0]);
        w.write_u32(ty.size[1]);
        w.write_u32(ty.alignment[0]);
        w.write_u32(ty.alignment[1]);
        w.write_u32(ty.member_count);
        w.write_u32(ty.member_start);
        w.write_u32(strings.add_opt(ty.comment.as_deref()));
    }

    for e in &registry.enums {
        w.write_u32(strings.add(&e.name));
        w.write_u32(e.flags);
        w.write_u32(e.storage as u32);
        w.write_u32(e.value_count);
        w.write_u32(e.value_start);
        w.write_u32(e.alias_count);
        w.write_u32(e.alias_start);
        w.write_u32(strings.add_opt(e.comment.as_deref()));
    }

    for m in &registry.members {
        let (default_offset, default_size) = match &m.default {
            Some(value) => {
                let blob = encode_default(registry, m, value)?;
                let offset = defaults.len() as u32;
                defaults.extend_from_slice(&blob);
                (offset, blob.len() as u32)
            }
            None => (NO_DEFAULT_VALUE, 0),
        };
        w.write_u32(strings.add(&m.name));
        w.write_u32(strings.add_opt(m.comment.as_deref()));
        w.write_u32(m.type_tag());
        w.write_u32(m.type_id);
        for pair in [m.size, m.alignment, m.offset] {
            w.write_u32(pair[0]);
            w.write_u32(pair[1]);
        }
        w.write_u32(default_offset);
        w.write_u32(default_size);
        w.write_u32(m.flags);
    }

    for v in &registry.enum_values {
        w.write_u32(v.main_alias);
        w.write_u32(0);
        w.write_u64(v.value);
    }
    for a in &registry.enum_aliases {
        w.write_u32(strings.add(&a.name));
        w.write_u32(a.value_index);
    }

    w.write_bytes(&defaults);
    w.write_bytes(&strings.bytes);

    w.seek(sizes_pos);
    w.write_u32(defaults.len() as u32);
    w.write_u32(strings.bytes.len() as u32);

    log::debug!(
        "[registry::write_binary] {} types, {} enums, {} bytes",
        registry.types.len(),
        registry.enums.len(),
        w.len()
    );
    Ok(w.into_bytes())
}

// =======================================================================
// Reading
// =======================================================================

struct Header {
    type_count: usize,
    enum_count: usize,
    member_count: usize,
    value_count: usize,
    alias_count: usize,
    default_size: usize,
    strings_size: usize,
}

/// Byte offsets of each section.
struct Sections {
    type_ids: usize,
    enum_ids: usize,
    types: usize,
    enums: usize,
    members: usize,
    values: usize,
    aliases: usize,
    defaults: usize,
    strings: usize,
    end: usize,
}

impl Sections {
    fn new(h: &Header) -> Option<Self> {
        let type_ids = TYPELIB_HEADER_SIZE;
        let enum_ids = type_ids.checked_add(h.type_count.checked_mul(4)?)?;
        let types = enum_ids.checked_add(h.enum_count.checked_mul(4)?)?;
        let enums = types.checked_add(h.type_count.checked_mul(TYPELIB_TYPE_DESC_SIZE)?)?;
        let members = enums.checked_add(h.enum_count.checked_mul(TYPELIB_ENUM_DESC_SIZE)?)?;
        let values =
            members.checked_add(h.member_count.checked_mul(TYPELIB_MEMBER_DESC_SIZE)?)?;
        let aliases =
            values.checked_add(h.value_count.checked_mul(TYPELIB_ENUM_VALUE_DESC_SIZE)?)?;
        let defaults =
            aliases.checked_add(h.alias_count.checked_mul(TYPELIB_ENUM_ALIAS_DESC_SIZE)?)?;
        let strings = defaults.checked_add(h.default_size)?;
        let end = strings.checked_add(h.strings_size)?;
        Some(Self {
            type_ids,
            enum_ids,
            types,
            enums,
            members,
            values,
            aliases,
            defaults,
            strings,
            end,
        })
    }
}

struct LibReader<'a> {
    r: BinaryReader<'a>,
    strings: &'a [u8],
}

impl<'a> LibReader<'a> {
    fn u32_at(&self, offset: usize) -> DlResult<u32> {
        self.r
            .read_u32_at(offset)
            .map_err(|_| malformed(format!("truncated at offset {}", offset)))
    }

    fn string(&self, offset: u32) -> DlResult<String> {
        let start = offset as usize;
        let tail = self
            .strings
            .get(start..)
            .ok_or_else(|| malformed(format!("string offset {} out of range", offset)))?;
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| malformed("unterminated string in string table"))?;
        String::from_utf8(tail[..len].to_vec())
            .map_err(|_| malformed("string table entry is not utf-8"))
    }

    fn opt_string(&self, offset: u32) -> DlResult<Option<String>> {
        if offset == NO_STRING {
            Ok(None)
        } else {
            self.string(offset).map(Some)
        }
    }
}

fn check_range(start: u32, count: u32, len: usize, what: &str) -> DlResult<()> {
    let end = u64::from(start) + u64::from(count);
    if end > len as u64 {
        return Err(malformed(format!(
            "{} range {}..{} exceeds table of {}",
            what, start, end, len
        )));
    }
    Ok(())
}

pub(crate) fn load(registry: &mut Registry, bytes: &[u8]) -> DlResult<()> {
    if bytes.len() < TYPELIB_HEADER_SIZE {
        return Err(malformed(format!(
            "{} bytes is too short for a type library header",
            bytes.len()
        )));
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let endian = match magic {
        TYPELIB_ID => Endian::Little,
        TYPELIB_ID_SWAPPED => Endian::Big,
        other => return Err(malformed(format!("bad type library magic 0x{:08X}", other))),
    };
    let r = BinaryReader::new(bytes, Format::new(endian, PtrSize::Ptr64));
    let field = |i: usize| -> DlResult<usize> {
        r.read_u32_at(i * 4)
            .map(|v| v as usize)
            .map_err(|_| malformed("truncated header"))
    };

    let version = field(1)? as u32;
    if version != TYPELIB_VERSION {
        return Err(SchemaError::new(
            SchemaErrorKind::VersionMismatch,
            format!(
                "type library version {} (expected {})",
                version, TYPELIB_VERSION
            ),
        )
        .into());
    }
    let header = Header {
        type_count: field(2)?,
        enum_count: field(3)?,
        member_count: field(4)?,
        value_count: field(5)?,
        alias_count: field(6)?,
        default_size: field(7)?,
        strings_size: field(8)?,
    };
    let sections = Sections::new(&header)
        .filter(|s| s.end <= bytes.len())
        .ok_or_else(|| malformed("type library is truncated"))?;

    let lib = LibReader {
        r,
        strings: &bytes[sections.strings..sections.end],
    };
    let defaults = &bytes[sections.defaults..sections.strings];

    let member_base = registry.members.len() as u32;
    let value_base = registry.enum_values.len() as u32;
    let alias_base = registry.enum_aliases.len() as u32;

    // Members first: types only reference them by range.
    let mut member_defaults = Vec::new();
    for i in 0..header.member_count {
        let at = |k: usize| lib.u32_at(sections.members + i * TYPELIB_MEMBER_DESC_SIZE + k * 4);
        let mut member = MemberDesc::new(lib.string(at(0)?)?, Atom::Pod, Storage::Int8);
        member.comment = lib.opt_string(at(1)?)?;
        let tag = at(2)?;
        member
            .apply_type_tag(tag)
            .ok_or_else(|| malformed(format!("member {} has bad type tag 0x{:08X}", member.name, tag)))?;
        member.type_id = at(3)?;
        member.size = [at(4)?, at(5)?];
        member.alignment = [at(6)?, at(7)?];
        member.offset = [at(8)?, at(9)?];
        let (default_offset, default_size) = (at(10)?, at(11)?);
        member.flags = at(12)?;
        if default_offset != NO_DEFAULT_VALUE {
            let start = default_offset as usize;
            let blob = start
                .checked_add(default_size as usize)
                .and_then(|end| defaults.get(start..end))
                .ok_or_else(|| malformed(format!("default of {} out of range", member.name)))?;
            member_defaults.push((registry.members.len(), blob));
        }
        registry.members.push(member);
    }

    let mut new_types = Vec::with_capacity(header.type_count);
    for i in 0..header.type_count {
        let at = |k: usize| lib.u32_at(sections.types + i * TYPELIB_TYPE_DESC_SIZE + k * 4);
        let id: TypeId = lib.u32_at(sections.type_ids + i * 4)?;
        let name = lib.string(at(0)?)?;
        let member_count = at(6)?;
        let member_start = at(7)?;
        check_range(member_start, member_count, header.member_count, "member")?;
        if member_count == 0 {
            return Err(malformed(format!("type {} has no members", name)));
        }
        let first = (member_base + member_start) as usize;
        check_bitfields(&name, &registry.members[first..first + member_count as usize])?;
        let ty = TypeDesc {
            id,
            name,
            comment: lib.opt_string(at(8)?)?,
            flags: at(1)?,
            size: [at(2)?, at(3)?],
            alignment: [at(4)?, at(5)?],
            member_start: member_start + member_base,
            member_count,
        };
        check_identity(registry, ty.id, &ty.name)?;
        new_types.push(registry.types.len());
        registry.push_type(ty);
    }

    for i in 0..header.value_count {
        let base = sections.values + i * TYPELIB_ENUM_VALUE_DESC_SIZE;
        let main_alias = lib.u32_at(base)?;
        check_range(main_alias, 1, header.alias_count, "main alias")?;
        let value = lib
            .r
            .read_u64_at(base + 8)
            .map_err(|_| malformed("truncated enum value"))?;
        registry.enum_values.push(EnumValue {
            value,
            main_alias: main_alias + alias_base,
        });
    }

    for i in 0..header.alias_count {
        let base = sections.aliases + i * TYPELIB_ENUM_ALIAS_DESC_SIZE;
        let name = lib.string(lib.u32_at(base)?)?;
        let value_index = lib.u32_at(base + 4)?;
        check_range(value_index, 1, header.value_count, "alias value")?;
        registry.enum_aliases.push(EnumAlias {
            name,
            value_index: value_index + value_base,
        });
    }

    for i in 0..header.enum_count {
        let at = |k: usize| lib.u32_at(sections.enums + i * TYPELIB_ENUM_DESC_SIZE + k * 4);
        let id: TypeId = lib.u32_at(sections.enum_ids + i * 4)?;
        let storage = u8::try_from(at(2)?)
            .ok()
            .and_then(Storage::from_u8)
            .filter(|s| s.is_enum())
            .ok_or_else(|| malformed("enum has non-enum storage"))?;
        let (value_count, value_start) = (at(3)?, at(4)?);
        let (alias_count, alias_start) = (at(5)?, at(6)?);
        check_range(value_start, value_count, header.value_count, "enum value")?;
        check_range(alias_start, alias_count, header.alias_count, "enum alias")?;
        let e = EnumDesc {
            id,
            name: lib.string(at(0)?)?,
            comment: lib.opt_string(at(7)?)?,
            flags: at(1)?,
            storage,
            value_start: value_start + value_base,
            value_count,
            alias_start: alias_start + alias_base,
            alias_count,
        };
        check_identity(registry, e.id, &e.name)?;
        registry.push_enum(e);
    }

    for &pos in &new_types {
        check_member_references(registry, pos)?;
        registry.index_union(pos);
    }

    for (index, blob) in member_defaults {
        let value = decode_default(registry, &registry.members[index], blob)?;
        registry.members[index].default = Some(value);
    }

    Ok(())
}

fn check_identity(registry: &Registry, id: TypeId, name: &str) -> DlResult<()> {
    if hash_name(name) != id {
        return Err(malformed(format!(
            "id 0x{:08X} does not match name '{}'",
            id, name
        )));
    }
    if registry.has_name(id) {
        return Err(SchemaError::new(
            SchemaErrorKind::DuplicateName,
            format!("'{}' is already defined", name),
        )
        .into());
    }
    Ok(())
}

/// Every bitfield must fit its storage unit, and members of one group
/// (same offsets) must agree on the unit.
fn check_bitfields(type_name: &str, members: &[MemberDesc]) -> DlResult<()> {
    let mut group: Option<&MemberDesc> = None;
    for m in members {
        if m.atom != Atom::Bitfield {
            group = None;
            continue;
        }
        let unit = m.size[0];
        if m.size[1] != unit || !matches!(unit, 1 | 2 | 4 | 8) {
            return Err(malformed(format!(
                "bitfield {}.{} has a {}-byte unit",
                type_name, m.name, unit
            )));
        }
        if m.bits == 0 || m.bits > 64 || m.bit_offset + m.bits > unit * 8 {
            return Err(malformed(format!(
                "bitfield {}.{} ({} bits at {}) does not fit {} bits",
                type_name,
                m.name,
                m.bits,
                m.bit_offset,
                unit * 8
            )));
        }
        match group {
            Some(first) if first.offset == m.offset && first.size != m.size => {
                return Err(malformed(format!(
                    "bitfield {}.{} disagrees with {}.{} on its unit",
                    type_name, m.name, type_name, first.name
                )));
            }
            Some(first) if first.offset == m.offset => {}
            _ => group = Some(m),
        }
    }
    Ok(())
}

fn check_member_references(registry: &Registry, pos: usize) -> DlResult<()> {
    let ty = &registry.types[pos];
    for m in registry.members(ty) {
        let ok = match m.storage {
            Storage::Struct | Storage::Ptr => registry.find_type(m.type_id).is_some(),
            s if s.is_enum() => registry.find_enum(m.type_id).is_some(),
            _ => true,
        };
        if !ok {
            return Err(SchemaError::new(
                SchemaErrorKind::TypeNotFound,
                format!(
                    "member {}.{} references unknown type 0x{:08X}",
                    ty.name, m.name, m.type_id
                ),
            )
            .into());
        }
    }
    Ok(())
}
