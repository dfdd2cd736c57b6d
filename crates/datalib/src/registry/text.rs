// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Text type-library loader.
//!
//! Loading runs in two passes. The first walks the document and appends
//! enum, type and member descriptors with unresolved references. The second
//! resolves member type names (struct or enum) and enum-valued inline array
//! lengths, lays out every new type, then compiles member defaults in
//! dependency order through the instance text reader.

use super::layout;
use super::types::{
    member_flags, type_flags, Atom, EnumAlias, EnumDesc, EnumValue, MemberDesc, Storage, TypeDesc,
    TypeId,
};
use super::Registry;
use crate::error::{DlError, DlResult, Location, SchemaError, SchemaErrorKind};
use crate::hash::hash_name;
use crate::text::ast::{self, Entry, Node, NodeKind};
use crate::text::number::{parse_int, NumberError};
use std::collections::HashSet;

/// Inline arrays store their length in 16 bits of the type tag.
const MAX_INLINE_COUNT: u32 = 0xFFFF;

/// A member declaration waiting for the fix-up pass.
struct Pending {
    member: usize,
    owner: String,
    /// Referenced struct/enum name, if any.
    type_name: Option<String>,
    /// Enum alias used as inline array length.
    inline_len: Option<String>,
    default: Option<Node>,
    location: usize,
}

/// Parsed member type string.
struct TypeDecl {
    atom: Atom,
    storage: Storage,
    type_name: Option<String>,
    inline_count: u32,
    inline_len: Option<String>,
    bits: u32,
}

struct Loader<'a> {
    registry: &'a mut Registry,
    src: &'a str,
    pending: Vec<Pending>,
    new_types: Vec<usize>,
}

pub(crate) fn load(registry: &mut Registry, src: &str) -> DlResult<()> {
    let doc = ast::parse_document(src).map_err(into_schema_syntax)?;
    let mut loader = Loader {
        registry,
        src,
        pending: Vec::new(),
        new_types: Vec::new(),
    };
    let entries = loader.object(&doc, "type library")?;

    // Enums first so member resolution does not depend on key order.
    for entry in entries {
        match entry.key.as_str() {
            "module" | "usercode" => {}
            "enums" => loader.enums(&entry.value)?,
            "types" | "unions" => {}
            other => {
                return Err(loader.error(
                    SchemaErrorKind::UnexpectedKey,
                    entry.key_start,
                    format!("unexpected top-level key '{}'", other),
                ))
            }
        }
    }
    for entry in entries {
        match entry.key.as_str() {
            "types" => loader.types(&entry.value, false)?,
            "unions" => loader.types(&entry.value, true)?,
            _ => {}
        }
    }

    loader.resolve()?;
    let order = layout::layout_types(loader.registry, &loader.new_types).map_err(DlError::from)?;
    loader.compile_defaults(&order)?;
    Ok(())
}

fn into_schema_syntax(err: DlError) -> DlError {
    match err {
        DlError::Parse(p) => SchemaError::new(SchemaErrorKind::Syntax, p.message)
            .at(p.location)
            .into(),
        other => other,
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        && !name.as_bytes()[0].is_ascii_digit()
}

impl<'a> Loader<'a> {
    fn error(&self, kind: SchemaErrorKind, offset: usize, message: impl Into<String>) -> DlError {
        SchemaError::new(kind, message)
            .at(Location::from_offset(self.src, offset))
            .into()
    }

    fn object<'n>(&self, node: &'n Node, what: &str) -> DlResult<&'n [Entry]> {
        node.as_object().ok_or_else(|| {
            self.error(
                SchemaErrorKind::Syntax,
                node.start,
                format!("{} must be an object, found {}", what, node.describe()),
            )
        })
    }

    fn string<'n>(&self, node: &'n Node, what: &str) -> DlResult<&'n str> {
        match &node.kind {
            NodeKind::Str(s) => Ok(s),
            _ => Err(self.error(
                SchemaErrorKind::Syntax,
                node.start,
                format!("{} must be a string, found {}", what, node.describe()),
            )),
        }
    }

    fn boolean(&self, node: &Node, what: &str) -> DlResult<bool> {
        match node.as_text() {
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            _ => Err(self.error(
                SchemaErrorKind::Syntax,
                node.start,
                format!("{} must be true or false", what),
            )),
        }
    }

    fn check_new_name(&self, name: &str, offset: usize) -> DlResult<TypeId> {
        if !is_identifier(name) {
            return Err(self.error(
                SchemaErrorKind::InvalidType,
                offset,
                format!("'{}' is not a valid type name", name),
            ));
        }
        let id = hash_name(name);
        if self.registry.has_name(id) {
            return Err(self.error(
                SchemaErrorKind::DuplicateName,
                offset,
                format!("'{}' is already defined", name),
            ));
        }
        Ok(id)
    }

    // ===================================================================
    // Enums
    // ===================================================================

    fn enums(&mut self, node: &Node) -> DlResult<()> {
        for entry in self.object(node, "enums")? {
            self.enum_def(entry)?;
        }
        Ok(())
    }

    fn enum_def(&mut self, entry: &Entry) -> DlResult<()> {
        let id = self.check_new_name(&entry.key, entry.key_start)?;
        let mut storage = Storage::EnumUint32;
        let mut values_node = None;
        let mut comment = None;
        let mut flags = 0;

        for field in self.object(&entry.value, "enum")? {
            match field.key.as_str() {
                "values" => values_node = Some(&field.value),
                "type" => {
                    let name = self.string(&field.value, "enum type")?;
                    storage = Storage::enum_from_name(name).ok_or_else(|| {
                        self.error(
                            SchemaErrorKind::InvalidType,
                            field.value.start,
                            format!("'{}' is not a valid enum storage type", name),
                        )
                    })?;
                }
                "extern" => {
                    if self.boolean(&field.value, "extern")? {
                        flags |= type_flags::IS_EXTERNAL;
                    }
                }
                "comment" => comment = Some(self.string(&field.value, "comment")?.to_string()),
                other => {
                    return Err(self.error(
                        SchemaErrorKind::UnexpectedKey,
                        field.key_start,
                        format!("unexpected key '{}' in enum {}", other, entry.key),
                    ))
                }
            }
        }

        let values_node = values_node.ok_or_else(|| {
            self.error(
                SchemaErrorKind::Syntax,
                entry.key_start,
                format!("enum {} has no 'values'", entry.key),
            )
        })?;

        let value_start = self.registry.enum_values.len();
        let alias_start = self.registry.enum_aliases.len();
        let mut seen = HashSet::new();

        for value_entry in self.object(values_node, "enum values")? {
            let (raw_node, extra_aliases) = match &value_entry.value.kind {
                NodeKind::Object(fields) => {
                    let mut raw = None;
                    let mut aliases: &[Node] = &[];
                    for field in fields {
                        match field.key.as_str() {
                            "value" => raw = Some(&field.value),
                            "aliases" => {
                                aliases = field.value.as_array().ok_or_else(|| {
                                    self.error(
                                        SchemaErrorKind::Syntax,
                                        field.value.start,
                                        "aliases must be an array",
                                    )
                                })?;
                            }
                            "comment" => {}
                            other => {
                                return Err(self.error(
                                    SchemaErrorKind::UnexpectedKey,
                                    field.key_start,
                                    format!("unexpected key '{}' in enum value", other),
                                ))
                            }
                        }
                    }
                    let raw = raw.ok_or_else(|| {
                        self.error(
                            SchemaErrorKind::InvalidEnumValue,
                            value_entry.key_start,
                            format!("enum value {} has no 'value'", value_entry.key),
                        )
                    })?;
                    (raw, aliases)
                }
                _ => (&value_entry.value, &[][..]),
            };

            let value = self.enum_raw_value(raw_node, storage)?;
            let value_index = self.registry.enum_values.len() as u32;
            let main_alias = self.registry.enum_aliases.len() as u32;
            self.registry.enum_values.push(EnumValue { value, main_alias });

            let names = std::iter::once((value_entry.key.as_str(), value_entry.key_start)).chain(
                extra_aliases
                    .iter()
                    .filter_map(|n| n.as_text().map(|t| (t, n.start))),
            );
            for (name, offset) in names {
                if !seen.insert(name.to_string()) {
                    return Err(self.error(
                        SchemaErrorKind::DuplicateName,
                        offset,
                        format!("alias '{}' used twice in enum {}", name, entry.key),
                    ));
                }
                self.registry.enum_aliases.push(EnumAlias {
                    name: name.to_string(),
                    value_index,
                });
            }
        }

        let desc = EnumDesc {
            id,
            name: entry.key.clone(),
            comment,
            flags,
            storage,
            value_start: value_start as u32,
            value_count: (self.registry.enum_values.len() - value_start) as u32,
            alias_start: alias_start as u32,
            alias_count: (self.registry.enum_aliases.len() - alias_start) as u32,
        };
        log::debug!(
            "[registry::text] enum {} ({} values)",
            desc.name,
            desc.value_count
        );
        self.registry.push_enum(desc);
        Ok(())
    }

    fn enum_raw_value(&self, node: &Node, storage: Storage) -> DlResult<u64> {
        let word = node.as_text().ok_or_else(|| {
            self.error(
                SchemaErrorKind::InvalidEnumValue,
                node.start,
                "enum value must be an integer",
            )
        })?;
        let value = parse_int(word, storage).map_err(|e| {
            let message = match e {
                NumberError::Syntax(m) | NumberError::Range(m) => m,
            };
            self.error(SchemaErrorKind::InvalidEnumValue, node.start, message)
        })?;
        // Two's complement in 64 bits; in range for the storage by now.
        Ok(value as i64 as u64)
    }

    // ===================================================================
    // Types and unions
    // ===================================================================

    fn types(&mut self, node: &Node, unions: bool) -> DlResult<()> {
        let what = if unions { "unions" } else { "types" };
        for entry in self.object(node, what)? {
            self.type_def(entry, unions)?;
        }
        Ok(())
    }

    fn type_def(&mut self, entry: &Entry, is_union: bool) -> DlResult<()> {
        let id = self.check_new_name(&entry.key, entry.key_start)?;
        let mut flags = if is_union { type_flags::IS_UNION } else { 0 };
        let mut verify = true;
        let mut align = 0u32;
        let mut comment = None;
        let mut members_node = None;

        for field in self.object(&entry.value, "type")? {
            match field.key.as_str() {
                "members" => members_node = Some(&field.value),
                "align" => align = self.alignment(&field.value)?,
                "extern" => {
                    if self.boolean(&field.value, "extern")? {
                        flags |= type_flags::IS_EXTERNAL;
                    }
                }
                "verify" => verify = self.boolean(&field.value, "verify")?,
                "comment" => comment = Some(self.string(&field.value, "comment")?.to_string()),
                other => {
                    return Err(self.error(
                        SchemaErrorKind::UnexpectedKey,
                        field.key_start,
                        format!("unexpected key '{}' in type {}", other, entry.key),
                    ))
                }
            }
        }
        if verify && flags & type_flags::IS_EXTERNAL != 0 {
            flags |= type_flags::VERIFY_EXTERNAL_SIZE_ALIGN;
        }

        let members = members_node
            .and_then(Node::as_array)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| {
                self.error(
                    SchemaErrorKind::MissingMembers,
                    entry.key_start,
                    format!("type {} must declare a non-empty 'members' array", entry.key),
                )
            })?;

        let member_start = self.registry.members.len();
        let mut names = HashSet::new();
        for member_node in members {
            let name_offset = member_node.start;
            let member = self.member_def(&entry.key, member_node)?;
            if !names.insert(self.registry.members[member].name.clone()) {
                return Err(self.error(
                    SchemaErrorKind::DuplicateName,
                    name_offset,
                    format!(
                        "member {}.{} declared twice",
                        entry.key, self.registry.members[member].name
                    ),
                ));
            }
        }

        self.new_types.push(self.registry.types.len());
        self.registry.push_type(TypeDesc {
            id,
            name: entry.key.clone(),
            comment,
            flags,
            size: [0; 2],
            alignment: [align; 2],
            member_start: member_start as u32,
            member_count: (self.registry.members.len() - member_start) as u32,
        });
        Ok(())
    }

    fn alignment(&self, node: &Node) -> DlResult<u32> {
        let word = node.as_text().unwrap_or_default();
        match parse_int(word, Storage::Uint32) {
            Ok(v) if v > 0 && (v as u32).is_power_of_two() => Ok(v as u32),
            _ => Err(self.error(
                SchemaErrorKind::InvalidType,
                node.start,
                format!("align must be a power of two, found '{}'", word),
            )),
        }
    }

    /// Append one member declaration and return its index.
    fn member_def(&mut self, owner: &str, node: &Node) -> DlResult<usize> {
        let mut name = None;
        let mut type_node = None;
        let mut default = None;
        let mut comment = None;
        let mut is_const = true;
        let mut verify = true;

        for field in self.object(node, "member")? {
            match field.key.as_str() {
                "name" => name = Some(self.string(&field.value, "member name")?),
                "type" => type_node = Some(&field.value),
                "default" => default = Some(field.value.clone()),
                "comment" => comment = Some(self.string(&field.value, "comment")?.to_string()),
                "const" => is_const = self.boolean(&field.value, "const")?,
                "verify" => verify = self.boolean(&field.value, "verify")?,
                other => {
                    return Err(self.error(
                        SchemaErrorKind::UnexpectedKey,
                        field.key_start,
                        format!("unexpected key '{}' in member of {}", other, owner),
                    ))
                }
            }
        }

        let name = name
            .filter(|n| is_identifier(n))
            .ok_or_else(|| {
                self.error(
                    SchemaErrorKind::Syntax,
                    node.start,
                    format!("member of {} needs a valid 'name'", owner),
                )
            })?;
        let type_node = type_node.ok_or_else(|| {
            self.error(
                SchemaErrorKind::Syntax,
                node.start,
                format!("member {}.{} needs a 'type'", owner, name),
            )
        })?;
        let type_str = self.string(type_node, "member type")?;
        let decl = self.parse_type(type_str, type_node.start)?;

        let mut member = MemberDesc::new(name, decl.atom, decl.storage);
        member.comment = comment;
        member.inline_count = decl.inline_count;
        member.bits = decl.bits;
        if let Some(ref type_name) = decl.type_name {
            member.type_id = hash_name(type_name);
        }
        if is_const {
            member.flags |= member_flags::IS_CONST;
        }
        if verify {
            member.flags |= member_flags::VERIFY_EXTERNAL_SIZE_OFFSET;
        }

        let index = self.registry.members.len();
        self.registry.members.push(member);
        self.pending.push(Pending {
            member: index,
            owner: owner.to_string(),
            type_name: decl.type_name,
            inline_len: decl.inline_len,
            default,
            location: type_node.start,
        });
        Ok(index)
    }

    /// Parse `int32`, `Foo`, `Foo*`, `Foo[]`, `Foo*[]`, `Foo[8]`,
    /// `Foo[ENUM_VALUE]` or `bitfield:N`.
    fn parse_type(&self, s: &str, offset: usize) -> DlResult<TypeDecl> {
        let invalid = |msg: String| self.error(SchemaErrorKind::InvalidType, offset, msg);

        if let Some(bits) = s.strip_prefix("bitfield:") {
            let bits: u32 = bits
                .trim()
                .parse()
                .map_err(|_| invalid(format!("bad bit count in '{}'", s)))?;
            return Ok(TypeDecl {
                atom: Atom::Bitfield,
                storage: Storage::Uint8,
                type_name: None,
                inline_count: 0,
                inline_len: None,
                bits,
            });
        }

        let (atom, base, inline_count, inline_len) = if let Some(base) = s.strip_suffix("[]") {
            (Atom::Array, base, 0, None)
        } else if let Some(open) = s.strip_suffix(']').and_then(|t| t.rfind('[')) {
            let len = &s[open + 1..s.len() - 1];
            let base = &s[..open];
            match len.parse::<u32>() {
                Ok(0) => return Err(invalid(format!("inline array '{}' has no elements", s))),
                Ok(n) if n > MAX_INLINE_COUNT => {
                    return Err(invalid(format!("inline array '{}' is too long", s)))
                }
                Ok(n) => (Atom::InlineArray, base, n, None),
                Err(_) if is_identifier(len) => (Atom::InlineArray, base, 0, Some(len.to_string())),
                Err(_) => return Err(invalid(format!("bad inline array length in '{}'", s))),
            }
        } else {
            (Atom::Pod, s, 0, None)
        };

        let (is_ptr, base) = match base.strip_suffix('*') {
            Some(b) => (true, b),
            None => (false, base),
        };

        if let Some(storage) = Storage::from_builtin_name(base) {
            if is_ptr {
                return Err(invalid(format!(
                    "pointer to builtin type '{}' is not supported",
                    base
                )));
            }
            return Ok(TypeDecl {
                atom,
                storage,
                type_name: None,
                inline_count,
                inline_len,
                bits: 0,
            });
        }

        if !is_identifier(base) {
            return Err(invalid(format!("'{}' is not a valid member type", s)));
        }
        Ok(TypeDecl {
            atom,
            storage: if is_ptr { Storage::Ptr } else { Storage::Struct },
            type_name: Some(base.to_string()),
            inline_count,
            inline_len,
            bits: 0,
        })
    }

    // ===================================================================
    // Fix-up
    // ===================================================================

    fn resolve(&mut self) -> DlResult<()> {
        for pending in &self.pending {
            let member = &self.registry.members[pending.member];

            if let Some(type_name) = &pending.type_name {
                let is_type = self.registry.find_type(member.type_id).is_some();
                let enum_storage = self.registry.find_enum(member.type_id).map(|e| e.storage);
                match (is_type, enum_storage) {
                    (true, _) => {}
                    (false, Some(_)) if member.storage == Storage::Ptr => {
                        return Err(self.error(
                            SchemaErrorKind::InvalidType,
                            pending.location,
                            format!(
                                "member {}.{} points to enum {}",
                                pending.owner, member.name, type_name
                            ),
                        ));
                    }
                    (false, Some(storage)) => self.registry.members[pending.member].storage = storage,
                    (false, None) => {
                        return Err(self.error(
                            SchemaErrorKind::TypeNotFound,
                            pending.location,
                            format!(
                                "member {}.{} references unknown type '{}'",
                                pending.owner, member.name, type_name
                            ),
                        ))
                    }
                }
            }

            if let Some(alias) = &pending.inline_len {
                let count = self
                    .registry
                    .find_enum_value(alias)
                    .filter(|&v| v > 0 && v <= u64::from(MAX_INLINE_COUNT))
                    .ok_or_else(|| {
                        self.error(
                            SchemaErrorKind::InvalidEnumValue,
                            pending.location,
                            format!(
                                "inline array length '{}' of {}.{} is not a usable enum value",
                                alias, pending.owner, self.registry.members[pending.member].name
                            ),
                        )
                    })?;
                self.registry.members[pending.member].inline_count = count as u32;
            }
        }
        Ok(())
    }

    fn compile_defaults(&mut self, order: &[usize]) -> DlResult<()> {
        for &pos in order {
            let range = self.registry.types[pos].member_range();
            for pending in self.pending.iter().filter(|p| range.contains(&p.member)) {
                let Some(node) = &pending.default else {
                    continue;
                };
                let member = &self.registry.members[pending.member];
                let value = crate::text::pack::read_default(&*self.registry, self.src, member, node)
                    .map_err(|e| {
                        let location = e.location();
                        let mut err = SchemaError::new(
                            SchemaErrorKind::InvalidDefault,
                            format!("default of {}.{}: {}", pending.owner, member.name, e),
                        );
                        err.location = location;
                        DlError::from(err)
                    })?;
                self.registry.members[pending.member].default = Some(value);
            }
        }
        Ok(())
    }
}
