// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Text instance to typed instance (and on to binary).
//!
//! ```text
//! {
//!     "Node": {
//!         "value": 1,
//!         "next": "tail",
//!         "__subdata": {
//!             "tail": { "value": 2, "next": null }
//!         }
//!     }
//! }
//! ```
//!
//! Pointer members name an entry of the root's `__subdata` object (or
//! `"__root"`). A name gets its node on first use; subdata entries are read
//! once every name they could satisfy is known, so the order of entries in
//! `__subdata` does not matter.

use super::ast::{self, Entry, Node, NodeKind};
use super::number::{parse_float, parse_int, NumberError};
use crate::codec;
use crate::config::{ROOT_REFERENCE, SUBDATA_KEY};
use crate::error::{DlError, DlResult, Location, ParseError, ParseErrorKind, RangeError};
use crate::instance::{self, Instance, NodeId, Value};
use crate::registry::{Atom, Format, MemberDesc, Registry, Storage, TypeDesc, TypeId};
use std::collections::HashMap;

/// A named pointer target seen while reading.
struct Reference {
    node: NodeId,
    type_id: TypeId,
    /// Where the name was first used.
    first_use: usize,
}

struct Reader<'r, 's> {
    registry: &'r Registry,
    src: &'s str,
    /// `None` while reading a schema default, where pointers must be null.
    refs: Option<HashMap<String, Reference>>,
    nodes: Vec<Option<instance::Node>>,
}

impl<'r, 's> Reader<'r, 's> {
    fn new(registry: &'r Registry, src: &'s str, allow_refs: bool) -> Self {
        Self {
            registry,
            src,
            refs: allow_refs.then(HashMap::new),
            nodes: Vec::new(),
        }
    }

    fn error(&self, kind: ParseErrorKind, offset: usize, message: impl Into<String>) -> DlError {
        ParseError {
            kind,
            message: message.into(),
            location: Location::from_offset(self.src, offset),
        }
        .into()
    }

    fn number_error(&self, e: NumberError, offset: usize) -> DlError {
        match e {
            NumberError::Syntax(message) => self.error(ParseErrorKind::Syntax, offset, message),
            NumberError::Range(message) => RangeError {
                message,
                location: Some(Location::from_offset(self.src, offset)),
            }
            .into(),
        }
    }

    fn find_type(&self, id: TypeId, offset: usize) -> DlResult<&'r TypeDesc> {
        self.registry.find_type(id).ok_or_else(|| {
            self.error(
                ParseErrorKind::TypeNotFound,
                offset,
                format!("type 0x{:08X} not found", id),
            )
        })
    }

    // =======================================================================
    // Structs
    // =======================================================================

    /// Read a struct or union. `is_root` admits the `__subdata` key, which
    /// the caller handles.
    fn read_struct(&mut self, ty: &TypeDesc, node: &Node, is_root: bool) -> DlResult<Value> {
        let registry = self.registry;
        let members = registry.members(ty);

        if let Some(items) = node.as_array() {
            return self.read_positional(ty, members, node, items);
        }
        let Some(entries) = node.as_object() else {
            return Err(self.error(
                ParseErrorKind::Syntax,
                node.start,
                format!("expected an object for {}, found {}", ty.name, node.describe()),
            ));
        };

        let mut values: Vec<Option<Value>> = vec![None; members.len()];
        let mut union_member: Option<usize> = None;
        for entry in entries {
            if entry.key.starts_with("__") {
                if is_root && entry.key == SUBDATA_KEY {
                    continue;
                }
                return Err(self.error(
                    ParseErrorKind::InvalidMember,
                    entry.key_start,
                    format!("{} has no member named {}", ty.name, entry.key),
                ));
            }
            let index = members
                .iter()
                .position(|m| m.name == entry.key)
                .ok_or_else(|| {
                    self.error(
                        ParseErrorKind::InvalidMember,
                        entry.key_start,
                        format!("{} has no member named {}", ty.name, entry.key),
                    )
                })?;
            if ty.is_union() {
                if let Some(previous) = union_member {
                    return Err(self.error(
                        ParseErrorKind::MultipleUnionMembers,
                        entry.key_start,
                        format!(
                            "union {} sets both {} and {}",
                            ty.name, members[previous].name, entry.key
                        ),
                    ));
                }
                union_member = Some(index);
            }
            if values[index].is_some() {
                return Err(self.error(
                    ParseErrorKind::MemberSetTwice,
                    entry.key_start,
                    format!("member {}.{} is set twice", ty.name, entry.key),
                ));
            }
            values[index] = Some(self.read_member(&members[index], &entry.value)?);
        }

        if ty.is_union() {
            let Some(index) = union_member else {
                return Err(self.error(
                    ParseErrorKind::MissingMember,
                    node.start,
                    format!("union {} has no member set", ty.name),
                ));
            };
            let value = values[index].take().unwrap_or(Value::Struct(Vec::new()));
            return Ok(Value::Union {
                member: index as u32,
                value: Box::new(value),
            });
        }
        self.complete(ty, members, values, node.start)
    }

    /// Struct given as an array of member values in declaration order.
    fn read_positional(
        &mut self,
        ty: &TypeDesc,
        members: &[MemberDesc],
        node: &Node,
        items: &[Node],
    ) -> DlResult<Value> {
        if ty.is_union() {
            return Err(self.error(
                ParseErrorKind::Syntax,
                node.start,
                format!("union {} must be given as an object", ty.name),
            ));
        }
        if items.len() > members.len() {
            return Err(self.error(
                ParseErrorKind::TooManyElements,
                items[members.len()].start,
                format!("{} has {} members, {} given", ty.name, members.len(), items.len()),
            ));
        }
        let mut values = vec![None; members.len()];
        for (i, item) in items.iter().enumerate() {
            values[i] = Some(self.read_member(&members[i], item)?);
        }
        self.complete(ty, members, values, node.start)
    }

    /// Fill unset members from their defaults.
    fn complete(
        &self,
        ty: &TypeDesc,
        members: &[MemberDesc],
        values: Vec<Option<Value>>,
        at: usize,
    ) -> DlResult<Value> {
        members
            .iter()
            .zip(values)
            .map(|(m, v)| match (v, &m.default) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(self.error(
                    ParseErrorKind::MissingMember,
                    at,
                    format!("member {}.{} is not set and has no default", ty.name, m.name),
                )),
            })
            .collect::<DlResult<Vec<_>>>()
            .map(Value::Struct)
    }

    // =======================================================================
    // Members
    // =======================================================================

    fn read_member(&mut self, m: &MemberDesc, node: &Node) -> DlResult<Value> {
        match m.atom {
            Atom::Pod => self.read_pod(m, node),
            Atom::Bitfield => {
                let word = self.word(node, "bitfield value")?;
                let v = parse_int(word, Storage::Uint64)
                    .map_err(|e| self.number_error(e, node.start))?;
                let max = crate::registry::layout::bitfield_mask(m.bits);
                if v > i128::from(max) {
                    return Err(RangeError {
                        message: format!("{} does not fit in {}-bit field {}", v, m.bits, m.name),
                        location: Some(Location::from_offset(self.src, node.start)),
                    }
                    .into());
                }
                Ok(Value::Bits(v as u64))
            }
            Atom::InlineArray => {
                let items = self.array(node, m)?;
                let count = m.inline_count as usize;
                if items.len() > count {
                    return Err(self.error(
                        ParseErrorKind::TooManyElements,
                        items[count].start,
                        format!(
                            "inline array {} holds {} elements, {} given",
                            m.name,
                            count,
                            items.len()
                        ),
                    ));
                }
                let mut elements = items
                    .iter()
                    .map(|item| self.read_pod(m, item))
                    .collect::<DlResult<Vec<_>>>()?;
                for i in elements.len()..count {
                    elements.push(self.backfill(m, i)?);
                }
                Ok(Value::Array(elements))
            }
            Atom::Array => {
                if node.is_null() {
                    return Ok(Value::Array(Vec::new()));
                }
                let items = self.array(node, m)?;
                items
                    .iter()
                    .map(|item| self.read_pod(m, item))
                    .collect::<DlResult<Vec<_>>>()
                    .map(Value::Array)
            }
        }
    }

    /// Element `index` of a short inline array: the member's default
    /// element, else the element type's default value.
    fn backfill(&self, m: &MemberDesc, index: usize) -> DlResult<Value> {
        if let Some(Value::Array(defaults)) = &m.default {
            if let Some(v) = defaults.get(index) {
                return Ok(v.clone());
            }
        }
        zero_value(self.registry, m.storage, m.type_id)
    }

    fn array<'n>(&self, node: &'n Node, m: &MemberDesc) -> DlResult<&'n [Node]> {
        node.as_array().ok_or_else(|| {
            self.error(
                ParseErrorKind::Syntax,
                node.start,
                format!("expected an array for {}, found {}", m.name, node.describe()),
            )
        })
    }

    fn word<'n>(&self, node: &'n Node, what: &str) -> DlResult<&'n str> {
        match &node.kind {
            NodeKind::Word(w) => Ok(w),
            _ => Err(self.error(
                ParseErrorKind::Syntax,
                node.start,
                format!("expected {}, found {}", what, node.describe()),
            )),
        }
    }

    /// A single value of the member's storage.
    fn read_pod(&mut self, m: &MemberDesc, node: &Node) -> DlResult<Value> {
        let storage = m.storage;
        match storage {
            Storage::Fp32 | Storage::Fp64 => {
                let word = self.word(node, storage.describe())?;
                let v = parse_float(word, storage == Storage::Fp32)
                    .map_err(|e| self.number_error(e, node.start))?;
                Ok(if storage == Storage::Fp32 {
                    Value::F32(v as f32)
                } else {
                    Value::F64(v)
                })
            }
            s if s.is_enum() => self.read_enum(m, node),
            Storage::Str => match &node.kind {
                NodeKind::Str(s) => Ok(Value::Str(Some(s.clone()))),
                _ if node.is_null() => Ok(Value::Str(None)),
                _ => Err(self.error(
                    ParseErrorKind::Syntax,
                    node.start,
                    format!("expected a string for {}, found {}", m.name, node.describe()),
                )),
            },
            Storage::Ptr => {
                if node.is_null() {
                    return Ok(Value::Ptr(None));
                }
                let name = node.as_text().ok_or_else(|| {
                    self.error(
                        ParseErrorKind::Syntax,
                        node.start,
                        format!("expected a reference for {}, found {}", m.name, node.describe()),
                    )
                })?;
                self.reference(name, m.type_id, node.start)
                    .map(|id| Value::Ptr(Some(id)))
            }
            Storage::Struct => {
                let sub = self.find_type(m.type_id, node.start)?;
                self.read_struct(sub, node, false)
            }
            s => {
                let word = self.word(node, s.describe())?;
                let v = parse_int(word, s).map_err(|e| self.number_error(e, node.start))?;
                Ok(int_value(s, v))
            }
        }
    }

    fn read_enum(&self, m: &MemberDesc, node: &Node) -> DlResult<Value> {
        let e = self.registry.find_enum(m.type_id).ok_or_else(|| {
            self.error(
                ParseErrorKind::TypeNotFound,
                node.start,
                format!("enum of member {} not found", m.name),
            )
        })?;
        let text = node.as_text().ok_or_else(|| {
            self.error(
                ParseErrorKind::Syntax,
                node.start,
                format!("expected a value of enum {}, found {}", e.name, node.describe()),
            )
        })?;
        if let Some(v) = self.registry.enum_value_by_alias(e, text) {
            return Ok(Value::Enum(v));
        }
        // A literal equal to a declared value is accepted too.
        if let Ok(v) = parse_int(text, m.storage) {
            let raw = v as i64 as u64;
            if self.registry.enum_value_name(e, raw).is_some() {
                return Ok(Value::Enum(raw));
            }
        }
        Err(self.error(
            ParseErrorKind::InvalidEnumValue,
            node.start,
            format!("'{}' is not a value of enum {}", text, e.name),
        ))
    }

    /// Node for a named pointer target, allocated on first use.
    fn reference(&mut self, name: &str, type_id: TypeId, at: usize) -> DlResult<NodeId> {
        let limit = self.registry.limits().max_subdata_refs;
        let Some(refs) = &self.refs else {
            return Err(self.error(
                ParseErrorKind::MissingSection,
                at,
                format!("pointer '{}' in a default value; defaults can only hold null", name),
            ));
        };
        if let Some(r) = refs.get(name) {
            if r.type_id != type_id {
                return Err(self.error(
                    ParseErrorKind::TypeMismatch,
                    at,
                    format!("'{}' is used as two different types", name),
                ));
            }
            return Ok(r.node);
        }
        if refs.len() >= limit {
            return Err(DlError::limit("subdata references", limit));
        }
        let node = NodeId(self.nodes.len() as u32);
        self.nodes.push(None);
        if let Some(refs) = &mut self.refs {
            refs.insert(
                name.to_string(),
                Reference {
                    node,
                    type_id,
                    first_use: at,
                },
            );
        }
        Ok(node)
    }

    // =======================================================================
    // Subdata
    // =======================================================================

    /// Read every referenced `__subdata` entry into its node.
    fn read_subdata(&mut self, section: Option<&Entry>) -> DlResult<()> {
        let pending = self.pending_refs();
        let Some(section) = section else {
            if let Some((name, at)) = pending.first() {
                return Err(self.error(
                    ParseErrorKind::MissingSection,
                    *at,
                    format!("'{}' is referenced but there is no {} section", name, SUBDATA_KEY),
                ));
            }
            return Ok(());
        };
        let entries = section.value.as_object().ok_or_else(|| {
            self.error(
                ParseErrorKind::Syntax,
                section.value.start,
                format!("{} must be an object", SUBDATA_KEY),
            )
        })?;

        let mut done = vec![false; entries.len()];
        loop {
            let mut progress = false;
            for (i, entry) in entries.iter().enumerate() {
                if done[i] {
                    continue;
                }
                let Some((node, type_id)) = self
                    .refs
                    .as_ref()
                    .and_then(|refs| refs.get(&entry.key))
                    .map(|r| (r.node, r.type_id))
                else {
                    continue;
                };
                if self.nodes[node.index()].is_some() {
                    return Err(self.error(
                        ParseErrorKind::MemberSetTwice,
                        entry.key_start,
                        format!("subdata '{}' is defined twice", entry.key),
                    ));
                }
                let ty = self.find_type(type_id, entry.value.start)?;
                let value = self.read_struct(ty, &entry.value, false)?;
                self.nodes[node.index()] = Some(instance::Node { type_id, value });
                done[i] = true;
                progress = true;
            }
            if !progress {
                break;
            }
        }

        if let Some((i, _)) = done.iter().enumerate().find(|(_, d)| !**d) {
            let entry = &entries[i];
            return Err(self.error(
                ParseErrorKind::UnusedSubdata,
                entry.key_start,
                format!("subdata '{}' is not referenced", entry.key),
            ));
        }
        if let Some((name, at)) = self.pending_refs().first() {
            return Err(self.error(
                ParseErrorKind::UnknownReference,
                *at,
                format!("'{}' is not defined in {}", name, SUBDATA_KEY),
            ));
        }
        Ok(())
    }

    /// Names whose node is not read yet, in order of first use.
    fn pending_refs(&self) -> Vec<(String, usize)> {
        let mut pending: Vec<(String, usize)> = self
            .refs
            .iter()
            .flatten()
            .filter(|(_, r)| self.nodes[r.node.index()].is_none())
            .map(|(name, r)| (name.clone(), r.first_use))
            .collect();
        pending.sort_by_key(|(_, at)| *at);
        pending
    }
}

fn int_value(storage: Storage, v: i128) -> Value {
    match storage {
        Storage::Int8 => Value::I8(v as i8),
        Storage::Int16 => Value::I16(v as i16),
        Storage::Int32 => Value::I32(v as i32),
        Storage::Int64 => Value::I64(v as i64),
        Storage::Uint8 => Value::U8(v as u8),
        Storage::Uint16 => Value::U16(v as u16),
        Storage::Uint32 => Value::U32(v as u32),
        _ => Value::U64(v as u64),
    }
}

/// Default value of one element of `storage`: member defaults for structs,
/// zero or null otherwise. Enums take 0 when declared, else their first
/// value.
fn zero_value(registry: &Registry, storage: Storage, type_id: TypeId) -> DlResult<Value> {
    Ok(match storage {
        Storage::Fp32 => Value::F32(0.0),
        Storage::Fp64 => Value::F64(0.0),
        Storage::Str => Value::Str(None),
        Storage::Ptr => Value::Ptr(None),
        s if s.is_enum() => {
            let e = registry
                .find_enum(type_id)
                .ok_or_else(|| DlError::type_not_found(type_id))?;
            let first = registry.enum_values(e).first().map_or(0, |v| v.value);
            Value::Enum(if registry.enum_value_name(e, 0).is_some() {
                0
            } else {
                first
            })
        }
        Storage::Struct => {
            let ty = registry
                .find_type(type_id)
                .ok_or_else(|| DlError::type_not_found(type_id))?;
            let members = registry.members(ty);
            if ty.is_union() {
                let Some(first) = members.first() else {
                    return Err(DlError::invalid_instance(format!("union {} is empty", ty.name)));
                };
                Value::Union {
                    member: 0,
                    value: Box::new(member_zero(registry, first)?),
                }
            } else {
                members
                    .iter()
                    .map(|m| member_zero(registry, m))
                    .collect::<DlResult<Vec<_>>>()
                    .map(Value::Struct)?
            }
        }
        s => int_value(s, 0),
    })
}

fn member_zero(registry: &Registry, m: &MemberDesc) -> DlResult<Value> {
    if let Some(default) = &m.default {
        return Ok(default.clone());
    }
    match m.atom {
        Atom::Pod => zero_value(registry, m.storage, m.type_id),
        Atom::Bitfield => Ok(Value::Bits(0)),
        Atom::Array => Ok(Value::Array(Vec::new())),
        Atom::InlineArray => (0..m.inline_count)
            .map(|_| zero_value(registry, m.storage, m.type_id))
            .collect::<DlResult<Vec<_>>>()
            .map(Value::Array),
    }
}

/// Parse a text instance into its root type and a typed instance.
pub fn parse(registry: &Registry, text: &str) -> DlResult<(TypeId, Instance)> {
    let doc = ast::parse_document_with_depth(text, registry.limits().max_text_depth)?;
    let mut reader = Reader::new(registry, text, true);
    let root_entry = match doc.as_object() {
        Some([entry]) => entry,
        _ => {
            return Err(reader.error(
                ParseErrorKind::Syntax,
                doc.start,
                "expected an object with the root type name as its only key",
            ))
        }
    };
    let ty = registry.find_type_by_name(&root_entry.key).ok_or_else(|| {
        reader.error(
            ParseErrorKind::TypeNotFound,
            root_entry.key_start,
            format!("type {} not found", root_entry.key),
        )
    })?;

    reader.nodes.push(None);
    if let Some(refs) = &mut reader.refs {
        refs.insert(
            ROOT_REFERENCE.to_string(),
            Reference {
                node: NodeId::ROOT,
                type_id: ty.id,
                first_use: root_entry.key_start,
            },
        );
    }

    let value = reader.read_struct(ty, &root_entry.value, true)?;
    reader.nodes[0] = Some(instance::Node {
        type_id: ty.id,
        value,
    });
    let subdata = root_entry
        .value
        .as_object()
        .and_then(|entries| entries.iter().find(|e| e.key == SUBDATA_KEY));
    reader.read_subdata(subdata)?;

    let nodes = reader
        .nodes
        .into_iter()
        .map(|n| n.ok_or_else(|| DlError::invalid_instance("unresolved subdata node")))
        .collect::<DlResult<Vec<_>>>()?;
    log::trace!(
        "[text::parse] {} with {} nodes from {} bytes of text",
        ty.name,
        nodes.len(),
        text.len()
    );
    Ok((ty.id, Instance::with_nodes(nodes)))
}

/// Pack a text instance into a binary instance in `format`.
pub fn pack_with_format(registry: &Registry, text: &str, format: Format) -> DlResult<Vec<u8>> {
    let (type_id, instance) = parse(registry, text)?;
    codec::store(registry, type_id, &instance, format)
}

/// Pack a text instance into a binary instance in host format.
pub fn pack(registry: &Registry, text: &str) -> DlResult<Vec<u8>> {
    pack_with_format(registry, text, Format::host())
}

/// Bytes `pack_with_format` would produce.
pub fn pack_calc_size(registry: &Registry, text: &str, format: Format) -> DlResult<usize> {
    let (type_id, instance) = parse(registry, text)?;
    codec::calc_size(registry, type_id, &instance, format)
}

/// Read the default value of `member` from schema text. Pointers must be
/// null.
pub(crate) fn read_default(
    registry: &Registry,
    src: &str,
    member: &MemberDesc,
    node: &Node,
) -> DlResult<Value> {
    let mut reader = Reader::new(registry, src, false);
    reader.read_member(member, node)
}
