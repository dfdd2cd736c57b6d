// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed instance (or binary instance) to text.
//!
//! Output is the same grammar [`parse`](super::parse) reads: the root type
//! name as the only key, members by name, enums by their main alias, and
//! pointer targets as named entries of the root's `__subdata` object.

use crate::codec;
use crate::config::{POINTER_NAME_PREFIX, ROOT_REFERENCE, SUBDATA_KEY, TEXT_INDENT};
use crate::error::{DlError, DlResult};
use crate::instance::{Instance, NodeId, Value};
use crate::registry::{Atom, MemberDesc, Registry, Storage, TypeDesc, TypeId};
use std::fmt::Write as _;

struct TextWriter<'r> {
    registry: &'r Registry,
    out: String,
    /// Reference name per node index.
    names: Vec<String>,
}

impl<'r> TextWriter<'r> {
    fn indent(&mut self, depth: usize) {
        for _ in 0..depth * TEXT_INDENT {
            self.out.push(' ');
        }
    }

    fn key(&mut self, depth: usize, name: &str) {
        self.indent(depth);
        write_quoted(&mut self.out, name);
        self.out.push_str(" : ");
    }

    fn find_type(&self, id: TypeId) -> DlResult<&'r TypeDesc> {
        self.registry
            .find_type(id)
            .ok_or_else(|| DlError::type_not_found(id))
    }

    /// Write the body of a struct or union as an object. `subdata` lists
    /// the nodes to emit under `__subdata` (root only).
    fn write_struct(
        &mut self,
        ty: &TypeDesc,
        value: &Value,
        depth: usize,
        subdata: &[(NodeId, TypeId, &Value)],
    ) -> DlResult<()> {
        let registry = self.registry;
        let members = registry.members(ty);
        let fields: Vec<(&MemberDesc, &Value)> = match value {
            Value::Union { member, value } => {
                let m = members.get(*member as usize).ok_or_else(|| {
                    DlError::invalid_instance(format!("union {} has no member #{}", ty.name, member))
                })?;
                vec![(m, value.as_ref())]
            }
            Value::Struct(values) if values.len() == members.len() => {
                members.iter().zip(values).collect()
            }
            other => {
                return Err(DlError::invalid_instance(format!(
                    "{} given a {} value with the wrong shape",
                    ty.name,
                    other.kind_name()
                )))
            }
        };

        self.out.push_str("{\n");
        let total = fields.len() + usize::from(!subdata.is_empty());
        for (i, (m, v)) in fields.into_iter().enumerate() {
            self.key(depth + 1, &m.name);
            self.write_member(m, v, depth + 1)?;
            self.out.push_str(if i + 1 < total { ",\n" } else { "\n" });
        }
        if !subdata.is_empty() {
            self.key(depth + 1, SUBDATA_KEY);
            self.out.push_str("{\n");
            for (i, (id, tid, v)) in subdata.iter().enumerate() {
                let name = self.names[id.index()].clone();
                self.key(depth + 2, &name);
                let sub = self.find_type(*tid)?;
                self.write_struct(sub, v, depth + 2, &[])?;
                self.out
                    .push_str(if i + 1 < subdata.len() { ",\n" } else { "\n" });
            }
            self.indent(depth + 1);
            self.out.push_str("}\n");
        }
        self.indent(depth);
        self.out.push('}');
        Ok(())
    }

    fn write_member(&mut self, m: &MemberDesc, value: &Value, depth: usize) -> DlResult<()> {
        match (m.atom, value) {
            (Atom::Array | Atom::InlineArray, Value::Array(elements)) => {
                if elements.is_empty() {
                    self.out.push_str("[]");
                    return Ok(());
                }
                if m.storage == Storage::Struct {
                    self.out.push_str("[\n");
                    for (i, e) in elements.iter().enumerate() {
                        self.indent(depth + 1);
                        self.write_value(m, e, depth + 1)?;
                        self.out
                            .push_str(if i + 1 < elements.len() { ",\n" } else { "\n" });
                    }
                    self.indent(depth);
                    self.out.push(']');
                } else {
                    self.out.push('[');
                    for (i, e) in elements.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        self.write_value(m, e, depth)?;
                    }
                    self.out.push(']');
                }
                Ok(())
            }
            (Atom::Bitfield, Value::Bits(v)) => {
                let _ = write!(self.out, "{}", v);
                Ok(())
            }
            (Atom::Pod, v) => self.write_value(m, v, depth),
            (_, v) => Err(mismatch(m, v)),
        }
    }

    /// A single value of the member's storage.
    fn write_value(&mut self, m: &MemberDesc, value: &Value, depth: usize) -> DlResult<()> {
        let out = &mut self.out;
        match (m.storage, value) {
            (Storage::Int8, Value::I8(v)) => write_display(out, v),
            (Storage::Int16, Value::I16(v)) => write_display(out, v),
            (Storage::Int32, Value::I32(v)) => write_display(out, v),
            (Storage::Int64, Value::I64(v)) => write_display(out, v),
            (Storage::Uint8, Value::U8(v)) => write_display(out, v),
            (Storage::Uint16, Value::U16(v)) => write_display(out, v),
            (Storage::Uint32, Value::U32(v)) => write_display(out, v),
            (Storage::Uint64, Value::U64(v)) => write_display(out, v),
            (Storage::Fp32, Value::F32(v)) => {
                let _ = write!(out, "{:?}", v);
            }
            (Storage::Fp64, Value::F64(v)) => {
                let _ = write!(out, "{:?}", v);
            }
            (s, Value::Enum(raw)) if s.is_enum() => {
                let registry = self.registry;
                let e = registry
                    .find_enum(m.type_id)
                    .ok_or_else(|| DlError::type_not_found(m.type_id))?;
                let name = registry.enum_value_name(e, *raw).ok_or_else(|| {
                    DlError::invalid_instance(format!(
                        "{} is not a value of enum {}",
                        *raw as i64, e.name
                    ))
                })?;
                write_quoted(out, name);
            }
            (Storage::Str, Value::Str(None)) | (Storage::Ptr, Value::Ptr(None)) => {
                out.push_str("null");
            }
            (Storage::Str, Value::Str(Some(s))) => write_quoted(out, s),
            (Storage::Ptr, Value::Ptr(Some(id))) => {
                let name = self.names.get(id.index()).ok_or_else(|| {
                    DlError::invalid_instance(format!("pointer to missing node {}", id.0))
                })?;
                write_quoted(&mut self.out, name);
            }
            (Storage::Struct, v) => {
                let sub = self.find_type(m.type_id)?;
                self.write_struct(sub, v, depth, &[])?;
            }
            (_, v) => return Err(mismatch(m, v)),
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

fn write_display(out: &mut String, v: impl std::fmt::Display) {
    let _ = write!(out, "{}", v);
}

/// Quote and escape a string the way the text reader expects it.
fn write_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Render `instance`, naming non-root nodes with `names`.
fn render(registry: &Registry, instance: &Instance, names: Vec<String>) -> DlResult<String> {
    let root_type = instance.root_type();
    let ty = registry
        .find_type(root_type)
        .ok_or_else(|| DlError::type_not_found(root_type))?;
    let subdata: Vec<(NodeId, TypeId, &Value)> = instance
        .nodes()
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, n)| (NodeId(i as u32), n.type_id, &n.value))
        .collect();

    let mut w = TextWriter {
        registry,
        out: String::new(),
        names,
    };
    w.out.push_str("{\n");
    w.key(1, &ty.name);
    w.write_struct(ty, instance.root(), 1, &subdata)?;
    w.out.push_str("\n}\n");
    Ok(w.out)
}

/// Write a typed instance as text. Nodes not reachable from the root are
/// left out.
pub fn write_text(registry: &Registry, instance: &Instance) -> DlResult<String> {
    let instance = instance.normalized();
    let names = (0..instance.node_count())
        .map(|i| {
            if i == 0 {
                ROOT_REFERENCE.to_string()
            } else {
                format!("{}{}", POINTER_NAME_PREFIX, i)
            }
        })
        .collect();
    render(registry, &instance, names)
}

/// Unpack a binary instance of `type_id` to text. Pointer targets are
/// named after their payload offset.
pub fn unpack(registry: &Registry, type_id: TypeId, bytes: &[u8]) -> DlResult<String> {
    let (instance, offsets) = codec::load_with_offsets(registry, type_id, bytes)?;
    let names = offsets
        .iter()
        .enumerate()
        .map(|(i, offset)| {
            if i == 0 {
                ROOT_REFERENCE.to_string()
            } else {
                format!("{}{}", POINTER_NAME_PREFIX, offset)
            }
        })
        .collect();
    let text = render(registry, &instance, names)?;
    log::trace!(
        "[text::unpack] type 0x{:08X}: {} bytes -> {} bytes of text",
        type_id,
        bytes.len(),
        text.len()
    );
    Ok(text)
}
