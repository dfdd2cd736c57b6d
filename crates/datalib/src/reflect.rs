// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reflection over a loaded registry.
//!
//! Flat, owned summaries of types, members and enums for tooling (info
//! tables, header generators, pretty printers). Sizes, alignments and
//! offsets are reported for one pointer width.

use crate::registry::{Atom, PtrSize, Registry, Storage, TypeId};

/// Counts of everything loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContextInfo {
    pub type_count: usize,
    pub enum_count: usize,
    pub member_count: usize,
    pub enum_value_count: usize,
    pub enum_alias_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TypeInfo {
    pub tid: TypeId,
    pub name: String,
    pub comment: Option<String>,
    pub size: u32,
    pub alignment: u32,
    pub member_count: u32,
    pub is_union: bool,
    pub is_extern: bool,
    pub has_subdata: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemberInfo {
    pub name: String,
    pub comment: Option<String>,
    pub atom: Atom,
    pub storage: Storage,
    /// Referenced struct or enum, 0 for builtins.
    pub type_id: TypeId,
    pub size: u32,
    pub alignment: u32,
    pub offset: u32,
    /// Inline array length, 0 otherwise.
    pub array_count: u32,
    pub bitfield_bits: u32,
    pub bitfield_offset: u32,
    pub is_const: bool,
    pub has_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnumInfo {
    pub tid: TypeId,
    pub name: String,
    pub comment: Option<String>,
    pub storage: Storage,
    pub value_count: u32,
    pub is_extern: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnumValueInfo {
    /// Main alias.
    pub name: String,
    pub value: u64,
    /// Every alias, main alias first.
    pub aliases: Vec<String>,
}

impl Registry {
    pub fn context_info(&self) -> ContextInfo {
        ContextInfo {
            type_count: self.types.len(),
            enum_count: self.enums.len(),
            member_count: self.members.len(),
            enum_value_count: self.enum_values.len(),
            enum_alias_count: self.enum_aliases.len(),
        }
    }

    /// Type ids in load order.
    pub fn type_ids(&self) -> Vec<TypeId> {
        self.types.iter().map(|t| t.id).collect()
    }

    /// Enum ids in load order.
    pub fn enum_ids(&self) -> Vec<TypeId> {
        self.enums.iter().map(|e| e.id).collect()
    }

    /// Id of a loaded type or enum named `name`.
    pub fn type_id_by_name(&self, name: &str) -> Option<TypeId> {
        self.find_type(name)
            .map(|t| t.id)
            .or_else(|| self.find_enum(name).map(|e| e.id))
    }

    pub fn type_info(&self, tid: TypeId, ptr: PtrSize) -> Option<TypeInfo> {
        let ty = self.find_type(tid)?;
        Some(TypeInfo {
            tid: ty.id,
            name: ty.name.clone(),
            comment: ty.comment.clone(),
            size: ty.size(ptr),
            alignment: ty.alignment(ptr),
            member_count: ty.member_count,
            is_union: ty.is_union(),
            is_extern: ty.is_external(),
            has_subdata: ty.has_subdata(),
        })
    }

    /// Members of `tid` in declaration order.
    pub fn type_members(&self, tid: TypeId, ptr: PtrSize) -> Option<Vec<MemberInfo>> {
        let ty = self.find_type(tid)?;
        Some(
            self.members(ty)
                .iter()
                .map(|m| MemberInfo {
                    name: m.name.clone(),
                    comment: m.comment.clone(),
                    atom: m.atom,
                    storage: m.storage,
                    type_id: m.type_id,
                    size: m.size(ptr),
                    alignment: m.alignment(ptr),
                    offset: m.offset(ptr),
                    array_count: if m.atom == Atom::InlineArray {
                        m.inline_count
                    } else {
                        0
                    },
                    bitfield_bits: m.bits,
                    bitfield_offset: m.bit_offset,
                    is_const: m.is_const(),
                    has_default: m.default.is_some(),
                })
                .collect(),
        )
    }

    pub fn enum_info(&self, tid: TypeId) -> Option<EnumInfo> {
        let e = self.find_enum(tid)?;
        Some(EnumInfo {
            tid: e.id,
            name: e.name.clone(),
            comment: e.comment.clone(),
            storage: e.storage,
            value_count: e.value_count,
            is_extern: e.is_external(),
        })
    }

    /// Values of enum `tid` in declaration order.
    pub fn enum_values_info(&self, tid: TypeId) -> Option<Vec<EnumValueInfo>> {
        let e = self.find_enum(tid)?;
        let aliases = self.enum_aliases(e);
        Some(
            self.enum_values(e)
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let index = e.value_start as usize + i;
                    let main = self
                        .enum_aliases
                        .get(v.main_alias as usize)
                        .map(|a| a.name.clone())
                        .unwrap_or_default();
                    let mut names = vec![main.clone()];
                    names.extend(
                        aliases
                            .iter()
                            .filter(|a| a.value_index as usize == index && a.name != main)
                            .map(|a| a.name.clone()),
                    );
                    EnumValueInfo {
                        name: main,
                        value: v.value,
                        aliases: names,
                    }
                })
                .collect(),
        )
    }
}
