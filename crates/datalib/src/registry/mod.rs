// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type registry - the schema every codec works against.
//!
//! A [`Registry`] owns flat tables of type, member, enum, enum-value and
//! alias descriptors. Types and enums are addressed by the hash of their
//! name ([`TypeId`]); members, values and aliases are contiguous ranges in
//! their tables referenced from the owning descriptor.
//!
//! Libraries are merged in by [`Registry::load_text`] and
//! [`Registry::load_binary`]. A merge either succeeds completely or leaves
//! the registry unchanged.
//!
//! # Example
//!
//! ```
//! use datalib::registry::Registry;
//!
//! let registry = Registry::from_text(r#"{
//!     "types": {
//!         "Point": { "members": [
//!             { "name": "x", "type": "int32" },
//!             { "name": "y", "type": "int32" }
//!         ] }
//!     }
//! }"#).expect("valid schema");
//!
//! let point = registry.find_type_by_name("Point").expect("Point");
//! assert_eq!(point.size(datalib::PtrSize::Ptr64), 8);
//! ```

mod binary;
pub(crate) mod layout;
mod text;
mod types;

#[cfg(test)]
mod tests;

pub use layout::{align_up, union_tag_offset};
pub use types::{
    member_flags, type_flags, Atom, EnumAlias, EnumDesc, EnumValue, Endian, Format, MemberDesc,
    PtrSize, Storage, TypeDesc, TypeId,
};

use crate::config::CodecLimits;
use crate::error::DlResult;
use crate::hash::hash_name;
use std::collections::HashMap;

/// How to look up a type: by id or by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRef<'a> {
    Id(TypeId),
    Name(&'a str),
}

impl TypeRef<'_> {
    pub fn id(self) -> TypeId {
        match self {
            Self::Id(id) => id,
            Self::Name(name) => hash_name(name),
        }
    }
}

impl From<TypeId> for TypeRef<'_> {
    fn from(id: TypeId) -> Self {
        Self::Id(id)
    }
}

impl<'a> From<&'a str> for TypeRef<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

/// Schema registry shared by all codec operations.
///
/// Read-only once loaded; share it between threads by reference.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub(crate) types: Vec<TypeDesc>,
    pub(crate) members: Vec<MemberDesc>,
    pub(crate) enums: Vec<EnumDesc>,
    pub(crate) enum_values: Vec<EnumValue>,
    pub(crate) enum_aliases: Vec<EnumAlias>,
    type_index: HashMap<TypeId, usize>,
    enum_index: HashMap<TypeId, usize>,
    /// Per union: member-name hash to member position.
    union_tags: HashMap<TypeId, HashMap<u32, u32>>,
    limits: CodecLimits,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: CodecLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> &CodecLimits {
        &self.limits
    }

    pub fn set_limits(&mut self, limits: CodecLimits) {
        self.limits = limits;
    }

    /// Registry holding a single text type library.
    pub fn from_text(src: &str) -> DlResult<Self> {
        let mut registry = Self::new();
        registry.load_text(src)?;
        Ok(registry)
    }

    /// Registry holding a single binary type library.
    pub fn from_binary(bytes: &[u8]) -> DlResult<Self> {
        let mut registry = Self::new();
        registry.load_binary(bytes)?;
        Ok(registry)
    }

    /// Merge a text type library into this registry.
    pub fn load_text(&mut self, src: &str) -> DlResult<()> {
        let mut staged = self.clone();
        text::load(&mut staged, src)?;
        log::debug!(
            "[registry::load_text] merged library, now {} types / {} enums",
            staged.types.len(),
            staged.enums.len()
        );
        *self = staged;
        Ok(())
    }

    /// Merge a binary type library into this registry.
    pub fn load_binary(&mut self, bytes: &[u8]) -> DlResult<()> {
        let mut staged = self.clone();
        binary::load(&mut staged, bytes)?;
        log::debug!(
            "[registry::load_binary] merged {} bytes, now {} types / {} enums",
            bytes.len(),
            staged.types.len(),
            staged.enums.len()
        );
        *self = staged;
        Ok(())
    }

    /// Serialize every type and enum as a binary type library.
    pub fn write_binary(&self) -> DlResult<Vec<u8>> {
        binary::write(self)
    }

    // ===================================================================
    // Lookup
    // ===================================================================

    /// Find a type by id or name.
    pub fn find_type<'a>(&self, key: impl Into<TypeRef<'a>>) -> Option<&TypeDesc> {
        let id = key.into().id();
        self.type_index.get(&id).map(|&i| &self.types[i])
    }

    pub fn find_type_by_name(&self, name: &str) -> Option<&TypeDesc> {
        self.find_type(name)
    }

    /// Find an enum by id or name.
    pub fn find_enum<'a>(&self, key: impl Into<TypeRef<'a>>) -> Option<&EnumDesc> {
        let id = key.into().id();
        self.enum_index.get(&id).map(|&i| &self.enums[i])
    }

    pub fn types(&self) -> &[TypeDesc] {
        &self.types
    }

    pub fn enums(&self) -> &[EnumDesc] {
        &self.enums
    }

    pub fn members(&self, ty: &TypeDesc) -> &[MemberDesc] {
        &self.members[ty.member_range()]
    }

    pub fn enum_values(&self, e: &EnumDesc) -> &[EnumValue] {
        &self.enum_values[e.value_range()]
    }

    pub fn enum_aliases(&self, e: &EnumDesc) -> &[EnumAlias] {
        &self.enum_aliases[e.alias_range()]
    }

    /// Primary name of an enum value, if `value` is declared by the enum.
    pub fn enum_value_name(&self, e: &EnumDesc, value: u64) -> Option<&str> {
        self.enum_values(e)
            .iter()
            .find(|v| v.value == value)
            .and_then(|v| self.enum_aliases.get(v.main_alias as usize))
            .map(|a| a.name.as_str())
    }

    /// Value named by `alias` within one enum.
    pub fn enum_value_by_alias(&self, e: &EnumDesc, alias: &str) -> Option<u64> {
        self.enum_aliases(e)
            .iter()
            .find(|a| a.name == alias)
            .and_then(|a| self.enum_values.get(a.value_index as usize))
            .map(|v| v.value)
    }

    /// Value named by `alias` in any enum, first match in load order.
    pub fn find_enum_value(&self, alias: &str) -> Option<u64> {
        self.enums
            .iter()
            .find_map(|e| self.enum_value_by_alias(e, alias))
    }

    /// Position of the union member whose name hashes to `tag`.
    pub fn union_member_by_tag(&self, ty: &TypeDesc, tag: u32) -> Option<usize> {
        self.union_tags
            .get(&ty.id)
            .and_then(|tags| tags.get(&tag))
            .map(|&pos| pos as usize)
    }

    // ===================================================================
    // Table maintenance
    // ===================================================================

    pub(crate) fn has_name(&self, id: TypeId) -> bool {
        self.type_index.contains_key(&id) || self.enum_index.contains_key(&id)
    }

    pub(crate) fn type_position(&self, id: TypeId) -> Option<usize> {
        self.type_index.get(&id).copied()
    }

    pub(crate) fn push_type(&mut self, ty: TypeDesc) {
        self.type_index.insert(ty.id, self.types.len());
        self.types.push(ty);
    }

    pub(crate) fn push_enum(&mut self, e: EnumDesc) {
        self.enum_index.insert(e.id, self.enums.len());
        self.enums.push(e);
    }

    /// Rebuild the union tag table for one type.
    pub(crate) fn index_union(&mut self, position: usize) {
        let ty = &self.types[position];
        if !ty.is_union() {
            return;
        }
        let tags = self.members[ty.member_range()]
            .iter()
            .enumerate()
            .map(|(i, m)| (hash_name(&m.name), i as u32))
            .collect();
        self.union_tags.insert(ty.id, tags);
    }
}
