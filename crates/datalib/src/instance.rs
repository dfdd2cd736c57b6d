// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed, address-free view of an instance.
//!
//! An [`Instance`] is an arena of struct nodes. Node 0 is the root; pointer
//! members hold a [`NodeId`] into the same arena instead of an address, so
//! aliasing and cycles survive without any in-place pointer patching.
//!
//! Member values follow the schema:
//!
//! | member                 | value                                   |
//! |------------------------|-----------------------------------------|
//! | integer / float pod    | `I8`..`U64`, `F32`, `F64`               |
//! | enum                   | `Enum(raw)` (signed values sign-extended) |
//! | string                 | `Str(Some(..))` or `Str(None)` for null |
//! | pointer                | `Ptr(Some(node))` or `Ptr(None)`        |
//! | embedded struct        | `Struct(members)`                       |
//! | embedded union         | `Union { member, value }`               |
//! | array / inline array   | `Array(elements)`                       |
//! | bitfield               | `Bits(v)`                               |

use std::collections::HashMap;

/// Index of a struct node inside an [`Instance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The root node of every instance.
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single member value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Enum(u64),
    Str(Option<String>),
    Ptr(Option<NodeId>),
    Struct(Vec<Value>),
    Union { member: u32, value: Box<Value> },
    Array(Vec<Value>),
    Bits(u64),
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::I8(_) => "int8",
            Self::I16(_) => "int16",
            Self::I32(_) => "int32",
            Self::I64(_) => "int64",
            Self::U8(_) => "uint8",
            Self::U16(_) => "uint16",
            Self::U32(_) => "uint32",
            Self::U64(_) => "uint64",
            Self::F32(_) => "fp32",
            Self::F64(_) => "fp64",
            Self::Enum(_) => "enum",
            Self::Str(_) => "string",
            Self::Ptr(_) => "pointer",
            Self::Struct(_) => "struct",
            Self::Union { .. } => "union",
            Self::Array(_) => "array",
            Self::Bits(_) => "bitfield",
        }
    }

    /// Integer payload widened to `i128`, for any integer-like variant.
    pub fn as_i128(&self) -> Option<i128> {
        Some(match *self {
            Self::I8(v) => v.into(),
            Self::I16(v) => v.into(),
            Self::I32(v) => v.into(),
            Self::I64(v) => v.into(),
            Self::U8(v) => v.into(),
            Self::U16(v) => v.into(),
            Self::U32(v) => v.into(),
            Self::U64(v) | Self::Enum(v) | Self::Bits(v) => v.into(),
            _ => return None,
        })
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::F32(v) => Some(f64::from(v)),
            Self::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(Some(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_members(&self) -> Option<&[Value]> {
        match self {
            Self::Struct(members) => Some(members),
            _ => None,
        }
    }

    pub fn as_elements(&self) -> Option<&[Value]> {
        match self {
            Self::Array(elements) => Some(elements),
            _ => None,
        }
    }

    /// Visit every pointer target reachable without following pointers.
    pub(crate) fn for_each_ptr(&self, f: &mut impl FnMut(NodeId)) {
        match self {
            Self::Ptr(Some(id)) => f(*id),
            Self::Struct(values) | Self::Array(values) => {
                for v in values {
                    v.for_each_ptr(f);
                }
            }
            Self::Union { value, .. } => value.for_each_ptr(f),
            _ => {}
        }
    }

    fn remap_ptrs(&mut self, map: &HashMap<NodeId, NodeId>) {
        match self {
            Self::Ptr(Some(id)) => {
                if let Some(new_id) = map.get(id) {
                    *id = *new_id;
                }
            }
            Self::Struct(values) | Self::Array(values) => {
                for v in values {
                    v.remap_ptrs(map);
                }
            }
            Self::Union { value, .. } => value.remap_ptrs(map),
            _ => {}
        }
    }
}

/// A struct or union reachable from the root or through pointers.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub type_id: u32,
    /// `Value::Struct` or `Value::Union`.
    pub value: Value,
}

/// An instance graph rooted at [`NodeId::ROOT`].
#[derive(Debug, Clone)]
pub struct Instance {
    nodes: Vec<Node>,
}

impl Instance {
    /// Instance whose root has the given type and value.
    pub fn new(root_type: u32, root: Value) -> Self {
        Self {
            nodes: vec![Node {
                type_id: root_type,
                value: root,
            }],
        }
    }

    /// Append a pointer target.
    pub fn add_node(&mut self, type_id: u32, value: Value) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { type_id, value });
        id
    }

    pub(crate) fn with_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn root_type(&self) -> u32 {
        self.nodes[0].type_id
    }

    pub fn root(&self) -> &Value {
        &self.nodes[0].value
    }

    pub fn root_mut(&mut self) -> &mut Value {
        &mut self.nodes[0].value
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Renumber nodes in depth-first discovery order from the root and drop
    /// unreachable ones.
    pub fn normalized(&self) -> Instance {
        let mut order = vec![NodeId::ROOT];
        let mut seen: HashMap<NodeId, NodeId> = HashMap::new();
        seen.insert(NodeId::ROOT, NodeId::ROOT);
        let mut cursor = 0;
        while cursor < order.len() {
            let current = order[cursor];
            cursor += 1;
            let Some(node) = self.node(current) else {
                continue;
            };
            let mut found = Vec::new();
            node.value.for_each_ptr(&mut |id| found.push(id));
            for id in found {
                if !seen.contains_key(&id) && self.node(id).is_some() {
                    seen.insert(id, NodeId(order.len() as u32));
                    order.push(id);
                }
            }
        }

        let nodes = order
            .iter()
            .filter_map(|id| self.node(*id))
            .map(|node| {
                let mut node = node.clone();
                node.value.remap_ptrs(&seen);
                node
            })
            .collect();
        Instance { nodes }
    }
}

/// Structural equality: same root type and the same graph, regardless of
/// node numbering.
impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.normalized().nodes == other.normalized().nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_node_numbering() {
        let mut a = Instance::new(1, Value::Struct(vec![Value::Ptr(None), Value::Ptr(None)]));
        let x = a.add_node(2, Value::Struct(vec![Value::I32(10)]));
        let y = a.add_node(2, Value::Struct(vec![Value::I32(20)]));
        *a.root_mut() = Value::Struct(vec![Value::Ptr(Some(x)), Value::Ptr(Some(y))]);

        let mut b = Instance::new(1, Value::Struct(vec![]));
        let y2 = b.add_node(2, Value::Struct(vec![Value::I32(20)]));
        let x2 = b.add_node(2, Value::Struct(vec![Value::I32(10)]));
        *b.root_mut() = Value::Struct(vec![Value::Ptr(Some(x2)), Value::Ptr(Some(y2))]);

        assert_eq!(a, b);

        if let Some(node) = b.node_mut(x2) {
            node.value = Value::Struct(vec![Value::I32(11)]);
        }
        assert_ne!(a, b);
    }

    #[test]
    fn test_normalized_handles_cycles_and_drops_unreachable() {
        let mut inst = Instance::new(1, Value::Struct(vec![Value::Ptr(None)]));
        let _orphan = inst.add_node(1, Value::Struct(vec![Value::Ptr(None)]));
        let next = inst.add_node(1, Value::Struct(vec![Value::Ptr(Some(NodeId::ROOT))]));
        *inst.root_mut() = Value::Struct(vec![Value::Ptr(Some(next))]);

        let norm = inst.normalized();
        assert_eq!(norm.node_count(), 2);
        assert_eq!(
            norm.root(),
            &Value::Struct(vec![Value::Ptr(Some(NodeId(1)))])
        );
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::U16(7).as_i128(), Some(7));
        assert_eq!(Value::I8(-3).as_i128(), Some(-3));
        assert_eq!(Value::F32(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::Str(Some("hi".into())).as_str(), Some("hi"));
        assert_eq!(Value::Str(None).as_str(), None);
        assert_eq!(Value::Bits(3).kind_name(), "bitfield");
    }
}
