// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory decoded node graph.
//!
//! Nodes live in an arena and are addressed by stable integer handles;
//! shared and cyclic references are plain handle reuse, never deep
//! copies. A pointer target is unpacked at most once and every later
//! reference resolves to the same handle, so node identity (the handle)
//! is the basis for traversal termination.

pub mod walk;

pub use walk::{reachable, reference_counts};

use crate::error::{HkxError, Result};
use crate::schema::TypeIndex;

/// Stable handle of a node within its [`NodeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub u32);

impl NodeHandle {
    pub fn usize(self) -> usize {
        self.0 as usize
    }
}

/// Element storage for array/tuple values.
///
/// Arrays of primitive elements flatten into native-value vectors to
/// avoid per-element node allocation on large numeric buffers; traversal
/// never descends into the flattened forms.
#[derive(Debug, Clone, PartialEq)]
pub enum Elements {
    Nodes(Vec<NodeHandle>),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

impl Elements {
    pub fn len(&self) -> usize {
        match self {
            Elements::Nodes(v) => v.len(),
            Elements::Ints(v) => v.len(),
            Elements::Floats(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded value, discriminated by the resolved type's data kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Option<String>),
    Pointer(Option<NodeHandle>),
    /// Class instance: member name to node, in declared member order.
    Class(Vec<(String, NodeHandle)>),
    Array(Elements),
    Tuple(Elements),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(Some(v)) => Some(v),
            _ => None,
        }
    }

    pub fn as_elements(&self) -> Option<&Elements> {
        match self {
            Value::Array(e) | Value::Tuple(e) => Some(e),
            _ => None,
        }
    }

    /// Simple leaf check used by transparent access.
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_)
        )
    }
}

/// One positional element of an array or tuple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementRef {
    Node(NodeHandle),
    Int(i64),
    Float(f64),
}

/// A node: a type reference plus a value shaped by that type's kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub type_index: TypeIndex,
    pub value: Value,
}

/// Arena of nodes addressed by [`NodeHandle`].
#[derive(Debug, Clone, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn alloc(&mut self, type_index: TypeIndex, value: Value) -> NodeHandle {
        let handle = NodeHandle(self.nodes.len() as u32);
        self.nodes.push(Node { type_index, value });
        handle
    }

    pub fn get(&self, handle: NodeHandle) -> Result<&Node> {
        self.nodes.get(handle.usize()).ok_or(HkxError::OutOfRange {
            index: handle.usize(),
            len: self.nodes.len(),
        })
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Result<&mut Node> {
        let len = self.nodes.len();
        self.nodes.get_mut(handle.usize()).ok_or(HkxError::OutOfRange {
            index: handle.usize(),
            len,
        })
    }

    /// Index into a class node by member name.
    pub fn field(&self, handle: NodeHandle, name: &str) -> Result<NodeHandle> {
        let node = self.get(handle)?;
        match &node.value {
            Value::Class(fields) => fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, h)| *h)
                .ok_or_else(|| HkxError::MissingMember {
                    class: format!("type #{}", node.type_index.0),
                    member: name.to_string(),
                }),
            _ => Err(HkxError::TypeMismatch {
                expected: "class node".into(),
                got: value_kind_name(&node.value).into(),
            }),
        }
    }

    /// Index into an array/tuple node by position.
    pub fn element(&self, handle: NodeHandle, index: usize) -> Result<ElementRef> {
        let node = self.get(handle)?;
        let elements = node.value.as_elements().ok_or_else(|| HkxError::TypeMismatch {
            expected: "array or tuple node".into(),
            got: value_kind_name(&node.value).into(),
        })?;
        if index >= elements.len() {
            return Err(HkxError::OutOfRange {
                index,
                len: elements.len(),
            });
        }
        Ok(match elements {
            Elements::Nodes(v) => ElementRef::Node(v[index]),
            Elements::Ints(v) => ElementRef::Int(v[index]),
            Elements::Floats(v) => ElementRef::Float(v[index]),
        })
    }

    /// Transparent access: follow pointer chains to the target node.
    ///
    /// A null pointer along the chain is a `TypeMismatch` — transparent
    /// reads are for graphs known to hold a value.
    pub fn resolve(&self, handle: NodeHandle) -> Result<NodeHandle> {
        let mut current = handle;
        for _ in 0..self.nodes.len() + 1 {
            match &self.get(current)?.value {
                Value::Pointer(Some(target)) => current = *target,
                Value::Pointer(None) => {
                    return Err(HkxError::TypeMismatch {
                        expected: "non-null pointer".into(),
                        got: "null pointer".into(),
                    })
                }
                _ => return Ok(current),
            }
        }
        Err(HkxError::MalformedSection("pointer cycle with no object".into()))
    }

    /// Transparent leaf read: resolve pointers, then clone a simple leaf
    /// value. Composite targets are a `TypeMismatch`.
    pub fn leaf(&self, handle: NodeHandle) -> Result<Value> {
        let target = self.resolve(handle)?;
        let value = &self.get(target)?.value;
        if value.is_leaf() {
            Ok(value.clone())
        } else {
            Err(HkxError::TypeMismatch {
                expected: "leaf value".into(),
                got: value_kind_name(value).into(),
            })
        }
    }
}

pub(crate) fn value_kind_name(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::String(_) => "string",
        Value::Pointer(_) => "pointer",
        Value::Class(_) => "class",
        Value::Array(_) => "array",
        Value::Tuple(_) => "tuple",
    }
}
