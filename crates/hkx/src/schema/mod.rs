// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type schema: classes, primitives and synthetic wrapper types with
//! versioning metadata.
//!
//! Types live in an ordered [`TypeTable`]; a type's position is its index
//! and index 0 is a reserved null sentinel. Every cross-type reference —
//! parent, pointer target, member type, template argument, interface — is
//! a [`TypeIndex`] into that same table.

pub mod build;
pub mod builtin;
pub mod kind;
pub mod table;

pub use build::SchemaBuilder;
pub use builtin::builtin_table;
pub use kind::{FloatWidth, IntWidth, TypeKind};
pub use table::TypeTable;

/// Index of a type within its [`TypeTable`]. Index 0 is the null sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeIndex(pub u32);

impl TypeIndex {
    pub const NONE: TypeIndex = TypeIndex(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn usize(self) -> usize {
        self.0 as usize
    }
}

/// One member of a class type.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    /// Byte offset within the owning class layout.
    pub offset: u32,
    /// Type of the member's value.
    pub type_index: TypeIndex,
    /// Bit-field flags, preserved verbatim from disk.
    pub flags: u32,
    /// Index into the owning type's `enums` list when the member is an
    /// enum-with-storage. Documentation/round-trip fidelity only.
    pub enum_index: Option<usize>,
    /// Packfile member (type, subtype) codes as read from disk. Used to
    /// re-emit byte-identical member records; `None` for built graphs,
    /// in which case the codes are derived from the member's type.
    pub raw_codes: Option<(u8, u8)>,
}

impl Member {
    pub fn new(name: impl Into<String>, offset: u32, type_index: TypeIndex) -> Self {
        Self {
            name: name.into(),
            offset,
            type_index,
            flags: 0,
            enum_index: None,
            raw_codes: None,
        }
    }
}

/// A template parameter: type-valued (name starts with `t`) or
/// integer-valued (name starts with `v`).
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateArg {
    pub name: String,
    pub value: TemplateValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemplateValue {
    Type(TypeIndex),
    Int(i64),
}

impl TemplateArg {
    pub fn of_type(name: impl Into<String>, index: TypeIndex) -> Self {
        Self {
            name: name.into(),
            value: TemplateValue::Type(index),
        }
    }

    pub fn of_int(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value: TemplateValue::Int(value),
        }
    }
}

/// An implemented interface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interface {
    pub type_index: TypeIndex,
    pub flags: u32,
}

/// A named enumeration: ordered (item name, integer value) pairs.
///
/// May appear standalone or embedded inside a class definition; the two
/// contexts reconcile to one canonical instance during decode.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeEnum {
    pub name: String,
    pub items: Vec<EnumItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumItem {
    pub name: String,
    pub value: i64,
}

impl TypeEnum {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    pub fn with_items(name: impl Into<String>, items: &[(&str, i64)]) -> Self {
        Self {
            name: name.into(),
            items: items
                .iter()
                .map(|(n, v)| EnumItem {
                    name: (*n).to_string(),
                    value: *v,
                })
                .collect(),
        }
    }

    pub fn item_by_value(&self, value: i64) -> Option<&EnumItem> {
        self.items.iter().find(|i| i.value == value)
    }
}

/// A schema type.
#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub name: String,
    /// Parent class, or none.
    pub parent: TypeIndex,
    /// Pointer target / array element / tuple element type.
    pub pointee: TypeIndex,
    /// For non-concrete synonym types, the type this one resolves to.
    pub alias_of: TypeIndex,
    pub byte_size: u32,
    pub alignment: u32,
    pub kind: TypeKind,
    /// Declared members, own only (inherited members live on the parent).
    pub members: Vec<Member>,
    pub templates: Vec<TemplateArg>,
    pub interfaces: Vec<Interface>,
    /// Enums declared inside this type, plus the definition itself for
    /// standalone enum types.
    pub enums: Vec<TypeEnum>,
    /// Declared schema version, when the format records one.
    pub version: Option<i32>,
    /// Optional 32-bit content hash attached to the class name.
    pub signature: Option<u32>,
}

impl Type {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            parent: TypeIndex::NONE,
            pointee: TypeIndex::NONE,
            alias_of: TypeIndex::NONE,
            byte_size: 0,
            alignment: 1,
            kind,
            members: Vec::new(),
            templates: Vec::new(),
            interfaces: Vec::new(),
            enums: Vec::new(),
            version: None,
            signature: None,
        }
    }

    /// The reserved table slot at index 0.
    pub fn null_sentinel() -> Self {
        Self::new("", TypeKind::Invalid)
    }

    pub fn with_size(mut self, byte_size: u32, alignment: u32) -> Self {
        self.byte_size = byte_size;
        self.alignment = alignment;
        self
    }

    pub fn with_pointee(mut self, pointee: TypeIndex) -> Self {
        self.pointee = pointee;
        self
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }
}
