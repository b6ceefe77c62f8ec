// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Schema construction with synthetic-type caching.
//!
//! Wrapper types not explicitly present on disk — bare pointers, owning
//! pointers, dynamic arrays, enums-with-storage, fixed-length tuples —
//! are synthesized once per distinct parameterization and reused. The
//! cache key is the parameterization, so repeated requests hand back the
//! same [`TypeIndex`].

use super::kind::{FloatWidth, IntWidth, TypeKind};
use super::{Member, TemplateArg, Type, TypeEnum, TypeIndex, TypeTable};
use crate::error::Result;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SynthKey {
    Named(String),
    Pointer(TypeIndex),
    RefPtr(TypeIndex),
    Array(TypeIndex),
    SimpleArray(TypeIndex),
    Tuple(TypeIndex, u32),
    Enum(String, TypeIndex),
}

/// Builds a [`TypeTable`] for one target layout (pointer width).
///
/// Sizes of pointer-bearing synthetics depend on the file's pointer
/// width, so a builder is always tied to one width and tables are not
/// shared across files with different layouts.
pub struct SchemaBuilder {
    table: TypeTable,
    pointer_size: u32,
    cache: HashMap<SynthKey, TypeIndex>,
}

impl SchemaBuilder {
    pub fn new(pointer_size: u32) -> Self {
        Self {
            table: TypeTable::new(),
            pointer_size,
            cache: HashMap::new(),
        }
    }

    pub fn pointer_size(&self) -> u32 {
        self.pointer_size
    }

    pub fn table(&self) -> &TypeTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut TypeTable {
        &mut self.table
    }

    pub fn into_table(self) -> TypeTable {
        self.table
    }

    fn cached(&mut self, key: SynthKey, make: impl FnOnce(&mut Self) -> Type) -> TypeIndex {
        if let Some(&idx) = self.cache.get(&key) {
            return idx;
        }
        let ty = make(self);
        let idx = self.table.push(ty);
        self.cache.insert(key, idx);
        idx
    }

    /// Register a primitive by name; repeated calls return the same index.
    pub fn primitive(&mut self, name: &str, kind: TypeKind, size: u32, align: u32) -> TypeIndex {
        self.cached(SynthKey::Named(name.to_string()), |_| {
            Type::new(name, kind).with_size(size, align)
        })
    }

    pub fn void(&mut self) -> TypeIndex {
        self.primitive("void", TypeKind::Void, 0, 1)
    }

    pub fn boolean(&mut self) -> TypeIndex {
        self.primitive("hkBool", TypeKind::Bool, 1, 1)
    }

    pub fn char8(&mut self) -> TypeIndex {
        self.primitive(
            "char",
            TypeKind::Int {
                signed: true,
                width: IntWidth::W8,
            },
            1,
            1,
        )
    }

    pub fn int(&mut self, signed: bool, width: IntWidth) -> TypeIndex {
        let name = match (signed, width) {
            (true, IntWidth::W8) => "hkInt8",
            (false, IntWidth::W8) => "hkUint8",
            (true, IntWidth::W16) => "hkInt16",
            (false, IntWidth::W16) => "hkUint16",
            (true, IntWidth::W32) => "hkInt32",
            (false, IntWidth::W32) => "hkUint32",
            (true, IntWidth::W64) => "hkInt64",
            (false, IntWidth::W64) => "hkUint64",
        };
        let size = width.bytes();
        self.primitive(name, TypeKind::Int { signed, width }, size, size)
    }

    pub fn real(&mut self) -> TypeIndex {
        self.primitive(
            "hkReal",
            TypeKind::Float {
                width: FloatWidth::F32,
            },
            4,
            4,
        )
    }

    pub fn half(&mut self) -> TypeIndex {
        self.primitive(
            "hkHalf",
            TypeKind::Float {
                width: FloatWidth::F16,
            },
            2,
            2,
        )
    }

    /// Pointer-sized unsigned integer (`hkUlong`).
    pub fn ulong(&mut self) -> TypeIndex {
        let size = self.pointer_size;
        let width = if size == 8 { IntWidth::W64 } else { IntWidth::W32 };
        self.primitive(
            "hkUlong",
            TypeKind::Int {
                signed: false,
                width,
            },
            size,
            size,
        )
    }

    pub fn string(&mut self) -> TypeIndex {
        let size = self.pointer_size;
        self.primitive("hkStringPtr", TypeKind::String, size, size)
    }

    /// Raw `char*` string, distinct from the owning `hkStringPtr`.
    pub fn c_string(&mut self) -> TypeIndex {
        let size = self.pointer_size;
        self.primitive("char*", TypeKind::String, size, size)
    }

    /// Bare pointer `T*`.
    pub fn pointer(&mut self, target: TypeIndex) -> Result<TypeIndex> {
        let name = format!("{}*", self.table.get(target)?.name);
        let size = self.pointer_size;
        Ok(self.cached(SynthKey::Pointer(target), |_| {
            let mut ty = Type::new(name, TypeKind::Pointer)
                .with_size(size, size)
                .with_pointee(target);
            ty.templates.push(TemplateArg::of_type("tT", target));
            ty
        }))
    }

    /// Owning smart pointer `hkRefPtr<T>`.
    pub fn ref_ptr(&mut self, target: TypeIndex) -> Result<TypeIndex> {
        let name = format!("hkRefPtr<{}>", self.table.get(target)?.name);
        let size = self.pointer_size;
        Ok(self.cached(SynthKey::RefPtr(target), |_| {
            let mut ty = Type::new(name, TypeKind::Pointer)
                .with_size(size, size)
                .with_pointee(target);
            ty.templates.push(TemplateArg::of_type("tTYPE", target));
            ty
        }))
    }

    /// Dynamic array `hkArray<T>`: pointer-sized payload slot plus i32
    /// size and i32 capacity-and-flags.
    pub fn array(&mut self, elem: TypeIndex) -> Result<TypeIndex> {
        let name = format!("hkArray<{}>", self.table.get(elem)?.name);
        let psize = self.pointer_size;
        Ok(self.cached(SynthKey::Array(elem), |_| {
            let mut ty = Type::new(name, TypeKind::Array)
                .with_size(psize + 8, psize)
                .with_pointee(elem);
            ty.templates.push(TemplateArg::of_type("tT", elem));
            ty
        }))
    }

    /// Pointer-plus-count array without a capacity field
    /// (`hkSimpleArray<T>`). Distinguished from `hkArray` by byte size.
    pub fn simple_array(&mut self, elem: TypeIndex) -> Result<TypeIndex> {
        let name = format!("hkSimpleArray<{}>", self.table.get(elem)?.name);
        let psize = self.pointer_size;
        Ok(self.cached(SynthKey::SimpleArray(elem), |_| {
            let mut ty = Type::new(name, TypeKind::Array)
                .with_size(psize + 4, psize)
                .with_pointee(elem);
            ty.templates.push(TemplateArg::of_type("tT", elem));
            ty
        }))
    }

    /// The `hkVariant` pair: an object pointer plus its class metadata
    /// pointer. Not versioned, so it never becomes a type-section entry.
    pub fn variant(&mut self) -> Result<TypeIndex> {
        if let Some(idx) = self.table.find_first("hkVariant") {
            return Ok(idx);
        }
        let void = self.void();
        let ptr = self.pointer(void)?;
        let psize = self.pointer_size;
        let mut ty = Type::new("hkVariant", TypeKind::Class).with_size(psize * 2, psize);
        ty.members.push(Member::new("object", 0, ptr));
        ty.members.push(Member::new("class", psize, ptr));
        Ok(self.table.push(ty))
    }

    /// Fixed-length tuple `T[N]`.
    pub fn tuple(&mut self, elem: TypeIndex, count: u32) -> Result<TypeIndex> {
        let elem_ty = self.table.get(elem)?;
        let name = format!("{}[{}]", elem_ty.name, count);
        let size = elem_ty.byte_size * count;
        let align = elem_ty.alignment;
        Ok(self.cached(SynthKey::Tuple(elem, count), |_| {
            let mut ty = Type::new(name, TypeKind::Tuple { count })
                .with_size(size, align)
                .with_pointee(elem);
            ty.templates.push(TemplateArg::of_type("tT", elem));
            ty.templates
                .push(TemplateArg::of_int("vN", i64::from(count)));
            ty
        }))
    }

    /// A fixed-count float tuple under its own name (hkVector4 and the
    /// matrix/transform family).
    pub fn named_tuple(&mut self, name: &str, count: u32, align: u32) -> TypeIndex {
        let elem = self.real();
        self.cached(SynthKey::Named(name.to_string()), |_| {
            Type::new(name, TypeKind::Tuple { count })
                .with_size(count * 4, align)
                .with_pointee(elem)
        })
    }

    /// Enum-with-storage `hkEnum<E, S>`: values stored as the storage
    /// integer, the definition carried for round-trip fidelity.
    pub fn enum_of(&mut self, def: TypeEnum, storage: TypeIndex) -> Result<TypeIndex> {
        let storage_ty = self.table.get(storage)?;
        let name = format!("hkEnum<{},{}>", def.name, storage_ty.name);
        let kind = storage_ty.kind;
        let (size, align) = (storage_ty.byte_size, storage_ty.alignment);
        Ok(self.cached(SynthKey::Enum(def.name.clone(), storage), |_| {
            let mut ty = Type::new(name, kind).with_size(size, align);
            ty.enums.push(def);
            ty
        }))
    }

    /// Non-concrete synonym resolving to `target`.
    pub fn alias(&mut self, name: &str, target: TypeIndex) -> TypeIndex {
        self.cached(SynthKey::Named(name.to_string()), |_| {
            let mut ty = Type::new(name, TypeKind::Invalid);
            ty.alias_of = target;
            ty
        })
    }

    /// Lay out a class: members placed at their natural alignment,
    /// parent members first (the class body starts at the parent's size).
    pub fn class(
        &mut self,
        name: &str,
        parent: TypeIndex,
        version: i32,
        members: &[(&str, TypeIndex)],
    ) -> Result<TypeIndex> {
        let (mut offset, mut align) = if parent.is_none() {
            (0u32, 1u32)
        } else {
            let p = self.table.get(parent)?;
            (p.byte_size, p.alignment)
        };
        let mut ty = Type::new(name, TypeKind::Class);
        ty.parent = parent;
        ty.version = Some(version);
        for (member_name, member_type) in members {
            let mt = self.table.get(*member_type)?;
            let ma = mt.alignment.max(1);
            offset = (offset + ma - 1) & !(ma - 1);
            ty.members.push(Member::new(*member_name, offset, *member_type));
            offset += mt.byte_size;
            align = align.max(ma);
        }
        ty.alignment = align;
        ty.byte_size = (offset + align - 1) & !(align - 1);
        Ok(self.table.push(ty))
    }
}
