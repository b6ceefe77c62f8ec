// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ordered type table with index-based references.

use super::{Member, Type, TypeIndex, TypeKind};
use crate::error::{HkxError, Result};
use std::collections::HashMap;

/// Ordered list of types; position is identity.
///
/// Slot 0 always holds the null sentinel. Name lookups are backed by a
/// map rebuilt on push, so they stay O(1) on large tables.
#[derive(Debug, Clone)]
pub struct TypeTable {
    types: Vec<Type>,
    by_name: HashMap<String, Vec<TypeIndex>>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self {
            types: vec![Type::null_sentinel()],
            by_name: HashMap::new(),
        }
    }

    /// Number of slots including the null sentinel.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.len() <= 1
    }

    pub fn push(&mut self, ty: Type) -> TypeIndex {
        let index = TypeIndex(self.types.len() as u32);
        if !ty.name.is_empty() {
            self.by_name.entry(ty.name.clone()).or_default().push(index);
        }
        self.types.push(ty);
        index
    }

    pub fn get(&self, index: TypeIndex) -> Result<&Type> {
        self.types
            .get(index.usize())
            .filter(|_| !index.is_none())
            .ok_or_else(|| HkxError::OutOfRange {
                index: index.usize(),
                len: self.types.len(),
            })
    }

    pub fn get_mut(&mut self, index: TypeIndex) -> Result<&mut Type> {
        let len = self.types.len();
        self.types
            .get_mut(index.usize())
            .filter(|_| !index.is_none())
            .ok_or(HkxError::OutOfRange {
                index: index.usize(),
                len,
            })
    }

    /// Iterate non-sentinel entries in table order.
    pub fn iter(&self) -> impl Iterator<Item = (TypeIndex, &Type)> {
        self.types
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, t)| (TypeIndex(i as u32), t))
    }

    /// Resolve a type by name.
    ///
    /// More than one match is a schema corruption signal and fails with
    /// `AmbiguousPrimitive`; no match fails with `UnknownPrimitive`.
    pub fn find(&self, name: &str) -> Result<TypeIndex> {
        match self.by_name.get(name).map(Vec::as_slice) {
            None | Some([]) => Err(HkxError::UnknownPrimitive(name.to_string())),
            Some([one]) => Ok(*one),
            Some(_) => Err(HkxError::AmbiguousPrimitive(name.to_string())),
        }
    }

    /// First match by name, tolerating duplicates. Used where absence is
    /// an expected condition rather than an error.
    pub fn find_first(&self, name: &str) -> Option<TypeIndex> {
        self.by_name.get(name).and_then(|v| v.first()).copied()
    }

    /// Dereference synonym types to the concrete base type.
    pub fn concrete(&self, index: TypeIndex) -> Result<TypeIndex> {
        let mut current = index;
        // Alias chains are short; the bound only guards malformed cycles.
        for _ in 0..self.types.len() {
            let ty = self.get(current)?;
            if ty.alias_of.is_none() {
                return Ok(current);
            }
            current = ty.alias_of;
        }
        Err(HkxError::MalformedSection(format!(
            "synonym cycle at type {}",
            self.get(index)?.name
        )))
    }

    /// Resolve the pointer/element target of a pointer, array or tuple
    /// type, optionally dereferencing the result to its concrete base.
    pub fn pointee(&self, index: TypeIndex, deref: bool) -> Result<TypeIndex> {
        let concrete = self.concrete(index)?;
        let ty = self.get(concrete)?;
        let target = ty.pointee;
        if target.is_none() {
            return Err(HkxError::TypeMismatch {
                expected: "pointer/array/tuple type".into(),
                got: ty.name.clone(),
            });
        }
        if deref {
            self.concrete(target)
        } else {
            Ok(target)
        }
    }

    pub fn parent(&self, index: TypeIndex) -> Result<TypeIndex> {
        Ok(self.get(index)?.parent)
    }

    /// All members in declaration order, parent members first.
    pub fn all_members(&self, index: TypeIndex) -> Result<Vec<&Member>> {
        let mut chain = Vec::new();
        let mut current = self.concrete(index)?;
        while !current.is_none() {
            chain.push(current);
            current = self.get(current)?.parent;
            if chain.len() > self.types.len() {
                return Err(HkxError::MalformedSection(format!(
                    "parent cycle at type {}",
                    self.get(index)?.name
                )));
            }
        }
        let mut members = Vec::new();
        for idx in chain.into_iter().rev() {
            members.extend(self.get(idx)?.members.iter());
        }
        Ok(members)
    }

    /// Resolved data kind of a type (synonyms dereferenced).
    pub fn resolved_kind(&self, index: TypeIndex) -> Result<TypeKind> {
        Ok(self.get(self.concrete(index)?)?.kind)
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::kind::IntWidth;

    fn int32() -> Type {
        Type::new(
            "hkInt32",
            TypeKind::Int {
                signed: true,
                width: IntWidth::W32,
            },
        )
        .with_size(4, 4)
    }

    #[test]
    fn test_index_zero_is_sentinel() {
        let table = TypeTable::new();
        assert_eq!(table.len(), 1);
        assert!(table.get(TypeIndex::NONE).is_err());
    }

    #[test]
    fn test_find_not_found_and_ambiguous() {
        let mut table = TypeTable::new();
        table.push(int32());
        assert!(matches!(
            table.find("hkReal"),
            Err(HkxError::UnknownPrimitive(_))
        ));
        assert!(table.find("hkInt32").is_ok());

        table.push(int32());
        assert!(matches!(
            table.find("hkInt32"),
            Err(HkxError::AmbiguousPrimitive(_))
        ));
    }

    #[test]
    fn test_concrete_follows_synonym_chain() {
        let mut table = TypeTable::new();
        let real = table.push(
            Type::new(
                "hkReal",
                TypeKind::Float {
                    width: crate::schema::FloatWidth::F32,
                },
            )
            .with_size(4, 4),
        );
        let mut time = Type::new("hkTime", TypeKind::Invalid);
        time.alias_of = real;
        let time = table.push(time);

        assert_eq!(table.concrete(time).expect("resolve"), real);
        assert_eq!(table.concrete(real).expect("resolve"), real);
    }

    #[test]
    fn test_all_members_parent_first() {
        let mut table = TypeTable::new();
        let i32_ty = table.push(int32());

        let mut base = Type::new("Base", TypeKind::Class).with_size(4, 4);
        base.members.push(Member::new("refCount", 0, i32_ty));
        let base = table.push(base);

        let mut derived = Type::new("Derived", TypeKind::Class).with_size(12, 4);
        derived.parent = base;
        derived.members.push(Member::new("a", 4, i32_ty));
        derived.members.push(Member::new("b", 8, i32_ty));
        let derived = table.push(derived);

        let names: Vec<&str> = table
            .all_members(derived)
            .expect("members")
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, ["refCount", "a", "b"]);
    }

    #[test]
    fn test_pointee_requires_pointer_like_type() {
        let mut table = TypeTable::new();
        let i32_ty = table.push(int32());
        let ptr = table.push(
            Type::new("hkInt32*", TypeKind::Pointer)
                .with_size(8, 8)
                .with_pointee(i32_ty),
        );

        assert_eq!(table.pointee(ptr, true).expect("pointee"), i32_ty);
        assert!(table.pointee(i32_ty, true).is_err());
    }
}
