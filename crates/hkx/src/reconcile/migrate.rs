// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cross-version graph migration.
//!
//! Rewrites a graph typed against one schema into a graph typed against
//! another. Members are matched by name: a destination member with no
//! source counterpart gets a type-appropriate default, a source member
//! with no destination counterpart is discarded. The accounting is
//! strict: every source node must end up migrated or discarded, and
//! anything unaccounted for aborts with `MigrationIncomplete` rather
//! than silently dropping data.

use crate::error::{HkxError, Result};
use crate::graph::{reachable, reference_counts, Elements, NodeArena, NodeHandle, Value};
use crate::schema::{TypeIndex, TypeKind, TypeTable};
use std::collections::{HashMap, HashSet};

/// What a migration did, for callers that want to log or assert on it.
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Source nodes carried over.
    pub migrated: usize,
    /// Source nodes dropped with their members.
    pub discarded: usize,
    /// `Class.member` names synthesized with defaults.
    pub defaulted: Vec<String>,
    /// `Class.member` names present only in the source.
    pub dropped: Vec<String>,
}

/// Build a default node for a destination type: zero, empty or null.
fn default_node(arena: &mut NodeArena, types: &TypeTable, ti: TypeIndex) -> Result<NodeHandle> {
    let concrete = types.concrete(ti)?;
    let ty = types.get(concrete)?;
    let value = match ty.kind {
        TypeKind::Void => Value::Int(0),
        TypeKind::Invalid => {
            return Err(HkxError::TypeMismatch {
                expected: "concrete value type".into(),
                got: ty.name.clone(),
            })
        }
        TypeKind::Bool => Value::Bool(false),
        TypeKind::Int { .. } => Value::Int(0),
        TypeKind::Float { .. } => Value::Float(0.0),
        TypeKind::String => Value::String(None),
        TypeKind::Pointer => Value::Pointer(None),
        TypeKind::Class => {
            let members = types.all_members(concrete)?;
            let mut fields = Vec::with_capacity(members.len());
            for member in members {
                let child = default_node(arena, types, member.type_index)?;
                fields.push((member.name.clone(), child));
            }
            Value::Class(fields)
        }
        TypeKind::Array => Value::Array(empty_elements(types, types.pointee(concrete, false)?)?),
        TypeKind::Tuple { count } => {
            let elem = types.pointee(concrete, false)?;
            let kind = types.resolved_kind(elem)?;
            if !kind.is_scalar() {
                let mut nodes = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    nodes.push(default_node(arena, types, elem)?);
                }
                Value::Tuple(Elements::Nodes(nodes))
            } else if kind.is_float() {
                Value::Tuple(Elements::Floats(vec![0.0; count as usize]))
            } else {
                Value::Tuple(Elements::Ints(vec![0; count as usize]))
            }
        }
    };
    Ok(arena.alloc(ti, value))
}

fn empty_elements(types: &TypeTable, elem: TypeIndex) -> Result<Elements> {
    let kind = types.resolved_kind(elem)?;
    Ok(if !kind.is_scalar() {
        Elements::Nodes(Vec::new())
    } else if kind.is_float() {
        Elements::Floats(Vec::new())
    } else {
        Elements::Ints(Vec::new())
    })
}

struct Migrator<'a> {
    arena: &'a NodeArena,
    from: &'a TypeTable,
    to: &'a TypeTable,
    out: NodeArena,
    memo: HashMap<NodeHandle, NodeHandle>,
    migrated: HashSet<NodeHandle>,
    dropped_subtrees: Vec<NodeHandle>,
    counts: Vec<u32>,
    report: MigrationReport,
}

impl Migrator<'_> {
    fn mismatch(&self, expected: &str, h: NodeHandle) -> HkxError {
        let got = self
            .arena
            .get(h)
            .map(|n| crate::graph::value_kind_name(&n.value))
            .unwrap_or("missing node");
        HkxError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Destination type for an object node, matched by class name.
    fn dest_class(&self, old: NodeHandle) -> Result<TypeIndex> {
        let old_ti = self.arena.get(old)?.type_index;
        let name = &self.from.get(self.from.concrete(old_ti)?)?.name;
        self.to.find(name)
    }

    fn node(&mut self, old: NodeHandle, dest_ti: TypeIndex) -> Result<NodeHandle> {
        if let Some(&new) = self.memo.get(&old) {
            return Ok(new);
        }
        self.migrated.insert(old);
        let concrete = self.to.concrete(dest_ti)?;
        let ty = self.to.get(concrete)?;
        let old_node = self.arena.get(old)?;
        let new = match ty.kind {
            TypeKind::Void => self.out.alloc(dest_ti, Value::Int(0)),
            TypeKind::Invalid => {
                return Err(HkxError::TypeMismatch {
                    expected: "concrete value type".into(),
                    got: ty.name.clone(),
                })
            }
            TypeKind::Bool => {
                let v = old_node
                    .value
                    .as_bool()
                    .ok_or_else(|| self.mismatch("bool", old))?;
                self.out.alloc(dest_ti, Value::Bool(v))
            }
            TypeKind::Int { .. } => {
                let v = old_node
                    .value
                    .as_int()
                    .ok_or_else(|| self.mismatch("int", old))?;
                self.out.alloc(dest_ti, Value::Int(v))
            }
            TypeKind::Float { .. } => {
                let v = old_node
                    .value
                    .as_float()
                    .ok_or_else(|| self.mismatch("float", old))?;
                self.out.alloc(dest_ti, Value::Float(v))
            }
            TypeKind::String => match &old_node.value {
                Value::String(s) => self.out.alloc(dest_ti, Value::String(s.clone())),
                _ => return Err(self.mismatch("string", old)),
            },
            TypeKind::Pointer => match old_node.value {
                Value::Pointer(None) => self.out.alloc(dest_ti, Value::Pointer(None)),
                Value::Pointer(Some(target)) => {
                    let new = self.out.alloc(dest_ti, Value::Pointer(None));
                    self.memo.insert(old, new);
                    let dest_target = self.dest_class(target)?;
                    let target = self.node(target, dest_target)?;
                    self.out.get_mut(new)?.value = Value::Pointer(Some(target));
                    return Ok(new);
                }
                _ => return Err(self.mismatch("pointer", old)),
            },
            TypeKind::Class => {
                // Pre-allocate and memoize before recursing so pointer
                // cycles through this object terminate.
                let new = self.out.alloc(dest_ti, Value::Class(Vec::new()));
                self.memo.insert(old, new);
                let fields = self.class_fields(old, concrete)?;
                self.out.get_mut(new)?.value = Value::Class(fields);
                return Ok(new);
            }
            TypeKind::Array => {
                let elem = self.to.pointee(concrete, false)?;
                let elements = self.elements(old, elem)?;
                self.out.alloc(dest_ti, Value::Array(elements))
            }
            TypeKind::Tuple { count } => {
                let elem = self.to.pointee(concrete, false)?;
                let elements = self.elements(old, elem)?;
                if elements.len() != count as usize {
                    return Err(HkxError::TypeMismatch {
                        expected: format!("{} tuple element(s)", count),
                        got: format!("{}", elements.len()),
                    });
                }
                self.out.alloc(dest_ti, Value::Tuple(elements))
            }
        };
        self.memo.insert(old, new);
        Ok(new)
    }

    fn class_fields(
        &mut self,
        old: NodeHandle,
        dest_concrete: TypeIndex,
    ) -> Result<Vec<(String, NodeHandle)>> {
        let class_name = self.to.get(dest_concrete)?.name.clone();
        let old_fields = match &self.arena.get(old)?.value {
            Value::Class(fields) => fields.clone(),
            _ => return Err(self.mismatch("class", old)),
        };

        let members: Vec<(String, TypeIndex)> = self
            .to
            .all_members(dest_concrete)?
            .iter()
            .map(|m| (m.name.clone(), m.type_index))
            .collect();
        let mut fields = Vec::with_capacity(members.len());
        for (name, member_ti) in &members {
            match old_fields.iter().find(|(n, _)| n == name) {
                Some((_, child)) => fields.push((name.clone(), self.node(*child, *member_ti)?)),
                None => {
                    self.report
                        .defaulted
                        .push(format!("{}.{}", class_name, name));
                    let child = default_node(&mut self.out, self.to, *member_ti)?;
                    fields.push((name.clone(), child));
                }
            }
        }

        for (name, child) in &old_fields {
            if !members.iter().any(|(n, _)| n == name) {
                self.report.dropped.push(format!("{}.{}", class_name, name));
                if self.counts[child.usize()] > 1 {
                    log::debug!(
                        "[RECONCILE] dropped member {}.{} is shared; shared nodes survive where migrated",
                        class_name,
                        name
                    );
                }
                self.dropped_subtrees.push(*child);
            }
        }
        Ok(fields)
    }

    fn elements(&mut self, old: NodeHandle, elem: TypeIndex) -> Result<Elements> {
        let elements = self
            .arena
            .get(old)?
            .value
            .as_elements()
            .ok_or_else(|| self.mismatch("array or tuple", old))?
            .clone();
        Ok(match elements {
            Elements::Nodes(nodes) => {
                let mut out = Vec::with_capacity(nodes.len());
                for h in nodes {
                    out.push(self.node(h, elem)?);
                }
                Elements::Nodes(out)
            }
            flat => flat,
        })
    }
}

/// Migrate a graph from schema `from` to schema `to`.
pub fn migrate(
    arena: &NodeArena,
    root: NodeHandle,
    from: &TypeTable,
    to: &TypeTable,
) -> Result<(NodeArena, NodeHandle, MigrationReport)> {
    let counts = reference_counts(arena, root)?;
    let mut migrator = Migrator {
        arena,
        from,
        to,
        out: NodeArena::new(),
        memo: HashMap::new(),
        migrated: HashSet::new(),
        dropped_subtrees: Vec::new(),
        counts,
        report: MigrationReport::default(),
    };
    let dest_root = migrator.dest_class(root)?;
    let new_root = migrator.node(root, dest_root)?;

    // Strict accounting: every source node is migrated or discarded.
    let mut discarded = HashSet::new();
    for &dropped in &migrator.dropped_subtrees {
        for h in reachable(arena, dropped)? {
            if !migrator.migrated.contains(&h) {
                discarded.insert(h);
            }
        }
    }
    let unaccounted = reachable(arena, root)?
        .into_iter()
        .filter(|h| !migrator.migrated.contains(h) && !discarded.contains(h))
        .count();
    if unaccounted > 0 {
        return Err(HkxError::MigrationIncomplete { unaccounted });
    }

    let mut report = migrator.report;
    report.migrated = migrator.migrated.len();
    report.discarded = discarded.len();
    log::debug!(
        "[RECONCILE] migrated {} node(s), discarded {}, defaulted {} member(s)",
        report.migrated,
        report.discarded,
        report.defaulted.len()
    );
    Ok((migrator.out, new_root, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::kind::IntWidth;
    use crate::schema::SchemaBuilder;

    /// v1 bone: name + weight. v2 bone: name + weight + lockTranslate.
    fn schemas() -> (TypeTable, TypeTable) {
        let mut b = SchemaBuilder::new(8);
        let s = b.string();
        let real = b.real();
        let bone = b
            .class("hkaBone", TypeIndex::NONE, 1, &[("name", s), ("weight", real)])
            .expect("class");
        let ptr = b.pointer(bone).expect("pointer");
        b.class("hkRootLevelContainer", TypeIndex::NONE, 1, &[("bone", ptr)])
            .expect("class");
        let from = b.into_table();

        let mut b = SchemaBuilder::new(8);
        let s = b.string();
        let real = b.real();
        let flag = b.boolean();
        let bone = b
            .class(
                "hkaBone",
                TypeIndex::NONE,
                2,
                &[("name", s), ("weight", real), ("lockTranslate", flag)],
            )
            .expect("class");
        let ptr = b.pointer(bone).expect("pointer");
        b.class("hkRootLevelContainer", TypeIndex::NONE, 1, &[("bone", ptr)])
            .expect("class");
        let to = b.into_table();
        (from, to)
    }

    fn graph(types: &TypeTable) -> (NodeArena, NodeHandle) {
        let bone_ty = types.find("hkaBone").expect("bone");
        let root_ty = types.find("hkRootLevelContainer").expect("root");
        let s = types.find("hkStringPtr").expect("string");
        let real = types.find("hkReal").expect("real");
        let ptr = types.find("hkaBone*").expect("pointer");

        let mut arena = NodeArena::new();
        let name = arena.alloc(s, Value::String(Some("Spine".into())));
        let weight = arena.alloc(real, Value::Float(0.5));
        let bone = arena.alloc(
            bone_ty,
            Value::Class(vec![("name".into(), name), ("weight".into(), weight)]),
        );
        let p = arena.alloc(ptr, Value::Pointer(Some(bone)));
        let root = arena.alloc(root_ty, Value::Class(vec![("bone".into(), p)]));
        (arena, root)
    }

    #[test]
    fn test_added_member_gets_default() {
        let (from, to) = schemas();
        let (arena, root) = graph(&from);
        let (out, new_root, report) = migrate(&arena, root, &from, &to).expect("migrate");

        let bone = out
            .resolve(out.field(new_root, "bone").expect("bone"))
            .expect("resolve");
        let lock = out.field(bone, "lockTranslate").expect("field");
        assert_eq!(out.get(lock).expect("node").value, Value::Bool(false));
        assert_eq!(report.defaulted, vec!["hkaBone.lockTranslate"]);
        assert!(report.dropped.is_empty());
        assert_eq!(report.discarded, 0);
    }

    #[test]
    fn test_removed_member_is_discarded_and_accounted() {
        // Migrating v2 -> v1 drops lockTranslate.
        let (to, from) = schemas();
        let bone_ty = from.find("hkaBone").expect("bone");
        let root_ty = from.find("hkRootLevelContainer").expect("root");
        let s = from.find("hkStringPtr").expect("string");
        let real = from.find("hkReal").expect("real");
        let flag = from.find("hkBool").expect("bool");
        let ptr = from.find("hkaBone*").expect("pointer");

        let mut arena = NodeArena::new();
        let name = arena.alloc(s, Value::String(Some("Spine".into())));
        let weight = arena.alloc(real, Value::Float(0.5));
        let lock = arena.alloc(flag, Value::Bool(true));
        let bone = arena.alloc(
            bone_ty,
            Value::Class(vec![
                ("name".into(), name),
                ("weight".into(), weight),
                ("lockTranslate".into(), lock),
            ]),
        );
        let p = arena.alloc(ptr, Value::Pointer(Some(bone)));
        let root = arena.alloc(root_ty, Value::Class(vec![("bone".into(), p)]));

        let (out, new_root, report) = migrate(&arena, root, &from, &to).expect("migrate");
        let bone = out
            .resolve(out.field(new_root, "bone").expect("bone"))
            .expect("resolve");
        assert!(out.field(bone, "lockTranslate").is_err());
        assert_eq!(report.dropped, vec!["hkaBone.lockTranslate"]);
        assert_eq!(report.discarded, 1);
    }

    #[test]
    fn test_shared_reference_migrates_once() {
        let mut b = SchemaBuilder::new(8);
        let s = b.string();
        let bone = b
            .class("hkaBone", TypeIndex::NONE, 1, &[("name", s)])
            .expect("class");
        let ptr = b.pointer(bone).expect("pointer");
        let root_ty = b
            .class(
                "hkRootLevelContainer",
                TypeIndex::NONE,
                1,
                &[("a", ptr), ("b", ptr)],
            )
            .expect("class");
        let types = b.into_table();

        let mut arena = NodeArena::new();
        let name = arena.alloc(s, Value::String(None));
        let shared = arena.alloc(bone, Value::Class(vec![("name".into(), name)]));
        let p1 = arena.alloc(ptr, Value::Pointer(Some(shared)));
        let p2 = arena.alloc(ptr, Value::Pointer(Some(shared)));
        let root = arena.alloc(
            root_ty,
            Value::Class(vec![("a".into(), p1), ("b".into(), p2)]),
        );

        let (out, new_root, _) = migrate(&arena, root, &types, &types).expect("migrate");
        let a = out
            .resolve(out.field(new_root, "a").expect("a"))
            .expect("resolve");
        let b = out
            .resolve(out.field(new_root, "b").expect("b"))
            .expect("resolve");
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_destination_class_aborts() {
        let (from, _) = schemas();
        let (arena, root) = graph(&from);

        let mut b = SchemaBuilder::new(8);
        let u32_ty = b.int(false, IntWidth::W32);
        b.class("hkRootLevelContainer", TypeIndex::NONE, 1, &[("pad", u32_ty)])
            .expect("class");
        let to = b.into_table();

        // The v1 root's bone pointer has no destination counterpart; its
        // class lookup never happens, so the subtree must be accounted as
        // dropped, not lost.
        let (out, new_root, report) = migrate(&arena, root, &from, &to).expect("migrate");
        assert_eq!(report.dropped, vec!["hkRootLevelContainer.bone"]);
        assert!(report.discarded >= 4);
        assert!(out.field(new_root, "pad").is_ok());
    }
}
