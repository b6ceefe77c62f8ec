// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reachability-based type-set minimization.
//!
//! The closure runs breadth-first over both graphs: node edges first
//! (every reachable node seeds its type), then type edges (parent,
//! synonym target, pointer/element target, member, template and
//! interface references). The output table holds exactly the reachable
//! types, once each, in discovery order — a function of graph structure,
//! so minimizing an already-minimal graph is the identity.

use crate::error::{HkxError, Result};
use crate::graph::{reachable, Elements, NodeArena, NodeHandle, Value};
use crate::schema::{TemplateValue, TypeIndex, TypeTable};
use std::collections::VecDeque;

fn visit(seen: &mut [bool], queue: &mut VecDeque<TypeIndex>, idx: TypeIndex) {
    if idx.is_none() {
        return;
    }
    let slot = &mut seen[idx.usize()];
    if !*slot {
        *slot = true;
        queue.push_back(idx);
    }
}

/// Rebuild `arena` and `types` down to what `root` actually reaches.
///
/// Handles and type indices in the result are renumbered; the returned
/// root addresses the new arena.
pub fn minimize(
    arena: &NodeArena,
    root: NodeHandle,
    types: &TypeTable,
) -> Result<(NodeArena, NodeHandle, TypeTable)> {
    let order = reachable(arena, root)?;

    // Type closure, seeded by node types in visit order.
    let mut seen = vec![false; types.len()];
    let mut queue = VecDeque::new();
    for &h in &order {
        let idx = arena.get(h)?.type_index;
        if idx.usize() >= seen.len() {
            return Err(HkxError::OutOfRange {
                index: idx.usize(),
                len: seen.len(),
            });
        }
        visit(&mut seen, &mut queue, idx);
    }
    let mut type_order = Vec::new();
    while let Some(idx) = queue.pop_front() {
        type_order.push(idx);
        let ty = types.get(idx)?;
        visit(&mut seen, &mut queue, ty.parent);
        visit(&mut seen, &mut queue, ty.pointee);
        visit(&mut seen, &mut queue, ty.alias_of);
        for member in &ty.members {
            visit(&mut seen, &mut queue, member.type_index);
        }
        for arg in &ty.templates {
            if let TemplateValue::Type(t) = arg.value {
                visit(&mut seen, &mut queue, t);
            }
        }
        for iface in &ty.interfaces {
            visit(&mut seen, &mut queue, iface.type_index);
        }
    }

    let mut type_map = vec![TypeIndex::NONE; types.len()];
    for (pos, &idx) in type_order.iter().enumerate() {
        type_map[idx.usize()] = TypeIndex(pos as u32 + 1);
    }
    let map_type = |idx: TypeIndex| -> TypeIndex {
        if idx.is_none() {
            TypeIndex::NONE
        } else {
            type_map[idx.usize()]
        }
    };

    let mut out_types = TypeTable::new();
    for &idx in &type_order {
        let mut ty = types.get(idx)?.clone();
        ty.parent = map_type(ty.parent);
        ty.pointee = map_type(ty.pointee);
        ty.alias_of = map_type(ty.alias_of);
        for member in &mut ty.members {
            member.type_index = map_type(member.type_index);
        }
        for arg in &mut ty.templates {
            if let TemplateValue::Type(t) = arg.value {
                arg.value = TemplateValue::Type(map_type(t));
            }
        }
        for iface in &mut ty.interfaces {
            iface.type_index = map_type(iface.type_index);
        }
        out_types.push(ty);
    }

    // Node rewrite: reachable nodes keep their visit order.
    let mut node_map = vec![NodeHandle(u32::MAX); arena.len()];
    for (pos, &h) in order.iter().enumerate() {
        node_map[h.usize()] = NodeHandle(pos as u32);
    }
    let map_node = |h: NodeHandle| node_map[h.usize()];

    let mut out_arena = NodeArena::new();
    for &h in &order {
        let node = arena.get(h)?;
        let value = match &node.value {
            Value::Pointer(Some(t)) => Value::Pointer(Some(map_node(*t))),
            Value::Class(fields) => Value::Class(
                fields
                    .iter()
                    .map(|(name, c)| (name.clone(), map_node(*c)))
                    .collect(),
            ),
            Value::Array(Elements::Nodes(v)) => {
                Value::Array(Elements::Nodes(v.iter().copied().map(map_node).collect()))
            }
            Value::Tuple(Elements::Nodes(v)) => {
                Value::Tuple(Elements::Nodes(v.iter().copied().map(map_node).collect()))
            }
            other => other.clone(),
        };
        out_arena.alloc(map_type(node.type_index), value);
    }

    log::debug!(
        "[RECONCILE] minimized {} -> {} type(s), {} -> {} node(s)",
        types.len() - 1,
        out_types.len() - 1,
        arena.len(),
        out_arena.len()
    );
    Ok((out_arena, map_node(root), out_types))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaBuilder, TypeKind};

    /// A table with one class the graph uses and one it does not.
    fn sample() -> (NodeArena, NodeHandle, TypeTable, &'static str) {
        let mut b = SchemaBuilder::new(8);
        let s = b.string();
        let used = b
            .class("hkaBone", TypeIndex::NONE, 1, &[("name", s)])
            .expect("class");
        b.class("hkaMeshBinding", TypeIndex::NONE, 2, &[("name", s)])
            .expect("class");
        let ptr = b.pointer(used).expect("pointer");
        let root_ty = b
            .class("hkRootLevelContainer", TypeIndex::NONE, 1, &[("bone", ptr)])
            .expect("class");
        let types = b.into_table();

        let mut arena = NodeArena::new();
        let name = arena.alloc(s, Value::String(Some("Root".into())));
        let bone = arena.alloc(used, Value::Class(vec![("name".into(), name)]));
        let p = arena.alloc(ptr, Value::Pointer(Some(bone)));
        let root = arena.alloc(root_ty, Value::Class(vec![("bone".into(), p)]));
        (arena, root, types, "hkaMeshBinding")
    }

    #[test]
    fn test_unreachable_type_dropped() {
        let (arena, root, types, unused) = sample();
        let (out_arena, out_root, out_types) = minimize(&arena, root, &types).expect("minimize");

        assert!(out_types.find_first(unused).is_none());
        assert!(out_types.find("hkaBone").is_ok());
        assert!(out_types.find("hkRootLevelContainer").is_ok());
        assert_eq!(out_arena.len(), arena.len());

        // Every type reference in the output addresses the output table.
        for (_, ty) in out_types.iter() {
            for member in &ty.members {
                assert!(member.type_index.usize() < out_types.len());
            }
        }
        let root_ty = out_arena.get(out_root).expect("root").type_index;
        assert_eq!(
            out_types.get(root_ty).expect("type").name,
            "hkRootLevelContainer"
        );
    }

    #[test]
    fn test_each_reachable_type_appears_once() {
        let (arena, root, types, _) = sample();
        let (_, _, out_types) = minimize(&arena, root, &types).expect("minimize");
        let mut names: Vec<&str> = out_types.iter().map(|(_, t)| t.name.as_str()).collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), before);
    }

    #[test]
    fn test_minimize_is_idempotent() {
        let (arena, root, types, _) = sample();
        let (a1, r1, t1) = minimize(&arena, root, &types).expect("minimize");
        let (a2, r2, t2) = minimize(&a1, r1, &t1).expect("minimize");

        assert_eq!(r1, r2);
        assert_eq!(t1.len(), t2.len());
        for ((_, a), (_, b)) in t1.iter().zip(t2.iter()) {
            assert_eq!(a, b);
        }
        for i in 0..a1.len() {
            let h = NodeHandle(i as u32);
            assert_eq!(a1.get(h).expect("node"), a2.get(h).expect("node"));
        }
    }

    #[test]
    fn test_synonym_target_retained() {
        let mut b = SchemaBuilder::new(8);
        let real = b.real();
        let time = b.alias("hkTime", real);
        let root_ty = b
            .class("hkRootLevelContainer", TypeIndex::NONE, 1, &[("t", time)])
            .expect("class");
        let types = b.into_table();

        let mut arena = NodeArena::new();
        let t = arena.alloc(time, Value::Float(1.25));
        let root = arena.alloc(root_ty, Value::Class(vec![("t".into(), t)]));

        let (_, _, out) = minimize(&arena, root, &types).expect("minimize");
        let time = out.find("hkTime").expect("alias");
        assert_eq!(
            out.get(out.concrete(time).expect("concrete"))
                .expect("type")
                .kind,
            TypeKind::Float {
                width: crate::schema::FloatWidth::F32
            }
        );
    }
}
