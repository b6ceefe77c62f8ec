// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Graph-wide reachability over node identity.
//!
//! Both packers and type reconciliation walk the graph with an explicit
//! work queue. "Already visited" is keyed on the node handle, not on
//! structural value, so shared references and cycles terminate; the walk
//! never recurses into the flattened primitive array form (those
//! elements are values, not nodes).

use super::{Elements, NodeArena, NodeHandle, Value};
use crate::error::Result;
use std::collections::VecDeque;

/// Direct child handles of a node, in value order.
pub fn children(arena: &NodeArena, handle: NodeHandle) -> Result<Vec<NodeHandle>> {
    let node = arena.get(handle)?;
    Ok(match &node.value {
        Value::Pointer(Some(target)) => vec![*target],
        Value::Class(fields) => fields.iter().map(|(_, h)| *h).collect(),
        Value::Array(Elements::Nodes(v)) | Value::Tuple(Elements::Nodes(v)) => v.clone(),
        _ => Vec::new(),
    })
}

/// Breadth-first reachable set from `root`, in first-visit order.
pub fn reachable(arena: &NodeArena, root: NodeHandle) -> Result<Vec<NodeHandle>> {
    let mut visited = vec![false; arena.len()];
    let mut order = Vec::new();
    let mut queue = VecDeque::new();

    arena.get(root)?;
    visited[root.usize()] = true;
    queue.push_back(root);

    while let Some(handle) = queue.pop_front() {
        order.push(handle);
        for child in children(arena, handle)? {
            let slot = &mut visited[child.usize()];
            if !*slot {
                *slot = true;
                queue.push_back(child);
            }
        }
    }
    Ok(order)
}

/// Inbound edge counts for every node reachable from `root`, indexed by
/// handle. Used by migration to decide whether a discarded member's
/// subtree is referenced elsewhere.
pub fn reference_counts(arena: &NodeArena, root: NodeHandle) -> Result<Vec<u32>> {
    let mut counts = vec![0u32; arena.len()];
    for handle in reachable(arena, root)? {
        for child in children(arena, handle)? {
            counts[child.usize()] += 1;
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TypeIndex;

    fn ti(n: u32) -> TypeIndex {
        TypeIndex(n)
    }

    #[test]
    fn test_walk_terminates_on_cycle() {
        let mut arena = NodeArena::new();
        let ptr = arena.alloc(ti(1), Value::Pointer(None));
        let class = arena.alloc(ti(2), Value::Class(vec![("next".into(), ptr)]));
        // Tie the cycle: class -> ptr -> class.
        arena.get_mut(ptr).expect("node").value = Value::Pointer(Some(class));

        let order = reachable(&arena, class).expect("walk");
        assert_eq!(order.len(), 2);
        assert_eq!(order[0], class);
    }

    #[test]
    fn test_shared_reference_visited_once() {
        let mut arena = NodeArena::new();
        let shared = arena.alloc(ti(1), Value::Int(5));
        let p1 = arena.alloc(ti(2), Value::Pointer(Some(shared)));
        let p2 = arena.alloc(ti(2), Value::Pointer(Some(shared)));
        let root = arena.alloc(
            ti(3),
            Value::Class(vec![("a".into(), p1), ("b".into(), p2)]),
        );

        let order = reachable(&arena, root).expect("walk");
        assert_eq!(order.len(), 4);
        assert_eq!(order.iter().filter(|&&h| h == shared).count(), 1);

        let counts = reference_counts(&arena, root).expect("counts");
        assert_eq!(counts[shared.usize()], 2);
        assert_eq!(counts[p1.usize()], 1);
    }

    #[test]
    fn test_walk_skips_flattened_arrays() {
        let mut arena = NodeArena::new();
        let flat = arena.alloc(ti(1), Value::Array(Elements::Ints(vec![1, 2, 3])));
        let order = reachable(&arena, flat).expect("walk");
        assert_eq!(order, vec![flat]);
    }
}
