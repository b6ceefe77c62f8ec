// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Structural graph comparison.
//!
//! A verification oracle, not a production path: walks two graphs in
//! lockstep and reports every place they disagree, with a configurable
//! floating-point tolerance. In adopt mode, leaf mismatches additionally
//! overwrite the left graph's value with the right graph's; structural
//! mismatches (shape, length, member set) are only ever reported.

use crate::error::Result;
use crate::graph::{Elements, NodeArena, NodeHandle, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy)]
pub struct DiffOptions {
    /// Maximum absolute difference treated as equal for floats.
    pub float_tolerance: f64,
    /// Copy the right graph's leaf values over mismatching left leaves.
    pub adopt: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            float_tolerance: 0.0,
            adopt: false,
        }
    }
}

/// One point of disagreement.
#[derive(Debug, Clone, PartialEq)]
pub struct Difference {
    /// Dotted path from the root, e.g. `root.bones[2].name`.
    pub path: String,
    pub detail: String,
}

struct DiffCtx<'a> {
    left: &'a mut NodeArena,
    right: &'a NodeArena,
    options: DiffOptions,
    visited: HashSet<(NodeHandle, NodeHandle)>,
    out: Vec<Difference>,
}

impl DiffCtx<'_> {
    fn record(&mut self, path: &str, detail: String) {
        self.out.push(Difference {
            path: path.to_string(),
            detail,
        });
    }

    fn float_eq(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.options.float_tolerance || (a.is_nan() && b.is_nan())
    }

    fn adopt(&mut self, lh: NodeHandle, value: Value) -> Result<()> {
        if self.options.adopt {
            self.left.get_mut(lh)?.value = value;
        }
        Ok(())
    }

    fn node(&mut self, lh: NodeHandle, rh: NodeHandle, path: &str) -> Result<()> {
        if !self.visited.insert((lh, rh)) {
            return Ok(());
        }
        let lv = self.left.get(lh)?.value.clone();
        let rv = self.right.get(rh)?.value.clone();
        match (&lv, &rv) {
            (Value::Bool(a), Value::Bool(b)) => {
                if a != b {
                    self.record(path, format!("bool {} vs {}", a, b));
                    self.adopt(lh, rv)?;
                }
            }
            (Value::Int(a), Value::Int(b)) => {
                if a != b {
                    self.record(path, format!("int {} vs {}", a, b));
                    self.adopt(lh, rv)?;
                }
            }
            (Value::Float(a), Value::Float(b)) => {
                if !self.float_eq(*a, *b) {
                    self.record(path, format!("float {} vs {}", a, b));
                    self.adopt(lh, rv)?;
                }
            }
            (Value::String(a), Value::String(b)) => {
                if a != b {
                    self.record(path, format!("string {:?} vs {:?}", a, b));
                    self.adopt(lh, rv)?;
                }
            }
            (Value::Pointer(None), Value::Pointer(None)) => {}
            (Value::Pointer(Some(a)), Value::Pointer(Some(b))) => {
                self.node(*a, *b, &format!("{}*", path))?;
            }
            (Value::Pointer(_), Value::Pointer(_)) => {
                self.record(path, "pointer nullability differs".into());
            }
            (Value::Class(a), Value::Class(b)) => {
                for (name, lc) in a {
                    match b.iter().find(|(n, _)| n == name) {
                        Some((_, rc)) => self.node(*lc, *rc, &format!("{}.{}", path, name))?,
                        None => self.record(path, format!("member {} only on the left", name)),
                    }
                }
                for (name, _) in b {
                    if !a.iter().any(|(n, _)| n == name) {
                        self.record(path, format!("member {} only on the right", name));
                    }
                }
            }
            (Value::Array(a), Value::Array(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
                self.elements(a, b, path)?;
            }
            _ => {
                self.record(
                    path,
                    format!(
                        "shape {} vs {}",
                        crate::graph::value_kind_name(&lv),
                        crate::graph::value_kind_name(&rv)
                    ),
                );
            }
        }
        Ok(())
    }

    fn elements(&mut self, a: &Elements, b: &Elements, path: &str) -> Result<()> {
        if a.len() != b.len() {
            self.record(path, format!("length {} vs {}", a.len(), b.len()));
            return Ok(());
        }
        match (a, b) {
            (Elements::Nodes(a), Elements::Nodes(b)) => {
                for (i, (&la, &rb)) in a.iter().zip(b.iter()).enumerate() {
                    self.node(la, rb, &format!("{}[{}]", path, i))?;
                }
            }
            (Elements::Ints(a), Elements::Ints(b)) => {
                for (i, (la, rb)) in a.iter().zip(b.iter()).enumerate() {
                    if la != rb {
                        self.record(&format!("{}[{}]", path, i), format!("int {} vs {}", la, rb));
                    }
                }
            }
            (Elements::Floats(a), Elements::Floats(b)) => {
                for (i, (la, rb)) in a.iter().zip(b.iter()).enumerate() {
                    if !self.float_eq(*la, *rb) {
                        self.record(
                            &format!("{}[{}]", path, i),
                            format!("float {} vs {}", la, rb),
                        );
                    }
                }
            }
            _ => {
                self.record(path, "element storage form differs".into());
            }
        }
        Ok(())
    }
}

/// Compare two graphs; returns every difference found.
///
/// With `options.adopt`, mismatching leaf values on the left are
/// replaced by the right's (the differences are still reported).
pub fn diff(
    left: &mut NodeArena,
    left_root: NodeHandle,
    right: &NodeArena,
    right_root: NodeHandle,
    options: DiffOptions,
) -> Result<Vec<Difference>> {
    let mut ctx = DiffCtx {
        left,
        right,
        options,
        visited: HashSet::new(),
        out: Vec::new(),
    };
    ctx.node(left_root, right_root, "root")?;
    log::debug!("[RECONCILE] diff found {} difference(s)", ctx.out.len());
    Ok(ctx.out)
}
