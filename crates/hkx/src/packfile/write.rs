// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packfile encoding: node graph to bytes.
//!
//! Objects are laid out in depth-first traversal order from the root;
//! the order is a function of graph structure, so decode followed by
//! re-encode reproduces the original entry sequence byte for byte.
//! Each entry serializes its fixed-size object image first, then its
//! deferred payloads (strings, array data) in first-reference order.

use super::fixups::{finish_table, EntryPointer, EntrySpec};
use super::header::{PackfileHeader, SectionHeader, DATA_SECTION, SECTION_TAGS};
use super::typesec;
use crate::error::{HkxError, Result};
use crate::graph::{Elements, NodeArena, NodeHandle, Value};
use crate::schema::{
    builtin::ROOT_CONTAINER,
    kind::{f64_to_half, FloatWidth, IntWidth, TypeKind},
    TypeIndex, TypeTable,
};
use crate::ser::Writer;
use std::collections::{HashMap, HashSet, VecDeque};

/// Class names always present when a type section is embedded; the
/// type-section entry specs reference them.
const META_CLASS_NAMES: [&str; 4] = [
    "hkClass",
    "hkClassMember",
    "hkClassEnum",
    "hkClassEnumItem",
];

/// Pointer targets of one object's inline structure, in value order,
/// without following the pointers themselves.
fn pointer_targets(arena: &NodeArena, handle: NodeHandle) -> Result<Vec<NodeHandle>> {
    let mut out = Vec::new();
    let mut stack = vec![handle];
    while let Some(h) = stack.pop() {
        match &arena.get(h)?.value {
            Value::Pointer(Some(target)) => out.push(*target),
            Value::Class(fields) => stack.extend(fields.iter().rev().map(|(_, c)| *c)),
            Value::Array(Elements::Nodes(v)) | Value::Tuple(Elements::Nodes(v)) => {
                stack.extend(v.iter().rev().copied())
            }
            _ => {}
        }
    }
    Ok(out)
}

/// Depth-first preorder over top-level objects (the root plus every
/// pointer target), each visited once.
fn object_order(arena: &NodeArena, root: NodeHandle) -> Result<Vec<NodeHandle>> {
    let mut order = Vec::new();
    let mut seen = vec![false; arena.len()];
    let mut stack = vec![root];
    seen[root.usize()] = true;
    while let Some(h) = stack.pop() {
        order.push(h);
        let targets = pointer_targets(arena, h)?;
        for &t in targets.iter().rev() {
            let slot = &mut seen[t.usize()];
            if !*slot {
                *slot = true;
                stack.push(t);
            }
        }
    }
    Ok(order)
}

enum Deferred {
    Str { slot: u32, text: String },
    Payload { slot: u32, array: NodeHandle },
}

struct EntryOut {
    type_index: TypeIndex,
    bytes: Vec<u8>,
    child: Vec<(u32, u32)>,
    pointers: Vec<(u32, NodeHandle)>,
}

struct Encoder<'a> {
    arena: &'a NodeArena,
    types: &'a TypeTable,
    pointer_size: u32,
    big_endian: bool,
}

impl Encoder<'_> {
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

    fn put_int(&self, w: &mut Writer, off: u32, width: IntWidth, value: i64) {
        let mut patch = w.at(off as usize);
        match width {
            IntWidth::W8 => patch.write_u8(value as u8),
            IntWidth::W16 => patch.write_u16(value as u16),
            IntWidth::W32 => patch.write_u32(value as u32),
            IntWidth::W64 => patch.write_u64(value as u64),
        }
    }

    fn put_value(
        &self,
        w: &mut Writer,
        off: u32,
        ti: TypeIndex,
        h: NodeHandle,
        deferred: &mut VecDeque<Deferred>,
        out: &mut EntryOut,
    ) -> Result<()> {
        let concrete = self.types.concrete(ti)?;
        let ty = self.types.get(concrete)?;
        let node = self.arena.get(h)?;
        match ty.kind {
            TypeKind::Void => {}
            TypeKind::Invalid => {
                return Err(HkxError::TypeMismatch {
                    expected: "concrete value type".into(),
                    got: ty.name.clone(),
                })
            }
            TypeKind::Bool => {
                let v = node.value.as_bool().ok_or_else(|| self.mismatch("bool", h))?;
                w.at(off as usize).write_u8(u8::from(v));
            }
            TypeKind::Int { width, .. } => {
                let v = node.value.as_int().ok_or_else(|| self.mismatch("int", h))?;
                self.put_int(w, off, width, v);
            }
            TypeKind::Float { width } => {
                let v = node.value.as_float().ok_or_else(|| self.mismatch("float", h))?;
                let mut patch = w.at(off as usize);
                match width {
                    FloatWidth::F16 => patch.write_u16(f64_to_half(v)),
                    FloatWidth::F32 => patch.write_f32(v as f32),
                    FloatWidth::F64 => patch.write_f64(v),
                }
            }
            TypeKind::String => match &node.value {
                Value::String(None) => {}
                Value::String(Some(text)) => deferred.push_back(Deferred::Str {
                    slot: off,
                    text: text.clone(),
                }),
                _ => return Err(self.mismatch("string", h)),
            },
            TypeKind::Pointer => match &node.value {
                Value::Pointer(None) => {}
                Value::Pointer(Some(target)) => out.pointers.push((off, *target)),
                _ => return Err(self.mismatch("pointer", h)),
            },
            TypeKind::Class => {
                let fields = match &node.value {
                    Value::Class(fields) => fields,
                    _ => return Err(self.mismatch("class", h)),
                };
                for member in self.types.all_members(concrete)? {
                    let child = fields
                        .iter()
                        .find(|(name, _)| name == &member.name)
                        .map(|(_, c)| *c)
                        .ok_or_else(|| HkxError::MissingMember {
                            class: ty.name.clone(),
                            member: member.name.clone(),
                        })?;
                    self.put_value(w, off + member.offset, member.type_index, child, deferred, out)?;
                }
            }
            TypeKind::Array => {
                let elements = node
                    .value
                    .as_elements()
                    .ok_or_else(|| self.mismatch("array", h))?;
                let len = elements.len() as u32;
                self.put_int(w, off + self.pointer_size, IntWidth::W32, i64::from(len));
                if ty.byte_size == self.pointer_size + 8 {
                    // hkArray capacity-and-flags: owned storage marker.
                    self.put_int(
                        w,
                        off + self.pointer_size + 4,
                        IntWidth::W32,
                        i64::from(len | 0x8000_0000),
                    );
                }
                if len > 0 {
                    deferred.push_back(Deferred::Payload { slot: off, array: h });
                }
            }
            TypeKind::Tuple { count } => {
                let elements = node
                    .value
                    .as_elements()
                    .ok_or_else(|| self.mismatch("tuple", h))?;
                if elements.len() != count as usize {
                    return Err(HkxError::TypeMismatch {
                        expected: format!("{} tuple element(s)", count),
                        got: format!("{}", elements.len()),
                    });
                }
                let elem = self.types.pointee(concrete, false)?;
                self.put_elements(w, off, elem, elements, deferred, out)?;
            }
        }
        Ok(())
    }

    fn put_elements(
        &self,
        w: &mut Writer,
        base: u32,
        elem: TypeIndex,
        elements: &Elements,
        deferred: &mut VecDeque<Deferred>,
        out: &mut EntryOut,
    ) -> Result<()> {
        let concrete = self.types.concrete(elem)?;
        let et = self.types.get(concrete)?;
        let stride = et.byte_size.max(1);
        match elements {
            Elements::Nodes(nodes) => {
                for (i, &h) in nodes.iter().enumerate() {
                    self.put_value(w, base + i as u32 * stride, elem, h, deferred, out)?;
                }
            }
            Elements::Ints(values) => match et.kind {
                TypeKind::Bool => {
                    for (i, &v) in values.iter().enumerate() {
                        w.at((base + i as u32 * stride) as usize)
                            .write_u8(u8::from(v != 0));
                    }
                }
                TypeKind::Int { width, .. } => {
                    for (i, &v) in values.iter().enumerate() {
                        self.put_int(w, base + i as u32 * stride, width, v);
                    }
                }
                _ => {
                    return Err(HkxError::TypeMismatch {
                        expected: et.name.clone(),
                        got: "flattened int elements".into(),
                    })
                }
            },
            Elements::Floats(values) => match et.kind {
                TypeKind::Float { width } => {
                    for (i, &v) in values.iter().enumerate() {
                        let mut patch = w.at((base + i as u32 * stride) as usize);
                        match width {
                            FloatWidth::F16 => patch.write_u16(f64_to_half(v)),
                            FloatWidth::F32 => patch.write_f32(v as f32),
                            FloatWidth::F64 => patch.write_f64(v),
                        }
                    }
                }
                _ => {
                    return Err(HkxError::TypeMismatch {
                        expected: et.name.clone(),
                        got: "flattened float elements".into(),
                    })
                }
            },
        }
        Ok(())
    }

    fn encode_entry(&self, h: NodeHandle) -> Result<EntryOut> {
        let node = self.arena.get(h)?;
        let concrete = self.types.concrete(node.type_index)?;
        let ty = self.types.get(concrete)?;

        let mut w = Writer::new();
        w.set_big_endian(self.big_endian);
        w.reserve(ty.byte_size as usize);
        let mut out = EntryOut {
            type_index: concrete,
            bytes: Vec::new(),
            child: Vec::new(),
            pointers: Vec::new(),
        };
        let mut deferred = VecDeque::new();
        self.put_value(&mut w, 0, concrete, h, &mut deferred, &mut out)?;

        while let Some(item) = deferred.pop_front() {
            match item {
                Deferred::Str { slot, text } => {
                    out.child.push((slot, w.offset() as u32));
                    w.write_cstr(&text);
                }
                Deferred::Payload { slot, array } => {
                    let array_node = self.arena.get(array)?;
                    let ac = self.types.concrete(array_node.type_index)?;
                    let elem = self.types.pointee(ac, false)?;
                    let et = self.types.get(self.types.concrete(elem)?)?;
                    w.align(et.alignment.max(1) as usize, 0);
                    let pos = w.offset() as u32;
                    out.child.push((slot, pos));
                    let elements = array_node
                        .value
                        .as_elements()
                        .ok_or_else(|| self.mismatch("array", array))?;
                    w.reserve(elements.len() * et.byte_size.max(1) as usize);
                    self.put_elements(&mut w, pos, elem, elements, &mut deferred, &mut out)?;
                }
            }
        }
        out.bytes = w.into_bytes();
        Ok(out)
    }
}

/// Append one section: data, then the five fixup tables, each terminated
/// and padded. Returns the filled header.
fn write_section(
    w: &mut Writer,
    tag: &str,
    data: &[u8],
    child: &[(u32, u32)],
    pointers: &[EntryPointer],
    specs: &[EntrySpec],
) -> SectionHeader {
    w.align(16, 0xFF);
    let start = w.offset() as u32;
    w.write_bytes(data);
    w.align(16, 0xFF);

    let child_off = w.offset() as u32 - start;
    for &(src, dst) in child {
        w.write_u32(src);
        w.write_u32(dst);
    }
    finish_table(w);
    let entry_off = w.offset() as u32 - start;
    for p in pointers {
        w.write_u32(p.src);
        w.write_u32(p.dst_section);
        w.write_u32(p.dst_offset);
    }
    finish_table(w);
    let spec_off = w.offset() as u32 - start;
    for s in specs {
        w.write_u32(s.offset);
        w.write_u32(s.name_section);
        w.write_u32(s.name_offset);
    }
    finish_table(w);
    let exports_off = w.offset() as u32 - start;
    finish_table(w);
    let imports_off = w.offset() as u32 - start;
    finish_table(w);
    let end = w.offset() as u32 - start;

    SectionHeader {
        tag: tag.into(),
        absolute_start: start,
        child_pointers: child_off,
        entry_pointers: entry_off,
        entry_specs: spec_off,
        exports: exports_off,
        imports: imports_off,
        end,
    }
}

/// Encode a graph as a packfile.
pub fn pack(
    arena: &NodeArena,
    root: NodeHandle,
    types: &TypeTable,
    header: &PackfileHeader,
) -> Result<Vec<u8>> {
    let root_concrete = types.concrete(arena.get(root)?.type_index)?;
    let root_name = &types.get(root_concrete)?.name;
    if root_name.as_str() != ROOT_CONTAINER {
        return Err(HkxError::TypeMismatch {
            expected: ROOT_CONTAINER.into(),
            got: root_name.clone(),
        });
    }

    let order = object_order(arena, root)?;
    let entry_index: HashMap<NodeHandle, usize> =
        order.iter().enumerate().map(|(i, &h)| (h, i)).collect();

    let encoder = Encoder {
        arena,
        types,
        pointer_size: header.pointer_size,
        big_endian: header.big_endian,
    };
    let entries = order
        .iter()
        .map(|&h| encoder.encode_entry(h))
        .collect::<Result<Vec<_>>>()?;

    let type_section = if header.embed_types {
        Some(typesec::write(types, header.big_endian, header.pointer_size)?)
    } else {
        None
    };

    // Class-name section: reflection metadata names first (when a type
    // section is present), then data entry classes in first-use order.
    let mut name_order: Vec<(String, u32)> = Vec::new();
    let mut listed: HashSet<String> = HashSet::new();
    if type_section.is_some() {
        for name in META_CLASS_NAMES {
            name_order.push((name.to_string(), 0));
            listed.insert(name.to_string());
        }
    }
    for e in &entries {
        let ty = types.get(e.type_index)?;
        if listed.insert(ty.name.clone()) {
            name_order.push((ty.name.clone(), ty.signature.unwrap_or(0)));
        }
    }
    let mut cn = Writer::new();
    cn.set_big_endian(header.big_endian);
    let mut name_offsets: HashMap<String, u32> = HashMap::new();
    for (name, signature) in &name_order {
        cn.write_u32(*signature);
        cn.write_u8(0x09);
        name_offsets.insert(name.clone(), cn.offset() as u32);
        cn.write_cstr(name);
    }
    cn.align(16, 0xFF);
    let classnames = cn.into_bytes();
    let name_offset = |name: &str| -> Result<u32> {
        name_offsets
            .get(name)
            .copied()
            .ok_or_else(|| HkxError::UnknownPrimitive(name.to_string()))
    };

    // Data section body plus section-local fixups.
    let mut dw = Writer::new();
    dw.set_big_endian(header.big_endian);
    let mut starts = Vec::with_capacity(entries.len());
    for e in &entries {
        dw.align(16, 0xFF);
        starts.push(dw.offset() as u32);
        dw.write_bytes(&e.bytes);
    }
    dw.align(16, 0xFF);
    let mut data_child = Vec::new();
    let mut data_pointers = Vec::new();
    let mut data_specs = Vec::new();
    for (i, e) in entries.iter().enumerate() {
        for &(src, dst) in &e.child {
            data_child.push((starts[i] + src, starts[i] + dst));
        }
        for &(src, target) in &e.pointers {
            let target_entry = entry_index.get(&target).ok_or_else(|| {
                // Every pointer target is in `order` by construction.
                HkxError::UnresolvedPointer {
                    section: DATA_SECTION,
                    offset: starts[i] + src,
                }
            })?;
            data_pointers.push(EntryPointer {
                src: starts[i] + src,
                dst_section: DATA_SECTION as u32,
                dst_offset: starts[*target_entry],
            });
        }
        data_specs.push(EntrySpec {
            offset: starts[i],
            name_section: 0,
            name_offset: name_offset(&types.get(e.type_index)?.name)?,
        });
    }

    // Assemble the file.
    let mut w = Writer::new();
    header.write(&mut w);
    let headers_pos = w.offset();
    w.reserve(SECTION_TAGS.len() * 48);

    let cn_header = write_section(&mut w, SECTION_TAGS[0], &classnames, &[], &[], &[]);
    let ts_header = match &type_section {
        Some(ts) => {
            let mut specs = ts.entry_specs.clone();
            for (spec, entry_name) in specs.iter_mut().zip(ts.entry_names.iter()) {
                spec.name_offset = name_offset(entry_name)?;
            }
            let child: Vec<(u32, u32)> =
                ts.child_pointers.iter().map(|c| (c.src, c.dst)).collect();
            write_section(
                &mut w,
                SECTION_TAGS[1],
                &ts.data,
                &child,
                &ts.entry_pointers,
                &specs,
            )
        }
        None => write_section(&mut w, SECTION_TAGS[1], &[], &[], &[], &[]),
    };
    let data_header = write_section(
        &mut w,
        SECTION_TAGS[2],
        dw.as_bytes(),
        &data_child,
        &data_pointers,
        &data_specs,
    );

    {
        let mut patch = w.at(headers_pos);
        cn_header.write(&mut patch);
        ts_header.write(&mut patch);
        data_header.write(&mut patch);
    }

    log::debug!(
        "[PACKFILE] packed {} object(s) into {} bytes ({} schema entries)",
        entries.len(),
        w.len(),
        type_section.as_ref().map_or(0, |t| t.entry_specs.len())
    );
    Ok(w.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Value;

    #[test]
    fn test_object_order_is_depth_first() {
        let mut arena = NodeArena::new();
        let c = arena.alloc(TypeIndex(1), Value::Class(vec![]));
        let b_ptr_c = arena.alloc(TypeIndex(2), Value::Pointer(Some(c)));
        let b = arena.alloc(TypeIndex(1), Value::Class(vec![("next".into(), b_ptr_c)]));
        let d = arena.alloc(TypeIndex(1), Value::Class(vec![]));
        let p_b = arena.alloc(TypeIndex(2), Value::Pointer(Some(b)));
        let p_d = arena.alloc(TypeIndex(2), Value::Pointer(Some(d)));
        let root = arena.alloc(
            TypeIndex(1),
            Value::Class(vec![("first".into(), p_b), ("second".into(), p_d)]),
        );

        // Depth-first: b's subtree (including c) comes before d.
        let order = object_order(&arena, root).expect("order");
        assert_eq!(order, vec![root, b, c, d]);
    }

    #[test]
    fn test_object_order_handles_shared_and_cyclic() {
        let mut arena = NodeArena::new();
        let p_back = arena.alloc(TypeIndex(2), Value::Pointer(None));
        let a = arena.alloc(TypeIndex(1), Value::Class(vec![("back".into(), p_back)]));
        let p_a1 = arena.alloc(TypeIndex(2), Value::Pointer(Some(a)));
        let p_a2 = arena.alloc(TypeIndex(2), Value::Pointer(Some(a)));
        let root = arena.alloc(
            TypeIndex(1),
            Value::Class(vec![("x".into(), p_a1), ("y".into(), p_a2)]),
        );
        arena.get_mut(p_back).expect("node").value = Value::Pointer(Some(root));

        let order = object_order(&arena, root).expect("order");
        assert_eq!(order, vec![root, a]);
    }

    #[test]
    fn test_pack_rejects_wrong_root() {
        let mut builder = crate::schema::SchemaBuilder::new(8);
        let cls = builder
            .class("hkaSkeleton", TypeIndex::NONE, 1, &[])
            .expect("class");
        let types = builder.into_table();
        let mut arena = NodeArena::new();
        let root = arena.alloc(cls, Value::Class(vec![]));
        let header = PackfileHeader::new(super::super::header::FormatVersion::V8, 8, "hk_2010.2.0-r1");
        assert!(matches!(
            pack(&arena, root, &types, &header),
            Err(HkxError::TypeMismatch { .. })
        ));
    }
}
