// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tagfile encoding: node graph to chunk tree.
//!
//! Encoding runs in three phases over the same deterministic traversal:
//! item creation (breadth-first over objects, one item per reference
//! slot except objects, which dedup on handle), payload layout, then
//! image emission. Because item order and layout are functions of graph
//! structure alone, decode followed by re-encode reproduces the original
//! bytes.
//!
//! The graph is minimized before layout; a tagfile never carries schema
//! entries its data does not reach.

use super::chunk::Chunk;
use super::read::{TagfileHeader, ARRAY_FLAG, OBJECT_FLAG};
use super::typesec;
use crate::error::{HkxError, Result};
use crate::graph::{Elements, NodeArena, NodeHandle, Value};
use crate::reconcile::minimize;
use crate::schema::{
    builtin::ROOT_CONTAINER,
    kind::{f64_to_half, FloatWidth, IntWidth, TypeKind},
    TypeIndex, TypeTable,
};
use crate::ser::Writer;
use std::collections::{BTreeMap, HashMap};

/// Payload layout strategy.
///
/// Both orders decode identically; `Empirical` matches files produced by
/// the reference toolchain (per breadth level: element runs, then string
/// bytes, then object images), `Creation` streams payloads in item order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackOrder {
    #[default]
    Empirical,
    Creation,
}

/// What a reference slot points at, discovered during the scan phase and
/// consumed again, in the same order, during emission.
enum SlotRef {
    Object(NodeHandle),
    Array(NodeHandle),
    Text(Vec<u8>),
}

enum Source {
    Null,
    Object(NodeHandle),
    Array(NodeHandle),
    Text(Vec<u8>),
}

struct ItemOut {
    type_index: TypeIndex,
    flags: u32,
    count: u32,
    offset: u32,
    alignment: u32,
    byte_len: u32,
    source: Source,
    /// Slot targets in traversal order; `slot_items` parallels it after
    /// the creation pass assigns indices.
    refs: Vec<SlotRef>,
    slot_items: Vec<u32>,
}

impl ItemOut {
    fn null() -> Self {
        ItemOut {
            type_index: TypeIndex::NONE,
            flags: 0,
            count: 0,
            offset: 0,
            alignment: 1,
            byte_len: 0,
            source: Source::Null,
            refs: Vec::new(),
            slot_items: Vec::new(),
        }
    }
}

/// Item indices created at one breadth level, grouped for the layout pass.
#[derive(Default)]
struct Level {
    arrays: Vec<usize>,
    texts: Vec<usize>,
    objects: Vec<usize>,
}

/// Cursor over a slot-index list; emission consumes exactly the slots the
/// scan recorded.
struct SlotCursor<'a> {
    items: &'a [u32],
    pos: usize,
}

impl SlotCursor<'_> {
    fn next(&mut self) -> Result<u32> {
        let idx = self.items.get(self.pos).copied().ok_or_else(|| {
            HkxError::MalformedSection("slot bookkeeping out of step".into())
        })?;
        self.pos += 1;
        Ok(idx)
    }
}

struct Encoder<'a> {
    arena: &'a NodeArena,
    types: &'a TypeTable,
    pointer_size: u32,
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

    fn member_child(
        &self,
        class_name: &str,
        fields: &[(String, NodeHandle)],
        member: &str,
    ) -> Result<NodeHandle> {
        fields
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, c)| *c)
            .ok_or_else(|| HkxError::MissingMember {
                class: class_name.to_string(),
                member: member.to_string(),
            })
    }

    // ------------------------------------------------------------------
    // Scan phase: record reference slots in traversal order.
    // ------------------------------------------------------------------

    fn scan_value(&self, ti: TypeIndex, h: NodeHandle, refs: &mut Vec<SlotRef>) -> Result<()> {
        let concrete = self.types.concrete(ti)?;
        let ty = self.types.get(concrete)?;
        let node = self.arena.get(h)?;
        match ty.kind {
            TypeKind::Void | TypeKind::Bool | TypeKind::Int { .. } | TypeKind::Float { .. } => {}
            TypeKind::Invalid => {
                return Err(HkxError::TypeMismatch {
                    expected: "concrete value type".into(),
                    got: ty.name.clone(),
                })
            }
            TypeKind::String => match &node.value {
                Value::String(None) => {}
                Value::String(Some(text)) => {
                    let mut bytes = text.clone().into_bytes();
                    bytes.push(0);
                    refs.push(SlotRef::Text(bytes));
                }
                _ => return Err(self.mismatch("string", h)),
            },
            TypeKind::Pointer => match &node.value {
                Value::Pointer(None) => {}
                Value::Pointer(Some(target)) => refs.push(SlotRef::Object(*target)),
                _ => return Err(self.mismatch("pointer", h)),
            },
            TypeKind::Class => {
                let fields = match &node.value {
                    Value::Class(fields) => fields,
                    _ => return Err(self.mismatch("class", h)),
                };
                for member in self.types.all_members(concrete)? {
                    let child = self.member_child(&ty.name, fields, &member.name)?;
                    self.scan_value(member.type_index, child, refs)?;
                }
            }
            TypeKind::Array => {
                let elements = node
                    .value
                    .as_elements()
                    .ok_or_else(|| self.mismatch("array", h))?;
                if !elements.is_empty() {
                    refs.push(SlotRef::Array(h));
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
                self.scan_elements(elem, elements, refs)?;
            }
        }
        Ok(())
    }

    fn scan_elements(&self, elem: TypeIndex, elements: &Elements, refs: &mut Vec<SlotRef>) -> Result<()> {
        if let Elements::Nodes(nodes) = elements {
            for &h in nodes {
                self.scan_value(elem, h, refs)?;
            }
        }
        Ok(())
    }

    fn scan_item(&self, item: &ItemOut) -> Result<Vec<SlotRef>> {
        let mut refs = Vec::new();
        match &item.source {
            Source::Object(h) => {
                self.scan_value(item.type_index, *h, &mut refs)?;
            }
            Source::Array(h) => {
                let node = self.arena.get(*h)?;
                let ac = self.types.concrete(node.type_index)?;
                let elem = self.types.pointee(ac, false)?;
                let elements = node
                    .value
                    .as_elements()
                    .ok_or_else(|| self.mismatch("array", *h))?;
                self.scan_elements(elem, elements, &mut refs)?;
            }
            Source::Null | Source::Text(_) => {}
        }
        Ok(refs)
    }

    // ------------------------------------------------------------------
    // Emit phase: write images, consuming slot indices in scan order.
    // ------------------------------------------------------------------

    fn put_slot(&self, w: &mut Writer, off: u32, idx: u32) {
        let mut patch = w.at(off as usize);
        if self.pointer_size == 8 {
            patch.write_u64(u64::from(idx));
        } else {
            patch.write_u32(idx);
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

    #[allow(clippy::too_many_arguments)]
    fn put_value(
        &self,
        w: &mut Writer,
        off: u32,
        ti: TypeIndex,
        h: NodeHandle,
        cursor: &mut SlotCursor<'_>,
        slots: &mut Vec<(u32, u32)>,
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
                Value::String(Some(_)) => {
                    let idx = cursor.next()?;
                    self.put_slot(w, off, idx);
                    slots.push((concrete.0, off));
                }
                _ => return Err(self.mismatch("string", h)),
            },
            TypeKind::Pointer => match &node.value {
                Value::Pointer(None) => {}
                Value::Pointer(Some(_)) => {
                    let idx = cursor.next()?;
                    self.put_slot(w, off, idx);
                    slots.push((concrete.0, off));
                }
                _ => return Err(self.mismatch("pointer", h)),
            },
            TypeKind::Class => {
                let fields = match &node.value {
                    Value::Class(fields) => fields,
                    _ => return Err(self.mismatch("class", h)),
                };
                for member in self.types.all_members(concrete)? {
                    let child = self.member_child(&ty.name, fields, &member.name)?;
                    self.put_value(w, off + member.offset, member.type_index, child, cursor, slots)?;
                }
            }
            TypeKind::Array => {
                let elements = node
                    .value
                    .as_elements()
                    .ok_or_else(|| self.mismatch("array", h))?;
                let len = elements.len() as u32;
                if len > 0 {
                    let idx = cursor.next()?;
                    self.put_slot(w, off, idx);
                    slots.push((concrete.0, off));
                }
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
            }
            TypeKind::Tuple { .. } => {
                let elements = node
                    .value
                    .as_elements()
                    .ok_or_else(|| self.mismatch("tuple", h))?;
                let elem = self.types.pointee(concrete, false)?;
                self.put_elements(w, off, elem, elements, cursor, slots)?;
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
        cursor: &mut SlotCursor<'_>,
        slots: &mut Vec<(u32, u32)>,
    ) -> Result<()> {
        let concrete = self.types.concrete(elem)?;
        let et = self.types.get(concrete)?;
        let stride = et.byte_size.max(1);
        match elements {
            Elements::Nodes(nodes) => {
                for (i, &h) in nodes.iter().enumerate() {
                    self.put_value(w, base + i as u32 * stride, elem, h, cursor, slots)?;
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

    // ------------------------------------------------------------------
    // Item construction helpers.
    // ------------------------------------------------------------------

    fn object_item(&self, h: NodeHandle) -> Result<ItemOut> {
        let concrete = self.types.concrete(self.arena.get(h)?.type_index)?;
        let ty = self.types.get(concrete)?;
        Ok(ItemOut {
            type_index: concrete,
            flags: OBJECT_FLAG,
            count: 1,
            offset: 0,
            alignment: ty.alignment.max(1),
            byte_len: ty.byte_size,
            source: Source::Object(h),
            refs: Vec::new(),
            slot_items: Vec::new(),
        })
    }

    fn array_item(&self, h: NodeHandle) -> Result<ItemOut> {
        let node = self.arena.get(h)?;
        let ac = self.types.concrete(node.type_index)?;
        let elem = self.types.pointee(ac, true)?;
        let et = self.types.get(elem)?;
        let count = node
            .value
            .as_elements()
            .ok_or_else(|| self.mismatch("array", h))?
            .len() as u32;
        Ok(ItemOut {
            type_index: elem,
            flags: ARRAY_FLAG,
            count,
            offset: 0,
            alignment: et.alignment.max(1),
            byte_len: count * et.byte_size.max(1),
            source: Source::Array(h),
            refs: Vec::new(),
            slot_items: Vec::new(),
        })
    }

    fn text_item(&self, bytes: Vec<u8>) -> ItemOut {
        let count = bytes.len() as u32;
        ItemOut {
            type_index: TypeIndex::NONE,
            flags: ARRAY_FLAG,
            count,
            offset: 0,
            alignment: 1,
            byte_len: count,
            source: Source::Text(bytes),
            refs: Vec::new(),
            slot_items: Vec::new(),
        }
    }
}

/// Encode a graph as a tagfile.
pub fn pack(
    arena: &NodeArena,
    root: NodeHandle,
    types: &TypeTable,
    header: &TagfileHeader,
    order: PackOrder,
) -> Result<Vec<u8>> {
    if header.pointer_size != 4 && header.pointer_size != 8 {
        return Err(HkxError::MalformedHeader(format!(
            "unsupported pointer width {}",
            header.pointer_size
        )));
    }
    let (arena, root, types) = minimize(arena, root, types)?;

    let root_concrete = types.concrete(arena.get(root)?.type_index)?;
    let root_name = &types.get(root_concrete)?.name;
    if root_name.as_str() != ROOT_CONTAINER {
        return Err(HkxError::TypeMismatch {
            expected: ROOT_CONTAINER.into(),
            got: root_name.clone(),
        });
    }

    let encoder = Encoder {
        arena: &arena,
        types: &types,
        pointer_size: header.pointer_size,
    };

    // Phase 1: item creation, breadth-first from the root. Objects dedup
    // on handle; every array/string slot gets its own item.
    let mut items: Vec<ItemOut> = vec![ItemOut::null()];
    let mut object_item: HashMap<NodeHandle, u32> = HashMap::new();
    items.push(encoder.object_item(root)?);
    object_item.insert(root, 1);
    let mut levels = vec![Level {
        arrays: Vec::new(),
        texts: Vec::new(),
        objects: vec![1],
    }];
    let mut frontier: Vec<usize> = vec![1];

    while !frontier.is_empty() {
        for &i in &frontier {
            let refs = encoder.scan_item(&items[i])?;
            items[i].refs = refs;
        }
        let mut level = Level::default();
        let mut next = Vec::new();

        // Creation order within a level: objects, arrays, texts.
        for &i in &frontier {
            let targets: Vec<NodeHandle> = items[i]
                .refs
                .iter()
                .filter_map(|r| match r {
                    SlotRef::Object(h) => Some(*h),
                    _ => None,
                })
                .collect();
            for h in targets {
                if !object_item.contains_key(&h) {
                    let idx = items.len();
                    let item = encoder.object_item(h)?;
                    object_item.insert(h, idx as u32);
                    items.push(item);
                    level.objects.push(idx);
                    next.push(idx);
                }
            }
        }
        for &i in &frontier {
            let refs = std::mem::take(&mut items[i].refs);
            let mut assigned = Vec::with_capacity(refs.len());
            for r in refs {
                let idx = match r {
                    SlotRef::Object(h) => {
                        object_item.get(&h).copied().ok_or_else(|| {
                            HkxError::MalformedSection("slot bookkeeping out of step".into())
                        })?
                    }
                    SlotRef::Array(h) => {
                        let idx = items.len();
                        let item = encoder.array_item(h)?;
                        items.push(item);
                        level.arrays.push(idx);
                        next.push(idx);
                        idx as u32
                    }
                    SlotRef::Text(bytes) => {
                        let idx = items.len();
                        let item = encoder.text_item(bytes);
                        items.push(item);
                        level.texts.push(idx);
                        idx as u32
                    }
                };
                assigned.push(idx);
            }
            items[i].slot_items = assigned;
        }
        if !(level.objects.is_empty() && level.arrays.is_empty() && level.texts.is_empty()) {
            levels.push(level);
        }
        frontier = next;
    }

    // Phase 2: payload layout.
    let layout: Vec<usize> = match order {
        PackOrder::Creation => (1..items.len()).collect(),
        PackOrder::Empirical => levels
            .iter()
            .flat_map(|l| {
                l.arrays
                    .iter()
                    .chain(l.texts.iter())
                    .chain(l.objects.iter())
                    .copied()
            })
            .collect(),
    };
    let mut end = 0u32;
    for &i in &layout {
        let align = items[i].alignment;
        let offset = (end + align - 1) & !(align - 1);
        items[i].offset = offset;
        end = offset + items[i].byte_len;
    }

    // Phase 3: image emission.
    let mut dw = Writer::new();
    dw.reserve(end as usize);
    let mut slots: Vec<(u32, u32)> = Vec::new();
    for &i in &layout {
        let slot_items = std::mem::take(&mut items[i].slot_items);
        let mut cursor = SlotCursor {
            items: &slot_items,
            pos: 0,
        };
        let item = &items[i];
        match &item.source {
            Source::Object(h) => {
                encoder.put_value(&mut dw, item.offset, item.type_index, *h, &mut cursor, &mut slots)?;
            }
            Source::Array(h) => {
                let node = arena.get(*h)?;
                let ac = types.concrete(node.type_index)?;
                let elem = types.pointee(ac, false)?;
                let elements = node
                    .value
                    .as_elements()
                    .ok_or_else(|| encoder.mismatch("array", *h))?;
                encoder.put_elements(&mut dw, item.offset, elem, elements, &mut cursor, &mut slots)?;
            }
            Source::Text(bytes) => {
                dw.at(item.offset as usize).write_bytes(bytes);
            }
            Source::Null => {}
        }
        if cursor.pos != slot_items.len() {
            return Err(HkxError::MalformedSection("slot bookkeeping out of step".into()));
        }
    }

    // Item table.
    let mut iw = Writer::new();
    for item in &items {
        iw.write_u32(item.type_index.0 | item.flags);
        iw.write_u32(item.offset);
        iw.write_u32(item.count);
    }

    // Patch table: reference slots grouped by slot type, offsets ascending.
    let mut groups: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for (ti, off) in slots {
        groups.entry(ti).or_default().push(off);
    }
    let mut pw = Writer::new();
    for (ti, mut offsets) in groups {
        offsets.sort_unstable();
        pw.write_u32(ti);
        pw.write_u32(offsets.len() as u32);
        for off in offsets {
            pw.write_u32(off);
        }
    }

    let mut sdkv = Writer::new();
    sdkv.write_bytes(header.sdk_version.as_bytes());

    let tag0 = Chunk::container(
        "TAG0",
        vec![
            Chunk::leaf("SDKV", sdkv.into_bytes()),
            Chunk::leaf("DATA", dw.into_bytes()),
            typesec::encode(&types, header.pointer_size)?,
            Chunk::container(
                "INDX",
                vec![
                    Chunk::leaf("ITEM", iw.into_bytes()),
                    Chunk::leaf("PTCH", pw.into_bytes()),
                ],
            ),
        ],
    );

    log::debug!(
        "[TAGFILE] packed {} item(s) into {} data byte(s), {} type(s)",
        items.len() - 1,
        end,
        types.len()
    );
    Ok(tag0.to_bytes())
}
