// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tagfile decoding: chunk tree to node graph.
//!
//! All indirection goes through the item table: pointer, string and
//! array slots in the data image hold 1-based item indices (0 is null),
//! and each item carries its payload's offset and count. Objects decode
//! at most once through a work queue keyed on item index. The `PTCH`
//! chunk duplicates information already in the slots and is ignored;
//! encode recomputes it.

use super::chunk::Chunk;
use super::typesec;
use crate::error::{HkxError, Result};
use crate::graph::{Elements, NodeArena, NodeHandle, Value};
use crate::schema::{
    builtin::ROOT_CONTAINER,
    kind::{half_to_f64, FloatWidth, IntWidth, TypeKind},
    TypeIndex, TypeTable,
};
use crate::ser::Reader;
use std::collections::{HashMap, VecDeque};

/// Item flag: the payload is an object image.
pub(super) const OBJECT_FLAG: u32 = 0x1000_0000;
/// Item flag: the payload is an element run (arrays, string bytes).
pub(super) const ARRAY_FLAG: u32 = 0x2000_0000;
const TYPE_MASK: u32 = 0x0FFF_FFFF;

/// Tagfile metadata carried across decode and re-encode.
#[derive(Debug, Clone, PartialEq)]
pub struct TagfileHeader {
    /// SDK version string, e.g. `20160100`.
    pub sdk_version: String,
    pub pointer_size: u32,
}

impl TagfileHeader {
    pub fn new(sdk_version: impl Into<String>) -> Self {
        Self {
            sdk_version: sdk_version.into(),
            pointer_size: 8,
        }
    }
}

/// A fully decoded tagfile.
pub struct Unpacked {
    pub arena: NodeArena,
    pub root: NodeHandle,
    pub types: TypeTable,
    pub header: TagfileHeader,
}

/// Container probe: a tagfile opens with a `TAG0` chunk.
pub fn is_tagfile(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && &bytes[4..8] == b"TAG0"
}

#[derive(Debug, Clone, Copy)]
pub(super) struct Item {
    pub type_index: TypeIndex,
    pub flags: u32,
    pub offset: u32,
    pub count: u32,
}

impl Item {
    pub fn is_object(&self) -> bool {
        self.flags & OBJECT_FLAG != 0
    }

    pub fn is_array(&self) -> bool {
        self.flags & ARRAY_FLAG != 0
    }
}

fn parse_items(payload: &[u8], table_len: usize) -> Result<Vec<Item>> {
    if payload.len() % 12 != 0 {
        return Err(HkxError::MalformedSection(format!(
            "item table length {} is not a whole number of records",
            payload.len()
        )));
    }
    let mut r = Reader::new(payload);
    let mut items = Vec::with_capacity(payload.len() / 12);
    while !r.is_eof() {
        let word = r.read_u32().map_err(HkxError::from)?;
        let offset = r.read_u32().map_err(HkxError::from)?;
        let count = r.read_u32().map_err(HkxError::from)?;
        let raw_type = word & TYPE_MASK;
        if raw_type as usize >= table_len {
            return Err(HkxError::OutOfRange {
                index: raw_type as usize,
                len: table_len,
            });
        }
        items.push(Item {
            type_index: TypeIndex(raw_type),
            flags: word & !TYPE_MASK,
            offset,
            count,
        });
    }
    match items.first() {
        Some(first) if first.flags == 0 && first.offset == 0 && first.count == 0 => {}
        _ => {
            return Err(HkxError::MalformedSection(
                "item table does not open with the null record".into(),
            ))
        }
    }
    Ok(items)
}

struct Decoder<'a> {
    data: &'a [u8],
    items: &'a [Item],
    types: &'a TypeTable,
    pointer_size: u32,
    arena: NodeArena,
    cache: HashMap<usize, NodeHandle>,
}

type WorkQueue = VecDeque<(usize, NodeHandle)>;

impl Decoder<'_> {
    fn reader_at(&self, off: u32) -> Result<Reader<'_>> {
        let mut reader = Reader::new(self.data);
        reader.seek(off as usize).map_err(HkxError::from)?;
        Ok(reader)
    }

    fn item(&self, idx: u64) -> Result<&Item> {
        self.items.get(idx as usize).ok_or(HkxError::OutOfRange {
            index: idx as usize,
            len: self.items.len(),
        })
    }

    /// Item index stored in a reference slot; width follows the file's
    /// pointer size.
    fn slot(&self, off: u32) -> Result<u64> {
        let mut r = self.reader_at(off)?;
        Ok(if self.pointer_size == 8 {
            r.read_u64().map_err(HkxError::from)?
        } else {
            u64::from(r.read_u32().map_err(HkxError::from)?)
        })
    }

    /// Handle for the object behind an item, decoding it at most once.
    fn object(&mut self, idx: u64, queue: &mut WorkQueue) -> Result<NodeHandle> {
        if let Some(&handle) = self.cache.get(&(idx as usize)) {
            return Ok(handle);
        }
        let item = *self.item(idx)?;
        if !item.is_object() {
            return Err(HkxError::InvalidPointerTarget {
                offset: item.offset,
                reason: format!("item {} is not an object", idx),
            });
        }
        let handle = self.arena.alloc(item.type_index, Value::Class(Vec::new()));
        self.cache.insert(idx as usize, handle);
        queue.push_back((idx as usize, handle));
        Ok(handle)
    }

    fn run(&mut self) -> Result<NodeHandle> {
        let mut queue = WorkQueue::new();
        let root = self.object(1, &mut queue)?;
        while let Some((idx, handle)) = queue.pop_front() {
            let item = self.items[idx];
            let ti = self.arena.get(handle)?.type_index;
            let value = self.decode_class(item.offset, ti, &mut queue)?;
            self.arena.get_mut(handle)?.value = value;
        }
        Ok(root)
    }

    fn decode_class(&mut self, base: u32, ti: TypeIndex, queue: &mut WorkQueue) -> Result<Value> {
        let members = self.types.all_members(ti)?;
        let mut fields = Vec::with_capacity(members.len());
        for member in members {
            let handle = self.decode_value(base + member.offset, member.type_index, queue)?;
            fields.push((member.name.clone(), handle));
        }
        Ok(Value::Class(fields))
    }

    fn read_int(&self, off: u32, signed: bool, width: IntWidth) -> Result<i64> {
        let mut r = self.reader_at(off)?;
        Ok(match (signed, width) {
            (true, IntWidth::W8) => i64::from(r.read_i8().map_err(HkxError::from)?),
            (false, IntWidth::W8) => i64::from(r.read_u8().map_err(HkxError::from)?),
            (true, IntWidth::W16) => i64::from(r.read_i16().map_err(HkxError::from)?),
            (false, IntWidth::W16) => i64::from(r.read_u16().map_err(HkxError::from)?),
            (true, IntWidth::W32) => i64::from(r.read_i32().map_err(HkxError::from)?),
            (false, IntWidth::W32) => i64::from(r.read_u32().map_err(HkxError::from)?),
            (true, IntWidth::W64) => r.read_i64().map_err(HkxError::from)?,
            (false, IntWidth::W64) => r.read_u64().map_err(HkxError::from)? as i64,
        })
    }

    fn read_float(&self, off: u32, width: FloatWidth) -> Result<f64> {
        let mut r = self.reader_at(off)?;
        Ok(match width {
            FloatWidth::F16 => half_to_f64(r.read_u16().map_err(HkxError::from)?),
            FloatWidth::F32 => f64::from(r.read_f32().map_err(HkxError::from)?),
            FloatWidth::F64 => r.read_f64().map_err(HkxError::from)?,
        })
    }

    /// Bytes of a string/array item, bounds-checked against the data image.
    fn item_bytes(&self, item: &Item) -> Result<&[u8]> {
        let mut r = self.reader_at(item.offset)?;
        r.read_bytes(item.count as usize).map_err(HkxError::from)
    }

    fn decode_value(&mut self, off: u32, ti: TypeIndex, queue: &mut WorkQueue) -> Result<NodeHandle> {
        let concrete = self.types.concrete(ti)?;
        let kind = self.types.get(concrete)?.kind;
        let value = match kind {
            TypeKind::Void => Value::Int(0),
            TypeKind::Invalid => {
                return Err(HkxError::TypeMismatch {
                    expected: "concrete value type".into(),
                    got: self.types.get(concrete)?.name.clone(),
                })
            }
            TypeKind::Bool => {
                let mut r = self.reader_at(off)?;
                Value::Bool(r.read_u8().map_err(HkxError::from)? != 0)
            }
            TypeKind::Int { signed, width } => Value::Int(self.read_int(off, signed, width)?),
            TypeKind::Float { width } => Value::Float(self.read_float(off, width)?),
            TypeKind::String => match self.slot(off)? {
                0 => Value::String(None),
                idx => {
                    let item = *self.item(idx)?;
                    if !item.is_array() {
                        return Err(HkxError::InvalidPointerTarget {
                            offset: off,
                            reason: format!("string slot references non-array item {}", idx),
                        });
                    }
                    let bytes = self.item_bytes(&item)?;
                    let text = bytes.strip_suffix(&[0]).unwrap_or(bytes);
                    Value::String(Some(String::from_utf8_lossy(text).into_owned()))
                }
            },
            TypeKind::Pointer => match self.slot(off)? {
                0 => Value::Pointer(None),
                idx => Value::Pointer(Some(self.object(idx, queue)?)),
            },
            TypeKind::Class => self.decode_class(off, concrete, queue)?,
            TypeKind::Array => {
                let elem = self.types.pointee(concrete, false)?;
                match self.slot(off)? {
                    0 => Value::Array(self.empty_elements(elem)?),
                    idx => {
                        let item = *self.item(idx)?;
                        if !item.is_array() {
                            return Err(HkxError::InvalidPointerTarget {
                                offset: off,
                                reason: format!("array slot references non-array item {}", idx),
                            });
                        }
                        Value::Array(self.decode_elements(item.offset, item.count, elem, queue)?)
                    }
                }
            }
            TypeKind::Tuple { count } => {
                let elem = self.types.pointee(concrete, false)?;
                Value::Tuple(self.decode_elements(off, count, elem, queue)?)
            }
        };
        Ok(self.arena.alloc(ti, value))
    }

    fn empty_elements(&self, elem: TypeIndex) -> Result<Elements> {
        let kind = self.types.resolved_kind(elem)?;
        Ok(if !kind.is_scalar() {
            Elements::Nodes(Vec::new())
        } else if kind.is_float() {
            Elements::Floats(Vec::new())
        } else {
            Elements::Ints(Vec::new())
        })
    }

    fn decode_elements(
        &mut self,
        base: u32,
        count: u32,
        elem: TypeIndex,
        queue: &mut WorkQueue,
    ) -> Result<Elements> {
        let concrete = self.types.concrete(elem)?;
        let et = self.types.get(concrete)?;
        let kind = et.kind;
        let stride = et.byte_size.max(1);
        Ok(match kind {
            TypeKind::Bool => {
                let mut values = Vec::with_capacity(count as usize);
                for i in 0..count {
                    let mut r = self.reader_at(base + i * stride)?;
                    values.push(i64::from(r.read_u8().map_err(HkxError::from)? != 0));
                }
                Elements::Ints(values)
            }
            TypeKind::Int { signed, width } => {
                let mut values = Vec::with_capacity(count as usize);
                for i in 0..count {
                    values.push(self.read_int(base + i * stride, signed, width)?);
                }
                Elements::Ints(values)
            }
            TypeKind::Float { width } => {
                let mut values = Vec::with_capacity(count as usize);
                for i in 0..count {
                    values.push(self.read_float(base + i * stride, width)?);
                }
                Elements::Floats(values)
            }
            _ => {
                let mut nodes = Vec::with_capacity(count as usize);
                for i in 0..count {
                    nodes.push(self.decode_value(base + i * stride, elem, queue)?);
                }
                Elements::Nodes(nodes)
            }
        })
    }
}

/// Decode a tagfile into a node graph, its schema and its header
/// metadata.
pub fn unpack(bytes: &[u8]) -> Result<Unpacked> {
    let tag0 = Chunk::parse(bytes)?;
    if tag0.tag != "TAG0" {
        return Err(HkxError::MalformedHeader(format!(
            "expected TAG0 chunk, found {}",
            tag0.tag
        )));
    }

    let sdk_version = String::from_utf8_lossy(&tag0.require("SDKV")?.payload)
        .trim_end_matches('\0')
        .to_string();
    let (types, pointer_size) = typesec::decode(tag0.require("TYPE")?)?;
    let data = &tag0.require("DATA")?.payload;

    let indx = tag0.require("INDX")?;
    let items = parse_items(&indx.require("ITEM")?.payload, types.len())?;
    if items.len() < 2 {
        return Err(HkxError::MalformedSection("item table has no root item".into()));
    }
    let root_item = &items[1];
    if !root_item.is_object() {
        return Err(HkxError::MalformedSection("root item is not an object".into()));
    }
    let root_name = types
        .get(types.concrete(root_item.type_index)?)?
        .name
        .clone();
    if root_name != ROOT_CONTAINER {
        return Err(HkxError::TypeMismatch {
            expected: ROOT_CONTAINER.into(),
            got: root_name,
        });
    }

    let mut decoder = Decoder {
        data,
        items: &items,
        types: &types,
        pointer_size,
        arena: NodeArena::new(),
        cache: HashMap::new(),
    };
    let root = decoder.run()?;
    log::debug!(
        "[TAGFILE] unpacked {} item(s), {} node(s), {} type(s)",
        items.len() - 1,
        decoder.arena.len(),
        types.len()
    );

    Ok(Unpacked {
        arena: decoder.arena,
        root,
        types,
        header: TagfileHeader {
            sdk_version,
            pointer_size,
        },
    })
}
