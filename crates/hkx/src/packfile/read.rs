// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packfile decoding: bytes to node graph.
//!
//! Objects are decoded entry by entry through an explicit work queue
//! keyed on (section, entry), so shared references collapse onto one
//! node and cycles terminate. Within an entry, values decode by the
//! schema type's resolved kind; pointer slots carry no data, their
//! targets come from the resolved fixup maps.

use super::fixups::{resolve, Section, SectionEntries};
use super::header::{
    PackfileHeader, SectionHeader, CLASSNAME_SECTION, DATA_SECTION, SECTION_TAGS, TYPE_SECTION,
};
use super::typesec;
use crate::error::{HkxError, Result};
use crate::graph::{Elements, NodeArena, NodeHandle, Value};
use crate::schema::{
    builtin::{builtin_table, ROOT_CONTAINER},
    kind::{half_to_f64, FloatWidth, IntWidth, TypeKind},
    TypeIndex, TypeTable,
};
use crate::ser::Reader;
use std::collections::{HashMap, VecDeque};

/// A fully decoded packfile.
pub struct Unpacked {
    pub arena: NodeArena,
    pub root: NodeHandle,
    pub types: TypeTable,
    pub header: PackfileHeader,
}

/// Class-name records keyed by the offset of the name text (the offset
/// virtual fixups reference).
fn parse_classnames(data: &[u8], big_endian: bool) -> Result<HashMap<u32, (String, u32)>> {
    let mut reader = Reader::new(data);
    reader.set_big_endian(big_endian);
    let mut map = HashMap::new();
    while reader.remaining() >= 5 {
        let signature = reader.read_u32().map_err(HkxError::from)?;
        let sep = reader.read_u8().map_err(HkxError::from)?;
        if sep != 0x09 {
            // 0xFF tail padding.
            break;
        }
        let name_offset = reader.offset() as u32;
        let name = reader.read_cstr().map_err(HkxError::from)?;
        map.insert(name_offset, (name, signature));
    }
    Ok(map)
}

struct Decoder<'a> {
    sections: &'a [Section],
    parts: &'a [SectionEntries],
    names: &'a HashMap<u32, (String, u32)>,
    types: &'a TypeTable,
    pointer_size: u32,
    big_endian: bool,
    arena: NodeArena,
    cache: HashMap<(usize, usize), NodeHandle>,
}

type WorkQueue = VecDeque<(usize, usize, NodeHandle)>;

impl Decoder<'_> {
    fn class_name(&self, offset: u32) -> Result<&str> {
        self.names
            .get(&offset)
            .map(|(name, _)| name.as_str())
            .ok_or_else(|| {
                HkxError::MalformedSection(format!(
                    "entry references unknown class-name offset {:#x}",
                    offset
                ))
            })
    }

    fn entry_reader(&self, si: usize, ei: usize, off: u32) -> Result<Reader<'_>> {
        let entry = &self.parts[si].entries[ei];
        let mut reader = Reader::new(&self.sections[si].data);
        reader.set_big_endian(self.big_endian);
        reader
            .seek((entry.start + off) as usize)
            .map_err(HkxError::from)?;
        Ok(reader)
    }

    /// Handle for the object at (section, entry), decoding it at most
    /// once. The node is allocated eagerly; its value is filled when the
    /// queue reaches it.
    fn object(&mut self, si: usize, ei: usize, queue: &mut WorkQueue) -> Result<NodeHandle> {
        if let Some(&handle) = self.cache.get(&(si, ei)) {
            return Ok(handle);
        }
        let name_offset = self.parts[si].entries[ei].type_name_offset;
        let name = self.class_name(name_offset)?.to_string();
        let ti = self.types.find(&name)?;
        let handle = self.arena.alloc(ti, Value::Class(Vec::new()));
        self.cache.insert((si, ei), handle);
        queue.push_back((si, ei, handle));
        Ok(handle)
    }

    fn run(&mut self, si: usize, ei: usize) -> Result<NodeHandle> {
        let mut queue = WorkQueue::new();
        let root = self.object(si, ei, &mut queue)?;
        while let Some((si, ei, handle)) = queue.pop_front() {
            let ti = self.arena.get(handle)?.type_index;
            let value = self.decode_class(si, ei, 0, ti, &mut queue)?;
            self.arena.get_mut(handle)?.value = value;
        }
        Ok(root)
    }

    fn decode_class(
        &mut self,
        si: usize,
        ei: usize,
        base: u32,
        ti: TypeIndex,
        queue: &mut WorkQueue,
    ) -> Result<Value> {
        let members = self.types.all_members(ti)?;
        let mut fields = Vec::with_capacity(members.len());
        for member in members {
            let handle = self.decode_value(si, ei, base + member.offset, member.type_index, queue)?;
            fields.push((member.name.clone(), handle));
        }
        Ok(Value::Class(fields))
    }

    fn read_int(&self, si: usize, ei: usize, off: u32, signed: bool, width: IntWidth) -> Result<i64> {
        let mut r = self.entry_reader(si, ei, off)?;
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

    fn read_float(&self, si: usize, ei: usize, off: u32, width: FloatWidth) -> Result<f64> {
        let mut r = self.entry_reader(si, ei, off)?;
        Ok(match width {
            FloatWidth::F16 => half_to_f64(r.read_u16().map_err(HkxError::from)?),
            FloatWidth::F32 => f64::from(r.read_f32().map_err(HkxError::from)?),
            FloatWidth::F64 => r.read_f64().map_err(HkxError::from)?,
        })
    }

    fn decode_value(
        &mut self,
        si: usize,
        ei: usize,
        off: u32,
        ti: TypeIndex,
        queue: &mut WorkQueue,
    ) -> Result<NodeHandle> {
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
                let mut r = self.entry_reader(si, ei, off)?;
                Value::Bool(r.read_u8().map_err(HkxError::from)? != 0)
            }
            TypeKind::Int { signed, width } => Value::Int(self.read_int(si, ei, off, signed, width)?),
            TypeKind::Float { width } => Value::Float(self.read_float(si, ei, off, width)?),
            TypeKind::String => {
                match self.parts[si].entries[ei].child_map.get(&off).copied() {
                    None => Value::String(None),
                    Some(dst) => {
                        let mut r = self.entry_reader(si, ei, dst)?;
                        Value::String(Some(r.read_cstr().map_err(HkxError::from)?))
                    }
                }
            }
            TypeKind::Pointer => {
                match self.parts[si].entries[ei].pointer_map.get(&off).copied() {
                    None => Value::Pointer(None),
                    Some((ds, de)) => {
                        if ds == TYPE_SECTION {
                            // Reflection metadata pointer (hkVariant class
                            // slot); the graph carries types separately.
                            log::warn!(
                                "[PACKFILE] dropping pointer into the type section at offset {:#x}",
                                off
                            );
                            Value::Pointer(None)
                        } else {
                            Value::Pointer(Some(self.object(ds, de, queue)?))
                        }
                    }
                }
            }
            TypeKind::Class => self.decode_class(si, ei, off, concrete, queue)?,
            TypeKind::Array => {
                let size = self.read_int(
                    si,
                    ei,
                    off + self.pointer_size,
                    true,
                    IntWidth::W32,
                )?;
                if size < 0 {
                    return Err(HkxError::MalformedSection(format!(
                        "negative array size {} at offset {:#x}",
                        size, off
                    )));
                }
                let elem = self.types.pointee(concrete, false)?;
                let payload = self.parts[si].entries[ei].child_map.get(&off).copied();
                match (size, payload) {
                    (0, _) => Value::Array(self.empty_elements(elem)?),
                    (n, Some(dst)) => {
                        Value::Array(self.decode_elements(si, ei, dst, n as u32, elem, queue)?)
                    }
                    (_, None) => {
                        return Err(HkxError::UnresolvedPointer {
                            section: si,
                            offset: self.parts[si].entries[ei].start + off,
                        })
                    }
                }
            }
            TypeKind::Tuple { count } => {
                let elem = self.types.pointee(concrete, false)?;
                Value::Tuple(self.decode_elements(si, ei, off, count, elem, queue)?)
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
        si: usize,
        ei: usize,
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
                    let mut r = self.entry_reader(si, ei, base + i * stride)?;
                    values.push(i64::from(r.read_u8().map_err(HkxError::from)? != 0));
                }
                Elements::Ints(values)
            }
            TypeKind::Int { signed, width } => {
                let mut values = Vec::with_capacity(count as usize);
                for i in 0..count {
                    values.push(self.read_int(si, ei, base + i * stride, signed, width)?);
                }
                Elements::Ints(values)
            }
            TypeKind::Float { width } => {
                let mut values = Vec::with_capacity(count as usize);
                for i in 0..count {
                    values.push(self.read_float(si, ei, base + i * stride, width)?);
                }
                Elements::Floats(values)
            }
            _ => {
                let mut nodes = Vec::with_capacity(count as usize);
                for i in 0..count {
                    nodes.push(self.decode_value(si, ei, base + i * stride, elem, queue)?);
                }
                Elements::Nodes(nodes)
            }
        })
    }
}

/// Decode a packfile into a node graph, its schema and its header
/// metadata.
pub fn unpack(bytes: &[u8]) -> Result<Unpacked> {
    let mut reader = Reader::new(bytes);
    let mut header = PackfileHeader::read(&mut reader)?;

    let mut section_headers = Vec::with_capacity(SECTION_TAGS.len());
    for tag in SECTION_TAGS {
        let sh = SectionHeader::read(&mut reader)?;
        if sh.tag != tag {
            return Err(HkxError::MalformedSection(format!(
                "expected section {}, found {}",
                tag, sh.tag
            )));
        }
        section_headers.push(sh);
    }
    let mut sections = Vec::with_capacity(section_headers.len());
    for sh in &section_headers {
        sections.push(Section::read(&mut reader, sh)?);
    }
    let mut parts = sections
        .iter()
        .map(SectionEntries::partition)
        .collect::<Result<Vec<_>>>()?;
    resolve(&sections, &mut parts)?;

    let names = parse_classnames(&sections[CLASSNAME_SECTION].data, header.big_endian)?;

    let type_entries = &parts[TYPE_SECTION].entries;
    let mut types = if type_entries.is_empty() {
        header.embed_types = false;
        builtin_table(&header.contents_version, header.pointer_size).ok_or_else(|| {
            HkxError::MalformedSection(format!(
                "no embedded type section and no built-in schema for {}",
                header.contents_version
            ))
        })?
    } else {
        let entry_names = type_entries
            .iter()
            .map(|e| {
                names
                    .get(&e.type_name_offset)
                    .map(|(name, _)| name.clone())
                    .ok_or_else(|| {
                        HkxError::MalformedSection(format!(
                            "type entry references unknown class-name offset {:#x}",
                            e.type_name_offset
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        typesec::parse(
            &sections[TYPE_SECTION].data,
            header.big_endian,
            header.pointer_size,
            TYPE_SECTION,
            type_entries,
            &entry_names,
        )?
    };

    // Attach signatures; a mismatch against an already-known signature is
    // reported but does not abort the decode.
    for (name, signature) in names.values() {
        if let Some(idx) = types.find_first(name) {
            let ty = types.get_mut(idx)?;
            match ty.signature {
                Some(existing) if existing != *signature => log::warn!(
                    "[PACKFILE] signature mismatch for {}: file has {:#010x}, schema has {:#010x}",
                    name,
                    signature,
                    existing
                ),
                _ => ty.signature = Some(*signature),
            }
        }
    }

    if parts[DATA_SECTION].entries.is_empty() {
        return Err(HkxError::MalformedSection("data section has no entries".into()));
    }
    let root_name_offset = parts[DATA_SECTION].entries[0].type_name_offset;
    let root_name = names
        .get(&root_name_offset)
        .map(|(name, _)| name.clone())
        .unwrap_or_default();
    if root_name != ROOT_CONTAINER {
        return Err(HkxError::TypeMismatch {
            expected: ROOT_CONTAINER.into(),
            got: root_name,
        });
    }

    let mut decoder = Decoder {
        sections: &sections,
        parts: &parts,
        names: &names,
        types: &types,
        pointer_size: header.pointer_size,
        big_endian: header.big_endian,
        arena: NodeArena::new(),
        cache: HashMap::new(),
    };
    let root = decoder.run(DATA_SECTION, 0)?;
    log::debug!(
        "[PACKFILE] unpacked {} object(s), {} node(s), {} type(s)",
        parts[DATA_SECTION].entries.len(),
        decoder.arena.len(),
        types.len()
    );

    Ok(Unpacked {
        arena: decoder.arena,
        root,
        types,
        header,
    })
}
