// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TYPE chunk: the schema serialized as varint streams over two string
//! pools.
//!
//! Sub-chunks, in order: `TPTR` (pointer width), `TSTR` (type and
//! template name pool), `TNAM` (type names and template arguments),
//! `FSTR` (member and enum name pool), `TBOD` (type bodies behind a
//! presence mask), `THSH` (signature hashes), `TPAD` (empty trailer).
//! Type references are table indices; 0 is the null index.

use super::chunk::Chunk;
use super::varint::{read_varint, unzigzag, write_varint, zigzag};
use crate::error::{HkxError, Result};
use crate::schema::kind::{FloatWidth, IntWidth};
use crate::schema::{
    EnumItem, Interface, Member, TemplateArg, TemplateValue, Type, TypeEnum, TypeIndex, TypeKind,
    TypeTable,
};
use crate::ser::{Reader, Writer};
use std::collections::HashMap;

// TBOD presence mask.
const HAS_POINTEE: u64 = 0x01;
const HAS_VERSION: u64 = 0x02;
const HAS_LAYOUT: u64 = 0x04;
const HAS_MEMBERS: u64 = 0x10;
const HAS_INTERFACES: u64 = 0x20;
const HAS_KIND: u64 = 0x40;
const HAS_ENUMS: u64 = 0x80;

mod kinds {
    pub const VOID: u64 = 0;
    pub const INVALID: u64 = 1;
    pub const BOOL: u64 = 2;
    pub const INT: u64 = 3;
    pub const FLOAT: u64 = 4;
    pub const STRING: u64 = 5;
    pub const POINTER: u64 = 6;
    pub const CLASS: u64 = 7;
    pub const ARRAY: u64 = 8;
    pub const TUPLE: u64 = 9;
}

fn kind_codes(kind: TypeKind) -> (u64, u64) {
    match kind {
        TypeKind::Void => (kinds::VOID, 0),
        TypeKind::Invalid => (kinds::INVALID, 0),
        TypeKind::Bool => (kinds::BOOL, 0),
        TypeKind::Int { signed, width } => {
            (kinds::INT, u64::from(width.bytes()) << 1 | u64::from(signed))
        }
        TypeKind::Float { width } => (kinds::FLOAT, u64::from(width.bytes())),
        TypeKind::String => (kinds::STRING, 0),
        TypeKind::Pointer => (kinds::POINTER, 0),
        TypeKind::Class => (kinds::CLASS, 0),
        TypeKind::Array => (kinds::ARRAY, 0),
        TypeKind::Tuple { count } => (kinds::TUPLE, u64::from(count)),
    }
}

fn kind_from_codes(code: u64, subkind: u64) -> Result<TypeKind> {
    let kind = match code {
        kinds::VOID => TypeKind::Void,
        kinds::INVALID => TypeKind::Invalid,
        kinds::BOOL => TypeKind::Bool,
        kinds::INT => {
            let signed = subkind & 1 != 0;
            let width = match subkind >> 1 {
                1 => IntWidth::W8,
                2 => IntWidth::W16,
                4 => IntWidth::W32,
                8 => IntWidth::W64,
                other => {
                    return Err(HkxError::MalformedSection(format!(
                        "bad integer width {} in type body",
                        other
                    )))
                }
            };
            TypeKind::Int { signed, width }
        }
        kinds::FLOAT => {
            let width = match subkind {
                2 => FloatWidth::F16,
                4 => FloatWidth::F32,
                8 => FloatWidth::F64,
                other => {
                    return Err(HkxError::MalformedSection(format!(
                        "bad float width {} in type body",
                        other
                    )))
                }
            };
            TypeKind::Float { width }
        }
        kinds::STRING => TypeKind::String,
        kinds::POINTER => TypeKind::Pointer,
        kinds::CLASS => TypeKind::Class,
        kinds::ARRAY => TypeKind::Array,
        kinds::TUPLE => TypeKind::Tuple {
            count: subkind as u32,
        },
        other => {
            return Err(HkxError::MalformedSection(format!(
                "unknown kind code {} in type body",
                other
            )))
        }
    };
    Ok(kind)
}

/// String pool: first-use interning order on write, index lookup on read.
#[derive(Default)]
struct Pool {
    order: Vec<String>,
    index: HashMap<String, u64>,
}

impl Pool {
    fn intern(&mut self, s: &str) -> u64 {
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.order.len() as u64;
        self.order.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        idx
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        write_varint(&mut w, self.order.len() as u64)?;
        for s in &self.order {
            w.write_cstr(s);
        }
        Ok(w.into_bytes())
    }
}

fn decode_pool(payload: &[u8]) -> Result<Vec<String>> {
    let mut r = Reader::new(payload);
    let count = read_varint(&mut r)?;
    let mut strings = Vec::with_capacity(count as usize);
    for _ in 0..count {
        strings.push(r.read_cstr().map_err(HkxError::from)?);
    }
    Ok(strings)
}

fn pool_get(pool: &[String], idx: u64) -> Result<&str> {
    pool.get(idx as usize)
        .map(String::as_str)
        .ok_or(HkxError::OutOfRange {
            index: idx as usize,
            len: pool.len(),
        })
}

fn check_index(table_len: usize, raw: u64) -> Result<TypeIndex> {
    if raw as usize >= table_len {
        return Err(HkxError::OutOfRange {
            index: raw as usize,
            len: table_len,
        });
    }
    Ok(TypeIndex(raw as u32))
}

/// Serialize a table into a TYPE chunk.
pub fn encode(table: &TypeTable, pointer_size: u32) -> Result<Chunk> {
    let mut tstr = Pool::default();
    let mut fstr = Pool::default();

    let mut tptr = Writer::new();
    write_varint(&mut tptr, u64::from(pointer_size))?;

    // TNAM interns into TSTR as a side effect, so build it before the pool
    // chunks are emitted.
    let mut tnam = Writer::new();
    write_varint(&mut tnam, table.len() as u64 - 1)?;
    for (_, ty) in table.iter() {
        write_varint(&mut tnam, tstr.intern(&ty.name))?;
        write_varint(&mut tnam, ty.templates.len() as u64)?;
        for arg in &ty.templates {
            write_varint(&mut tnam, tstr.intern(&arg.name))?;
            match arg.value {
                TemplateValue::Type(idx) => write_varint(&mut tnam, u64::from(idx.0))?,
                TemplateValue::Int(v) => write_varint(&mut tnam, zigzag(v))?,
            }
        }
    }

    let mut tbod = Writer::new();
    for (idx, ty) in table.iter() {
        let target = if ty.alias_of.is_none() {
            ty.pointee
        } else {
            ty.alias_of
        };
        let mut mask = HAS_LAYOUT | HAS_KIND;
        if !target.is_none() {
            mask |= HAS_POINTEE;
        }
        if ty.version.is_some() {
            mask |= HAS_VERSION;
        }
        if !ty.members.is_empty() {
            mask |= HAS_MEMBERS;
        }
        if !ty.interfaces.is_empty() {
            mask |= HAS_INTERFACES;
        }
        if !ty.enums.is_empty() {
            mask |= HAS_ENUMS;
        }

        write_varint(&mut tbod, u64::from(idx.0))?;
        write_varint(&mut tbod, u64::from(ty.parent.0))?;
        write_varint(&mut tbod, mask)?;
        if mask & HAS_POINTEE != 0 {
            write_varint(&mut tbod, u64::from(target.0))?;
        }
        if let Some(version) = ty.version {
            write_varint(&mut tbod, zigzag(i64::from(version)))?;
        }
        write_varint(&mut tbod, u64::from(ty.byte_size))?;
        write_varint(&mut tbod, u64::from(ty.alignment))?;
        let (code, subkind) = kind_codes(ty.kind);
        write_varint(&mut tbod, code)?;
        write_varint(&mut tbod, subkind)?;
        if mask & HAS_MEMBERS != 0 {
            write_varint(&mut tbod, ty.members.len() as u64)?;
            for member in &ty.members {
                write_varint(&mut tbod, fstr.intern(&member.name))?;
                write_varint(&mut tbod, u64::from(member.flags))?;
                write_varint(&mut tbod, u64::from(member.offset))?;
                write_varint(&mut tbod, u64::from(member.type_index.0))?;
            }
        }
        if mask & HAS_INTERFACES != 0 {
            write_varint(&mut tbod, ty.interfaces.len() as u64)?;
            for iface in &ty.interfaces {
                write_varint(&mut tbod, u64::from(iface.type_index.0))?;
                write_varint(&mut tbod, u64::from(iface.flags))?;
            }
        }
        if mask & HAS_ENUMS != 0 {
            write_varint(&mut tbod, ty.enums.len() as u64)?;
            for def in &ty.enums {
                write_varint(&mut tbod, fstr.intern(&def.name))?;
                write_varint(&mut tbod, def.items.len() as u64)?;
                for item in &def.items {
                    write_varint(&mut tbod, fstr.intern(&item.name))?;
                    write_varint(&mut tbod, zigzag(item.value))?;
                }
            }
        }
    }

    let mut thsh = Writer::new();
    let hashed: Vec<(TypeIndex, u32)> = table
        .iter()
        .filter_map(|(idx, ty)| ty.signature.map(|sig| (idx, sig)))
        .collect();
    write_varint(&mut thsh, hashed.len() as u64)?;
    for (idx, sig) in hashed {
        write_varint(&mut thsh, u64::from(idx.0))?;
        thsh.write_u32(sig);
    }

    Ok(Chunk::container(
        "TYPE",
        vec![
            Chunk::leaf("TPTR", tptr.into_bytes()),
            Chunk::leaf("TSTR", tstr.encode()?),
            Chunk::leaf("TNAM", tnam.into_bytes()),
            Chunk::leaf("FSTR", fstr.encode()?),
            Chunk::leaf("TBOD", tbod.into_bytes()),
            Chunk::leaf("THSH", thsh.into_bytes()),
            Chunk::leaf("TPAD", Vec::new()),
        ],
    ))
}

/// Rebuild a table (and the file's pointer width) from a TYPE chunk.
pub fn decode(chunk: &Chunk) -> Result<(TypeTable, u32)> {
    let mut r = Reader::new(&chunk.require("TPTR")?.payload);
    let pointer_size = read_varint(&mut r)? as u32;
    if pointer_size != 4 && pointer_size != 8 {
        return Err(HkxError::MalformedSection(format!(
            "unsupported pointer width {}",
            pointer_size
        )));
    }

    let tstr = decode_pool(&chunk.require("TSTR")?.payload)?;
    let fstr = decode_pool(&chunk.require("FSTR")?.payload)?;

    // TNAM: stubs with names and template arguments.
    let mut table = TypeTable::new();
    let mut r = Reader::new(&chunk.require("TNAM")?.payload);
    let count = read_varint(&mut r)?;
    let table_len = count as usize + 1;
    for _ in 0..count {
        let name = pool_get(&tstr, read_varint(&mut r)?)?;
        let mut ty = Type::new(name, TypeKind::Void);
        let template_count = read_varint(&mut r)?;
        for _ in 0..template_count {
            let arg_name = pool_get(&tstr, read_varint(&mut r)?)?.to_string();
            let raw = read_varint(&mut r)?;
            // Argument names follow the t-for-type, v-for-value convention.
            let value = if arg_name.starts_with('v') {
                TemplateValue::Int(unzigzag(raw))
            } else {
                TemplateValue::Type(check_index(table_len, raw)?)
            };
            ty.templates.push(TemplateArg {
                name: arg_name,
                value,
            });
        }
        table.push(ty);
    }

    // TBOD: fill the stubs.
    let mut r = Reader::new(&chunk.require("TBOD")?.payload);
    while !r.is_eof() {
        let idx = check_index(table_len, read_varint(&mut r)?)?;
        if idx.is_none() {
            return Err(HkxError::MalformedSection(
                "type body addresses the null index".into(),
            ));
        }
        let parent = check_index(table_len, read_varint(&mut r)?)?;
        let mask = read_varint(&mut r)?;
        let target = if mask & HAS_POINTEE != 0 {
            check_index(table_len, read_varint(&mut r)?)?
        } else {
            TypeIndex::NONE
        };
        let version = if mask & HAS_VERSION != 0 {
            Some(unzigzag(read_varint(&mut r)?) as i32)
        } else {
            None
        };
        let (byte_size, alignment) = if mask & HAS_LAYOUT != 0 {
            (read_varint(&mut r)? as u32, read_varint(&mut r)? as u32)
        } else {
            (0, 1)
        };
        let kind = if mask & HAS_KIND != 0 {
            let code = read_varint(&mut r)?;
            let subkind = read_varint(&mut r)?;
            kind_from_codes(code, subkind)?
        } else {
            TypeKind::Void
        };

        let mut members = Vec::new();
        if mask & HAS_MEMBERS != 0 {
            let member_count = read_varint(&mut r)?;
            for _ in 0..member_count {
                let name = pool_get(&fstr, read_varint(&mut r)?)?.to_string();
                let flags = read_varint(&mut r)? as u32;
                let offset = read_varint(&mut r)? as u32;
                let type_index = check_index(table_len, read_varint(&mut r)?)?;
                let mut member = Member::new(name, offset, type_index);
                member.flags = flags;
                members.push(member);
            }
        }

        let mut interfaces = Vec::new();
        if mask & HAS_INTERFACES != 0 {
            let iface_count = read_varint(&mut r)?;
            for _ in 0..iface_count {
                let type_index = check_index(table_len, read_varint(&mut r)?)?;
                let flags = read_varint(&mut r)? as u32;
                interfaces.push(Interface { type_index, flags });
            }
        }

        let mut enums = Vec::new();
        if mask & HAS_ENUMS != 0 {
            let enum_count = read_varint(&mut r)?;
            for _ in 0..enum_count {
                let name = pool_get(&fstr, read_varint(&mut r)?)?.to_string();
                let item_count = read_varint(&mut r)?;
                let mut def = TypeEnum::new(name);
                for _ in 0..item_count {
                    let item_name = pool_get(&fstr, read_varint(&mut r)?)?.to_string();
                    let value = unzigzag(read_varint(&mut r)?);
                    def.items.push(EnumItem {
                        name: item_name,
                        value,
                    });
                }
                enums.push(def);
            }
        }

        let ty = table.get_mut(idx)?;
        ty.parent = parent;
        if kind == TypeKind::Invalid {
            ty.alias_of = target;
        } else {
            ty.pointee = target;
        }
        ty.version = version;
        ty.byte_size = byte_size;
        ty.alignment = alignment;
        ty.kind = kind;
        ty.members = members;
        ty.interfaces = interfaces;
        ty.enums = enums;
    }

    // THSH: optional signature hashes.
    if let Some(thsh) = chunk.child("THSH") {
        let mut r = Reader::new(&thsh.payload);
        let count = read_varint(&mut r)?;
        for _ in 0..count {
            let idx = check_index(table_len, read_varint(&mut r)?)?;
            let sig = r.read_u32().map_err(HkxError::from)?;
            table.get_mut(idx)?.signature = Some(sig);
        }
    }

    Ok((table, pointer_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;

    fn sample_table() -> TypeTable {
        let mut b = SchemaBuilder::new(8);
        let u32_ty = b.int(false, IntWidth::W32);
        let s = b.string();
        let real = b.real();
        let vec4 = b.named_tuple("hkVector4", 4, 16);
        let base = b
            .class(
                "hkReferencedObject",
                TypeIndex::NONE,
                0,
                &[("memSizeAndFlags", u32_ty), ("referenceCount", u32_ty)],
            )
            .expect("class");
        let hint = b
            .enum_of(
                TypeEnum::with_items("BlendHint", &[("NORMAL", 0), ("ADDITIVE", 1)]),
                u32_ty,
            )
            .expect("enum");
        let positions = b.array(vec4).expect("array");
        let bone = b
            .class(
                "hkaBone",
                base,
                1,
                &[("name", s), ("weight", real), ("blendHint", hint)],
            )
            .expect("class");
        let _skeleton = b
            .class(
                "hkaSkeleton",
                base,
                2,
                &[("name", s), ("positions", positions)],
            )
            .expect("class");
        let mut table = b.into_table();
        table.get_mut(bone).expect("bone").signature = Some(0x1234_5678);
        table
    }

    #[test]
    fn test_type_chunk_roundtrip() {
        let table = sample_table();
        let chunk = encode(&table, 8).expect("encode");
        let (back, pointer_size) = decode(&chunk).expect("decode");
        assert_eq!(pointer_size, 8);
        assert_eq!(back.len(), table.len());
        for ((_, a), (_, b)) in table.iter().zip(back.iter()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_stable_reencode() {
        let table = sample_table();
        let first = encode(&table, 8).expect("encode").to_bytes();
        let (back, _) = decode(&Chunk::parse(&first).expect("parse")).expect("decode");
        let second = encode(&back, 8).expect("encode").to_bytes();
        assert_eq!(first, second);
    }

    #[test]
    fn test_alias_survives() {
        let mut b = SchemaBuilder::new(8);
        let real = b.real();
        b.alias("hkTime", real);
        let table = b.into_table();

        let chunk = encode(&table, 8).expect("encode");
        let (back, _) = decode(&chunk).expect("decode");
        let time = back.find("hkTime").expect("find");
        assert_eq!(back.concrete(time).expect("concrete"), real);
        assert_eq!(back.get(time).expect("type").kind, TypeKind::Invalid);
    }

    #[test]
    fn test_bad_pointer_width() {
        let table = sample_table();
        let mut chunk = encode(&table, 8).expect("encode");
        let mut w = Writer::new();
        write_varint(&mut w, 6).expect("varint");
        chunk.children[0] = Chunk::leaf("TPTR", w.into_bytes());
        assert!(decode(&chunk).is_err());
    }

    #[test]
    fn test_body_index_out_of_range() {
        let table = sample_table();
        let mut chunk = encode(&table, 8).expect("encode");
        let mut w = Writer::new();
        write_varint(&mut w, 500).expect("varint");
        write_varint(&mut w, 0).expect("varint");
        write_varint(&mut w, HAS_LAYOUT | HAS_KIND).expect("varint");
        let pos = chunk
            .children
            .iter()
            .position(|c| c.tag == "TBOD")
            .expect("TBOD");
        chunk.children[pos] = Chunk::leaf("TBOD", w.into_bytes());
        assert!(matches!(
            decode(&chunk),
            Err(HkxError::OutOfRange { .. })
        ));
    }
}
