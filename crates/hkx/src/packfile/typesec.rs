// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Embedded type-section codec.
//!
//! A type section is a sequence of `hkClass` and `hkClassEnum` entries
//! describing the schema the data section was laid out against. Records
//! use fixed 32/64-bit layouts; every pointer field is a zeroed slot
//! whose target comes from the section's fixup tables. Parsing runs two
//! passes: stub every entry, then fill parents, members and enums so
//! forward references resolve by entry index.

use super::fixups::{ChildPointer, Entry, EntryPointer, EntrySpec};
use super::header::TYPE_SECTION;
use crate::error::{HkxError, Result};
use crate::schema::{
    kind::{IntWidth, TypeKind},
    EnumItem, Interface, Member, SchemaBuilder, Type, TypeEnum, TypeIndex, TypeTable,
};
use crate::ser::{Reader, Writer};
use std::collections::HashMap;

pub const CLASS_ENTRY: &str = "hkClass";
pub const ENUM_ENTRY: &str = "hkClassEnum";

/// Wire member type codes.
mod codes {
    pub const VOID: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const CHAR: u8 = 2;
    pub const INT8: u8 = 3;
    pub const UINT8: u8 = 4;
    pub const INT16: u8 = 5;
    pub const UINT16: u8 = 6;
    pub const INT32: u8 = 7;
    pub const UINT32: u8 = 8;
    pub const INT64: u8 = 9;
    pub const UINT64: u8 = 10;
    pub const REAL: u8 = 11;
    pub const VECTOR4: u8 = 12;
    pub const QUATERNION: u8 = 13;
    pub const MATRIX3: u8 = 14;
    pub const ROTATION: u8 = 15;
    pub const QSTRANSFORM: u8 = 16;
    pub const MATRIX4: u8 = 17;
    pub const TRANSFORM: u8 = 18;
    pub const POINTER: u8 = 20;
    pub const FUNCTION_POINTER: u8 = 21;
    pub const ARRAY: u8 = 22;
    pub const INPLACE_ARRAY: u8 = 23;
    pub const ENUM: u8 = 24;
    pub const STRUCT: u8 = 25;
    pub const SIMPLE_ARRAY: u8 = 26;
    pub const VARIANT: u8 = 28;
    pub const CSTRING: u8 = 29;
    pub const ULONG: u8 = 30;
    pub const FLAGS: u8 = 31;
    pub const HALF: u8 = 32;
    pub const STRINGPTR: u8 = 33;
}

fn align_up(x: u32, a: u32) -> u32 {
    (x + a - 1) & !(a - 1)
}

/// Entry-local field offsets of an `hkClass` record for one pointer width.
#[derive(Clone, Copy)]
struct ClassSlots {
    parent: u32,
    object_size: u32,
    enums: u32,
    num_enums: u32,
    members: u32,
    num_members: u32,
    flags: u32,
    size: u32,
}

fn class_slots(p: u32) -> ClassSlots {
    let enums = align_up(2 * p + 8, p);
    let members = align_up(enums + p + 4, p);
    let defaults = align_up(members + p + 4, p);
    let flags = defaults + 2 * p;
    ClassSlots {
        parent: p,
        object_size: 2 * p,
        enums,
        num_enums: enums + p,
        members,
        num_members: members + p,
        flags,
        size: align_up(flags + 8, p),
    }
}

/// Field offsets of an `hkClassMember` record.
#[derive(Clone, Copy)]
struct MemberSlots {
    class: u32,
    enum_: u32,
    type_: u32,
    size: u32,
}

fn member_slots(p: u32) -> MemberSlots {
    MemberSlots {
        class: p,
        enum_: 2 * p,
        type_: 3 * p,
        size: align_up(3 * p + 8, p) + p,
    }
}

/// Field offsets of an `hkClassEnum` record.
#[derive(Clone, Copy)]
struct EnumSlots {
    items: u32,
    num_items: u32,
    flags: u32,
    size: u32,
}

fn enum_slots(p: u32) -> EnumSlots {
    let flags = align_up(2 * p + 4, p) + p;
    EnumSlots {
        items: p,
        num_items: 2 * p,
        flags,
        size: align_up(flags + 4, p),
    }
}

/// Field offsets of an `hkClassEnumItem` record (value at 0).
#[derive(Clone, Copy)]
struct ItemSlots {
    name: u32,
    size: u32,
}

fn item_slots(p: u32) -> ItemSlots {
    let name = align_up(4, p);
    ItemSlots {
        name,
        size: name + p,
    }
}

fn reader_at(data: &[u8], big_endian: bool, off: u32) -> Result<Reader<'_>> {
    let mut r = Reader::new(data);
    r.set_big_endian(big_endian);
    r.seek(off as usize).map_err(HkxError::from)?;
    Ok(r)
}

fn cstr_at(data: &[u8], big_endian: bool, off: u32) -> Result<String> {
    let mut r = reader_at(data, big_endian, off)?;
    r.read_cstr().map_err(HkxError::from)
}

fn child(entry: &Entry, slot: u32) -> Option<u32> {
    entry.child_map.get(&slot).copied()
}

fn require_child(entry: &Entry, slot: u32, what: &str) -> Result<u32> {
    child(entry, slot).ok_or_else(|| {
        HkxError::MalformedSection(format!("{} has no payload fixup at slot {:#x}", what, slot))
    })
}

/// Resolve a global fixup on a record slot to the type stub of the entry
/// it targets. References must stay inside the type section.
fn pointer_target(
    entry: &Entry,
    slot: u32,
    section_index: usize,
    entry_types: &[TypeIndex],
) -> Result<Option<TypeIndex>> {
    match entry.pointer_map.get(&slot) {
        None => Ok(None),
        Some(&(sec, idx)) => {
            if sec != section_index {
                return Err(HkxError::MalformedSection(
                    "type reference leaves the type section".into(),
                ));
            }
            Ok(Some(entry_types[idx]))
        }
    }
}

fn parse_enum_record(
    data: &[u8],
    big_endian: bool,
    entry: &Entry,
    rec: u32,
    es: &EnumSlots,
    is: &ItemSlots,
) -> Result<TypeEnum> {
    let name_off = require_child(entry, rec, "enum record")?;
    let name = cstr_at(data, big_endian, entry.start + name_off)?;
    let num_items = reader_at(data, big_endian, entry.start + rec + es.num_items)?
        .read_i32()
        .map_err(HkxError::from)?;
    let mut items = Vec::new();
    if num_items > 0 {
        let items_off = require_child(entry, rec + es.items, "enum record")?;
        for k in 0..num_items as u32 {
            let irec = items_off + k * is.size;
            let value = reader_at(data, big_endian, entry.start + irec)?
                .read_i32()
                .map_err(HkxError::from)?;
            let iname_off = require_child(entry, irec + is.name, "enum item")?;
            items.push(EnumItem {
                name: cstr_at(data, big_endian, entry.start + iname_off)?,
                value: i64::from(value),
            });
        }
    }
    Ok(TypeEnum { name, items })
}

/// Map wire (type, subtype) codes plus the record's class/enum targets to
/// a schema type, synthesizing wrappers as needed.
fn member_type_index(
    builder: &mut SchemaBuilder,
    type_code: u8,
    subtype_code: u8,
    class_target: TypeIndex,
    enum_def: Option<TypeEnum>,
    c_array: u16,
) -> Result<TypeIndex> {
    use codes::*;
    let base = match type_code {
        VOID => builder.void(),
        BOOL => builder.boolean(),
        CHAR => builder.char8(),
        INT8 => builder.int(true, IntWidth::W8),
        UINT8 => builder.int(false, IntWidth::W8),
        INT16 => builder.int(true, IntWidth::W16),
        UINT16 => builder.int(false, IntWidth::W16),
        INT32 => builder.int(true, IntWidth::W32),
        UINT32 => builder.int(false, IntWidth::W32),
        INT64 => builder.int(true, IntWidth::W64),
        UINT64 => builder.int(false, IntWidth::W64),
        REAL => builder.real(),
        VECTOR4 => builder.named_tuple("hkVector4", 4, 16),
        QUATERNION => builder.named_tuple("hkQuaternion", 4, 16),
        MATRIX3 => builder.named_tuple("hkMatrix3", 12, 16),
        ROTATION => builder.named_tuple("hkRotation", 12, 16),
        QSTRANSFORM => builder.named_tuple("hkQsTransform", 12, 16),
        MATRIX4 => builder.named_tuple("hkMatrix4", 16, 16),
        TRANSFORM => builder.named_tuple("hkTransform", 16, 16),
        POINTER | FUNCTION_POINTER => {
            let target = if subtype_code == STRUCT && !class_target.is_none() {
                class_target
            } else {
                builder.void()
            };
            builder.pointer(target)?
        }
        ARRAY | INPLACE_ARRAY | SIMPLE_ARRAY => {
            let elem = if subtype_code == STRUCT {
                if class_target.is_none() {
                    return Err(HkxError::MalformedSection(
                        "struct array member without class target".into(),
                    ));
                }
                class_target
            } else if subtype_code == POINTER {
                let target = if class_target.is_none() {
                    builder.void()
                } else {
                    class_target
                };
                builder.pointer(target)?
            } else {
                member_type_index(builder, subtype_code, 0, TypeIndex::NONE, None, 0)?
            };
            if type_code == SIMPLE_ARRAY {
                builder.simple_array(elem)?
            } else {
                builder.array(elem)?
            }
        }
        ENUM | FLAGS => {
            let storage = member_type_index(builder, subtype_code, 0, TypeIndex::NONE, None, 0)?;
            match enum_def {
                Some(def) => builder.enum_of(def, storage)?,
                None => storage,
            }
        }
        STRUCT => {
            if class_target.is_none() {
                return Err(HkxError::MalformedSection(
                    "struct member without class target".into(),
                ));
            }
            class_target
        }
        VARIANT => builder.variant()?,
        CSTRING => builder.c_string(),
        ULONG => builder.ulong(),
        HALF => builder.half(),
        STRINGPTR => builder.string(),
        other => {
            return Err(HkxError::MalformedSection(format!(
                "unsupported member type code {}",
                other
            )))
        }
    };
    if c_array > 0 {
        builder.tuple(base, u32::from(c_array))
    } else {
        Ok(base)
    }
}

/// Parse a type section into a schema table.
pub fn parse(
    data: &[u8],
    big_endian: bool,
    pointer_size: u32,
    section_index: usize,
    entries: &[Entry],
    entry_names: &[String],
) -> Result<TypeTable> {
    let cs = class_slots(pointer_size);
    let ms = member_slots(pointer_size);
    let es = enum_slots(pointer_size);
    let is = item_slots(pointer_size);
    let mut builder = SchemaBuilder::new(pointer_size);

    // Pass 1: stub every entry.
    let mut entry_types = vec![TypeIndex::NONE; entries.len()];
    for (i, entry) in entries.iter().enumerate() {
        match entry_names[i].as_str() {
            CLASS_ENTRY => {
                let name_off = require_child(entry, 0, "class record")?;
                let name = cstr_at(data, big_endian, entry.start + name_off)?;
                let mut r = reader_at(data, big_endian, entry.start + cs.object_size)?;
                let object_size = r.read_i32().map_err(HkxError::from)?;
                let num_interfaces = r.read_i32().map_err(HkxError::from)?;
                let version = reader_at(data, big_endian, entry.start + cs.flags + 4)?
                    .read_i32()
                    .map_err(HkxError::from)?;
                let mut ty = Type::new(name, TypeKind::Class)
                    .with_size(object_size.max(0) as u32, pointer_size);
                ty.version = Some(version);
                ty.interfaces = vec![
                    Interface {
                        type_index: TypeIndex::NONE,
                        flags: 0,
                    };
                    num_interfaces.max(0) as usize
                ];
                entry_types[i] = builder.table_mut().push(ty);
            }
            ENUM_ENTRY => {
                let def = parse_enum_record(data, big_endian, entry, 0, &es, &is)?;
                let mut ty = Type::new(
                    def.name.clone(),
                    TypeKind::Int {
                        signed: true,
                        width: IntWidth::W32,
                    },
                )
                .with_size(4, 4);
                ty.enums.push(def);
                entry_types[i] = builder.table_mut().push(ty);
            }
            other => {
                return Err(HkxError::MalformedSection(format!(
                    "unexpected type-section entry class {}",
                    other
                )))
            }
        }
    }

    // Pass 2: parents, declared enums, members.
    for (i, entry) in entries.iter().enumerate() {
        if entry_names[i] != CLASS_ENTRY {
            continue;
        }
        let ti = entry_types[i];

        let parent = pointer_target(entry, cs.parent, section_index, &entry_types)?;

        let mut declared: Vec<(u32, TypeEnum)> = Vec::new();
        let num_enums = reader_at(data, big_endian, entry.start + cs.num_enums)?
            .read_i32()
            .map_err(HkxError::from)?;
        if num_enums > 0 {
            let enums_off = require_child(entry, cs.enums, "class enums")?;
            for j in 0..num_enums as u32 {
                let rec = enums_off + j * es.size;
                declared.push((rec, parse_enum_record(data, big_endian, entry, rec, &es, &is)?));
            }
        }

        let mut members = Vec::new();
        let num_members = reader_at(data, big_endian, entry.start + cs.num_members)?
            .read_i32()
            .map_err(HkxError::from)?;
        if num_members > 0 {
            let members_off = require_child(entry, cs.members, "class members")?;
            for j in 0..num_members as u32 {
                let rec = members_off + j * ms.size;
                let name_off = require_child(entry, rec, "member record")?;
                let name = cstr_at(data, big_endian, entry.start + name_off)?;
                let class_target = pointer_target(entry, rec + ms.class, section_index, &entry_types)?
                    .unwrap_or(TypeIndex::NONE);
                let mut r = reader_at(data, big_endian, entry.start + rec + ms.type_)?;
                let type_code = r.read_u8().map_err(HkxError::from)?;
                let subtype_code = r.read_u8().map_err(HkxError::from)?;
                let c_array = r.read_u16().map_err(HkxError::from)?;
                let flags = r.read_u16().map_err(HkxError::from)?;
                let offset = r.read_u16().map_err(HkxError::from)?;

                let mut enum_index = None;
                let enum_def = if type_code == codes::ENUM || type_code == codes::FLAGS {
                    if let Some(dst) = child(entry, rec + ms.enum_) {
                        match declared.iter().position(|(off, _)| *off == dst) {
                            Some(pos) => {
                                enum_index = Some(pos);
                                Some(declared[pos].1.clone())
                            }
                            None => Some(parse_enum_record(data, big_endian, entry, dst, &es, &is)?),
                        }
                    } else if let Some(target) =
                        pointer_target(entry, rec + ms.enum_, section_index, &entry_types)?
                    {
                        builder.table().get(target)?.enums.first().cloned()
                    } else {
                        None
                    }
                } else {
                    None
                };

                let mti = member_type_index(
                    &mut builder,
                    type_code,
                    subtype_code,
                    class_target,
                    enum_def,
                    c_array,
                )?;
                let mut member = Member::new(name, u32::from(offset), mti);
                member.flags = u32::from(flags);
                member.enum_index = enum_index;
                member.raw_codes = Some((type_code, subtype_code));
                members.push(member);
            }
        }

        let ty = builder.table_mut().get_mut(ti)?;
        ty.parent = parent.unwrap_or(TypeIndex::NONE);
        ty.members = members;
        ty.enums = declared.into_iter().map(|(_, def)| def).collect();
    }

    log::debug!(
        "[PACKFILE] parsed type section: {} entries, {} types total",
        entries.len(),
        builder.table().len()
    );
    Ok(builder.into_table())
}

/// Derived wire codes for one member type.
struct WireCodes {
    type_code: u8,
    subtype_code: u8,
    c_array: u16,
    class_target: TypeIndex,
    enum_name: Option<String>,
}

fn named_tuple_code(name: &str) -> Option<u8> {
    use codes::*;
    Some(match name {
        "hkVector4" => VECTOR4,
        "hkQuaternion" => QUATERNION,
        "hkMatrix3" => MATRIX3,
        "hkRotation" => ROTATION,
        "hkQsTransform" => QSTRANSFORM,
        "hkMatrix4" => MATRIX4,
        "hkTransform" => TRANSFORM,
        _ => return None,
    })
}

fn int_code(signed: bool, width: IntWidth) -> u8 {
    use codes::*;
    match (signed, width) {
        (true, IntWidth::W8) => INT8,
        (false, IntWidth::W8) => UINT8,
        (true, IntWidth::W16) => INT16,
        (false, IntWidth::W16) => UINT16,
        (true, IntWidth::W32) => INT32,
        (false, IntWidth::W32) => UINT32,
        (true, IntWidth::W64) => INT64,
        (false, IntWidth::W64) => UINT64,
    }
}

/// Invert [`member_type_index`] for freshly built schemas; members parsed
/// from disk carry their original codes and skip the derivation.
fn derive_codes(table: &TypeTable, ti: TypeIndex, pointer_size: u32) -> Result<WireCodes> {
    use codes::*;
    let concrete = table.concrete(ti)?;
    let ty = table.get(concrete)?;
    let plain = |type_code: u8, subtype_code: u8| WireCodes {
        type_code,
        subtype_code,
        c_array: 0,
        class_target: TypeIndex::NONE,
        enum_name: None,
    };
    if let Some(code) = named_tuple_code(&ty.name) {
        return Ok(plain(code, 0));
    }
    Ok(match ty.kind {
        TypeKind::Void => plain(VOID, 0),
        TypeKind::Invalid => {
            return Err(HkxError::TypeMismatch {
                expected: "concrete member type".into(),
                got: ty.name.clone(),
            })
        }
        TypeKind::Bool => plain(BOOL, 0),
        TypeKind::Int { signed, width } => {
            if let Some(def) = ty.enums.first() {
                WireCodes {
                    enum_name: Some(def.name.clone()),
                    ..plain(ENUM, int_code(signed, width))
                }
            } else if ty.name == "hkUlong" {
                plain(ULONG, 0)
            } else if ty.name == "char" {
                plain(CHAR, 0)
            } else {
                plain(int_code(signed, width), 0)
            }
        }
        TypeKind::Float { width } => {
            if width.bytes() == 2 {
                plain(HALF, 0)
            } else {
                plain(REAL, 0)
            }
        }
        TypeKind::String => {
            if ty.name == "char*" {
                plain(CSTRING, 0)
            } else {
                plain(STRINGPTR, 0)
            }
        }
        TypeKind::Pointer => {
            let target = table.concrete(ty.pointee)?;
            if matches!(table.get(target)?.kind, TypeKind::Class) {
                WireCodes {
                    class_target: target,
                    ..plain(POINTER, STRUCT)
                }
            } else {
                plain(POINTER, VOID)
            }
        }
        TypeKind::Class => {
            if ty.name == "hkVariant" {
                plain(VARIANT, 0)
            } else {
                WireCodes {
                    class_target: concrete,
                    ..plain(STRUCT, 0)
                }
            }
        }
        TypeKind::Array => {
            let arr_code = if ty.byte_size == pointer_size + 8 {
                ARRAY
            } else {
                SIMPLE_ARRAY
            };
            let elem = table.concrete(ty.pointee)?;
            let ek = table.get(elem)?;
            match ek.kind {
                TypeKind::Class => WireCodes {
                    class_target: elem,
                    ..plain(arr_code, STRUCT)
                },
                TypeKind::Pointer => {
                    let target = table.concrete(ek.pointee)?;
                    let class_target = if matches!(table.get(target)?.kind, TypeKind::Class) {
                        target
                    } else {
                        TypeIndex::NONE
                    };
                    WireCodes {
                        class_target,
                        ..plain(arr_code, POINTER)
                    }
                }
                _ => {
                    let inner = derive_codes(table, elem, pointer_size)?;
                    WireCodes {
                        type_code: arr_code,
                        subtype_code: inner.type_code,
                        c_array: 0,
                        class_target: inner.class_target,
                        enum_name: inner.enum_name,
                    }
                }
            }
        }
        TypeKind::Tuple { count } => {
            let inner = derive_codes(table, ty.pointee, pointer_size)?;
            WireCodes {
                c_array: count as u16,
                ..inner
            }
        }
    })
}

/// Encoded type section plus its fixups, in section-local coordinates.
/// `name_offset` of each spec is a placeholder the caller fills once the
/// class-name section is laid out.
pub struct TypeSectionOut {
    pub data: Vec<u8>,
    pub child_pointers: Vec<ChildPointer>,
    pub entry_pointers: Vec<EntryPointer>,
    pub entry_specs: Vec<EntrySpec>,
    pub entry_names: Vec<&'static str>,
}

fn is_class_entry(ty: &Type) -> bool {
    matches!(ty.kind, TypeKind::Class) && ty.version.is_some()
}

fn is_standalone_enum(ty: &Type) -> bool {
    matches!(ty.kind, TypeKind::Int { .. })
        && ty.members.is_empty()
        && ty.enums.len() == 1
        && ty.enums[0].name == ty.name
}

enum EnumRef {
    Embedded(usize),
    Standalone(usize),
}

/// Write a full enum record payload (names, items) for a record reserved
/// at `rec`, recording child fixups.
fn write_enum_payload(
    w: &mut Writer,
    def: &TypeEnum,
    rec: u32,
    es: &EnumSlots,
    is: &ItemSlots,
    pointer_size: u32,
    child: &mut Vec<ChildPointer>,
) {
    child.push(ChildPointer {
        src: rec,
        dst: w.offset() as u32,
    });
    w.write_cstr(&def.name);
    if !def.items.is_empty() {
        w.align(pointer_size as usize, 0);
        let items_block = w.offset() as u32;
        w.reserve(def.items.len() * is.size as usize);
        child.push(ChildPointer {
            src: rec + es.items,
            dst: items_block,
        });
        for (k, item) in def.items.iter().enumerate() {
            let irec = items_block + k as u32 * is.size;
            w.at(irec as usize).write_i32(item.value as i32);
            child.push(ChildPointer {
                src: irec + is.name,
                dst: w.offset() as u32,
            });
            w.write_cstr(&item.name);
        }
    }
    w.at((rec + es.num_items) as usize)
        .write_i32(def.items.len() as i32);
    // Enum records carry no flag bits in any supported layout.
    w.at((rec + es.flags) as usize).write_u32(0);
}

/// Encode every class and standalone enum in `table` as a type section.
pub fn write(table: &TypeTable, big_endian: bool, pointer_size: u32) -> Result<TypeSectionOut> {
    let cs = class_slots(pointer_size);
    let ms = member_slots(pointer_size);
    let es = enum_slots(pointer_size);
    let is = item_slots(pointer_size);

    let mut entry_list: Vec<TypeIndex> = Vec::new();
    let mut entry_names: Vec<&'static str> = Vec::new();
    let mut entry_of: HashMap<TypeIndex, usize> = HashMap::new();
    let mut standalone: HashMap<String, usize> = HashMap::new();
    for (idx, ty) in table.iter() {
        if is_class_entry(ty) {
            entry_of.insert(idx, entry_list.len());
            entry_list.push(idx);
            entry_names.push(CLASS_ENTRY);
        } else if is_standalone_enum(ty) {
            entry_of.insert(idx, entry_list.len());
            standalone.insert(ty.name.clone(), entry_list.len());
            entry_list.push(idx);
            entry_names.push(ENUM_ENTRY);
        }
    }

    let mut w = Writer::new();
    w.set_big_endian(big_endian);
    let mut child: Vec<ChildPointer> = Vec::new();
    let mut specs: Vec<EntrySpec> = Vec::new();
    // (slot, target entry) pairs turned into entry pointers once every
    // entry start is known.
    let mut pending: Vec<(u32, usize)> = Vec::new();
    let mut starts = vec![0u32; entry_list.len()];

    for (e, &ti) in entry_list.iter().enumerate() {
        w.align(16, 0xFF);
        let start = w.offset() as u32;
        starts[e] = start;
        specs.push(EntrySpec {
            offset: start,
            name_section: 0,
            name_offset: 0,
        });
        let ty = table.get(ti)?;

        if entry_names[e] == ENUM_ENTRY {
            w.reserve(es.size as usize);
            write_enum_payload(&mut w, &ty.enums[0], start, &es, &is, pointer_size, &mut child);
            continue;
        }

        // Plan members first so auto-embedded enum definitions land in
        // the declared-enums block.
        let mut embedded: Vec<TypeEnum> = ty.enums.clone();
        let mut plans: Vec<(WireCodes, Option<EnumRef>)> = Vec::new();
        for member in &ty.members {
            let mut wire = derive_codes(table, member.type_index, pointer_size)?;
            if let Some((t, s)) = member.raw_codes {
                wire.type_code = t;
                wire.subtype_code = s;
            }
            let enum_ref = match &wire.enum_name {
                None => None,
                Some(name) => {
                    if let Some(j) = member.enum_index.filter(|&j| j < embedded.len()) {
                        Some(EnumRef::Embedded(j))
                    } else if let Some(j) = embedded.iter().position(|d| &d.name == name) {
                        Some(EnumRef::Embedded(j))
                    } else if let Some(&entry) = standalone.get(name) {
                        Some(EnumRef::Standalone(entry))
                    } else {
                        let def = table
                            .get(table.concrete(member.type_index)?)?
                            .enums
                            .first()
                            .cloned()
                            .ok_or_else(|| {
                                HkxError::MalformedSection(format!(
                                    "enum member {}::{} lost its definition",
                                    ty.name, member.name
                                ))
                            })?;
                        embedded.push(def);
                        Some(EnumRef::Embedded(embedded.len() - 1))
                    }
                }
            };
            plans.push((wire, enum_ref));
        }

        w.reserve(cs.size as usize);
        child.push(ChildPointer {
            src: start,
            dst: w.offset() as u32,
        });
        w.write_cstr(&ty.name);

        let mut enum_recs = Vec::with_capacity(embedded.len());
        if !embedded.is_empty() {
            w.align(pointer_size as usize, 0);
            let enums_block = w.offset() as u32;
            w.reserve(embedded.len() * es.size as usize);
            child.push(ChildPointer {
                src: start + cs.enums,
                dst: enums_block,
            });
            for (j, def) in embedded.iter().enumerate() {
                let rec = enums_block + j as u32 * es.size;
                enum_recs.push(rec);
                write_enum_payload(&mut w, def, rec, &es, &is, pointer_size, &mut child);
            }
        }

        if !ty.members.is_empty() {
            w.align(pointer_size as usize, 0);
            let members_block = w.offset() as u32;
            w.reserve(ty.members.len() * ms.size as usize);
            child.push(ChildPointer {
                src: start + cs.members,
                dst: members_block,
            });
            for (j, (member, (wire, enum_ref))) in
                ty.members.iter().zip(plans.iter()).enumerate()
            {
                let rec = members_block + j as u32 * ms.size;
                child.push(ChildPointer {
                    src: rec,
                    dst: w.offset() as u32,
                });
                w.write_cstr(&member.name);
                {
                    let mut patch = w.at((rec + ms.type_) as usize);
                    patch.write_u8(wire.type_code);
                    patch.write_u8(wire.subtype_code);
                    patch.write_u16(wire.c_array);
                    patch.write_u16(member.flags as u16);
                    patch.write_u16(member.offset as u16);
                }
                if !wire.class_target.is_none() {
                    let target = entry_of.get(&wire.class_target).ok_or_else(|| {
                        HkxError::MalformedSection(format!(
                            "member {}::{} references a class outside the type section",
                            ty.name, member.name
                        ))
                    })?;
                    pending.push((rec + ms.class, *target));
                }
                match enum_ref {
                    Some(EnumRef::Embedded(k)) => child.push(ChildPointer {
                        src: rec + ms.enum_,
                        dst: enum_recs[*k],
                    }),
                    Some(EnumRef::Standalone(entry)) => pending.push((rec + ms.enum_, *entry)),
                    None => {}
                }
            }
        }

        if !ty.parent.is_none() {
            let parent_entry = entry_of.get(&ty.parent).ok_or_else(|| {
                HkxError::MalformedSection(format!(
                    "parent of {} is not a type-section entry",
                    ty.name
                ))
            })?;
            pending.push((start + cs.parent, *parent_entry));
        }

        {
            let mut patch = w.at((start + cs.object_size) as usize);
            patch.write_i32(ty.byte_size as i32);
            patch.write_i32(ty.interfaces.len() as i32);
        }
        w.at((start + cs.num_enums) as usize)
            .write_i32(embedded.len() as i32);
        w.at((start + cs.num_members) as usize)
            .write_i32(ty.members.len() as i32);
        {
            let mut patch = w.at((start + cs.flags) as usize);
            patch.write_u32(0);
            patch.write_i32(ty.version.unwrap_or(0));
        }
    }
    w.align(16, 0xFF);

    let entry_pointers = pending
        .into_iter()
        .map(|(src, target)| EntryPointer {
            src,
            dst_section: TYPE_SECTION as u32,
            dst_offset: starts[target],
        })
        .collect();

    Ok(TypeSectionOut {
        data: w.into_bytes(),
        child_pointers: child,
        entry_pointers,
        entry_specs: specs,
        entry_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packfile::fixups::{resolve, Section, SectionEntries};
    use crate::packfile::header::SectionHeader;

    fn sample_table() -> TypeTable {
        let mut b = SchemaBuilder::new(8);
        let u16_ty = b.int(false, IntWidth::W16);
        let i16_ty = b.int(true, IntWidth::W16);
        let i8_ty = b.int(true, IntWidth::W8);
        let string = b.string();
        let real = b.real();
        let base = b
            .class(
                "hkReferencedObject",
                TypeIndex::NONE,
                0,
                &[("memSizeAndFlags", u16_ty), ("referenceCount", i16_ty)],
            )
            .expect("class");
        let weights = b.array(real).expect("array");
        let def = TypeEnum::with_items("BlendHint", &[("NORMAL", 0), ("ADDITIVE", 1)]);
        let hint = b.enum_of(def, i8_ty).expect("enum");
        let base_ptr = b.ref_ptr(base).expect("ptr");
        b.class(
            "hkaAnimationBinding",
            base,
            2,
            &[
                ("originalSkeletonName", string),
                ("animation", base_ptr),
                ("weights", weights),
                ("blendHint", hint),
            ],
        )
        .expect("class");
        b.into_table()
    }

    fn reparse(out: &TypeSectionOut, pointer_size: u32) -> TypeTable {
        let len = out.data.len() as u32;
        let types = Section {
            header: SectionHeader {
                tag: "__types__".into(),
                absolute_start: 0,
                child_pointers: len,
                entry_pointers: len,
                entry_specs: len,
                exports: len,
                imports: len,
                end: len,
            },
            data: out.data.clone(),
            child_pointers: out.child_pointers.clone(),
            entry_pointers: out.entry_pointers.clone(),
            entry_specs: out.entry_specs.clone(),
        };
        let classnames = Section {
            header: SectionHeader {
                tag: "__classnames__".into(),
                absolute_start: 0,
                child_pointers: 0,
                entry_pointers: 0,
                entry_specs: 0,
                exports: 0,
                imports: 0,
                end: 0,
            },
            data: Vec::new(),
            child_pointers: Vec::new(),
            entry_pointers: Vec::new(),
            entry_specs: Vec::new(),
        };
        let mut parts = vec![
            SectionEntries::partition(&classnames).expect("partition"),
            SectionEntries::partition(&types).expect("partition"),
        ];
        let sections = [classnames, types];
        resolve(&sections, &mut parts).expect("resolve");
        let names: Vec<String> = out.entry_names.iter().map(|s| s.to_string()).collect();
        parse(
            &sections[1].data,
            false,
            pointer_size,
            1,
            &parts[1].entries,
            &names,
        )
        .expect("parse")
    }

    #[test]
    fn test_type_section_roundtrip() {
        let table = sample_table();
        let out = write(&table, false, 8).expect("write");
        assert_eq!(out.entry_names, vec![CLASS_ENTRY, CLASS_ENTRY]);

        let parsed = reparse(&out, 8);
        let binding = parsed.find("hkaAnimationBinding").expect("class");
        let ty = parsed.get(binding).expect("type");
        assert_eq!(ty.version, Some(2));
        assert_eq!(parsed.get(ty.parent).expect("parent").name, "hkReferencedObject");

        let original = table.find("hkaAnimationBinding").expect("class");
        let original_ty = table.get(original).expect("type");
        assert_eq!(ty.byte_size, original_ty.byte_size);
        for (a, b) in ty.members.iter().zip(original_ty.members.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.offset, b.offset);
        }

        // Auto-embedded enum definition comes back as a declared enum.
        assert_eq!(ty.enums.len(), 1);
        assert_eq!(ty.enums[0].name, "BlendHint");
        let hint = ty.member("blendHint").expect("member");
        assert_eq!(hint.enum_index, Some(0));
        assert_eq!(hint.raw_codes, Some((codes::ENUM, codes::INT8)));
    }

    #[test]
    fn test_type_section_stable_reencode() {
        let table = sample_table();
        let first = write(&table, false, 8).expect("write");
        let parsed = reparse(&first, 8);
        let second = write(&parsed, false, 8).expect("write");
        assert_eq!(first.data, second.data);
        assert_eq!(first.child_pointers, second.child_pointers);
        assert_eq!(first.entry_pointers, second.entry_pointers);
        assert_eq!(first.entry_specs, second.entry_specs);
    }

    #[test]
    fn test_standalone_enum_entry() {
        let mut b = SchemaBuilder::new(4);
        let def = TypeEnum::with_items("hkaEventType", &[("ANNOTATION", 0), ("USER", 1)]);
        let mut ty = Type::new(
            "hkaEventType",
            TypeKind::Int {
                signed: true,
                width: IntWidth::W32,
            },
        )
        .with_size(4, 4);
        ty.enums.push(def.clone());
        let standalone = b.table_mut().push(ty);
        let i32_ty = b.int(true, IntWidth::W32);
        let member_ty = b.enum_of(def, i32_ty).expect("enum");
        b.class("hkaEvent", TypeIndex::NONE, 1, &[("kind", member_ty)])
            .expect("class");
        let table = b.into_table();
        assert!(is_standalone_enum(table.get(standalone).expect("type")));

        let out = write(&table, false, 4).expect("write");
        assert_eq!(out.entry_names, vec![ENUM_ENTRY, CLASS_ENTRY]);
        // The member's enum reference is an entry pointer to the
        // standalone definition, not an embedded record.
        assert!(out
            .entry_pointers
            .iter()
            .any(|ep| ep.dst_offset == out.entry_specs[0].offset));
        // Flags slot of the enum record is written, and written as zero.
        let es = enum_slots(4);
        let flags_slot = out.entry_specs[0].offset as usize + es.flags as usize;
        assert_eq!(&out.data[flags_slot..flags_slot + 4], &[0u8; 4]);

        let parsed = reparse(&out, 4);
        let event = parsed.find("hkaEvent").expect("class");
        let member = parsed.get(event).expect("type").member("kind").cloned().expect("member");
        let mt = parsed.get(parsed.concrete(member.type_index).expect("concrete")).expect("type");
        assert_eq!(mt.enums[0].name, "hkaEventType");
        assert_eq!(member.enum_index, None);
    }

    #[test]
    fn test_derive_codes_for_wrappers() {
        let mut b = SchemaBuilder::new(8);
        let real = b.real();
        let v4 = b.named_tuple("hkVector4", 4, 16);
        let arr = b.array(v4).expect("array");
        let tup = b.tuple(real, 3).expect("tuple");
        let cls = b.class("Dummy", TypeIndex::NONE, 0, &[]).expect("class");
        let ptr = b.ref_ptr(cls).expect("ptr");
        let parr = b.array(ptr).expect("array");
        let table = b.into_table();

        let c = derive_codes(&table, v4, 8).expect("codes");
        assert_eq!((c.type_code, c.subtype_code), (codes::VECTOR4, 0));

        let c = derive_codes(&table, arr, 8).expect("codes");
        assert_eq!((c.type_code, c.subtype_code), (codes::ARRAY, codes::VECTOR4));

        let c = derive_codes(&table, tup, 8).expect("codes");
        assert_eq!((c.type_code, c.c_array), (codes::REAL, 3));

        let c = derive_codes(&table, parr, 8).expect("codes");
        assert_eq!((c.type_code, c.subtype_code), (codes::ARRAY, codes::POINTER));
        assert_eq!(c.class_target, cls);
    }
}
