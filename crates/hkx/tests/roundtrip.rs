// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end codec properties: byte-identical round trips, idempotent
//! packing, shared-reference identity and type-set minimization, for
//! both container encodings.

use hkx::graph::{Elements, NodeArena, NodeHandle, Value};
use hkx::packfile::{self, header::SectionHeader, FormatVersion, PackfileHeader};
use hkx::reconcile::{diff, DiffOptions};
use hkx::schema::{builtin::builtin_table, TypeIndex, TypeTable};
use hkx::ser::{Reader, Writer};
use hkx::tagfile::{self, chunk::Chunk, PackOrder, TagfileHeader};

const OBJECT_FLAG: u32 = 0x1000_0000;
const ARRAY_FLAG: u32 = 0x2000_0000;
const TYPE_MASK: u32 = 0x0FFF_FFFF;

fn member_ti(types: &TypeTable, class: TypeIndex, member: &str) -> TypeIndex {
    types
        .all_members(class)
        .expect("members")
        .iter()
        .find(|m| m.name == member)
        .map(|m| m.type_index)
        .expect("member")
}

/// Root container holding one skeleton with two bones, typed against a
/// built-in schema table.
fn skeleton_scene(types: &TypeTable) -> (NodeArena, NodeHandle) {
    let bone_ty = types.find("hkaBone").expect("hkaBone");
    let skel_ty = types.find("hkaSkeleton").expect("hkaSkeleton");
    let variant_ty = types
        .find("hkRootLevelContainer::NamedVariant")
        .expect("NamedVariant");
    let root_ty = types.find("hkRootLevelContainer").expect("root container");

    let string = member_ti(types, bone_ty, "name");
    let boolean = member_ti(types, bone_ty, "lockTranslation");
    let u16_ty = member_ti(types, skel_ty, "memSizeAndFlags");
    let i16_ty = member_ti(types, skel_ty, "referenceCount");
    let parents_ty = member_ti(types, skel_ty, "parentIndices");
    let bones_ty = member_ti(types, skel_ty, "bones");
    let poses_ty = member_ti(types, skel_ty, "referencePose");
    let floats_ty = member_ti(types, skel_ty, "referenceFloats");
    let variants_ty = member_ti(types, root_ty, "namedVariants");
    let ptr_ty = member_ti(types, variant_ty, "variant");

    let mut arena = NodeArena::new();
    let bone = |arena: &mut NodeArena, name: &str, lock: bool| {
        let name = arena.alloc(string, Value::String(Some(name.into())));
        let lock = arena.alloc(boolean, Value::Bool(lock));
        arena.alloc(
            bone_ty,
            Value::Class(vec![("name".into(), name), ("lockTranslation".into(), lock)]),
        )
    };

    let msf = arena.alloc(u16_ty, Value::Int(0));
    let rc = arena.alloc(i16_ty, Value::Int(1));
    let name = arena.alloc(string, Value::String(Some("TestRig".into())));
    let parents = arena.alloc(parents_ty, Value::Array(Elements::Ints(vec![-1, 0])));
    let b0 = bone(&mut arena, "Root", true);
    let b1 = bone(&mut arena, "Spine", false);
    let bones = arena.alloc(bones_ty, Value::Array(Elements::Nodes(vec![b0, b1])));
    let poses = arena.alloc(poses_ty, Value::Array(Elements::Nodes(Vec::new())));
    let floats = arena.alloc(floats_ty, Value::Array(Elements::Floats(Vec::new())));
    let skeleton = arena.alloc(
        skel_ty,
        Value::Class(vec![
            ("memSizeAndFlags".into(), msf),
            ("referenceCount".into(), rc),
            ("name".into(), name),
            ("parentIndices".into(), parents),
            ("bones".into(), bones),
            ("referencePose".into(), poses),
            ("referenceFloats".into(), floats),
        ]),
    );

    let vname = arena.alloc(string, Value::String(Some("Merged skeleton".into())));
    let vclass = arena.alloc(string, Value::String(Some("hkaSkeleton".into())));
    let vptr = arena.alloc(ptr_ty, Value::Pointer(Some(skeleton)));
    let variant = arena.alloc(
        variant_ty,
        Value::Class(vec![
            ("name".into(), vname),
            ("className".into(), vclass),
            ("variant".into(), vptr),
        ]),
    );
    let list = arena.alloc(variants_ty, Value::Array(Elements::Nodes(vec![variant])));
    let root = arena.alloc(root_ty, Value::Class(vec![("namedVariants".into(), list)]));
    (arena, root)
}

/// Parse the fixed header plus the three section headers of a packfile.
fn section_headers(bytes: &[u8]) -> Vec<SectionHeader> {
    let mut reader = Reader::new(bytes);
    PackfileHeader::read(&mut reader).expect("header");
    (0..3)
        .map(|_| SectionHeader::read(&mut reader).expect("section header"))
        .collect()
}

#[test]
fn test_packfile_round_trip_is_byte_identical() {
    let types = builtin_table("hk_2010.2.0-r1", 8).expect("table");
    let (arena, root) = skeleton_scene(&types);
    let header = PackfileHeader::new(FormatVersion::V8, 8, "hk_2010.2.0-r1");

    let first = packfile::pack(&arena, root, &types, &header).expect("pack");
    let file = packfile::unpack(&first).expect("unpack");
    let second = packfile::pack(&file.arena, file.root, &file.types, &file.header).expect("pack");
    assert_eq!(first, second);
}

#[test]
fn test_packfile_unpack_preserves_graph() {
    let types = builtin_table("hk_2010.2.0-r1", 8).expect("table");
    let (arena, root) = skeleton_scene(&types);
    let header = PackfileHeader::new(FormatVersion::V8, 8, "hk_2010.2.0-r1");

    let bytes = packfile::pack(&arena, root, &types, &header).expect("pack");
    let mut file = packfile::unpack(&bytes).expect("unpack");
    let diffs = diff(&mut file.arena, file.root, &arena, root, DiffOptions::default())
        .expect("diff");
    assert!(diffs.is_empty(), "{:?}", diffs);
}

#[test]
fn test_pack_is_idempotent_for_both_formats() {
    let types = builtin_table("hk_2010.2.0-r1", 8).expect("table");
    let (arena, root) = skeleton_scene(&types);

    let ph = PackfileHeader::new(FormatVersion::V8, 8, "hk_2010.2.0-r1");
    let p1 = packfile::pack(&arena, root, &types, &ph).expect("pack");
    let p2 = packfile::pack(&arena, root, &types, &ph).expect("pack");
    assert_eq!(p1, p2);

    let th = TagfileHeader::new("20160100");
    let t1 = tagfile::pack(&arena, root, &types, &th, PackOrder::Empirical).expect("pack");
    let t2 = tagfile::pack(&arena, root, &types, &th, PackOrder::Empirical).expect("pack");
    assert_eq!(t1, t2);
}

#[test]
fn test_tagfile_round_trip_is_byte_identical() {
    let types = builtin_table("hk_2014.1.0-r1", 8).expect("table");
    let (arena, root) = skeleton_scene_2014(&types);
    let header = TagfileHeader::new("20160100");

    let first = tagfile::pack(&arena, root, &types, &header, PackOrder::Empirical).expect("pack");
    let file = tagfile::unpack(&first).expect("unpack");
    let second = tagfile::pack(
        &file.arena,
        file.root,
        &file.types,
        &file.header,
        PackOrder::Empirical,
    )
    .expect("pack");
    assert_eq!(first, second);
}

/// The 2014 family adds `floatSlots`; reuse the 2010 builder and extend.
fn skeleton_scene_2014(types: &TypeTable) -> (NodeArena, NodeHandle) {
    let (mut arena, root) = skeleton_scene(types);
    let skel_ty = types.find("hkaSkeleton").expect("hkaSkeleton");
    let slots_ty = member_ti(types, skel_ty, "floatSlots");
    let slots = arena.alloc(slots_ty, Value::Array(Elements::Nodes(Vec::new())));

    let list = arena.field(root, "namedVariants").expect("field");
    let variant = match arena.element(list, 0).expect("element") {
        hkx::graph::ElementRef::Node(h) => h,
        other => panic!("expected node element, got {:?}", other),
    };
    let skeleton = arena
        .resolve(arena.field(variant, "variant").expect("field"))
        .expect("resolve");
    match &mut arena.get_mut(skeleton).expect("skeleton").value {
        Value::Class(fields) => fields.push(("floatSlots".into(), slots)),
        _ => panic!("skeleton is not a class node"),
    }
    (arena, root)
}

// A V8 little-endian file with 4-byte pointers and an empty variant
// array keeps its three-section layout and end offsets across a round
// trip.
#[test]
fn test_v8_narrow_empty_container_layout_is_stable() {
    let types = builtin_table("hk_2010.2.0-r1", 4).expect("table");
    let root_ty = types.find("hkRootLevelContainer").expect("root container");
    let variants_ty = member_ti(&types, root_ty, "namedVariants");

    let mut arena = NodeArena::new();
    let list = arena.alloc(variants_ty, Value::Array(Elements::Nodes(Vec::new())));
    let root = arena.alloc(root_ty, Value::Class(vec![("namedVariants".into(), list)]));

    let header = PackfileHeader::new(FormatVersion::V8, 4, "hk_2010.2.0-r1");
    assert!(!header.big_endian);

    let first = packfile::pack(&arena, root, &types, &header).expect("pack");
    let file = packfile::unpack(&first).expect("unpack");
    assert_eq!(file.header.pointer_size, 4);
    let second = packfile::pack(&file.arena, file.root, &file.types, &file.header).expect("pack");
    assert_eq!(first, second);

    let before = section_headers(&first);
    let after = section_headers(&second);
    assert_eq!(before.len(), 3);
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a.tag, b.tag);
        assert_eq!(a.end, b.end);
    }
    assert_eq!(
        before.iter().map(|s| s.tag.as_str()).collect::<Vec<_>>(),
        vec!["__classnames__", "__types__", "__data__"]
    );
}

#[test]
fn test_shared_reference_decodes_to_one_node_and_one_item() {
    let types = builtin_table("hk_2010.2.0-r1", 8).expect("table");
    let (mut arena, root) = skeleton_scene(&types);

    // Second variant aimed at the same skeleton.
    let root_ty = types.find("hkRootLevelContainer").expect("root container");
    let variant_ty = types
        .find("hkRootLevelContainer::NamedVariant")
        .expect("NamedVariant");
    let variants_ty = member_ti(&types, root_ty, "namedVariants");
    let ptr_ty = member_ti(&types, variant_ty, "variant");
    let bone_ty = types.find("hkaBone").expect("hkaBone");
    let string = member_ti(&types, bone_ty, "name");

    let list = arena.field(root, "namedVariants").expect("field");
    let first_variant = match arena.element(list, 0).expect("element") {
        hkx::graph::ElementRef::Node(h) => h,
        other => panic!("expected node element, got {:?}", other),
    };
    let skeleton = arena
        .resolve(arena.field(first_variant, "variant").expect("field"))
        .expect("resolve");

    let vname = arena.alloc(string, Value::String(Some("Alias".into())));
    let vclass = arena.alloc(string, Value::String(Some("hkaSkeleton".into())));
    let vptr = arena.alloc(ptr_ty, Value::Pointer(Some(skeleton)));
    let second_variant = arena.alloc(
        variant_ty,
        Value::Class(vec![
            ("name".into(), vname),
            ("className".into(), vclass),
            ("variant".into(), vptr),
        ]),
    );
    match &mut arena.get_mut(list).expect("list").value {
        Value::Array(Elements::Nodes(v)) => v.push(second_variant),
        _ => panic!("variant list is not a node array"),
    }

    let header = TagfileHeader::new("20160100");
    let bytes = tagfile::pack(&arena, root, &types, &header, PackOrder::Empirical).expect("pack");

    // Decoded graph: both pointers land on one node.
    let file = tagfile::unpack(&bytes).expect("unpack");
    let list = file.arena.field(file.root, "namedVariants").expect("field");
    let target = |i: usize| {
        let v = match file.arena.element(list, i).expect("element") {
            hkx::graph::ElementRef::Node(h) => h,
            other => panic!("expected node element, got {:?}", other),
        };
        file.arena
            .resolve(file.arena.field(v, "variant").expect("field"))
            .expect("resolve")
    };
    assert_eq!(target(0), target(1));

    // Encoded form: exactly one object item of the skeleton's type.
    let skel_out = file.types.find("hkaSkeleton").expect("hkaSkeleton");
    let records = item_records(&bytes);
    let skeleton_items = records
        .iter()
        .filter(|&&(word, _, _)| word & OBJECT_FLAG != 0 && word & TYPE_MASK == skel_out.0)
        .count();
    assert_eq!(skeleton_items, 1);
}

/// (type word, offset, count) triples from the ITEM chunk.
fn item_records(bytes: &[u8]) -> Vec<(u32, u32, u32)> {
    let tag0 = Chunk::parse(bytes).expect("chunk");
    let indx = tag0.require("INDX").expect("INDX");
    let payload = &indx.require("ITEM").expect("ITEM").payload;
    let mut r = Reader::new(payload);
    let mut out = Vec::new();
    while !r.is_eof() {
        let word = r.read_u32().expect("word");
        let offset = r.read_u32().expect("offset");
        let count = r.read_u32().expect("count");
        out.push((word, offset, count));
    }
    out
}

#[test]
fn test_tagfile_item_and_patch_accounting() {
    let types = builtin_table("hk_2010.2.0-r1", 8).expect("table");
    let (arena, root) = skeleton_scene(&types);
    let header = TagfileHeader::new("20160100");
    let bytes = tagfile::pack(&arena, root, &types, &header, PackOrder::Empirical).expect("pack");
    let file = tagfile::unpack(&bytes).expect("unpack");

    let records = item_records(&bytes);
    assert_eq!(records[0], (0, 0, 0));

    // One object item for the skeleton; its directly-owned string and
    // non-empty arrays (name, parentIndices, bones) get one item each.
    // Empty arrays (referencePose, referenceFloats) get none.
    let skel_out = file.types.find("hkaSkeleton").expect("hkaSkeleton");
    let objects: Vec<_> = records
        .iter()
        .filter(|&&(word, _, _)| word & OBJECT_FLAG != 0)
        .collect();
    assert_eq!(objects.len(), 2); // root container + skeleton
    assert_eq!(
        objects
            .iter()
            .filter(|&&&(word, _, _)| word & TYPE_MASK == skel_out.0)
            .count(),
        1
    );

    // Bone names, skeleton name, variant name/className: five strings.
    let strings = records
        .iter()
        .filter(|&&(word, _, count)| word & ARRAY_FLAG != 0 && word & TYPE_MASK == 0 && count > 0)
        .count();
    assert_eq!(strings, 5);

    // Typed element runs: namedVariants, parentIndices, bones.
    let arrays = records
        .iter()
        .filter(|&&(word, _, _)| word & ARRAY_FLAG != 0 && word & TYPE_MASK != 0)
        .count();
    assert_eq!(arrays, 3);

    // Patch table: groups keyed by ascending type index, offsets sorted,
    // one offset per reference slot.
    let tag0 = Chunk::parse(&bytes).expect("chunk");
    let indx = tag0.require("INDX").expect("INDX");
    let payload = &indx.require("PTCH").expect("PTCH").payload;
    let mut r = Reader::new(payload);
    let mut last_type = None;
    let mut total = 0usize;
    while !r.is_eof() {
        let ti = r.read_u32().expect("type");
        let count = r.read_u32().expect("count");
        if let Some(prev) = last_type {
            assert!(ti > prev, "patch groups out of order");
        }
        last_type = Some(ti);
        let mut last_off = None;
        for _ in 0..count {
            let off = r.read_u32().expect("offset");
            if let Some(prev) = last_off {
                assert!(off > prev, "patch offsets out of order");
            }
            last_off = Some(off);
        }
        total += count as usize;
    }
    // 5 string slots + 3 array slots + 1 pointer slot.
    assert_eq!(total, 9);
}

#[test]
fn test_tagfile_carries_minimal_type_set() {
    let types = builtin_table("hk_2010.2.0-r1", 8).expect("table");
    let (arena, root) = skeleton_scene(&types);
    let header = TagfileHeader::new("20160100");
    let bytes = tagfile::pack(&arena, root, &types, &header, PackOrder::Empirical).expect("pack");
    let file = tagfile::unpack(&bytes).expect("unpack");

    assert!(file.types.len() < types.len());
    assert!(file.types.find("hkaBone").is_ok());
    assert!(file.types.find("hkaSkeleton").is_ok());
    assert!(file.types.find_first("hkaAnimationBinding").is_none());
    assert!(file.types.find_first("hkaSplineCompressedAnimation").is_none());

    let mut names: Vec<&str> = file.types.iter().map(|(_, t)| t.name.as_str()).collect();
    let before = names.len();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), before);
}

// Boundary values of the length-prefixed integer encoding, each through
// its documented byte width.
#[test]
fn test_varint_boundary_widths() {
    use hkx::tagfile::varint::{read_varint, write_varint};

    for (value, width) in [
        (0u64, 1usize),
        (0x7F, 1),
        (0x80, 2),
        (0x3FFF, 2),
        (0x4000, 3),
        (0x1F_FFFF, 3),
        (0x20_0000, 5),
    ] {
        let mut w = Writer::new();
        write_varint(&mut w, value).expect("write");
        assert_eq!(w.as_bytes().len(), width, "value {:#x}", value);
        let mut r = Reader::new(w.as_bytes());
        assert_eq!(read_varint(&mut r).expect("read"), value);
        assert!(r.is_eof());
    }
}

#[test]
fn test_format_detection_round_trip() {
    let types = builtin_table("hk_2010.2.0-r1", 8).expect("table");
    let (arena, root) = skeleton_scene(&types);

    let ph = PackfileHeader::new(FormatVersion::V8, 8, "hk_2010.2.0-r1");
    let pack_bytes = packfile::pack(&arena, root, &types, &ph).expect("pack");
    assert_eq!(hkx::detect(&pack_bytes), Some(hkx::Format::Packfile));

    let th = TagfileHeader::new("20160100");
    let tag_bytes = tagfile::pack(&arena, root, &types, &th, PackOrder::Empirical).expect("pack");
    assert_eq!(hkx::detect(&tag_bytes), Some(hkx::Format::Tagfile));
}
