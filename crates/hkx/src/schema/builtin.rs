// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in schema version tables.
//!
//! Packfiles with an empty type section rely on the content-version
//! string in the header to select a matching built-in table. The tables
//! are constructed as data through [`SchemaBuilder`] — one function per
//! supported release family, never per-type code.

use super::build::SchemaBuilder;
use super::kind::IntWidth;
use super::{TypeEnum, TypeIndex, TypeTable};
use crate::error::Result;

/// The well-known root container class every HKX graph hangs off.
pub const ROOT_CONTAINER: &str = "hkRootLevelContainer";

/// Select a built-in table for a header content-version string
/// (e.g. `hk_2010.2.0-r1`), built for the file's pointer width.
///
/// Returns `None` for release families outside the built-in set; forward
/// compatibility with unknown schema versions is a non-goal.
pub fn builtin_table(contents_version: &str, pointer_size: u32) -> Option<TypeTable> {
    let family = contents_version
        .strip_prefix("hk_")
        .and_then(|rest| rest.split('.').next())?;
    let table = match family {
        "2010" | "2011" | "2012" => table_2010(pointer_size),
        "2014" | "2015" => table_2014(pointer_size),
        _ => return None,
    };
    table.ok()
}

/// Shared base classes plus the animation types carried by both families.
fn common(builder: &mut SchemaBuilder, with_float_slots: bool) -> Result<()> {
    let string = builder.string();
    let boolean = builder.boolean();
    let real = builder.real();
    let i16_ty = builder.int(true, IntWidth::W16);
    let u16_ty = builder.int(false, IntWidth::W16);
    let u32_ty = builder.int(false, IntWidth::W32);
    let qstransform = builder.named_tuple("hkQsTransform", 12, 16);

    let base = builder.class("hkBaseObject", TypeIndex::NONE, 0, &[])?;
    {
        // Reserve the vtable slot.
        let psize = builder.pointer_size();
        let ty = builder.table_mut().get_mut(base)?;
        ty.byte_size = psize;
        ty.alignment = psize;
    }
    let referenced = builder.class(
        "hkReferencedObject",
        base,
        0,
        &[("memSizeAndFlags", u16_ty), ("referenceCount", i16_ty)],
    )?;

    let ref_variant = builder.pointer(referenced)?;
    let named_variant = builder.class(
        "hkRootLevelContainer::NamedVariant",
        TypeIndex::NONE,
        0,
        &[("name", string), ("className", string), ("variant", ref_variant)],
    )?;
    let named_variant_array = builder.array(named_variant)?;
    builder.class(
        ROOT_CONTAINER,
        TypeIndex::NONE,
        1,
        &[("namedVariants", named_variant_array)],
    )?;

    let bone = builder.class(
        "hkaBone",
        TypeIndex::NONE,
        0,
        &[("name", string), ("lockTranslation", boolean)],
    )?;

    let parent_indices = builder.array(i16_ty)?;
    let bones = builder.array(bone)?;
    let poses = builder.array(qstransform)?;
    let floats = builder.array(real)?;
    let mut skeleton_members = vec![
        ("name", string),
        ("parentIndices", parent_indices),
        ("bones", bones),
        ("referencePose", poses),
        ("referenceFloats", floats),
    ];
    let string_array = builder.array(string)?;
    if with_float_slots {
        skeleton_members.push(("floatSlots", string_array));
    }
    let skeleton = builder.class(
        "hkaSkeleton",
        referenced,
        if with_float_slots { 5 } else { 4 },
        &skeleton_members,
    )?;

    let blend_hint = TypeEnum::with_items("BlendHint", &[("NORMAL", 0), ("ADDITIVE", 1)]);
    let i8_ty = builder.int(true, IntWidth::W8);
    let blend_hint_ty = builder.enum_of(blend_hint, i8_ty)?;
    let skeleton_ptr = builder.ref_ptr(skeleton)?;
    let animation_ptr = builder.ref_ptr(referenced)?;
    let transform_tracks = builder.array(i16_ty)?;
    let binding = builder.class(
        "hkaAnimationBinding",
        referenced,
        2,
        &[
            ("originalSkeletonName", string),
            ("animation", animation_ptr),
            ("transformTrackToBoneIndices", transform_tracks),
            ("blendHint", blend_hint_ty),
        ],
    )?;

    let skeletons = builder.array(skeleton_ptr)?;
    let animations = builder.array(animation_ptr)?;
    let binding_ptr = builder.ref_ptr(binding)?;
    let bindings = builder.array(binding_ptr)?;
    builder.class(
        "hkaAnimationContainer",
        referenced,
        1,
        &[
            ("skeletons", skeletons),
            ("animations", animations),
            ("bindings", bindings),
            ("attachments", animations),
            ("skins", animations),
        ],
    )?;

    // Spline-compressed payloads stay opaque: a data blob plus the
    // bookkeeping the runtime needs to hand it to the decompressor.
    let u8_ty = builder.int(false, IntWidth::W8);
    let data = builder.array(u8_ty)?;
    builder.class(
        "hkaSplineCompressedAnimation",
        referenced,
        1,
        &[
            ("duration", real),
            ("numFrames", u32_ty),
            ("numBlocks", u32_ty),
            ("data", data),
        ],
    )?;

    // Synonym used by a handful of attribute classes.
    let time = builder.real();
    builder.alias("hkTime", time);
    Ok(())
}

fn table_2010(pointer_size: u32) -> Result<TypeTable> {
    let mut builder = SchemaBuilder::new(pointer_size);
    common(&mut builder, false)?;
    Ok(builder.into_table())
}

fn table_2014(pointer_size: u32) -> Result<TypeTable> {
    let mut builder = SchemaBuilder::new(pointer_size);
    common(&mut builder, true)?;
    Ok(builder.into_table())
}
