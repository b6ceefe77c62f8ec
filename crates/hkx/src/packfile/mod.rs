// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Legacy packfile container.
//!
//! A packfile is three sections — class names, types, data — each with
//! fixup tables that relocate pointers after load. Layout (pointer
//! width, endianness, format version) is fixed per file and recorded in
//! the header; decode adapts to it, encode reproduces it.

pub mod fixups;
pub mod header;
pub mod read;
pub mod typesec;
pub mod write;

pub use header::{FormatVersion, PackfileHeader};
pub use read::{unpack, Unpacked};
pub use write::pack;
