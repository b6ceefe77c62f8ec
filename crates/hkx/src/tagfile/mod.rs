// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Modern tagfile container.
//!
//! A tagfile is a tree of tagged chunks under a `TAG0` root: SDK version,
//! raw data image, self-describing type section and an item index. Unlike
//! the packfile's fixup tables, every reference goes through items —
//! typed (offset, count) views into the data image addressed by 1-based
//! index. Byte order is fixed little-endian; only the chunk length words
//! are big-endian.

pub mod chunk;
pub mod read;
pub mod typesec;
pub mod varint;
pub mod write;

pub use read::{is_tagfile, unpack, TagfileHeader, Unpacked};
pub use write::{pack, PackOrder};
