// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HKX - Havok binary object-graph codec
//!
//! Reader and writer for the two HKX container encodings: the legacy
//! section-based *packfile* and the modern chunk-based *tagfile*. Both
//! decode into the same in-memory model — a [`graph::NodeArena`] of typed
//! values plus a [`schema::TypeTable`] describing their layout — and both
//! re-encode from it, byte-identically for files this crate produced.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hkx::{detect, Format};
//!
//! fn main() -> hkx::Result<()> {
//!     let bytes = std::fs::read("skeleton.hkx").unwrap();
//!     match detect(&bytes) {
//!         Some(Format::Packfile) => {
//!             let file = hkx::packfile::unpack(&bytes)?;
//!             let out = hkx::packfile::pack(&file.arena, file.root, &file.types, &file.header)?;
//!             assert_eq!(out, bytes);
//!         }
//!         Some(Format::Tagfile) => {
//!             let file = hkx::tagfile::unpack(&bytes)?;
//!             let out = hkx::tagfile::pack(
//!                 &file.arena,
//!                 file.root,
//!                 &file.types,
//!                 &file.header,
//!                 hkx::tagfile::PackOrder::default(),
//!             )?;
//!             assert_eq!(out, bytes);
//!         }
//!         None => eprintln!("not an HKX file"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                     packfile | tagfile                       |
//! |   header/sections/fixups    |    chunks/varints/items        |
//! +--------------------------------------------------------------+
//! |                schema (TypeTable) + graph (NodeArena)        |
//! +--------------------------------------------------------------+
//! |        reconcile: minimize | migrate | diff                  |
//! +--------------------------------------------------------------+
//! |                  ser: cursors over byte buffers              |
//! +--------------------------------------------------------------+
//! ```

pub mod error;
pub mod graph;
pub mod packfile;
pub mod reconcile;
pub mod schema;
pub mod ser;
pub mod tagfile;

pub use error::{HkxError, Result};

/// Which container encoding a byte buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Packfile,
    Tagfile,
}

/// Probe a buffer for a known container magic.
pub fn detect(bytes: &[u8]) -> Option<Format> {
    if tagfile::is_tagfile(bytes) {
        return Some(Format::Tagfile);
    }
    if bytes.len() >= 8 {
        let w0 = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let w1 = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if w0 == packfile::header::MAGIC_0 && w1 == packfile::header::MAGIC_1 {
            return Some(Format::Packfile);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        let mut pack = Vec::new();
        pack.extend_from_slice(&packfile::header::MAGIC_0.to_le_bytes());
        pack.extend_from_slice(&packfile::header::MAGIC_1.to_le_bytes());
        assert_eq!(detect(&pack), Some(Format::Packfile));

        let tag = tagfile::chunk::Chunk::leaf("TAG0", vec![]).to_bytes();
        assert_eq!(detect(&tag), Some(Format::Tagfile));

        assert_eq!(detect(b"not a havok file"), None);
        assert_eq!(detect(&[]), None);
    }
}
