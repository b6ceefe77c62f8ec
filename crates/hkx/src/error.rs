// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for HKX decoding and encoding.
//!
//! Every variant aborts the current file operation. This is an offline,
//! structurally constrained transformation over trusted game data; the
//! design favors loud failure over silently producing a corrupt graph.
//! The one non-fatal condition — an unrecognized class-name signature —
//! is reported through `log::warn!`, not through this enum.

use std::fmt;

/// Errors returned by HKX operations.
#[derive(Debug)]
pub enum HkxError {
    // ========================================================================
    // Container structure
    // ========================================================================
    /// Bad magic, unsupported pointer width, missing header sentinel.
    MalformedHeader(String),
    /// Section/chunk structure violation (missing sentinel, misaligned
    /// fixup table, truncated chunk).
    MalformedSection(String),

    // ========================================================================
    // Pointer resolution
    // ========================================================================
    /// A child/entry pointer source or destination fell outside every entry.
    UnresolvedPointer { section: usize, offset: u32 },
    /// Entry pointer destination was not an entry start, or a child pointer
    /// crossed entry boundaries.
    InvalidPointerTarget { offset: u32, reason: String },

    // ========================================================================
    // Types and members
    // ========================================================================
    /// Root entry is not the expected container type, or a node is missing
    /// a member its type requires when packing.
    TypeMismatch { expected: String, got: String },
    /// Type name absent from the schema or primitive table.
    UnknownPrimitive(String),
    /// A primitive name matched more than one schema entry (corruption signal).
    AmbiguousPrimitive(String),
    /// Class node indexed with a member name its type does not declare.
    MissingMember { class: String, member: String },
    /// Array/tuple indexed out of bounds.
    OutOfRange { index: usize, len: usize },

    // ========================================================================
    // Reconciliation
    // ========================================================================
    /// Cross-version migration finished with nodes neither migrated nor
    /// explicitly discarded.
    MigrationIncomplete { unaccounted: usize },

    // ========================================================================
    // Tagfile encoding
    // ========================================================================
    /// Value too large for the four-tier varint encoding.
    VarintOverflow(u64),

    // ========================================================================
    // Buffer access
    // ========================================================================
    /// Read past end of buffer.
    ReadFailed { offset: usize, reason: String },
    /// Write/patch outside the buffer.
    WriteFailed { offset: usize, reason: String },
}

impl fmt::Display for HkxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HkxError::MalformedHeader(msg) => write!(f, "malformed header: {}", msg),
            HkxError::MalformedSection(msg) => write!(f, "malformed section: {}", msg),
            HkxError::UnresolvedPointer { section, offset } => {
                write!(
                    f,
                    "unresolved pointer in section {} at offset {:#x}",
                    section, offset
                )
            }
            HkxError::InvalidPointerTarget { offset, reason } => {
                write!(f, "invalid pointer target at offset {:#x}: {}", offset, reason)
            }
            HkxError::TypeMismatch { expected, got } => {
                write!(f, "type mismatch: expected {}, got {}", expected, got)
            }
            HkxError::UnknownPrimitive(name) => write!(f, "unknown type name: {}", name),
            HkxError::AmbiguousPrimitive(name) => {
                write!(f, "ambiguous type name (schema corruption?): {}", name)
            }
            HkxError::MissingMember { class, member } => {
                write!(f, "class {} has no member {}", class, member)
            }
            HkxError::OutOfRange { index, len } => {
                write!(f, "index out of range: {} >= {}", index, len)
            }
            HkxError::MigrationIncomplete { unaccounted } => {
                write!(
                    f,
                    "migration left {} node(s) neither migrated nor discarded",
                    unaccounted
                )
            }
            HkxError::VarintOverflow(v) => {
                write!(f, "value {:#x} exceeds varint range (max 0x7ffffff)", v)
            }
            HkxError::ReadFailed { offset, reason } => {
                write!(f, "read failed at offset {}: {}", offset, reason)
            }
            HkxError::WriteFailed { offset, reason } => {
                write!(f, "write failed at offset {}: {}", offset, reason)
            }
        }
    }
}

impl std::error::Error for HkxError {}

pub type Result<T> = std::result::Result<T, HkxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_offsets() {
        let err = HkxError::UnresolvedPointer {
            section: 2,
            offset: 0x40,
        };
        assert_eq!(
            format!("{}", err),
            "unresolved pointer in section 2 at offset 0x40"
        );

        let err = HkxError::ReadFailed {
            offset: 12,
            reason: "unexpected end of buffer".into(),
        };
        assert_eq!(
            format!("{}", err),
            "read failed at offset 12: unexpected end of buffer"
        );
    }

    #[test]
    fn test_display_member_errors() {
        let err = HkxError::MissingMember {
            class: "hkaBone".into(),
            member: "scale".into(),
        };
        assert_eq!(format!("{}", err), "class hkaBone has no member scale");

        let err = HkxError::OutOfRange { index: 5, len: 3 };
        assert_eq!(format!("{}", err), "index out of range: 5 >= 3");
    }
}
