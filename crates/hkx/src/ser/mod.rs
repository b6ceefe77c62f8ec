// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte-level readers/writers for the two HKX container encodings.
//!
//! Both codecs operate over in-memory buffers with an explicit cursor.
//! Look-ahead uses [`Reader::at`]/[`Writer::at`] scoped guards that restore
//! the original cursor on every exit path, including error paths.

pub mod cursor;

pub use cursor::{Reader, Writer};

use crate::error::HkxError;
use std::fmt;

/// Buffer access error used within `ser`.
#[derive(Debug, Clone)]
pub enum SerError {
    ReadFailed { offset: usize, reason: String },
    WriteFailed { offset: usize, reason: String },
}

impl fmt::Display for SerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerError::ReadFailed { offset, reason } => {
                write!(f, "read failed at offset {}: {}", offset, reason)
            }
            SerError::WriteFailed { offset, reason } => {
                write!(f, "write failed at offset {}: {}", offset, reason)
            }
        }
    }
}

impl std::error::Error for SerError {}

impl From<SerError> for HkxError {
    fn from(e: SerError) -> Self {
        match e {
            SerError::ReadFailed { offset, reason } => HkxError::ReadFailed { offset, reason },
            SerError::WriteFailed { offset, reason } => HkxError::WriteFailed { offset, reason },
        }
    }
}

pub type SerResult<T> = std::result::Result<T, SerError>;
