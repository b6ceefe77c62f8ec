// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Four-tier big-endian varint.
//!
//! The leading byte's top bits select the width: `0xxxxxxx` one byte,
//! `10xxxxxx` two, `110xxxxx` three, `0xE0` marker plus a 32-bit
//! big-endian word. Values at or above `0x800_0000` do not fit and fail
//! with `VarintOverflow`.

use crate::error::{HkxError, Result};
use crate::ser::{Reader, Writer};

/// Upper bound (exclusive) of the encodable range.
pub const MAX: u64 = 0x800_0000;

pub fn write_varint(w: &mut Writer, value: u64) -> Result<()> {
    if value < 0x80 {
        w.write_u8(value as u8);
    } else if value < 0x4000 {
        w.write_u8(0x80 | (value >> 8) as u8);
        w.write_u8(value as u8);
    } else if value < 0x20_0000 {
        w.write_u8(0xC0 | (value >> 16) as u8);
        w.write_u8((value >> 8) as u8);
        w.write_u8(value as u8);
    } else if value < MAX {
        w.write_u8(0xE0);
        w.write_bytes(&(value as u32).to_be_bytes());
    } else {
        return Err(HkxError::VarintOverflow(value));
    }
    Ok(())
}

pub fn read_varint(r: &mut Reader<'_>) -> Result<u64> {
    let b0 = r.read_u8().map_err(HkxError::from)?;
    let value = if b0 < 0x80 {
        u64::from(b0)
    } else if b0 < 0xC0 {
        let b1 = r.read_u8().map_err(HkxError::from)?;
        (u64::from(b0 & 0x3F) << 8) | u64::from(b1)
    } else if b0 < 0xE0 {
        let b1 = r.read_u8().map_err(HkxError::from)?;
        let b2 = r.read_u8().map_err(HkxError::from)?;
        (u64::from(b0 & 0x1F) << 16) | (u64::from(b1) << 8) | u64::from(b2)
    } else {
        let mut word = [0u8; 4];
        word.copy_from_slice(r.read_bytes(4).map_err(HkxError::from)?);
        let value = u64::from(u32::from_be_bytes(word));
        if value >= MAX {
            return Err(HkxError::VarintOverflow(value));
        }
        value
    };
    Ok(value)
}

/// Zigzag mapping for signed payloads (enum item values).
pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}
