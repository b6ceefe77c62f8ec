// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounds-checked cursors with runtime-selectable endianness.
//!
//! Packfiles may be big- or little-endian; the flag lives in the file
//! header, so the cursors switch byte order at runtime instead of
//! committing to one at the type level.

use super::{SerError, SerResult};
use std::ops::{Deref, DerefMut};

/// Generate endian-aware read methods for primitive types.
macro_rules! impl_read {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> SerResult<$type> {
            if self.offset + $size > self.buffer.len() {
                return Err(SerError::ReadFailed {
                    offset: self.offset,
                    reason: "unexpected end of buffer".into(),
                });
            }
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(&self.buffer[self.offset..self.offset + $size]);
            self.offset += $size;
            Ok(if self.big_endian {
                <$type>::from_be_bytes(bytes)
            } else {
                <$type>::from_le_bytes(bytes)
            })
        }
    };
}

/// Generate endian-aware write methods for primitive types.
macro_rules! impl_write {
    ($name:ident, $type:ty) => {
        pub fn $name(&mut self, value: $type) {
            let bytes = if self.big_endian {
                value.to_be_bytes()
            } else {
                value.to_le_bytes()
            };
            self.write_bytes(&bytes);
        }
    };
}

/// Read cursor over a borrowed buffer.
pub struct Reader<'a> {
    buffer: &'a [u8],
    offset: usize,
    big_endian: bool,
}

impl<'a> Reader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            offset: 0,
            big_endian: false,
        }
    }

    pub fn set_big_endian(&mut self, big_endian: bool) {
        self.big_endian = big_endian;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }

    pub fn is_eof(&self) -> bool {
        self.offset >= self.buffer.len()
    }

    pub fn seek(&mut self, pos: usize) -> SerResult<()> {
        if pos > self.buffer.len() {
            return Err(SerError::ReadFailed {
                offset: pos,
                reason: "seek past end of buffer".into(),
            });
        }
        self.offset = pos;
        Ok(())
    }

    pub fn skip(&mut self, len: usize) -> SerResult<()> {
        self.seek(self.offset + len)
    }

    /// Temporarily move the cursor to `pos`. The returned guard restores
    /// the saved position when dropped, on every exit path.
    pub fn at(&mut self, pos: usize) -> SerResult<ScopedSeek<'_, 'a>> {
        let saved = self.offset;
        self.seek(pos)?;
        Ok(ScopedSeek {
            reader: self,
            saved,
        })
    }

    impl_read!(read_u8, u8, 1);
    impl_read!(read_i8, i8, 1);
    impl_read!(read_u16, u16, 2);
    impl_read!(read_i16, i16, 2);
    impl_read!(read_u32, u32, 4);
    impl_read!(read_i32, i32, 4);
    impl_read!(read_u64, u64, 8);
    impl_read!(read_i64, i64, 8);

    pub fn read_f32(&mut self) -> SerResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> SerResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> SerResult<&'a [u8]> {
        if self.offset + len > self.buffer.len() {
            return Err(SerError::ReadFailed {
                offset: self.offset,
                reason: "unexpected end of buffer".into(),
            });
        }
        let slice = &self.buffer[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Read a NUL-terminated string and consume the terminator.
    pub fn read_cstr(&mut self) -> SerResult<String> {
        let start = self.offset;
        let end = self.buffer[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| start + p)
            .ok_or_else(|| SerError::ReadFailed {
                offset: start,
                reason: "unterminated string".into(),
            })?;
        let s = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
        self.offset = end + 1;
        Ok(s)
    }

    pub fn align(&mut self, alignment: usize) -> SerResult<()> {
        if alignment <= 1 {
            return Ok(());
        }
        let mask = alignment - 1;
        let pos = (self.offset + mask) & !mask;
        self.seek(pos)
    }
}

/// Guard returned by [`Reader::at`]; restores the saved cursor on drop.
pub struct ScopedSeek<'r, 'a> {
    reader: &'r mut Reader<'a>,
    saved: usize,
}

impl<'a> Deref for ScopedSeek<'_, 'a> {
    type Target = Reader<'a>;

    fn deref(&self) -> &Reader<'a> {
        self.reader
    }
}

impl<'a> DerefMut for ScopedSeek<'_, 'a> {
    fn deref_mut(&mut self) -> &mut Reader<'a> {
        self.reader
    }
}

impl Drop for ScopedSeek<'_, '_> {
    fn drop(&mut self) {
        self.reader.offset = self.saved;
    }
}

/// Write cursor over a growable owned buffer.
///
/// Writes past the current end extend the buffer; writes inside it patch
/// in place (used for fixing up length/offset fields after the fact).
pub struct Writer {
    buffer: Vec<u8>,
    offset: usize,
    big_endian: bool,
}

impl Writer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            offset: 0,
            big_endian: false,
        }
    }

    pub fn set_big_endian(&mut self, big_endian: bool) {
        self.big_endian = big_endian;
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn seek(&mut self, pos: usize) {
        if pos > self.buffer.len() {
            self.buffer.resize(pos, 0);
        }
        self.offset = pos;
    }

    /// Temporarily move the cursor to `pos` (typically to patch an offset
    /// recorded earlier). The guard restores the saved position on drop.
    pub fn at(&mut self, pos: usize) -> ScopedPatch<'_> {
        let saved = self.offset;
        self.seek(pos);
        ScopedPatch {
            writer: self,
            saved,
        }
    }

    impl_write!(write_u8, u8);
    impl_write!(write_i8, i8);
    impl_write!(write_u16, u16);
    impl_write!(write_i16, i16);
    impl_write!(write_u32, u32);
    impl_write!(write_i32, i32);
    impl_write!(write_u64, u64);
    impl_write!(write_i64, i64);

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        let end = self.offset + data.len();
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[self.offset..end].copy_from_slice(data);
        self.offset = end;
    }

    pub fn write_cstr(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
        self.write_u8(0);
    }

    /// Pad with `fill` up to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: usize, fill: u8) {
        if alignment <= 1 {
            return;
        }
        let mask = alignment - 1;
        let target = (self.offset + mask) & !mask;
        while self.offset < target {
            self.write_u8(fill);
        }
    }

    /// Reserve `len` zero bytes at the cursor and return their start offset.
    pub fn reserve(&mut self, len: usize) -> usize {
        let start = self.offset;
        let end = start + len;
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.offset = end;
        start
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard returned by [`Writer::at`]; restores the saved cursor on drop.
pub struct ScopedPatch<'w> {
    writer: &'w mut Writer,
    saved: usize,
}

impl Deref for ScopedPatch<'_> {
    type Target = Writer;

    fn deref(&self) -> &Writer {
        self.writer
    }
}

impl DerefMut for ScopedPatch<'_> {
    fn deref_mut(&mut self) -> &mut Writer {
        self.writer
    }
}

impl Drop for ScopedPatch<'_> {
    fn drop(&mut self) {
        self.writer.offset = self.saved;
    }
}
