// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packfile header and section headers.
//!
//! Field order, widths and defaults are bit-exact; both magic words are
//! byte-palindromic, so they validate before the endianness flag has
//! been read.

use crate::error::{HkxError, Result};
use crate::ser::{Reader, Writer};

pub const MAGIC_0: u32 = 0x57E0_E057;
pub const MAGIC_1: u32 = 0x10C0_C010;
/// All-ones word: header terminator, fixup-table terminator, pad fill.
pub const SENTINEL: u32 = 0xFFFF_FFFF;

/// Byte offset of the endianness flag within the fixed header, peeked
/// before the full header parse.
pub(crate) const ENDIAN_FLAG_OFFSET: usize = 17;

/// Number of sections is fixed: class-name, type, data.
pub const SECTION_COUNT: i32 = 3;

pub const CLASSNAME_SECTION: usize = 0;
pub const TYPE_SECTION: usize = 1;
pub const DATA_SECTION: usize = 2;

pub(crate) const SECTION_TAGS: [&str; 3] = ["__classnames__", "__types__", "__data__"];

/// The four known packfile format versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V5,
    V8,
    V9,
    V11,
}

impl FormatVersion {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0x05 => Some(FormatVersion::V5),
            0x08 => Some(FormatVersion::V8),
            0x09 => Some(FormatVersion::V9),
            0x0B => Some(FormatVersion::V11),
            _ => None,
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            FormatVersion::V5 => 0x05,
            FormatVersion::V8 => 0x08,
            FormatVersion::V9 => 0x09,
            FormatVersion::V11 => 0x0B,
        }
    }

    /// V11 replaces the post-header sentinel with a small extension block
    /// that names the section-header offset.
    pub fn has_header_extension(self) -> bool {
        matches!(self, FormatVersion::V11)
    }
}

/// Decoded packfile header metadata, carried through unpack and handed
/// back to pack so a round trip reproduces the original layout choices.
#[derive(Debug, Clone, PartialEq)]
pub struct PackfileHeader {
    pub user_tag: i32,
    pub version: FormatVersion,
    /// 4 or 8.
    pub pointer_size: u32,
    pub big_endian: bool,
    pub padding_mode: u8,
    /// Contents section index/offset and class-name section index/offset
    /// defaults, preserved verbatim.
    pub contents: [i32; 4],
    /// Human-readable schema tag, e.g. `hk_2010.2.0-r1`. At most 14 bytes;
    /// the field is not NUL-terminated when all 14 are used.
    pub contents_version: String,
    pub flags: u8,
    /// Whether the file carries an embedded type section. Files relying
    /// on a built-in schema keep that shape on re-pack.
    pub embed_types: bool,
}

impl PackfileHeader {
    pub fn new(version: FormatVersion, pointer_size: u32, contents_version: &str) -> Self {
        Self {
            user_tag: 0,
            version,
            pointer_size,
            big_endian: false,
            padding_mode: 0,
            contents: [2, 0, 0, 0],
            contents_version: contents_version.to_string(),
            flags: 0,
            embed_types: true,
        }
    }

    /// Parse the fixed header. On return the reader sits at the first
    /// section header. `embed_types` is left `true`; the caller downgrades
    /// it after seeing the type section.
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        // Both magic words are byte-palindromic, so they read the same in
        // either byte order and validate before the endianness flag.
        let magic0 = reader
            .read_u32()
            .map_err(|_| HkxError::MalformedHeader("truncated header".into()))?;
        let magic1 = reader
            .read_u32()
            .map_err(|_| HkxError::MalformedHeader("truncated header".into()))?;
        if magic0 != MAGIC_0 || magic1 != MAGIC_1 {
            return Err(HkxError::MalformedHeader(format!(
                "bad magic {:#010x} {:#010x}",
                magic0, magic1
            )));
        }

        // The endianness flag lives past the magic words; peek it so the
        // multi-byte fields that follow parse with the right order.
        {
            let mut peek = reader
                .at(ENDIAN_FLAG_OFFSET)
                .map_err(|_| HkxError::MalformedHeader("truncated header".into()))?;
            let little_endian = peek
                .read_u8()
                .map_err(|_| HkxError::MalformedHeader("truncated header".into()))?;
            drop(peek);
            reader.set_big_endian(little_endian == 0);
        }

        let user_tag = reader.read_i32().map_err(HkxError::from)?;
        let raw_version = reader.read_i32().map_err(HkxError::from)?;
        let version = FormatVersion::from_raw(raw_version).ok_or_else(|| {
            HkxError::MalformedHeader(format!("unknown format version {:#x}", raw_version))
        })?;

        let pointer_size = u32::from(reader.read_u8().map_err(HkxError::from)?);
        if pointer_size != 4 && pointer_size != 8 {
            return Err(HkxError::MalformedHeader(format!(
                "unsupported pointer width {}",
                pointer_size
            )));
        }
        let little_endian = reader.read_u8().map_err(HkxError::from)?;
        let padding_mode = reader.read_u8().map_err(HkxError::from)?;
        let _reserved = reader.read_u8().map_err(HkxError::from)?;

        let num_sections = reader.read_i32().map_err(HkxError::from)?;
        if num_sections != SECTION_COUNT {
            return Err(HkxError::MalformedHeader(format!(
                "expected {} sections, header declares {}",
                SECTION_COUNT, num_sections
            )));
        }
        let mut contents = [0i32; 4];
        for slot in &mut contents {
            *slot = reader.read_i32().map_err(HkxError::from)?;
        }

        let version_bytes = reader.read_bytes(14).map_err(HkxError::from)?;
        let end = version_bytes.iter().position(|&b| b == 0).unwrap_or(14);
        let contents_version = String::from_utf8_lossy(&version_bytes[..end]).into_owned();

        let sentinel_byte = reader.read_u8().map_err(HkxError::from)?;
        if sentinel_byte != 0xFF {
            return Err(HkxError::MalformedHeader(format!(
                "content-version terminator {:#04x}, expected 0xff",
                sentinel_byte
            )));
        }
        let flags = reader.read_u8().map_err(HkxError::from)?;

        if version.has_header_extension() {
            let _ext_flags = reader.read_u16().map_err(HkxError::from)?;
            let section_offset = reader.read_u16().map_err(HkxError::from)?;
            reader.seek(usize::from(section_offset)).map_err(HkxError::from)?;
        } else {
            let word = reader.read_u32().map_err(HkxError::from)?;
            if word != SENTINEL {
                return Err(HkxError::MalformedHeader(format!(
                    "missing post-header sentinel, found {:#010x}",
                    word
                )));
            }
        }

        Ok(Self {
            user_tag,
            version,
            pointer_size,
            big_endian: little_endian == 0,
            padding_mode,
            contents,
            contents_version,
            flags,
            embed_types: true,
        })
    }

    /// Write the fixed header; leaves the writer at the first section
    /// header position.
    pub fn write(&self, writer: &mut Writer) {
        writer.set_big_endian(self.big_endian);
        writer.write_u32(MAGIC_0);
        writer.write_u32(MAGIC_1);
        writer.write_i32(self.user_tag);
        writer.write_i32(self.version.raw());
        writer.write_u8(self.pointer_size as u8);
        writer.write_u8(u8::from(!self.big_endian));
        writer.write_u8(self.padding_mode);
        writer.write_u8(0);
        writer.write_i32(SECTION_COUNT);
        for slot in self.contents {
            writer.write_i32(slot);
        }
        let mut version_bytes = [0u8; 14];
        let src = self.contents_version.as_bytes();
        let n = src.len().min(14);
        version_bytes[..n].copy_from_slice(&src[..n]);
        writer.write_bytes(&version_bytes);
        writer.write_u8(0xFF);
        writer.write_u8(self.flags);

        if self.version.has_header_extension() {
            writer.write_u16(0);
            // Section headers start right after the extension block.
            writer.write_u16((writer.offset() + 2) as u16);
        } else {
            writer.write_u32(SENTINEL);
        }
    }
}

/// One 48-byte section header: 19-byte tag, 0xFF, seven 32-bit offsets.
/// All table offsets are relative to `absolute_start`.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionHeader {
    pub tag: String,
    pub absolute_start: u32,
    pub child_pointers: u32,
    pub entry_pointers: u32,
    pub entry_specs: u32,
    pub exports: u32,
    pub imports: u32,
    pub end: u32,
}

impl SectionHeader {
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let tag_bytes = reader.read_bytes(19).map_err(HkxError::from)?;
        let end = tag_bytes.iter().position(|&b| b == 0).unwrap_or(19);
        let tag = String::from_utf8_lossy(&tag_bytes[..end]).into_owned();
        let sep = reader.read_u8().map_err(HkxError::from)?;
        if sep != 0xFF {
            return Err(HkxError::MalformedSection(format!(
                "section tag terminator {:#04x}, expected 0xff",
                sep
            )));
        }
        let mut words = [0u32; 7];
        for w in &mut words {
            *w = reader.read_u32().map_err(HkxError::from)?;
        }
        Ok(Self {
            tag,
            absolute_start: words[0],
            child_pointers: words[1],
            entry_pointers: words[2],
            entry_specs: words[3],
            exports: words[4],
            imports: words[5],
            end: words[6],
        })
    }

    pub fn write(&self, writer: &mut Writer) {
        let mut tag_bytes = [0u8; 19];
        let src = self.tag.as_bytes();
        let n = src.len().min(19);
        tag_bytes[..n].copy_from_slice(&src[..n]);
        writer.write_bytes(&tag_bytes);
        writer.write_u8(0xFF);
        for w in [
            self.absolute_start,
            self.child_pointers,
            self.entry_pointers,
            self.entry_specs,
            self.exports,
            self.imports,
            self.end,
        ] {
            writer.write_u32(w);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip_le() {
        let mut header = PackfileHeader::new(FormatVersion::V8, 4, "hk_2010.2.0-r1");
        header.user_tag = 0x1234;
        let mut writer = Writer::new();
        header.write(&mut writer);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 60);

        let mut reader = Reader::new(&bytes);
        let parsed = PackfileHeader::read(&mut reader).expect("parse header");
        assert_eq!(parsed, header);
        // The 14-char tag fills the field exactly; no char is dropped.
        assert_eq!(parsed.contents_version, "hk_2010.2.0-r1");
        // Reader sits right after the sentinel word.
        assert_eq!(reader.offset(), 60);
    }

    #[test]
    fn test_header_rejects_short_buffer() {
        // Shorter than the magic words, and shorter than the endian flag:
        // both are header-shape failures, not raw cursor overruns.
        assert!(matches!(
            PackfileHeader::read(&mut Reader::new(&[])),
            Err(HkxError::MalformedHeader(_))
        ));
        assert!(matches!(
            PackfileHeader::read(&mut Reader::new(&[0u8; 16])),
            Err(HkxError::MalformedHeader(_))
        ));
        let mut truncated = [0u8; 12];
        truncated[..4].copy_from_slice(&MAGIC_0.to_le_bytes());
        truncated[4..8].copy_from_slice(&MAGIC_1.to_le_bytes());
        assert!(matches!(
            PackfileHeader::read(&mut Reader::new(&truncated)),
            Err(HkxError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_header_v11_extension_seeks() {
        let header = PackfileHeader::new(FormatVersion::V11, 8, "hk_2014.1.0-r");
        let mut writer = Writer::new();
        header.write(&mut writer);
        let bytes = writer.into_bytes();

        let mut reader = Reader::new(&bytes);
        let parsed = PackfileHeader::read(&mut reader).expect("parse header");
        assert_eq!(parsed.version, FormatVersion::V11);
        assert_eq!(reader.offset(), 60);
    }

    #[test]
    fn test_header_rejects_bad_magic_and_width() {
        let header = PackfileHeader::new(FormatVersion::V8, 4, "hk_2010.2.0-r");
        let mut writer = Writer::new();
        header.write(&mut writer);
        let mut bytes = writer.into_bytes();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            PackfileHeader::read(&mut Reader::new(&bytes)),
            Err(HkxError::MalformedHeader(_))
        ));

        let mut writer = Writer::new();
        header.write(&mut writer);
        let mut bytes = writer.into_bytes();
        bytes[16] = 2; // pointer width
        assert!(matches!(
            PackfileHeader::read(&mut Reader::new(&bytes)),
            Err(HkxError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_header_missing_sentinel() {
        let header = PackfileHeader::new(FormatVersion::V8, 4, "hk_2010.2.0-r");
        let mut writer = Writer::new();
        header.write(&mut writer);
        let mut bytes = writer.into_bytes();
        bytes[56..60].copy_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            PackfileHeader::read(&mut Reader::new(&bytes)),
            Err(HkxError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_header_big_endian_flag() {
        let mut header = PackfileHeader::new(FormatVersion::V8, 4, "hk_2010.2.0-r");
        header.big_endian = true;
        let mut writer = Writer::new();
        header.write(&mut writer);
        let bytes = writer.into_bytes();
        assert_eq!(bytes[17], 0); // little_endian byte cleared
        assert_eq!(&bytes[12..16], &[0, 0, 0, 8]); // version stored BE

        let parsed = PackfileHeader::read(&mut Reader::new(&bytes)).expect("parse header");
        assert!(parsed.big_endian);
        assert_eq!(parsed.version, FormatVersion::V8);
    }

    #[test]
    fn test_section_header_roundtrip() {
        let header = SectionHeader {
            tag: "__data__".into(),
            absolute_start: 0x120,
            child_pointers: 0x40,
            entry_pointers: 0x50,
            entry_specs: 0x60,
            exports: 0x70,
            imports: 0x70,
            end: 0x70,
        };
        let mut writer = Writer::new();
        header.write(&mut writer);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 48);
        let parsed = SectionHeader::read(&mut Reader::new(&bytes)).expect("parse");
        assert_eq!(parsed, header);
    }
}
