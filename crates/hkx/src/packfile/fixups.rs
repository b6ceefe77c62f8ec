// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Section payloads, fixup tables and entry resolution.
//!
//! A section carries raw data followed by three fixup tables: child
//! pointers (intra-section), entry pointers (object references) and entry
//! specs (object starts plus their class-name offset). Tables are read
//! until an all-ones sentinel word or the table span runs out. After
//! partitioning the data into entries, every fixup is rewritten into
//! entry-local coordinates so entry payloads relocate freely.

use super::header::{SectionHeader, SENTINEL};
use crate::error::{HkxError, Result};
use crate::ser::{Reader, Writer};
use std::collections::HashMap;

/// Intra-section fixup: the word at `src` points at `dst` (same section).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildPointer {
    pub src: u32,
    pub dst: u32,
}

/// Cross-entry fixup: the word at `src` points at an entry start in
/// `dst_section`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPointer {
    pub src: u32,
    pub dst_section: u32,
    pub dst_offset: u32,
}

/// Entry (top-level object) start plus the location of its class name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySpec {
    pub offset: u32,
    pub name_section: u32,
    pub name_offset: u32,
}

/// One section, decoded: raw data plus its three fixup tables.
#[derive(Debug, Clone)]
pub struct Section {
    pub header: SectionHeader,
    pub data: Vec<u8>,
    pub child_pointers: Vec<ChildPointer>,
    pub entry_pointers: Vec<EntryPointer>,
    pub entry_specs: Vec<EntrySpec>,
}

impl Section {
    /// Decode a section body from the whole-file reader. Table offsets in
    /// the header are relative to the section's absolute start.
    pub fn read(reader: &mut Reader<'_>, header: &SectionHeader) -> Result<Self> {
        let bounds = [
            header.child_pointers,
            header.entry_pointers,
            header.entry_specs,
            header.exports,
            header.imports,
            header.end,
        ];
        if bounds.windows(2).any(|w| w[0] > w[1]) {
            return Err(HkxError::MalformedSection(format!(
                "section {} has non-monotonic table offsets",
                header.tag
            )));
        }

        let start = header.absolute_start as usize;
        let mut body = reader.at(start).map_err(HkxError::from)?;
        let data = body
            .read_bytes(header.child_pointers as usize)
            .map_err(HkxError::from)?
            .to_vec();

        let mut section = Self {
            header: header.clone(),
            data,
            child_pointers: Vec::new(),
            entry_pointers: Vec::new(),
            entry_specs: Vec::new(),
        };

        let mut table = |from: u32, to: u32, words: usize| -> Result<Vec<Vec<u32>>> {
            let mut records = Vec::new();
            body.seek(start + from as usize).map_err(HkxError::from)?;
            let span_end = start + to as usize;
            while body.offset() + 4 * words <= span_end {
                let first = body.read_u32().map_err(HkxError::from)?;
                if first == SENTINEL {
                    break;
                }
                let mut record = vec![first];
                for _ in 1..words {
                    record.push(body.read_u32().map_err(HkxError::from)?);
                }
                records.push(record);
            }
            Ok(records)
        };

        for r in table(header.child_pointers, header.entry_pointers, 2)? {
            section.child_pointers.push(ChildPointer {
                src: r[0],
                dst: r[1],
            });
        }
        for r in table(header.entry_pointers, header.entry_specs, 3)? {
            section.entry_pointers.push(EntryPointer {
                src: r[0],
                dst_section: r[1],
                dst_offset: r[2],
            });
        }
        for r in table(header.entry_specs, header.exports, 3)? {
            section.entry_specs.push(EntrySpec {
                offset: r[0],
                name_section: r[1],
                name_offset: r[2],
            });
        }
        Ok(section)
    }
}

/// Terminate a fixup table: sentinel word, then 0xFF fill to a 16-byte
/// boundary.
pub fn finish_table(writer: &mut Writer) {
    writer.write_u32(SENTINEL);
    writer.align(16, 0xFF);
}

/// One top-level object within a section, with its fixups rewritten into
/// entry-local coordinates.
#[derive(Debug, Clone)]
pub struct Entry {
    pub start: u32,
    pub len: u32,
    /// Offset of this entry's class name within the class-name section.
    pub type_name_offset: u32,
    /// Local payload slot -> local payload target (strings, array data).
    pub child_map: HashMap<u32, u32>,
    /// Local pointer slot -> (section index, entry index) of the target.
    pub pointer_map: HashMap<u32, (usize, usize)>,
}

/// The entries of one section, sorted by start offset.
#[derive(Debug, Clone, Default)]
pub struct SectionEntries {
    pub entries: Vec<Entry>,
}

impl SectionEntries {
    /// Partition a section's data by its entry specs. Each entry spans
    /// from its start to the next entry's start (the last one runs to the
    /// end of the data).
    pub fn partition(section: &Section) -> Result<Self> {
        let data_len = section.data.len() as u32;
        let mut specs = section.entry_specs.clone();
        specs.sort_by_key(|s| s.offset);
        let mut entries = Vec::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            let end = specs.get(i + 1).map(|s| s.offset).unwrap_or(data_len);
            if spec.offset > data_len || end < spec.offset {
                return Err(HkxError::MalformedSection(format!(
                    "entry at {:#x} outside section {} data",
                    spec.offset, section.header.tag
                )));
            }
            entries.push(Entry {
                start: spec.offset,
                len: end - spec.offset,
                type_name_offset: spec.name_offset,
                child_map: HashMap::new(),
                pointer_map: HashMap::new(),
            });
        }
        Ok(Self { entries })
    }

    /// Entry containing `offset`, plus the entry-local remainder.
    pub fn locate(&self, offset: u32) -> Result<(usize, u32)> {
        let idx = self
            .entries
            .partition_point(|e| e.start <= offset)
            .checked_sub(1)
            .ok_or(HkxError::InvalidPointerTarget {
                offset,
                reason: "before first entry".into(),
            })?;
        let entry = &self.entries[idx];
        if offset >= entry.start + entry.len && entry.len != 0 {
            return Err(HkxError::InvalidPointerTarget {
                offset,
                reason: "past last entry".into(),
            });
        }
        Ok((idx, offset - entry.start))
    }
}

/// Rewrite every fixup of every section into entry-local coordinates.
///
/// Child pointers must stay inside one entry; entry pointers must land
/// exactly on an entry start in the destination section. Violations are
/// structural corruption and fail the whole decode.
pub fn resolve(sections: &[Section], parts: &mut [SectionEntries]) -> Result<()> {
    for (si, section) in sections.iter().enumerate() {
        let mut children = Vec::new();
        for cp in &section.child_pointers {
            let (src_entry, src_local) = parts[si].locate(cp.src)?;
            let (dst_entry, dst_local) = parts[si].locate(cp.dst)?;
            if src_entry != dst_entry {
                return Err(HkxError::InvalidPointerTarget {
                    offset: cp.dst,
                    reason: "child pointer crosses entry boundary".into(),
                });
            }
            children.push((src_entry, src_local, dst_local));
        }
        let mut pointers = Vec::new();
        for ep in &section.entry_pointers {
            let (src_entry, src_local) = parts[si].locate(ep.src)?;
            let ds = ep.dst_section as usize;
            if ds >= parts.len() {
                return Err(HkxError::InvalidPointerTarget {
                    offset: ep.dst_offset,
                    reason: "destination section out of range".into(),
                });
            }
            let (dst_entry, dst_local) = parts[ds].locate(ep.dst_offset)?;
            if dst_local != 0 {
                return Err(HkxError::InvalidPointerTarget {
                    offset: ep.dst_offset,
                    reason: "object pointer does not target an entry start".into(),
                });
            }
            pointers.push((src_entry, src_local, (ds, dst_entry)));
        }
        for (entry, src, dst) in children {
            parts[si].entries[entry].child_map.insert(src, dst);
        }
        for (entry, src, dst) in pointers {
            parts[si].entries[entry].pointer_map.insert(src, dst);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section_with(
        data_len: u32,
        child: Vec<ChildPointer>,
        entry: Vec<EntryPointer>,
        specs: Vec<EntrySpec>,
    ) -> Section {
        Section {
            header: SectionHeader {
                tag: "__data__".into(),
                absolute_start: 0,
                child_pointers: data_len,
                entry_pointers: data_len,
                entry_specs: data_len,
                exports: data_len,
                imports: data_len,
                end: data_len,
            },
            data: vec![0; data_len as usize],
            child_pointers: child,
            entry_pointers: entry,
            entry_specs: specs,
        }
    }

    fn spec(offset: u32) -> EntrySpec {
        EntrySpec {
            offset,
            name_section: 0,
            name_offset: 0,
        }
    }

    #[test]
    fn test_table_read_stops_at_sentinel() {
        let mut writer = Writer::new();
        // data region: 16 bytes
        writer.reserve(16);
        // child pointer table: one record, then terminator + pad
        writer.write_u32(4);
        writer.write_u32(8);
        finish_table(&mut writer);
        let tables_end = writer.offset() as u32;
        let header = SectionHeader {
            tag: "__data__".into(),
            absolute_start: 0,
            child_pointers: 16,
            entry_pointers: tables_end,
            entry_specs: tables_end,
            exports: tables_end,
            imports: tables_end,
            end: tables_end,
        };
        let bytes = writer.into_bytes();
        let section = Section::read(&mut Reader::new(&bytes), &header).expect("section");
        assert_eq!(section.data.len(), 16);
        assert_eq!(section.child_pointers, vec![ChildPointer { src: 4, dst: 8 }]);
        assert!(section.entry_pointers.is_empty());
    }

    #[test]
    fn test_partition_and_locate() {
        let section = section_with(64, vec![], vec![], vec![spec(32), spec(0)]);
        let parts = SectionEntries::partition(&section).expect("partition");
        assert_eq!(parts.entries.len(), 2);
        assert_eq!(parts.entries[0].start, 0);
        assert_eq!(parts.entries[0].len, 32);
        assert_eq!(parts.entries[1].len, 32);

        assert_eq!(parts.locate(0).expect("locate"), (0, 0));
        assert_eq!(parts.locate(31).expect("locate"), (0, 31));
        assert_eq!(parts.locate(40).expect("locate"), (1, 8));
        assert!(parts.locate(64).is_err());
    }

    #[test]
    fn test_resolve_child_within_entry() {
        let section = section_with(
            64,
            vec![ChildPointer { src: 8, dst: 16 }],
            vec![],
            vec![spec(0), spec(32)],
        );
        let mut parts = vec![SectionEntries::partition(&section).expect("partition")];
        resolve(&[section], &mut parts).expect("resolve");
        assert_eq!(parts[0].entries[0].child_map.get(&8), Some(&16));
    }

    #[test]
    fn test_resolve_rejects_cross_entry_child() {
        let section = section_with(
            64,
            vec![ChildPointer { src: 8, dst: 40 }],
            vec![],
            vec![spec(0), spec(32)],
        );
        let mut parts = vec![SectionEntries::partition(&section).expect("partition")];
        let err = resolve(&[section], &mut parts).unwrap_err();
        assert!(matches!(err, HkxError::InvalidPointerTarget { .. }));
    }

    #[test]
    fn test_resolve_entry_pointer_targets_entry_start() {
        let good = section_with(
            64,
            vec![],
            vec![EntryPointer {
                src: 4,
                dst_section: 0,
                dst_offset: 32,
            }],
            vec![spec(0), spec(32)],
        );
        let mut parts = vec![SectionEntries::partition(&good).expect("partition")];
        resolve(&[good], &mut parts).expect("resolve");
        assert_eq!(parts[0].entries[0].pointer_map.get(&4), Some(&(0, 1)));

        let bad = section_with(
            64,
            vec![],
            vec![EntryPointer {
                src: 4,
                dst_section: 0,
                dst_offset: 36,
            }],
            vec![spec(0), spec(32)],
        );
        let mut parts = vec![SectionEntries::partition(&bad).expect("partition")];
        let err = resolve(&[bad], &mut parts).unwrap_err();
        match err {
            HkxError::InvalidPointerTarget { reason, .. } => {
                assert_eq!(reason, "object pointer does not target an entry start")
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
