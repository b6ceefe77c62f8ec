// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tagged chunk tree.
//!
//! Every chunk is an 8-byte header — a big-endian length word whose top
//! bit marks a container chunk, then a four-character ASCII tag — followed
//! by either raw payload bytes or nested chunks. The length covers the
//! header itself.

use crate::error::{HkxError, Result};
use crate::ser::{Reader, Writer};

/// Top bit of the length word: payload is a run of child chunks.
const CONTAINER_FLAG: u32 = 0x8000_0000;

/// Nesting guard; the real tree is three levels deep.
const MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub tag: String,
    pub payload: Vec<u8>,
    pub children: Vec<Chunk>,
}

impl Chunk {
    pub fn leaf(tag: &str, payload: Vec<u8>) -> Chunk {
        Chunk {
            tag: tag.to_string(),
            payload,
            children: Vec::new(),
        }
    }

    pub fn container(tag: &str, children: Vec<Chunk>) -> Chunk {
        Chunk {
            tag: tag.to_string(),
            payload: Vec::new(),
            children,
        }
    }

    pub fn is_container(&self) -> bool {
        !self.children.is_empty()
    }

    /// First child with the given tag.
    pub fn child(&self, tag: &str) -> Option<&Chunk> {
        self.children.iter().find(|c| c.tag == tag)
    }

    pub fn require(&self, tag: &str) -> Result<&Chunk> {
        self.child(tag).ok_or_else(|| {
            HkxError::MalformedSection(format!("chunk {} has no {} child", self.tag, tag))
        })
    }

    fn encoded_len(&self) -> usize {
        if self.is_container() {
            8 + self.children.iter().map(Chunk::encoded_len).sum::<usize>()
        } else {
            8 + self.payload.len()
        }
    }

    pub fn encode(&self, w: &mut Writer) {
        let mut word = self.encoded_len() as u32;
        if self.is_container() {
            word |= CONTAINER_FLAG;
        }
        w.write_bytes(&word.to_be_bytes());
        w.write_bytes(self.tag.as_bytes());
        if self.is_container() {
            for child in &self.children {
                child.encode(w);
            }
        } else {
            w.write_bytes(&self.payload);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    /// Parse one chunk (and its subtree) from the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Chunk> {
        let mut r = Reader::new(bytes);
        parse_at(&mut r, 0)
    }
}

fn parse_at(r: &mut Reader<'_>, depth: usize) -> Result<Chunk> {
    if depth > MAX_DEPTH {
        return Err(HkxError::MalformedSection("chunk nesting too deep".into()));
    }
    let start = r.offset();
    let mut word = [0u8; 4];
    word.copy_from_slice(r.read_bytes(4).map_err(HkxError::from)?);
    let word = u32::from_be_bytes(word);
    let is_container = word & CONTAINER_FLAG != 0;
    let len = (word & !CONTAINER_FLAG) as usize;
    if len < 8 {
        return Err(HkxError::MalformedSection(format!(
            "chunk length {} below header size",
            len
        )));
    }
    let tag_bytes = r.read_bytes(4).map_err(HkxError::from)?;
    if !tag_bytes.iter().all(|b| b.is_ascii_graphic()) {
        return Err(HkxError::MalformedSection("non-ASCII chunk tag".into()));
    }
    let tag = String::from_utf8_lossy(tag_bytes).into_owned();
    let end = start + len;
    if end > start + 8 + r.remaining() {
        return Err(HkxError::MalformedSection(format!(
            "chunk {} truncated",
            tag
        )));
    }

    let chunk = if is_container {
        let mut children = Vec::new();
        while r.offset() < end {
            children.push(parse_at(r, depth + 1)?);
        }
        if r.offset() != end {
            return Err(HkxError::MalformedSection(format!(
                "chunk {} children overrun its length",
                tag
            )));
        }
        Chunk {
            tag,
            payload: Vec::new(),
            children,
        }
    } else {
        let payload = r.read_bytes(end - start - 8).map_err(HkxError::from)?.to_vec();
        Chunk {
            tag,
            payload,
            children: Vec::new(),
        }
    };
    Ok(chunk)
}
