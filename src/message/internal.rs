//! Unknown-field and extension region of a message
//!
//! The slot before a message blob points at a growable region, allocated
//! on first use:
//!
//! ```text
//! +0   capacity     u32
//! +4   unknown_end  u32     unknown bytes occupy [16, unknown_end)
//! +8   ext_begin    u32     extension records occupy [ext_begin, capacity)
//! +16  unknown bytes ->           <- extension records
//! ```
//!
//! Each extension record is the extension's identity followed by a 16-byte
//! payload. Unknown bytes grow forward, records grow backward; when they
//! would meet, the region doubles and the records move to the new end.

use super::Message;
use crate::arena::ArenaPtr;
use crate::error::Result;
use crate::mini_table::MiniTableExtension;
use crate::wire::{read_tag, skip_value, DEFAULT_MAX_DEPTH};
use alloc::vec::Vec;
use core::ops::Range;

const HEADER: usize = 16;
const MIN_CAPACITY: usize = 128;

/// Bytes per extension record
pub(crate) const EXT_RECORD: usize = 24;
/// Bytes of payload per extension record
pub(crate) const EXT_PAYLOAD: usize = 16;

#[derive(Debug, Clone, Copy)]
struct Region {
    at: ArenaPtr,
    capacity: usize,
    unknown_end: usize,
    ext_begin: usize,
}

impl Message {
    fn region(&self) -> Option<Region> {
        let at = ArenaPtr::from_raw(self.arena.read_u64(self.ptr.sub(8)));
        if at.is_null() {
            return None;
        }
        let raw: [u8; 12] = self.arena.read(at);
        let word =
            |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]) as usize;
        Some(Region {
            at,
            capacity: word(0),
            unknown_end: word(4),
            ext_begin: word(8),
        })
    }

    fn store_region(&self, r: Region) {
        self.arena.write_u32(r.at, r.capacity as u32);
        self.arena.write_u32(r.at.add(4), r.unknown_end as u32);
        self.arena.write_u32(r.at.add(8), r.ext_begin as u32);
    }

    /// Region with at least `need` free bytes between the two halves
    fn reserve_region(&self, need: usize) -> Result<Region> {
        let Some(mut r) = self.region() else {
            let capacity = (HEADER + need).next_power_of_two().max(MIN_CAPACITY);
            let at = self.arena.malloc(capacity)?;
            let r = Region {
                at,
                capacity,
                unknown_end: HEADER,
                ext_begin: capacity,
            };
            self.store_region(r);
            self.arena.write_u64(self.ptr.sub(8), at.to_raw());
            return Ok(r);
        };
        if r.ext_begin - r.unknown_end >= need {
            return Ok(r);
        }
        let used = r.unknown_end + (r.capacity - r.ext_begin);
        let mut capacity = r.capacity * 2;
        while capacity < used + need {
            capacity *= 2;
        }
        let at = self.arena.realloc(r.at, r.capacity, capacity)?;
        let ext_len = r.capacity - r.ext_begin;
        self.arena
            .copy(at.add(r.ext_begin), at.add(capacity - ext_len), ext_len);
        r.at = at;
        r.ext_begin = capacity - ext_len;
        r.capacity = capacity;
        self.store_region(r);
        self.arena.write_u64(self.ptr.sub(8), at.to_raw());
        Ok(r)
    }

    /// Append raw bytes to the unknown fields
    ///
    /// The bytes should be whole wire-format fields; they are re-emitted
    /// verbatim by the encoder.
    pub fn add_unknown(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut r = self.reserve_region(data.len())?;
        self.arena.write_bytes(r.at.add(r.unknown_end), data);
        r.unknown_end += data.len();
        self.store_region(r);
        Ok(())
    }

    /// Length of the unknown fields in bytes
    pub fn unknown_len(&self) -> usize {
        self.region().map_or(0, |r| r.unknown_end - HEADER)
    }

    /// Copy of the unknown fields, in the order they were parsed
    pub fn unknown(&self) -> Vec<u8> {
        match self.region() {
            Some(r) => self.arena.to_vec(r.at.add(HEADER), r.unknown_end - HEADER),
            None => Vec::new(),
        }
    }

    /// Unknown fields split into whole fields
    ///
    /// If the bytes stop parsing as fields, the rest comes back as one
    /// final chunk.
    pub fn unknown_chunks(&self) -> Vec<Vec<u8>> {
        let data = self.unknown();
        let mut chunks = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let start = pos;
            let step = read_tag(&data, &mut pos)
                .and_then(|(n, wt)| skip_value(&data, &mut pos, n, wt, DEFAULT_MAX_DEPTH));
            if step.is_err() {
                chunks.push(data[start..].to_vec());
                break;
            }
            chunks.push(data[start..pos].to_vec());
        }
        chunks
    }

    /// Drop every unknown field of this message
    pub fn discard_unknown(&self) {
        if let Some(mut r) = self.region() {
            r.unknown_end = HEADER;
            self.store_region(r);
        }
    }

    /// Remove `range` (byte offsets into [`Message::unknown`]) from the
    /// unknown fields
    ///
    /// Returns false if the range is out of bounds.
    pub fn delete_unknown(&self, range: Range<usize>) -> bool {
        let Some(mut r) = self.region() else {
            return range.is_empty() && range.start == 0;
        };
        let len = r.unknown_end - HEADER;
        if range.start > range.end || range.end > len {
            return false;
        }
        let base = r.at.add(HEADER);
        self.arena
            .copy(base.add(range.end), base.add(range.start), len - range.end);
        r.unknown_end -= range.len();
        self.store_region(r);
        true
    }

    /// Spans of every unknown field numbered `number`, in order
    pub(crate) fn unknown_spans(&self, number: u32) -> Result<Vec<Range<usize>>> {
        let data = self.unknown();
        let mut spans = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let start = pos;
            let (n, wt) = read_tag(&data, &mut pos)?;
            skip_value(&data, &mut pos, n, wt, DEFAULT_MAX_DEPTH)?;
            if n == number {
                spans.push(start..pos);
            }
        }
        Ok(spans)
    }

    /// Locate the first unknown field numbered `number`
    ///
    /// Returns its byte span in [`Message::unknown`], `None` when absent, or
    /// `Malformed` if the unknown bytes cannot be walked.
    pub fn find_unknown(&self, number: u32) -> Result<Option<Range<usize>>> {
        Ok(self.unknown_spans(number)?.into_iter().next())
    }

    /// Payload of the record for `ext`, if present
    pub(crate) fn extension_payload(&self, ext: &'static MiniTableExtension) -> Option<ArenaPtr> {
        let r = self.region()?;
        let key = ext.addr();
        let mut at = r.ext_begin;
        while at < r.capacity {
            if self.arena.read_u64(r.at.add(at)) == key {
                return Some(r.at.add(at + 8));
            }
            at += EXT_RECORD;
        }
        None
    }

    /// Payload of the record for `ext`, created zeroed if missing
    ///
    /// The returned pointer is valid until the next record or unknown field
    /// is added.
    pub(crate) fn get_or_create_extension_payload(
        &self,
        ext: &'static MiniTableExtension,
    ) -> Result<ArenaPtr> {
        if let Some(p) = self.extension_payload(ext) {
            return Ok(p);
        }
        let key = self.arena.intern_extension(ext);
        let mut r = self.reserve_region(EXT_RECORD)?;
        r.ext_begin -= EXT_RECORD;
        let rec = r.at.add(r.ext_begin);
        self.arena.write_u64(rec, key);
        self.arena.fill_zero(rec.add(8), EXT_PAYLOAD);
        self.store_region(r);
        Ok(rec.add(8))
    }

    /// Remove the record for `ext`; true if there was one
    pub fn clear_extension(&self, ext: &'static MiniTableExtension) -> bool {
        let Some(mut r) = self.region() else {
            return false;
        };
        let Some(payload) = self.extension_payload(ext) else {
            return false;
        };
        let rec = payload.sub(8);
        let first = r.at.add(r.ext_begin);
        let before = (rec.to_raw() - first.to_raw()) as usize;
        self.arena.copy(first, first.add(EXT_RECORD), before);
        r.ext_begin += EXT_RECORD;
        self.store_region(r);
        true
    }

    /// Number of extensions present
    pub fn extension_count(&self) -> usize {
        self.region()
            .map_or(0, |r| (r.capacity - r.ext_begin) / EXT_RECORD)
    }

    /// Every extension present with its payload, oldest first
    pub(crate) fn extension_records(&self) -> Vec<(&'static MiniTableExtension, ArenaPtr)> {
        let Some(r) = self.region() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut at = r.capacity;
        while at > r.ext_begin {
            at -= EXT_RECORD;
            let key = self.arena.read_u64(r.at.add(at));
            if let Some(ext) = self.arena.extension_by_addr(key) {
                out.push((ext, r.at.add(at + 8)));
            }
        }
        out
    }

    /// Forget every unknown field and extension, keeping the region
    pub(crate) fn reset_region(&self) {
        if let Some(mut r) = self.region() {
            r.unknown_end = HEADER;
            r.ext_begin = r.capacity;
            self.store_region(r);
        }
    }
}
