//! Bounded input stream with a patch buffer
//!
//! While more than [`SLOP`] bytes of input remain, reads go straight to the
//! input slice and may run up to `SLOP` bytes past `end`. The last `SLOP`
//! bytes are copied into a zero-padded patch buffer, so a read that starts
//! inside the visible region always has `SLOP` readable bytes after it.
//!
//! The current limit is kept relative to `end`, which lets the buffer flip
//! without rewriting the limits of enclosing sub-messages:
//!
//! ```text
//! input:  [.............................|<- SLOP ->]
//!                                       end
//! patch:  [<- SLOP (copied tail) ->|<- SLOP zeros ->]
//!                                  end
//! ```
//!
//! Offsets handed out by [`EpsStream::offset`] are absolute input offsets
//! and stay valid across the flip.

use super::{varint, WireType};
use crate::error::{Error, Result};

/// Bytes that may be read past `end` without a bounds decision
pub(crate) const SLOP: usize = 16;

const PATCH_SIZE: usize = 2 * SLOP;

/// Largest accepted length prefix
const MAX_SIZE: u64 = i32::MAX as u64;

/// Cursor over one contiguous input with nested limits
#[derive(Debug)]
pub(crate) struct EpsStream<'a> {
    input: &'a [u8],
    patch: [u8; PATCH_SIZE],
    in_patch: bool,
    /// Absolute offset of index 0 of the current region
    base: usize,
    pos: usize,
    end: usize,
    /// Limit position relative to `end`
    limit: isize,
    /// `end + min(0, limit)`; below this the stream is never done
    limit_pos: isize,
}

impl<'a> EpsStream<'a> {
    pub(crate) fn new(input: &'a [u8]) -> Self {
        let mut s = Self {
            input,
            patch: [0; PATCH_SIZE],
            in_patch: false,
            base: 0,
            pos: 0,
            end: 0,
            limit: 0,
            limit_pos: 0,
        };
        if input.len() <= SLOP {
            s.patch[..input.len()].copy_from_slice(input);
            s.in_patch = true;
            s.end = input.len();
        } else {
            s.end = input.len() - SLOP;
            s.limit = SLOP as isize;
        }
        s.limit_pos = s.end as isize;
        s
    }

    /// Stream over `input` positioned at absolute offset `start`
    pub(crate) fn new_at(input: &'a [u8], start: usize) -> Self {
        let mut s = Self::new(input);
        s.pos = start.min(input.len());
        s
    }

    #[inline]
    fn region(&self) -> &[u8] {
        if self.in_patch {
            &self.patch
        } else {
            self.input
        }
    }

    /// Absolute offset of the cursor in the input
    #[inline]
    pub(crate) fn offset(&self) -> usize {
        self.base + self.pos
    }

    #[inline]
    fn overrun(&self) -> isize {
        self.pos as isize - self.end as isize
    }

    /// Absolute offset of the current limit
    #[inline]
    fn abs_limit(&self) -> usize {
        ((self.base + self.end) as isize + self.limit) as usize
    }

    /// True once the cursor sits exactly on the current limit
    ///
    /// Moves into the patch buffer when the cursor has entered the slop
    /// region, and fails with `Malformed` if a read overran the limit.
    #[inline]
    pub(crate) fn is_done(&mut self) -> Result<bool> {
        loop {
            if (self.pos as isize) < self.limit_pos {
                return Ok(false);
            }
            let overrun = self.overrun();
            if overrun == self.limit {
                return Ok(true);
            }
            if overrun > self.limit || self.in_patch {
                return Err(Error::Malformed);
            }
            self.flip(overrun as usize);
        }
    }

    fn flip(&mut self, overrun: usize) {
        self.patch = [0; PATCH_SIZE];
        self.patch[..SLOP].copy_from_slice(&self.input[self.end..self.end + SLOP]);
        self.base = self.end;
        self.pos = overrun;
        self.end = SLOP;
        self.limit -= SLOP as isize;
        self.limit_pos = self.end as isize + self.limit.min(0);
        self.in_patch = true;
    }

    /// Whole input the stream reads from
    #[inline]
    pub(crate) fn input(&self) -> &'a [u8] {
        self.input
    }

    /// Next two bytes, little-endian, zero past the region
    #[inline]
    pub(crate) fn peek_u16(&self) -> u16 {
        let region = self.region();
        let b0 = region.get(self.pos).copied().unwrap_or(0);
        let b1 = region.get(self.pos + 1).copied().unwrap_or(0);
        u16::from_le_bytes([b0, b1])
    }

    #[inline]
    pub(crate) fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    #[inline]
    pub(crate) fn read_tag(&mut self) -> Result<(u32, WireType)> {
        let mut pos = self.pos;
        let tag = super::read_tag(self.region(), &mut pos)?;
        self.pos = pos;
        Ok(tag)
    }

    #[inline]
    pub(crate) fn read_varint(&mut self) -> Result<u64> {
        let region = self.region();
        let (value, n) = match region.get(self.pos) {
            Some(&b) if b < 0x80 => (b as u64, 1),
            _ => varint::decode_u64(region.get(self.pos..).unwrap_or_default())?,
        };
        self.pos += n;
        Ok(value)
    }

    #[inline]
    pub(crate) fn read_fixed32(&mut self) -> Result<u32> {
        let bytes = self
            .region()
            .get(self.pos..self.pos + 4)
            .ok_or(Error::Malformed)?;
        let v = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        self.pos += 4;
        Ok(v)
    }

    #[inline]
    pub(crate) fn read_fixed64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(
            self.region()
                .get(self.pos..self.pos + 8)
                .ok_or(Error::Malformed)?,
        );
        self.pos += 8;
        Ok(u64::from_le_bytes(raw))
    }

    /// Read a length prefix and check the payload fits in the limit
    pub(crate) fn read_size(&mut self) -> Result<usize> {
        let size = self.read_varint()?;
        if size > MAX_SIZE {
            return Err(Error::Malformed);
        }
        let fits = (size as isize)
            .checked_add(self.overrun())
            .is_some_and(|end| end <= self.limit);
        if !fits {
            return Err(Error::Malformed);
        }
        Ok(size as usize)
    }

    /// Take `size` bytes; returns their absolute offset and the bytes
    pub(crate) fn read_bytes(&mut self, size: usize) -> Result<(usize, &'a [u8])> {
        let start = self.offset();
        let input = self.input;
        let bytes = start
            .checked_add(size)
            .and_then(|end| input.get(start..end))
            .ok_or(Error::Malformed)?;
        self.pos += size;
        Ok((start, bytes))
    }

    /// Skip the value of a field whose tag was just read
    pub(crate) fn skip_value(
        &mut self,
        number: u32,
        wire_type: WireType,
        depth: u16,
    ) -> Result<()> {
        let data = self
            .input
            .get(..self.abs_limit())
            .ok_or(Error::Malformed)?;
        let mut abs = self.offset();
        super::skip_value(data, &mut abs, number, wire_type, depth)?;
        self.pos = abs - self.base;
        Ok(())
    }

    /// Narrow the limit to the next `size` bytes
    ///
    /// Returns the delta that [`EpsStream::pop_limit`] needs to restore the
    /// enclosing limit.
    pub(crate) fn push_limit(&mut self, size: usize) -> Result<isize> {
        let limit = size as isize + self.overrun();
        let delta = self.limit - limit;
        if delta < 0 {
            return Err(Error::Malformed);
        }
        self.limit = limit;
        self.limit_pos = self.end as isize + limit.min(0);
        Ok(delta)
    }

    pub(crate) fn pop_limit(&mut self, delta: isize) {
        self.limit += delta;
        self.limit_pos = self.end as isize + self.limit.min(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn drain_varints(input: &[u8]) -> Vec<u64> {
        let mut s = EpsStream::new(input);
        let mut out = Vec::new();
        while !s.is_done().unwrap() {
            out.push(s.read_varint().unwrap());
        }
        out
    }

    #[test]
    fn test_empty_input_is_done() {
        let mut s = EpsStream::new(&[]);
        assert!(s.is_done().unwrap());
        assert_eq!(s.offset(), 0);
    }

    #[test]
    fn test_short_input_lives_in_patch() {
        assert_eq!(drain_varints(&[1, 0x96, 0x01, 3]), [1, 150, 3]);
    }

    #[test]
    fn test_flip_keeps_absolute_offsets() {
        let input: Vec<u8> = (0..40u8).collect();
        let mut s = EpsStream::new(&input);
        for i in 0..40u64 {
            assert!(!s.is_done().unwrap());
            assert_eq!(s.offset(), i as usize);
            assert_eq!(s.read_varint().unwrap(), i);
        }
        assert!(s.is_done().unwrap());
    }

    #[test]
    fn test_long_varint_reads_into_slop() {
        // a ten-byte varint starting three bytes before `end`
        let mut input = alloc::vec![0u8; 6];
        varint::encode_u64(u64::MAX, &mut input);
        input.extend_from_slice(&[0; 9]);
        assert_eq!(input.len(), 25);
        let mut s = EpsStream::new(&input);
        for _ in 0..6 {
            s.read_varint().unwrap();
        }
        assert!(!s.is_done().unwrap());
        assert_eq!(s.read_varint().unwrap(), u64::MAX);
        assert_eq!(s.offset(), 16);
    }

    #[test]
    fn test_nested_limits() {
        // 2 bytes outside, then a 3-byte window, then 1 byte
        let input = [1, 2, 3, 4, 5, 6];
        let mut s = EpsStream::new(&input);
        s.read_varint().unwrap();
        s.read_varint().unwrap();
        let delta = s.push_limit(3).unwrap();
        assert_eq!(drain(&mut s), 3);
        s.pop_limit(delta);
        assert!(!s.is_done().unwrap());
        s.read_varint().unwrap();
        assert!(s.is_done().unwrap());
        assert_eq!(s.push_limit(1), Err(Error::Malformed));
    }

    fn drain(s: &mut EpsStream<'_>) -> usize {
        let mut n = 0;
        while !s.is_done().unwrap() {
            s.read_varint().unwrap();
            n += 1;
        }
        n
    }

    #[test]
    fn test_read_past_limit_is_malformed() {
        // a two-byte varint inside a one-byte window
        let input = [0x96, 0x01];
        let mut s = EpsStream::new(&input);
        let delta = s.push_limit(1).unwrap();
        s.read_varint().unwrap();
        assert_eq!(s.is_done(), Err(Error::Malformed));
        s.pop_limit(delta);
    }

    #[test]
    fn test_read_size_checks_limit() {
        let input = [0x05, 1, 2, 3];
        let mut s = EpsStream::new(&input);
        assert_eq!(s.read_size(), Err(Error::Malformed));
        let input = [0x03, 1, 2, 3];
        let mut s = EpsStream::new(&input);
        let size = s.read_size().unwrap();
        let (at, bytes) = s.read_bytes(size).unwrap();
        assert_eq!((at, bytes), (1, &[1u8, 2, 3][..]));
        assert!(s.is_done().unwrap());
    }

    #[test]
    fn test_skip_group_and_resume() {
        // group 1 { varint 2 = 5 } end, then varint 7
        let mut input = alloc::vec![0u8; 20];
        input.extend_from_slice(&[0x10, 0x05, 0x0C, 0x07]);
        let mut s = EpsStream::new_at(&input, 20);
        s.skip_value(1, WireType::StartGroup, 4).unwrap();
        assert_eq!(s.offset(), 23);
        assert!(!s.is_done().unwrap());
        assert_eq!(s.read_varint().unwrap(), 7);
        assert!(s.is_done().unwrap());
    }
}
