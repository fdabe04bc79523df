//! Closed-enum validators

use crate::error::{BuildError, Result};
use crate::mini_descriptor::base92::{decode_varint, from_base92};
use crate::mini_descriptor::{MAX_ENUM_MASK, MAX_SKIP, MIN_SKIP, VERSION_ENUM};
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use log::debug;

/// Membership test for the values of a closed enum
///
/// Values below `mask_limit` are held in a bitmask; sparse large values
/// spill into a sorted list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiniTableEnum {
    mask_limit: u32,
    mask: Vec<u32>,
    values: Vec<u32>,
    /// Values seen while building
    count: u32,
}

impl MiniTableEnum {
    fn new() -> Self {
        Self {
            mask_limit: 64,
            mask: vec![0, 0],
            values: Vec::new(),
            count: 0,
        }
    }

    fn add_value(&mut self, val: u32) {
        self.count += 1;
        if !self.values.is_empty() || (val > 512 && self.count < val / 32) {
            self.values.push(val);
            return;
        }
        let limit = (val / 32 + 1) * 32;
        while self.mask_limit < limit {
            self.mask.push(0);
            self.mask_limit += 32;
        }
        self.mask[(val / 32) as usize] |= 1 << (val % 32);
    }

    /// Build from an enum descriptor (`'!'` followed by masks and skips)
    ///
    /// ```
    /// use minipb::mini_table::MiniTableEnum;
    ///
    /// // values 0 and 2: one mask char with bits 0 and 2
    /// let e = MiniTableEnum::build(b"!&")?;
    /// assert!(e.check_value(0));
    /// assert!(!e.check_value(1));
    /// assert!(e.check_value(2));
    /// # Ok::<(), minipb::Error>(())
    /// ```
    pub fn build(data: &[u8]) -> Result<MiniTableEnum> {
        let result = Self::build_inner(data);
        if let Err(e) = &result {
            debug!("enum table build failed: {:?}", e);
        }
        result
    }

    fn build_inner(data: &[u8]) -> Result<MiniTableEnum> {
        let body = match data.split_first() {
            None => &[][..],
            Some((&VERSION_ENUM, rest)) => rest,
            Some((&other, _)) => return Err(BuildError::InvalidVersion(other).into()),
        };

        let mut table = MiniTableEnum::new();
        let mut base = 0u32;
        let mut pos = 0;
        while let Some(&ch) = body.get(pos) {
            pos += 1;
            if ch <= MAX_ENUM_MASK {
                let mut mask = from_base92(ch).ok_or(BuildError::InvalidChar(ch))?;
                for _ in 0..5 {
                    if mask & 1 != 0 {
                        table.add_value(base);
                    }
                    mask >>= 1;
                    base = base.wrapping_add(1);
                }
            } else if (MIN_SKIP..=MAX_SKIP).contains(&ch) {
                let skip = decode_varint(body, &mut pos, ch, MIN_SKIP, MAX_SKIP)?;
                base = base.wrapping_add(skip);
            } else {
                return Err(BuildError::InvalidChar(ch).into());
            }
        }
        Ok(table)
    }

    /// Move the table to the heap for the rest of the program
    pub fn leak(self) -> &'static MiniTableEnum {
        Box::leak(Box::new(self))
    }

    /// True if `val` is a declared member
    #[inline]
    pub fn check_value(&self, val: u32) -> bool {
        if val < self.mask_limit {
            return self.mask[(val / 32) as usize] & (1 << (val % 32)) != 0;
        }
        self.values.contains(&val)
    }

    /// First value not covered by the bitmask
    #[inline]
    pub fn mask_limit(&self) -> u32 {
        self.mask_limit
    }

    /// Number of values held outside the bitmask
    #[inline]
    pub fn spill_count(&self) -> usize {
        self.values.len()
    }
}
