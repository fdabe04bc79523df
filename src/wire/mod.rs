//! Protobuf binary wire format
//!
//! ```text
//! tag   = varint(field_number << 3 | wire_type)
//! value = varint | fixed64 | varint(len) bytes | group ... end-group | fixed32
//! ```
//!
//! [`decode`] projects bytes into a [`Message`](crate::message::Message)
//! through its mini-table; [`encode`] is the inverse.

mod decode;
mod encode;
mod fast;
mod reader;
pub mod varint;

pub use decode::{decode, decode_length_prefixed};
pub use encode::encode;

use crate::error::{Error, Result};
use crate::mini_table::FieldType;

/// Default nesting limit for decode and encode
pub const DEFAULT_MAX_DEPTH: u16 = 64;

/// Largest valid field number
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// The six wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    Delimited = 2,
    StartGroup = 3,
    EndGroup = 4,
    Fixed32 = 5,
}

impl WireType {
    /// Decode the low three bits of a tag
    #[inline]
    pub const fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => WireType::Varint,
            1 => WireType::Fixed64,
            2 => WireType::Delimited,
            3 => WireType::StartGroup,
            4 => WireType::EndGroup,
            5 => WireType::Fixed32,
            _ => return None,
        })
    }
}

/// Combine a field number and wire type into a tag
#[inline]
pub const fn make_tag(number: u32, wire_type: WireType) -> u32 {
    (number << 3) | wire_type as u32
}

/// Wire type a non-packed value of type `ty` is written with
#[inline]
pub const fn wire_type_of(ty: FieldType) -> WireType {
    match ty {
        FieldType::Double | FieldType::Fixed64 | FieldType::SFixed64 => WireType::Fixed64,
        FieldType::Float | FieldType::Fixed32 | FieldType::SFixed32 => WireType::Fixed32,
        FieldType::String | FieldType::Bytes | FieldType::Message => WireType::Delimited,
        FieldType::Group => WireType::StartGroup,
        _ => WireType::Varint,
    }
}

/// Read a tag at `*pos`, rejecting field number 0 and wire types 6 and 7
pub(crate) fn read_tag(data: &[u8], pos: &mut usize) -> Result<(u32, WireType)> {
    let (tag, n) = varint::decode_u32(data.get(*pos..).unwrap_or_default())?;
    *pos += n;
    let number = tag >> 3;
    let wire_type = WireType::from_u32(tag & 7).ok_or(Error::Malformed)?;
    if number == 0 {
        return Err(Error::Malformed);
    }
    Ok((number, wire_type))
}

/// Step over the value of a field whose tag was just read
///
/// Groups are skipped recursively up to their matching end tag, at most
/// `depth` levels deep.
pub(crate) fn skip_value(
    data: &[u8],
    pos: &mut usize,
    number: u32,
    wire_type: WireType,
    depth: u16,
) -> Result<()> {
    let rest = data.get(*pos..).unwrap_or_default();
    let advance = match wire_type {
        WireType::Varint => varint::decode_u64(rest)?.1,
        WireType::Fixed64 => 8,
        WireType::Fixed32 => 4,
        WireType::Delimited => {
            let (len, n) = varint::decode_u64(rest)?;
            n.checked_add(usize::try_from(len).map_err(|_| Error::Malformed)?)
                .ok_or(Error::Malformed)?
        }
        WireType::StartGroup => {
            if depth == 0 {
                return Err(Error::MaxDepthExceeded);
            }
            loop {
                let (n, wt) = read_tag(data, pos)?;
                if wt == WireType::EndGroup {
                    return if n == number {
                        Ok(())
                    } else {
                        Err(Error::Malformed)
                    };
                }
                skip_value(data, pos, n, wt, depth - 1)?;
            }
        }
        WireType::EndGroup => return Err(Error::Malformed),
    };
    if advance > rest.len() {
        return Err(Error::Malformed);
    }
    *pos += advance;
    Ok(())
}

/// Per-call decoder options
///
/// ```
/// use minipb::wire::DecodeOptions;
///
/// let opts = DecodeOptions::default().with_check_required(true).with_max_depth(16);
/// assert_eq!(DecodeOptions::from_bits(opts.to_bits()), opts);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Strings reference one shared copy of the input instead of owning
    /// individual copies
    pub alias_strings: bool,
    /// Fail with `MissingRequired` when a required field is absent
    pub check_required: bool,
    /// Ignore the per-table fast dispatch
    pub disable_fast_table: bool,
    /// Sub-message and group nesting limit
    pub max_depth: u16,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            alias_strings: false,
            check_required: false,
            disable_fast_table: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

const OPT_ALIAS_STRINGS: u32 = 1;
const OPT_CHECK_REQUIRED: u32 = 2;
const OPT_DISABLE_FAST_TABLE: u32 = 4;

impl DecodeOptions {
    /// Set [`DecodeOptions::alias_strings`]
    pub fn with_alias_strings(mut self, on: bool) -> Self {
        self.alias_strings = on;
        self
    }

    /// Set [`DecodeOptions::check_required`]
    pub fn with_check_required(mut self, on: bool) -> Self {
        self.check_required = on;
        self
    }

    /// Set [`DecodeOptions::disable_fast_table`]
    pub fn with_disable_fast_table(mut self, on: bool) -> Self {
        self.disable_fast_table = on;
        self
    }

    /// Set [`DecodeOptions::max_depth`]
    pub fn with_max_depth(mut self, depth: u16) -> Self {
        self.max_depth = depth;
        self
    }

    /// Pack into a bitfield: flags in the low bits, depth in the high 16
    pub fn to_bits(self) -> u32 {
        let mut bits = (self.max_depth as u32) << 16;
        if self.alias_strings {
            bits |= OPT_ALIAS_STRINGS;
        }
        if self.check_required {
            bits |= OPT_CHECK_REQUIRED;
        }
        if self.disable_fast_table {
            bits |= OPT_DISABLE_FAST_TABLE;
        }
        bits
    }

    /// Unpack [`DecodeOptions::to_bits`]; a zero depth means the default
    pub fn from_bits(bits: u32) -> Self {
        let depth = (bits >> 16) as u16;
        Self {
            alias_strings: bits & OPT_ALIAS_STRINGS != 0,
            check_required: bits & OPT_CHECK_REQUIRED != 0,
            disable_fast_table: bits & OPT_DISABLE_FAST_TABLE != 0,
            max_depth: if depth == 0 { DEFAULT_MAX_DEPTH } else { depth },
        }
    }
}

/// Per-call encoder options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Emit map entries sorted by key
    pub deterministic: bool,
    /// Leave unknown fields out of the output
    pub skip_unknown: bool,
    /// Fail with `MissingRequired` when a required field is absent
    pub check_required: bool,
    /// Sub-message nesting limit
    pub max_depth: u16,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            deterministic: false,
            skip_unknown: false,
            check_required: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl EncodeOptions {
    /// Set [`EncodeOptions::deterministic`]
    pub fn with_deterministic(mut self, on: bool) -> Self {
        self.deterministic = on;
        self
    }

    /// Set [`EncodeOptions::skip_unknown`]
    pub fn with_skip_unknown(mut self, on: bool) -> Self {
        self.skip_unknown = on;
        self
    }

    /// Set [`EncodeOptions::check_required`]
    pub fn with_check_required(mut self, on: bool) -> Self {
        self.check_required = on;
        self
    }

    /// Set [`EncodeOptions::max_depth`]
    pub fn with_max_depth(mut self, depth: u16) -> Self {
        self.max_depth = depth;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_tag() {
        let mut pos = 0;
        assert_eq!(read_tag(&[0x08], &mut pos).unwrap(), (1, WireType::Varint));
        assert_eq!(pos, 1);
        let mut pos = 0;
        assert_eq!(read_tag(&[0x00], &mut pos), Err(Error::Malformed));
        let mut pos = 0;
        assert_eq!(read_tag(&[0x0E], &mut pos), Err(Error::Malformed));
        assert_eq!(make_tag(2, WireType::Delimited), 0x12);
    }

    #[test]
    fn test_wire_type_of() {
        assert_eq!(wire_type_of(FieldType::SInt32), WireType::Varint);
        assert_eq!(wire_type_of(FieldType::Float), WireType::Fixed32);
        assert_eq!(wire_type_of(FieldType::SFixed64), WireType::Fixed64);
        assert_eq!(wire_type_of(FieldType::Bytes), WireType::Delimited);
        assert_eq!(wire_type_of(FieldType::Group), WireType::StartGroup);
    }

    #[test]
    fn test_skip_each_wire_type() {
        // varint, fixed64, delimited, fixed32
        let data = [0x96, 0x01, 1, 2, 3, 4, 5, 6, 7, 8, 0x02, b'h', b'i', 9, 9, 9, 9];
        let mut pos = 0;
        skip_value(&data, &mut pos, 1, WireType::Varint, 1).unwrap();
        assert_eq!(pos, 2);
        skip_value(&data, &mut pos, 1, WireType::Fixed64, 1).unwrap();
        assert_eq!(pos, 10);
        skip_value(&data, &mut pos, 1, WireType::Delimited, 1).unwrap();
        assert_eq!(pos, 13);
        skip_value(&data, &mut pos, 1, WireType::Fixed32, 1).unwrap();
        assert_eq!(pos, 17);
        assert_eq!(
            skip_value(&data, &mut pos, 1, WireType::Fixed32, 1),
            Err(Error::Malformed)
        );
    }

    #[test]
    fn test_skip_nested_group() {
        // group 1 { varint 2; group 3 { } }
        let data = [0x10, 0x05, 0x1B, 0x1C, 0x0C];
        let mut pos = 0;
        skip_value(&data, &mut pos, 1, WireType::StartGroup, 4).unwrap();
        assert_eq!(pos, data.len());

        let mut pos = 0;
        assert_eq!(
            skip_value(&data, &mut pos, 1, WireType::StartGroup, 1),
            Err(Error::MaxDepthExceeded)
        );
    }

    #[test]
    fn test_skip_group_mismatched_end() {
        let data = [0x10, 0x05, 0x14];
        let mut pos = 0;
        assert_eq!(
            skip_value(&data, &mut pos, 1, WireType::StartGroup, 4),
            Err(Error::Malformed)
        );
    }

    #[test]
    fn test_decode_options_bits() {
        let d = DecodeOptions::default();
        assert_eq!(d.max_depth, 64);
        assert_eq!(DecodeOptions::from_bits(0), d);
        let o = DecodeOptions::default()
            .with_alias_strings(true)
            .with_disable_fast_table(true)
            .with_max_depth(128);
        assert_eq!(o.to_bits(), (128 << 16) | 5);
        assert_eq!(DecodeOptions::from_bits(o.to_bits()), o);
    }
}
