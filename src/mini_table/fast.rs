//! Fast-dispatch table construction
//!
//! Eligible fields get a slot indexed by the low bits of the first tag
//! byte. Each slot packs the expected tag, the tag mask, the field offset
//! and the hasbit into one `u64` so the decoder can accept or reject a tag
//! with a single XOR.

use super::{FieldType, MiniTable, MiniTableField, NO_FAST_TABLE};
use alloc::vec;
use log::trace;

/// Largest slot mask (32 slots)
const MAX_MASK: usize = 31;

/// Specialised parser for one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FastParser {
    /// Empty slot; always falls back to the generic path
    Miss,
    Bool,
    Varint32,
    Varint64,
    ZigZag32,
    ZigZag64,
    Fixed32,
    Fixed64,
    String,
    Bytes,
}

/// One slot of the fast table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FastEntry {
    /// Bits 0..16 expected tag bytes, 16..32 tag mask, 32..48 offset,
    /// 48..56 hasbit
    pub field_data: u64,
    pub parser: FastParser,
}

impl FastEntry {
    pub(crate) const MISS: FastEntry = FastEntry {
        field_data: 0,
        parser: FastParser::Miss,
    };

    #[inline]
    pub(crate) fn tag_mask(&self) -> u16 {
        (self.field_data >> 16) as u16
    }

    #[inline]
    pub(crate) fn tag_len(&self) -> usize {
        if self.tag_mask() == 0xFF {
            1
        } else {
            2
        }
    }

    #[inline]
    pub(crate) fn offset(&self) -> usize {
        ((self.field_data >> 32) & 0xFFFF) as usize
    }

    #[inline]
    pub(crate) fn hasbit(&self) -> u32 {
        ((self.field_data >> 48) & 0xFF) as u32
    }

    /// True when the first two input bytes carry this slot's tag
    #[inline]
    pub(crate) fn matches(&self, tag16: u16) -> bool {
        self.parser != FastParser::Miss
            && (tag16 ^ self.field_data as u16) & self.tag_mask() == 0
    }
}

fn parser_for(field: &MiniTableField) -> Option<FastParser> {
    if !field.is_scalar() || field.is_in_oneof() || field.presence > 255 {
        return None;
    }
    if field.number == 0 || field.number > 2047 {
        return None;
    }
    Some(match field.descriptor_type {
        FieldType::Bool => FastParser::Bool,
        FieldType::Int32 | FieldType::UInt32 => FastParser::Varint32,
        FieldType::Int64 | FieldType::UInt64 => FastParser::Varint64,
        FieldType::SInt32 => FastParser::ZigZag32,
        FieldType::SInt64 => FastParser::ZigZag64,
        FieldType::Fixed32 | FieldType::SFixed32 | FieldType::Float => FastParser::Fixed32,
        FieldType::Fixed64 | FieldType::SFixed64 | FieldType::Double => FastParser::Fixed64,
        FieldType::String => FastParser::String,
        FieldType::Bytes => FastParser::Bytes,
        FieldType::Enum | FieldType::Message | FieldType::Group => return None,
    })
}

fn wire_type_of(parser: FastParser) -> u32 {
    match parser {
        FastParser::Fixed64 => 1,
        FastParser::String | FastParser::Bytes => 2,
        FastParser::Fixed32 => 5,
        _ => 0,
    }
}

/// Expected tag bytes (little-endian) and mask
fn encoded_tag(number: u32, wire_type: u32) -> (u16, u16) {
    let tag = (number << 3) | wire_type;
    if tag < 0x80 {
        (tag as u16, 0xFF)
    } else {
        let b0 = (tag & 0x7F) | 0x80;
        let b1 = tag >> 7;
        ((b0 | (b1 << 8)) as u16, 0xFFFF)
    }
}

pub(super) fn build_fast_table(table: &mut MiniTable) {
    let mut candidates = vec![];
    for field in &table.fields {
        if let Some(parser) = parser_for(field) {
            let (tag, mask) = encoded_tag(field.number, wire_type_of(parser));
            let slot = ((tag & 0xFF) >> 3) as usize;
            let field_data = tag as u64
                | (mask as u64) << 16
                | (field.offset as u64) << 32
                | (field.presence.max(0) as u64) << 48;
            candidates.push((slot, FastEntry { field_data, parser }));
        }
    }
    let Some(max_slot) = candidates.iter().map(|(s, _)| *s).max() else {
        table.table_mask = NO_FAST_TABLE;
        return;
    };
    let mask = ((max_slot + 1).next_power_of_two() - 1).min(MAX_MASK);
    let mut entries = vec![FastEntry::MISS; mask + 1];
    for (slot, entry) in candidates {
        let slot = &mut entries[slot & mask];
        if slot.parser == FastParser::Miss {
            *slot = entry;
        }
    }
    trace!(
        "fast table with {} slots for {} fields",
        entries.len(),
        table.fields.len()
    );
    table.table_mask = mask as u8;
    table.fasttable = entries;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mini_descriptor::{field_modifier, MtDataEncoder};
    use crate::mini_table::Platform;

    #[test]
    fn test_encoded_tag_one_and_two_bytes() {
        assert_eq!(encoded_tag(1, 0), (0x08, 0xFF));
        assert_eq!(encoded_tag(16, 0), (0x0180, 0xFFFF));
    }

    #[test]
    fn test_table_for_simple_scalars() {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::Int32, 1, 0).unwrap();
        e.put_field(FieldType::Fixed64, 2, 0).unwrap();
        let t = MiniTable::build(e.as_bytes(), Platform::Bit64).unwrap();
        assert_eq!(t.table_mask(), 3);
        let entry = t.fasttable[1];
        assert_eq!(entry.parser, FastParser::Varint32);
        assert!(entry.matches(0x08));
        assert!(!entry.matches(0x0D));
        assert_eq!(entry.offset(), t.field(0).unwrap().offset());
        assert_eq!(entry.hasbit(), 1);
        assert_eq!(t.fasttable[2].parser, FastParser::Fixed64);
        assert_eq!(t.fasttable[0].parser, FastParser::Miss);
    }

    #[test]
    fn test_ineligible_fields_leave_no_table() {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::Message, 1, 0).unwrap();
        e.put_field(FieldType::Int32, 2, field_modifier::IS_REPEATED).unwrap();
        let t = MiniTable::build(e.as_bytes(), Platform::Bit64).unwrap();
        assert_eq!(t.table_mask(), NO_FAST_TABLE);
        assert!(t.fasttable.is_empty());
    }

    #[test]
    fn test_colliding_slots_keep_lowest_number() {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::Int32, 1, 0).unwrap();
        e.put_field(FieldType::Int32, 17, 0).unwrap();
        e.put_field(FieldType::Int32, 49, 0).unwrap();
        let t = MiniTable::build(e.as_bytes(), Platform::Bit64).unwrap();
        // fields 17 and 49 both start with tag byte 0x88, slot 17
        assert_eq!(t.table_mask(), 31);
        assert!(t.fasttable[1].matches(0x08));
        assert!(t.fasttable[17].matches(0x0188));
        assert!(!t.fasttable[17].matches(0x0388));
    }
}
