//! Fast dispatch for singular scalar fields
//!
//! The first two bytes of a field select a slot of the table's fast table.
//! A matching slot knows the field offset, hasbit and value encoding, so the
//! value is stored without a field lookup. Anything else returns `false` and
//! the generic path takes the field.

use super::decode::{varint_bits, Decoder};
use crate::error::Result;
use crate::message::{write_view, Message};
use crate::mini_table::fast::FastParser;
use crate::mini_table::FieldType;

/// Try to decode the next field through `msg`'s fast table
///
/// Returns `Ok(false)` without consuming input when the slot misses.
#[inline]
pub(super) fn dispatch(d: &mut Decoder<'_, '_>, msg: &Message) -> Result<bool> {
    let table = msg.table();
    let tag16 = d.stream.peek_u16();
    let slot = ((tag16 & 0xFF) >> 3) as usize & table.table_mask() as usize;
    let Some(entry) = table.fasttable.get(slot).copied() else {
        return Ok(false);
    };
    if !entry.matches(tag16) {
        return Ok(false);
    }
    d.stream.advance(entry.tag_len());

    let arena = msg.arena();
    let at = msg.ptr().add(entry.offset());
    match entry.parser {
        FastParser::Miss => unreachable!("a miss never matches"),
        FastParser::Bool => {
            let v = d.read_varint(FieldType::Bool)?;
            arena.write_u8(at, v as u8);
        }
        FastParser::Varint32 => {
            let v = d.read_varint(FieldType::Int32)?;
            arena.write_u32(at, v as u32);
        }
        FastParser::ZigZag32 => {
            let v = d.read_varint(FieldType::SInt32)?;
            arena.write_u32(at, v as u32);
        }
        FastParser::Varint64 => {
            let v = d.read_varint(FieldType::Int64)?;
            arena.write_u64(at, v);
        }
        FastParser::ZigZag64 => {
            let v = d.read_varint(FieldType::SInt64)?;
            arena.write_u64(at, v);
        }
        FastParser::Fixed32 => {
            let v = d.stream.read_fixed32()?;
            arena.write_u32(at, v);
        }
        FastParser::Fixed64 => {
            let v = d.stream.read_fixed64()?;
            arena.write_u64(at, v);
        }
        FastParser::String | FastParser::Bytes => {
            let view = d.read_string(entry.parser == FastParser::String)?;
            write_view(arena, at, view);
        }
    }
    if entry.hasbit() != 0 {
        msg.set_hasbit(entry.hasbit());
    }
    Ok(true)
}
