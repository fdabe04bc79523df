//! Arena-backed messages
//!
//! A message is a blob of [`MiniTable::size`] bytes in an arena, preceded
//! by an 8-byte slot pointing at its unknown-field and extension region:
//!
//! ```text
//! ptr - 8   region pointer (0 until needed)
//! ptr       hasbits | oneof cases | field storage      (MiniTable::size)
//! ```
//!
//! Fields are addressed through the [`MiniTableField`] records of the
//! message's table. Scalars are stored inline, strings as a 16-byte view
//! `{data, len}`, and sub-messages, arrays and maps as the 8-byte
//! [`ArenaPtr`] of their own storage.

mod accessors;
mod array;
mod internal;
mod map;
mod promote;
mod value;

pub use array::Array;
pub use map::{Map, MapInsertStatus, MapKey, MapValue};
pub use value::{MessageValue, StringView};

pub(crate) use accessors::map_sizes;
pub(crate) use value::{read_ptr, read_scalar, read_view, value_at, write_scalar, write_view};

use crate::arena::{Arena, ArenaPtr};
use crate::error::{Error, Result};
use crate::mini_table::{FieldMode, FieldRep, MiniTable, MiniTableField, Platform};

/// Handle to one message
///
/// Cloning the handle shares the message; the arena keeps it alive.
#[derive(Clone)]
pub struct Message {
    arena: Arena,
    ptr: ArenaPtr,
    table: &'static MiniTable,
}

impl core::fmt::Debug for Message {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Message")
            .field("ptr", &self.ptr)
            .field("size", &self.table.size())
            .field("unknown_len", &self.unknown_len())
            .field("extensions", &self.extension_count())
            .finish()
    }
}

/// Storage bytes of a field in a 64-bit blob
#[inline]
pub(crate) fn storage_size(field: &MiniTableField) -> usize {
    match field.mode() {
        FieldMode::Scalar => field.rep().size(Platform::Bit64),
        FieldMode::Array | FieldMode::Map => 8,
    }
}

impl Message {
    /// Allocate an empty message of type `table` in `arena`
    ///
    /// Messages always use the 64-bit layout; 32-bit tables are rejected
    /// with `IncompatibleLayout`.
    pub fn new(table: &'static MiniTable, arena: &Arena) -> Result<Message> {
        if table.platform() != Platform::Bit64 {
            return Err(Error::IncompatibleLayout);
        }
        let base = arena.malloc(8 + table.size())?;
        Ok(Message {
            arena: arena.clone(),
            ptr: base.add(8),
            table,
        })
    }

    pub(crate) fn from_raw(arena: Arena, ptr: ArenaPtr, table: &'static MiniTable) -> Message {
        Message { arena, ptr, table }
    }

    /// Arena holding the message
    #[inline]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Address of the blob
    #[inline]
    pub fn ptr(&self) -> ArenaPtr {
        self.ptr
    }

    /// Type of the message
    #[inline]
    pub fn table(&self) -> &'static MiniTable {
        self.table
    }

    #[inline]
    pub(crate) fn field_ptr(&self, field: &MiniTableField) -> ArenaPtr {
        self.ptr.add(field.offset())
    }

    #[inline]
    fn oneof_case(&self, field: &MiniTableField) -> Option<u32> {
        field
            .oneof_case_offset()
            .map(|off| self.arena.read_u32(self.ptr.add(off)))
    }

    #[inline]
    fn hasbit_set(&self, hasbit: u32) -> bool {
        let byte = self.arena.read_u8(self.ptr.add((hasbit / 8) as usize));
        byte & (1 << (hasbit % 8)) != 0
    }

    #[inline]
    pub(crate) fn set_hasbit(&self, hasbit: u32) {
        self.write_hasbit(hasbit, true);
    }

    fn write_hasbit(&self, hasbit: u32, on: bool) {
        let at = self.ptr.add((hasbit / 8) as usize);
        let byte = self.arena.read_u8(at);
        let bit = 1 << (hasbit % 8);
        self.arena
            .write_u8(at, if on { byte | bit } else { byte & !bit });
    }

    /// True if `field` holds an explicitly set value
    ///
    /// Oneof members compare the case word, hasbit fields test their bit and
    /// singular sub-messages test their pointer. Fields without presence
    /// report whether their value is non-zero (non-empty for strings,
    /// arrays and maps).
    pub fn has_field(&self, field: &MiniTableField) -> bool {
        if !self.table.contains(field) {
            return false;
        }
        if let Some(case) = self.oneof_case(field) {
            return case == field.number();
        }
        if let Some(hasbit) = field.hasbit() {
            return self.hasbit_set(hasbit);
        }
        let at = self.field_ptr(field);
        match field.mode() {
            FieldMode::Array => self.get_array(field).is_some_and(|a| !a.is_empty()),
            FieldMode::Map => self.get_map(field).is_some_and(|m| !m.is_empty()),
            FieldMode::Scalar => match field.rep() {
                FieldRep::StringView => self.arena.read_u64(at.add(8)) != 0,
                rep => read_scalar(&self.arena, at, rep) != 0,
            },
        }
    }

    /// Record that `field` is set, without touching its value
    ///
    /// Switching a oneof to a new member zeroes the shared storage first.
    pub fn set_presence(&self, field: &MiniTableField) {
        if let Some(off) = field.oneof_case_offset() {
            let case_at = self.ptr.add(off);
            if self.arena.read_u32(case_at) != field.number() {
                self.arena.fill_zero(self.field_ptr(field), storage_size(field));
                self.arena.write_u32(case_at, field.number());
            }
        } else if let Some(hasbit) = field.hasbit() {
            self.write_hasbit(hasbit, true);
        }
    }

    /// Prepare the storage of `field` for a write
    ///
    /// For a oneof member this makes it the active member, zeroing the
    /// storage if another member was set.
    #[inline]
    pub(crate) fn claim(&self, field: &MiniTableField) {
        if field.is_in_oneof() {
            self.set_presence(field);
        }
    }

    /// Zero `field` and clear its presence
    ///
    /// Clearing an inactive oneof member leaves the active one alone.
    pub fn clear_field(&self, field: &MiniTableField) {
        if !self.table.contains(field) {
            return;
        }
        if let Some(case) = self.oneof_case(field) {
            if case != field.number() {
                return;
            }
            if let Some(off) = field.oneof_case_offset() {
                self.arena.write_u32(self.ptr.add(off), 0);
            }
        } else if let Some(hasbit) = field.hasbit() {
            self.write_hasbit(hasbit, false);
        }
        self.arena.fill_zero(self.field_ptr(field), storage_size(field));
    }

    /// Number of the set member of `field`'s oneof, or 0
    pub fn which_oneof(&self, field: &MiniTableField) -> u32 {
        if !self.table.contains(field) {
            return 0;
        }
        self.oneof_case(field).unwrap_or(0)
    }

    /// Reset every field, unknown field and extension
    pub fn clear(&self) {
        self.arena.fill_zero(self.ptr, self.table.size());
        self.reset_region();
    }

    /// True if every required field of this message is set
    ///
    /// Sub-messages are not visited.
    pub fn is_initialized_shallow(&self) -> bool {
        (1..=self.table.required_count() as u32).all(|h| self.hasbit_set(h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mini_descriptor::{field_modifier, MtDataEncoder};
    use crate::mini_table::FieldType;

    fn build(fields: &[(FieldType, u32, u64)], oneof: &[u32]) -> &'static MiniTable {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        for &(ty, n, m) in fields {
            e.put_field(ty, n, m).unwrap();
        }
        if !oneof.is_empty() {
            e.start_oneof();
            for &n in oneof {
                e.put_oneof_field(n);
            }
        }
        MiniTable::build(e.as_bytes(), Platform::Bit64).unwrap().leak()
    }

    #[test]
    fn test_new_rejects_32_bit_layout() {
        let t = MiniTable::build(b"$(", Platform::Bit32).unwrap().leak();
        let arena = Arena::new();
        assert_eq!(Message::new(t, &arena).unwrap_err(), Error::IncompatibleLayout);
    }

    #[test]
    fn test_presence_by_hasbit() {
        let t = build(&[(FieldType::Int32, 1, 0)], &[]);
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        let f = t.field(0).unwrap();
        assert!(!m.has_field(f));
        m.set_presence(f);
        assert!(m.has_field(f));
        m.clear_field(f);
        assert!(!m.has_field(f));
    }

    #[test]
    fn test_proto3_presence_is_nonzero_value() {
        let t = build(&[(FieldType::Int64, 1, field_modifier::IS_PROTO3_SINGULAR)], &[]);
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        let f = t.field(0).unwrap();
        assert!(!m.has_field(f));
        m.set_int64(f, -3).unwrap();
        assert!(m.has_field(f));
        m.set_int64(f, 0).unwrap();
        assert!(!m.has_field(f));
    }

    #[test]
    fn test_oneof_switch_clears_previous_member() {
        let t = build(&[(FieldType::Int64, 1, 0), (FieldType::Int32, 2, 0)], &[1, 2]);
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        let (f1, f2) = (t.field(0).unwrap(), t.field(1).unwrap());
        m.set_int64(f1, -1).unwrap();
        assert_eq!(m.which_oneof(f2), 1);
        m.set_presence(f2);
        assert!(!m.has_field(f1));
        assert!(m.has_field(f2));
        // the shared slot was zeroed on the switch
        assert_eq!(m.get_int32(f2), 0);
        m.clear_field(f1);
        assert_eq!(m.which_oneof(f1), 2);
        m.clear_field(f2);
        assert_eq!(m.which_oneof(f1), 0);
    }

    #[test]
    fn test_clear_resets_everything() {
        let t = build(&[(FieldType::Int32, 1, 0)], &[]);
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        let f = t.field(0).unwrap();
        m.set_int32(f, 9).unwrap();
        m.add_unknown(&[0x10, 0x01]).unwrap();
        m.clear();
        assert!(!m.has_field(f));
        assert_eq!(m.get_int32(f), 0);
        assert_eq!(m.unknown_len(), 0);
    }

    #[test]
    fn test_required_check() {
        let t = build(
            &[
                (FieldType::Int32, 1, field_modifier::IS_REQUIRED),
                (FieldType::Int32, 2, 0),
                (FieldType::Int32, 3, field_modifier::IS_REQUIRED),
            ],
            &[],
        );
        assert_eq!(t.required_count(), 2);
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        assert!(!m.is_initialized_shallow());
        m.set_int32(t.field(0).unwrap(), 1).unwrap();
        m.set_int32(t.field(1).unwrap(), 1).unwrap();
        assert!(!m.is_initialized_shallow());
        m.set_int32(t.field(2).unwrap(), 0).unwrap();
        assert!(m.is_initialized_shallow());
    }

    #[test]
    fn test_foreign_field_is_ignored() {
        let a = build(&[(FieldType::Int32, 1, 0)], &[]);
        let b = build(&[(FieldType::Int32, 1, 0)], &[]);
        let arena = Arena::new();
        let m = Message::new(a, &arena).unwrap();
        assert!(!m.has_field(b.field(0).unwrap()));
        assert_eq!(m.set_int32(b.field(0).unwrap(), 1), Err(Error::FieldNotFound));
    }
}
