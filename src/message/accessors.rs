//! Typed get/set keyed by field records
//!
//! Getters return the zero value for fields that are unset, belong to
//! another table, or are inactive oneof members. Setters reject fields of
//! another table, or of the wrong shape, with `FieldNotFound`.

use super::value::{read_ptr, read_scalar, read_view, value_at, write_scalar, write_view};
use super::{Array, Map, Message, MessageValue, StringView};
use crate::arena::ArenaPtr;
use crate::error::{Error, Result};
use crate::mini_table::{
    FieldMode, FieldRep, MiniTable, MiniTableExtension, MiniTableField, Platform,
};
use alloc::vec::Vec;

/// Stored key and value widths of maps using `entry`; 0 marks strings
pub(crate) fn map_sizes(entry: &MiniTable) -> (u8, u8) {
    let width = |f: Option<&MiniTableField>| match f {
        Some(f) if f.field_type().is_string_like() => 0,
        Some(f) if f.is_sub_message() => 8,
        Some(f) => f.rep().size(Platform::Bit64) as u8,
        None => 0,
    };
    (width(entry.field(0)), width(entry.field(1)))
}

impl Message {
    #[inline]
    fn check(&self, field: &MiniTableField, shape_ok: bool) -> Result<()> {
        if self.table.contains(field) && shape_ok {
            Ok(())
        } else {
            Err(Error::FieldNotFound)
        }
    }

    /// Current storage of `field` if it is readable
    fn readable(&self, field: &MiniTableField) -> Option<ArenaPtr> {
        if !self.table.contains(field) {
            return None;
        }
        if let Some(off) = field.oneof_case_offset() {
            if self.arena.read_u32(self.ptr.add(off)) != field.number() {
                return None;
            }
        }
        Some(self.field_ptr(field))
    }

    fn scalar_bits(&self, field: &MiniTableField, rep: FieldRep) -> u64 {
        match self.readable(field) {
            Some(at) if field.is_scalar() && field.rep() == rep => {
                read_scalar(&self.arena, at, rep)
            }
            _ => 0,
        }
    }

    fn set_bits(&self, field: &MiniTableField, rep: FieldRep, bits: u64) -> Result<()> {
        self.check(field, field.is_scalar() && field.rep() == rep)?;
        self.claim(field);
        write_scalar(&self.arena, self.field_ptr(field), rep, bits);
        self.set_presence(field);
        Ok(())
    }

    /// Value of a bool field
    pub fn get_bool(&self, field: &MiniTableField) -> bool {
        self.scalar_bits(field, FieldRep::OneByte) != 0
    }

    /// Value of a 32-bit signed field (int32, sint32, sfixed32, enum)
    pub fn get_int32(&self, field: &MiniTableField) -> i32 {
        self.scalar_bits(field, FieldRep::FourByte) as u32 as i32
    }

    /// Value of a 32-bit unsigned field
    pub fn get_uint32(&self, field: &MiniTableField) -> u32 {
        self.scalar_bits(field, FieldRep::FourByte) as u32
    }

    /// Value of a 64-bit signed field
    pub fn get_int64(&self, field: &MiniTableField) -> i64 {
        self.scalar_bits(field, FieldRep::EightByte) as i64
    }

    /// Value of a 64-bit unsigned field
    pub fn get_uint64(&self, field: &MiniTableField) -> u64 {
        self.scalar_bits(field, FieldRep::EightByte)
    }

    /// Value of a float field
    pub fn get_float(&self, field: &MiniTableField) -> f32 {
        f32::from_bits(self.scalar_bits(field, FieldRep::FourByte) as u32)
    }

    /// Value of a double field
    pub fn get_double(&self, field: &MiniTableField) -> f64 {
        f64::from_bits(self.scalar_bits(field, FieldRep::EightByte))
    }

    /// Set a bool field
    pub fn set_bool(&self, field: &MiniTableField, value: bool) -> Result<()> {
        self.set_bits(field, FieldRep::OneByte, value as u64)
    }

    /// Set a 32-bit signed field; closed enums go through
    /// [`Message::set_closed_enum`]
    pub fn set_int32(&self, field: &MiniTableField, value: i32) -> Result<()> {
        self.set_bits(field, FieldRep::FourByte, value as u32 as u64)
    }

    /// Set a 32-bit unsigned field
    pub fn set_uint32(&self, field: &MiniTableField, value: u32) -> Result<()> {
        self.set_bits(field, FieldRep::FourByte, value as u64)
    }

    /// Set a 64-bit signed field
    pub fn set_int64(&self, field: &MiniTableField, value: i64) -> Result<()> {
        self.set_bits(field, FieldRep::EightByte, value as u64)
    }

    /// Set a 64-bit unsigned field
    pub fn set_uint64(&self, field: &MiniTableField, value: u64) -> Result<()> {
        self.set_bits(field, FieldRep::EightByte, value)
    }

    /// Set a float field
    pub fn set_float(&self, field: &MiniTableField, value: f32) -> Result<()> {
        self.set_bits(field, FieldRep::FourByte, value.to_bits() as u64)
    }

    /// Set a double field
    pub fn set_double(&self, field: &MiniTableField, value: f64) -> Result<()> {
        self.set_bits(field, FieldRep::EightByte, value.to_bits())
    }

    /// Set a closed-enum field, checking `value` against its enum table
    pub fn set_closed_enum(&self, field: &MiniTableField, value: i32) -> Result<()> {
        self.check(field, field.is_closed_enum() && field.is_scalar())?;
        let e = self.table.sub_enum(field).ok_or(Error::Unlinked)?;
        if !e.check_value(value as u32) {
            return Err(Error::BadEnumValue);
        }
        self.set_bits(field, FieldRep::FourByte, value as u32 as u64)
    }

    /// View of a string or bytes field
    pub fn get_string_view(&self, field: &MiniTableField) -> StringView {
        match self.readable(field) {
            Some(at) if field.is_scalar() && field.rep() == FieldRep::StringView => {
                read_view(&self.arena, at)
            }
            _ => StringView::EMPTY,
        }
    }

    /// Copy of a string or bytes field
    pub fn get_string(&self, field: &MiniTableField) -> Vec<u8> {
        self.get_string_view(field).to_vec(&self.arena)
    }

    /// Point a string or bytes field at bytes already in the arena
    ///
    /// A view into an arena that is not fused with this message's arena is
    /// rejected with `ForeignArena`.
    pub fn set_string_view(&self, field: &MiniTableField, view: StringView) -> Result<()> {
        self.check(field, field.is_scalar() && field.rep() == FieldRep::StringView)?;
        if !self.arena.owns(view.data, view.len) {
            return Err(Error::ForeignArena);
        }
        self.claim(field);
        write_view(&self.arena, self.field_ptr(field), view);
        self.set_presence(field);
        Ok(())
    }

    /// Copy `data` into the arena and store it in a string or bytes field
    pub fn set_string(&self, field: &MiniTableField, data: &[u8]) -> Result<()> {
        self.check(field, field.is_scalar() && field.rep() == FieldRep::StringView)?;
        let view = StringView::copy_from(&self.arena, data)?;
        self.set_string_view(field, view)
    }

    /// Singular sub-message, if present and its table is linked
    pub fn get_message(&self, field: &MiniTableField) -> Option<Message> {
        if !field.is_scalar() || !field.is_sub_message() {
            return None;
        }
        let ptr = read_ptr(&self.arena, self.readable(field)?);
        if ptr.is_null() {
            return None;
        }
        let sub = self.table.sub_message(field)?;
        Some(Message::from_raw(self.arena.clone(), ptr, sub))
    }

    /// Singular sub-message, created empty if absent
    pub fn mutable_message(&self, field: &MiniTableField) -> Result<Message> {
        self.check(field, field.is_scalar() && field.is_sub_message())?;
        let sub = self.table.sub_message(field).ok_or(Error::Unlinked)?;
        self.claim(field);
        let at = self.field_ptr(field);
        let ptr = read_ptr(&self.arena, at);
        if !ptr.is_null() {
            return Ok(Message::from_raw(self.arena.clone(), ptr, sub));
        }
        let msg = Message::new(sub, &self.arena)?;
        self.arena.write_u64(at, msg.ptr().to_raw());
        self.set_presence(field);
        Ok(msg)
    }

    /// Array of a repeated field, if allocated
    pub fn get_array(&self, field: &MiniTableField) -> Option<Array> {
        if field.mode() != FieldMode::Array {
            return None;
        }
        let ptr = read_ptr(&self.arena, self.readable(field)?);
        (!ptr.is_null()).then(|| Array::from_raw(self.arena.clone(), ptr))
    }

    /// Array of a repeated field, allocated empty if absent
    pub fn get_or_create_array(&self, field: &MiniTableField) -> Result<Array> {
        self.check(field, field.mode() == FieldMode::Array)?;
        if let Some(a) = self.get_array(field) {
            return Ok(a);
        }
        let a = Array::new(&self.arena, field.elem_size_lg2())?;
        self.arena.write_u64(self.field_ptr(field), a.ptr().to_raw());
        Ok(a)
    }

    /// Resize a repeated field to `len` elements, zeroing new ones
    pub fn resize_array(&self, field: &MiniTableField, len: usize) -> Result<Array> {
        let a = self.get_or_create_array(field)?;
        a.resize(len)?;
        Ok(a)
    }

    /// Map of a map field, if allocated
    pub fn get_map(&self, field: &MiniTableField) -> Option<Map> {
        if field.mode() != FieldMode::Map {
            return None;
        }
        let ptr = read_ptr(&self.arena, self.readable(field)?);
        (!ptr.is_null()).then(|| Map::from_raw(self.arena.clone(), ptr))
    }

    /// Map of a map field, allocated empty if absent
    pub fn get_or_create_map(&self, field: &MiniTableField) -> Result<Map> {
        self.check(field, field.mode() == FieldMode::Map)?;
        if let Some(m) = self.get_map(field) {
            return Ok(m);
        }
        let entry = self.table.sub_message(field).ok_or(Error::Unlinked)?;
        let (key_size, val_size) = map_sizes(entry);
        let m = Map::new(&self.arena, key_size, val_size)?;
        self.arena.write_u64(self.field_ptr(field), m.ptr().to_raw());
        Ok(m)
    }

    /// Value of any field, or `None` for absent messages, arrays and maps
    pub fn get_field(&self, field: &MiniTableField) -> Option<MessageValue> {
        let at = self.readable(field)?;
        value_at(&self.arena, at, field, self.table.sub_message(field))
    }

    #[inline]
    fn check_ext(&self, ext: &MiniTableExtension) -> Result<()> {
        if core::ptr::eq(ext.extendee(), self.table) {
            Ok(())
        } else {
            Err(Error::FieldNotFound)
        }
    }

    /// True if `ext` is present
    pub fn has_extension(&self, ext: &'static MiniTableExtension) -> bool {
        self.extension_payload(ext).is_some()
    }

    /// Value of `ext`, if present
    pub fn get_extension(&self, ext: &'static MiniTableExtension) -> Option<MessageValue> {
        let at = self.extension_payload(ext)?;
        value_at(&self.arena, at, ext.field(), ext.sub_message())
    }

    /// Payload of `ext`, created zeroed if missing
    ///
    /// Scalars sit at the start of the 16-byte payload; strings use all of
    /// it as a view; messages, arrays and maps store their pointer.
    pub fn get_or_create_extension(&self, ext: &'static MiniTableExtension) -> Result<ArenaPtr> {
        self.check_ext(ext)?;
        self.get_or_create_extension_payload(ext)
    }

    fn set_extension_bits(
        &self,
        ext: &'static MiniTableExtension,
        rep: FieldRep,
        bits: u64,
    ) -> Result<()> {
        let field = ext.field();
        if !field.is_scalar() || field.rep() != rep {
            return Err(Error::FieldNotFound);
        }
        let at = self.get_or_create_extension(ext)?;
        write_scalar(&self.arena, at, rep, bits);
        Ok(())
    }

    fn extension_bits(&self, ext: &'static MiniTableExtension, rep: FieldRep) -> u64 {
        match self.extension_payload(ext) {
            Some(at) if ext.field().is_scalar() && ext.field().rep() == rep => {
                read_scalar(&self.arena, at, rep)
            }
            _ => 0,
        }
    }

    /// Set a bool extension
    pub fn set_extension_bool(&self, ext: &'static MiniTableExtension, v: bool) -> Result<()> {
        self.set_extension_bits(ext, FieldRep::OneByte, v as u64)
    }

    /// Set a 32-bit signed extension
    pub fn set_extension_int32(&self, ext: &'static MiniTableExtension, v: i32) -> Result<()> {
        if let Some(e) = ext.sub_enum() {
            if !e.check_value(v as u32) {
                return Err(Error::BadEnumValue);
            }
        }
        self.set_extension_bits(ext, FieldRep::FourByte, v as u32 as u64)
    }

    /// Set a 32-bit unsigned extension
    pub fn set_extension_uint32(&self, ext: &'static MiniTableExtension, v: u32) -> Result<()> {
        self.set_extension_bits(ext, FieldRep::FourByte, v as u64)
    }

    /// Set a 64-bit signed extension
    pub fn set_extension_int64(&self, ext: &'static MiniTableExtension, v: i64) -> Result<()> {
        self.set_extension_bits(ext, FieldRep::EightByte, v as u64)
    }

    /// Set a 64-bit unsigned extension
    pub fn set_extension_uint64(&self, ext: &'static MiniTableExtension, v: u64) -> Result<()> {
        self.set_extension_bits(ext, FieldRep::EightByte, v)
    }

    /// Set a float extension
    pub fn set_extension_float(&self, ext: &'static MiniTableExtension, v: f32) -> Result<()> {
        self.set_extension_bits(ext, FieldRep::FourByte, v.to_bits() as u64)
    }

    /// Set a double extension
    pub fn set_extension_double(&self, ext: &'static MiniTableExtension, v: f64) -> Result<()> {
        self.set_extension_bits(ext, FieldRep::EightByte, v.to_bits())
    }

    /// Copy `data` into the arena and store it in a string or bytes extension
    pub fn set_extension_string(
        &self,
        ext: &'static MiniTableExtension,
        data: &[u8],
    ) -> Result<()> {
        let field = ext.field();
        if !field.is_scalar() || field.rep() != FieldRep::StringView {
            return Err(Error::FieldNotFound);
        }
        self.check_ext(ext)?;
        let view = StringView::copy_from(&self.arena, data)?;
        let at = self.get_or_create_extension_payload(ext)?;
        write_view(&self.arena, at, view);
        Ok(())
    }

    /// Value of a bool extension
    pub fn get_extension_bool(&self, ext: &'static MiniTableExtension) -> bool {
        self.extension_bits(ext, FieldRep::OneByte) != 0
    }

    /// Value of a 32-bit signed extension
    pub fn get_extension_int32(&self, ext: &'static MiniTableExtension) -> i32 {
        self.extension_bits(ext, FieldRep::FourByte) as u32 as i32
    }

    /// Value of a 32-bit unsigned extension
    pub fn get_extension_uint32(&self, ext: &'static MiniTableExtension) -> u32 {
        self.extension_bits(ext, FieldRep::FourByte) as u32
    }

    /// Value of a 64-bit signed extension
    pub fn get_extension_int64(&self, ext: &'static MiniTableExtension) -> i64 {
        self.extension_bits(ext, FieldRep::EightByte) as i64
    }

    /// Value of a 64-bit unsigned extension
    pub fn get_extension_uint64(&self, ext: &'static MiniTableExtension) -> u64 {
        self.extension_bits(ext, FieldRep::EightByte)
    }

    /// Value of a float extension
    pub fn get_extension_float(&self, ext: &'static MiniTableExtension) -> f32 {
        f32::from_bits(self.extension_bits(ext, FieldRep::FourByte) as u32)
    }

    /// Value of a double extension
    pub fn get_extension_double(&self, ext: &'static MiniTableExtension) -> f64 {
        f64::from_bits(self.extension_bits(ext, FieldRep::EightByte))
    }

    /// Copy of a string or bytes extension
    pub fn get_extension_string(&self, ext: &'static MiniTableExtension) -> Vec<u8> {
        match self.extension_payload(ext) {
            Some(at) if ext.field().rep() == FieldRep::StringView && ext.field().is_scalar() => {
                read_view(&self.arena, at).to_vec(&self.arena)
            }
            _ => Vec::new(),
        }
    }

    /// Message extension, created empty if absent
    pub fn mutable_extension_message(&self, ext: &'static MiniTableExtension) -> Result<Message> {
        let field = ext.field();
        if !field.is_scalar() || !field.is_sub_message() {
            return Err(Error::FieldNotFound);
        }
        let sub = ext.sub_message().ok_or(Error::Unlinked)?;
        let at = self.get_or_create_extension(ext)?;
        let ptr = read_ptr(&self.arena, at);
        if !ptr.is_null() {
            return Ok(Message::from_raw(self.arena.clone(), ptr, sub));
        }
        let msg = Message::new(sub, &self.arena)?;
        // the payload may have moved if the region grew
        let at = self.get_or_create_extension_payload(ext)?;
        self.arena.write_u64(at, msg.ptr().to_raw());
        Ok(msg)
    }

    /// Array of a repeated extension, created empty if absent
    pub fn get_or_create_extension_array(&self, ext: &'static MiniTableExtension) -> Result<Array> {
        let field = ext.field();
        if field.mode() != FieldMode::Array {
            return Err(Error::FieldNotFound);
        }
        let at = self.get_or_create_extension(ext)?;
        let ptr = read_ptr(&self.arena, at);
        if !ptr.is_null() {
            return Ok(Array::from_raw(self.arena.clone(), ptr));
        }
        let a = Array::new(&self.arena, field.elem_size_lg2())?;
        self.arena.write_u64(at, a.ptr().to_raw());
        Ok(a)
    }
}
