//! Per-field layout record

use super::{FieldMode, FieldRep, FieldType, NO_SUB};
use core::sync::atomic::{AtomicU8, Ordering};

pub(crate) const MODE_MASK: u8 = 0x03;
pub(crate) const FLAG_PACKED: u8 = 0x04;
pub(crate) const FLAG_EXTENSION: u8 = 0x08;
pub(crate) const FLAG_ALTERNATE: u8 = 0x10;
pub(crate) const REP_SHIFT: u8 = 6;

/// Where one field lives in a message blob and how its presence is tracked
pub struct MiniTableField {
    pub(crate) number: u32,
    pub(crate) offset: u16,
    /// `> 0` hasbit index, `< 0` bitwise-not of the oneof case offset,
    /// `0` no presence
    pub(crate) presence: i32,
    pub(crate) submsg_index: u16,
    pub(crate) descriptor_type: FieldType,
    /// Low 2 bits [`FieldMode`], then label flags, representation at bit 6.
    /// Atomic because linking a map-entry sub rewrites the mode to `Map`.
    pub(crate) mode: AtomicU8,
}

impl Clone for MiniTableField {
    fn clone(&self) -> Self {
        Self {
            number: self.number,
            offset: self.offset,
            presence: self.presence,
            submsg_index: self.submsg_index,
            descriptor_type: self.descriptor_type,
            mode: AtomicU8::new(self.mode_bits()),
        }
    }
}

impl core::fmt::Debug for MiniTableField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MiniTableField")
            .field("number", &self.number)
            .field("offset", &self.offset)
            .field("presence", &self.presence)
            .field("type", &self.descriptor_type)
            .field("mode", &self.mode())
            .field("rep", &self.rep())
            .finish()
    }
}

impl MiniTableField {
    pub(crate) fn new(number: u32, descriptor_type: FieldType, mode: u8) -> Self {
        Self {
            number,
            offset: 0,
            presence: 0,
            submsg_index: NO_SUB,
            descriptor_type,
            mode: AtomicU8::new(mode),
        }
    }

    #[inline]
    pub(crate) fn mode_bits(&self) -> u8 {
        self.mode.load(Ordering::Relaxed)
    }

    /// Wire field number
    #[inline]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Byte offset of the value in the message blob
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset as usize
    }

    /// Raw presence word
    #[inline]
    pub fn presence(&self) -> i32 {
        self.presence
    }

    /// Hasbit index, if presence is tracked by a hasbit
    #[inline]
    pub fn hasbit(&self) -> Option<u32> {
        (self.presence > 0).then_some(self.presence as u32)
    }

    /// Offset of the oneof case word, if the field is in a oneof
    #[inline]
    pub fn oneof_case_offset(&self) -> Option<usize> {
        (self.presence < 0).then_some(!self.presence as usize)
    }

    /// True for oneof members
    #[inline]
    pub fn is_in_oneof(&self) -> bool {
        self.presence < 0
    }

    /// Type as stored, before alternate-flag adjustments
    ///
    /// Open enums are stored as `Int32` and unvalidated strings as `Bytes`.
    #[inline]
    pub fn descriptor_type(&self) -> FieldType {
        self.descriptor_type
    }

    /// Type as declared in the schema
    pub fn field_type(&self) -> FieldType {
        if self.is_alternate() {
            match self.descriptor_type {
                FieldType::Int32 => return FieldType::Enum,
                FieldType::Bytes => return FieldType::String,
                _ => {}
            }
        }
        self.descriptor_type
    }

    /// Storage shape
    #[inline]
    pub fn mode(&self) -> FieldMode {
        match self.mode_bits() & MODE_MASK {
            0 => FieldMode::Map,
            1 => FieldMode::Array,
            _ => FieldMode::Scalar,
        }
    }

    /// Storage size class
    #[inline]
    pub fn rep(&self) -> FieldRep {
        FieldRep::from_bits(self.mode_bits() >> REP_SHIFT)
    }

    /// Repeated field using the packed encoding
    #[inline]
    pub fn is_packed(&self) -> bool {
        self.mode_bits() & FLAG_PACKED != 0
    }

    /// Field belongs to a [`MiniTableExtension`](super::MiniTableExtension)
    #[inline]
    pub fn is_extension(&self) -> bool {
        self.mode_bits() & FLAG_EXTENSION != 0
    }

    /// Stored type differs from the declared type
    #[inline]
    pub fn is_alternate(&self) -> bool {
        self.mode_bits() & FLAG_ALTERNATE != 0
    }

    /// Repeated, non-map field
    #[inline]
    pub fn is_repeated(&self) -> bool {
        self.mode() == FieldMode::Array
    }

    /// Map field
    #[inline]
    pub fn is_map(&self) -> bool {
        self.mode() == FieldMode::Map
    }

    /// Singular field
    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.mode() == FieldMode::Scalar
    }

    /// Message or group
    #[inline]
    pub fn is_sub_message(&self) -> bool {
        self.descriptor_type.is_sub_message()
    }

    /// Enum field validated against a linked enum table
    #[inline]
    pub fn is_closed_enum(&self) -> bool {
        self.descriptor_type == FieldType::Enum
    }

    /// Field has explicit presence
    #[inline]
    pub fn has_presence(&self) -> bool {
        self.presence != 0 || (self.is_scalar() && self.is_sub_message()) || self.is_extension()
    }

    /// Index into the owning table's sub slots
    #[inline]
    pub fn submsg_index(&self) -> Option<u16> {
        (self.submsg_index != NO_SUB).then_some(self.submsg_index)
    }

    /// log2 of the array element size for this field
    #[inline]
    pub fn elem_size_lg2(&self) -> u8 {
        self.descriptor_type.elem_size_lg2()
    }
}
