//! Mini-tables: the runtime layout of a message type
//!
//! A [`MiniTable`] is built once from a mini-descriptor string and then
//! shared read-only. It records, for every field, where the value lives in
//! the message blob and how presence is tracked. Sub-message and closed-enum
//! fields refer to other tables through slots that are filled in by linking,
//! so recursive and mutually recursive types can be expressed.

mod build;
mod enums;
mod extension;
pub(crate) mod fast;
mod field;
mod link;

pub use enums::MiniTableEnum;
pub use extension::{ExtensionSub, MiniTableExtension};
pub use field::MiniTableField;

pub(crate) use fast::FastEntry;

use alloc::boxed::Box;
use alloc::vec::Vec;
use once_cell::race::OnceRef;

/// Sentinel `submsg_index` for fields without a sub table
pub const NO_SUB: u16 = u16::MAX;

/// Sentinel `table_mask` for tables without a fast-dispatch array
pub const NO_FAST_TABLE: u8 = 0xFF;

/// Protobuf field types, numbered as in `descriptor.proto`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum FieldType {
    Double = 1,
    Float = 2,
    Int64 = 3,
    UInt64 = 4,
    Int32 = 5,
    Fixed64 = 6,
    Fixed32 = 7,
    Bool = 8,
    String = 9,
    Group = 10,
    Message = 11,
    Bytes = 12,
    UInt32 = 13,
    Enum = 14,
    SFixed32 = 15,
    SFixed64 = 16,
    SInt32 = 17,
    SInt64 = 18,
}

impl FieldType {
    /// Decode a `descriptor.proto` type number
    pub const fn from_u8(v: u8) -> Option<Self> {
        use FieldType::*;
        Some(match v {
            1 => Double,
            2 => Float,
            3 => Int64,
            4 => UInt64,
            5 => Int32,
            6 => Fixed64,
            7 => Fixed32,
            8 => Bool,
            9 => String,
            10 => Group,
            11 => Message,
            12 => Bytes,
            13 => UInt32,
            14 => Enum,
            15 => SFixed32,
            16 => SFixed64,
            17 => SInt32,
            18 => SInt64,
            _ => return None,
        })
    }

    /// Repeated fields of this type may use the packed encoding
    #[inline]
    pub const fn is_packable(self) -> bool {
        !matches!(
            self,
            FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group
        )
    }

    /// Message or group
    #[inline]
    pub const fn is_sub_message(self) -> bool {
        matches!(self, FieldType::Message | FieldType::Group)
    }

    /// String or bytes
    #[inline]
    pub const fn is_string_like(self) -> bool {
        matches!(self, FieldType::String | FieldType::Bytes)
    }

    /// log2 of the element size used by arrays of this type
    pub const fn elem_size_lg2(self) -> u8 {
        match self {
            FieldType::Bool => 0,
            FieldType::Float
            | FieldType::Int32
            | FieldType::UInt32
            | FieldType::Enum
            | FieldType::Fixed32
            | FieldType::SFixed32
            | FieldType::SInt32 => 2,
            FieldType::Double
            | FieldType::Int64
            | FieldType::UInt64
            | FieldType::Fixed64
            | FieldType::SFixed64
            | FieldType::SInt64
            | FieldType::Message
            | FieldType::Group => 3,
            FieldType::String | FieldType::Bytes => 4,
        }
    }
}

/// Storage shape of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldMode {
    /// Map field: a pointer to a map
    Map = 0,
    /// Repeated field: a pointer to an array
    Array = 1,
    /// Singular value stored inline
    Scalar = 2,
}

/// Size class of a field's storage in the message blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum FieldRep {
    /// 1 byte (bool)
    OneByte = 0,
    /// 4 bytes (32-bit scalars, 32-bit pointers)
    FourByte = 1,
    /// A string view: pointer plus length
    StringView = 2,
    /// 8 bytes (64-bit scalars, 64-bit pointers)
    EightByte = 3,
}

impl FieldRep {
    pub(crate) const fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => FieldRep::OneByte,
            1 => FieldRep::FourByte,
            2 => FieldRep::StringView,
            _ => FieldRep::EightByte,
        }
    }

    /// Byte size on `platform`
    pub const fn size(self, platform: Platform) -> usize {
        match (self, platform) {
            (FieldRep::OneByte, _) => 1,
            (FieldRep::FourByte, _) => 4,
            (FieldRep::StringView, Platform::Bit32) => 8,
            (FieldRep::StringView, Platform::Bit64) => 16,
            (FieldRep::EightByte, _) => 8,
        }
    }

    /// Alignment on `platform`
    pub const fn align(self, platform: Platform) -> usize {
        match (self, platform) {
            (FieldRep::OneByte, _) => 1,
            (FieldRep::FourByte, _) => 4,
            (FieldRep::StringView, Platform::Bit32) => 4,
            (FieldRep::StringView, Platform::Bit64) => 8,
            (FieldRep::EightByte, _) => 8,
        }
    }
}

/// Pointer width a table is laid out for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    /// 4-byte pointers, 8-byte string views
    Bit32,
    /// 8-byte pointers, 16-byte string views
    #[default]
    Bit64,
}

impl Platform {
    /// Platform of the running target
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "32") {
            Platform::Bit32
        } else {
            Platform::Bit64
        }
    }

    /// Representation used for pointer-sized fields
    #[inline]
    pub const fn pointer_rep(self) -> FieldRep {
        match self {
            Platform::Bit32 => FieldRep::FourByte,
            Platform::Bit64 => FieldRep::EightByte,
        }
    }
}

/// How a table treats extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtMode {
    /// Unknown fields stay unknown
    NonExtendable,
    /// Unknown fields are looked up in the extension registry
    Extendable,
    /// Wire data is in the MessageSet item format
    IsMessageSet,
    /// The item group of a MessageSet
    IsMessageSetItem,
    /// Synthetic two-field entry of a map field
    IsMapEntry,
}

pub(crate) enum Sub {
    Message(OnceRef<'static, MiniTable>),
    Enum(OnceRef<'static, MiniTableEnum>),
}

impl core::fmt::Debug for Sub {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Sub::Message(r) => f
                .debug_tuple("Message")
                .field(&r.get().map(|t| t.field_count()))
                .finish(),
            Sub::Enum(r) => f.debug_tuple("Enum").field(&r.get().is_some()).finish(),
        }
    }
}

/// Layout of one message type
pub struct MiniTable {
    pub(crate) fields: Vec<MiniTableField>,
    pub(crate) subs: Vec<Sub>,
    pub(crate) size: u16,
    pub(crate) required_count: u8,
    pub(crate) dense_below: usize,
    pub(crate) table_mask: u8,
    pub(crate) ext: ExtMode,
    pub(crate) fasttable: Vec<FastEntry>,
    pub(crate) platform: Platform,
}

impl core::fmt::Debug for MiniTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MiniTable")
            .field("size", &self.size)
            .field("fields", &self.fields)
            .field("required_count", &self.required_count)
            .field("dense_below", &self.dense_below)
            .field("table_mask", &self.table_mask)
            .field("ext", &self.ext)
            .finish()
    }
}

impl MiniTable {
    pub(crate) fn empty(platform: Platform) -> Self {
        Self {
            fields: Vec::new(),
            subs: Vec::new(),
            size: 0,
            required_count: 0,
            dense_below: 0,
            table_mask: NO_FAST_TABLE,
            ext: ExtMode::NonExtendable,
            fasttable: Vec::new(),
            platform,
        }
    }

    /// Move the table to the heap for the rest of the program
    ///
    /// Linking needs `&'static` tables so that messages can hold them
    /// without a lifetime.
    pub fn leak(self) -> &'static MiniTable {
        Box::leak(Box::new(self))
    }

    /// Byte size of the message blob, a multiple of 8
    #[inline]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Number of fields
    #[inline]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Number of required fields; their hasbits are `1..=required_count`
    #[inline]
    pub fn required_count(&self) -> usize {
        self.required_count as usize
    }

    /// Fields `1..=dense_below` sit at index `number - 1`
    #[inline]
    pub fn dense_below(&self) -> usize {
        self.dense_below
    }

    /// Fast-dispatch mask, or [`NO_FAST_TABLE`]
    #[inline]
    pub fn table_mask(&self) -> u8 {
        self.table_mask
    }

    /// Extension handling of this table
    #[inline]
    pub fn ext_mode(&self) -> ExtMode {
        self.ext
    }

    /// Platform the offsets were computed for
    #[inline]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// True when the table declares no fields
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True for the synthetic entry type of a map field
    #[inline]
    pub fn is_map_entry(&self) -> bool {
        self.ext == ExtMode::IsMapEntry
    }

    /// True for MessageSet tables
    #[inline]
    pub fn is_message_set(&self) -> bool {
        self.ext == ExtMode::IsMessageSet
    }

    /// True when unknown fields should be checked against a registry
    #[inline]
    pub fn is_extendable(&self) -> bool {
        matches!(self.ext, ExtMode::Extendable | ExtMode::IsMessageSet)
    }

    /// All fields, in field-number order
    #[inline]
    pub fn fields(&self) -> &[MiniTableField] {
        &self.fields
    }

    /// Field at index `i`
    #[inline]
    pub fn field(&self, i: usize) -> Option<&MiniTableField> {
        self.fields.get(i)
    }

    /// Look a field up by its wire number
    pub fn find_field_by_number(&self, number: u32) -> Option<&MiniTableField> {
        let idx = number.wrapping_sub(1) as usize;
        if idx < self.dense_below {
            return self.fields.get(idx);
        }
        let rest = &self.fields[self.dense_below.min(self.fields.len())..];
        rest.binary_search_by_key(&number, |f| f.number)
            .ok()
            .map(|i| &rest[i])
    }

    /// True if `field` is one of this table's fields
    #[inline]
    pub fn contains(&self, field: &MiniTableField) -> bool {
        self.fields
            .as_ptr_range()
            .contains(&(field as *const MiniTableField))
    }

    /// Members of the oneof `field` belongs to; empty if it is not in one
    pub fn oneof_fields<'a>(
        &'a self,
        field: &MiniTableField,
    ) -> impl Iterator<Item = &'a MiniTableField> + 'a {
        let presence = field.presence;
        self.fields
            .iter()
            .filter(move |f| presence < 0 && f.presence == presence)
    }

    /// Fields holding a sub slot, in slot order: sub-messages, then closed
    /// enums
    pub fn sub_list(&self) -> Vec<&MiniTableField> {
        let mut list: Vec<&MiniTableField> = self
            .fields
            .iter()
            .filter(|f| f.submsg_index != NO_SUB)
            .collect();
        list.sort_by_key(|f| f.submsg_index);
        list
    }

    /// Linked sub table of a message, group or map field
    pub fn sub_message(&self, field: &MiniTableField) -> Option<&'static MiniTable> {
        match self.subs.get(field.submsg_index as usize)? {
            Sub::Message(r) => r.get(),
            Sub::Enum(_) => None,
        }
    }

    /// Linked enum table of a closed-enum field
    pub fn sub_enum(&self, field: &MiniTableField) -> Option<&'static MiniTableEnum> {
        match self.subs.get(field.submsg_index as usize)? {
            Sub::Enum(r) => r.get(),
            Sub::Message(_) => None,
        }
    }

    /// Bytes at the start of the blob holding hasbits
    pub(crate) fn hasbit_bytes(&self) -> usize {
        let max = self
            .fields
            .iter()
            .filter(|f| f.presence > 0)
            .map(|f| f.presence as usize)
            .max()
            .unwrap_or(0);
        if max == 0 {
            0
        } else {
            (max + 1).div_ceil(8)
        }
    }
}
