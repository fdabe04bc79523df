//! Field values and raw slot access

use super::array::Array;
use super::map::Map;
use super::Message;
use crate::arena::{Arena, ArenaPtr};
use crate::mini_table::{FieldMode, FieldRep, FieldType, MiniTable, MiniTableField};
use alloc::vec::Vec;

/// Bytes held in an arena: pointer plus length
///
/// Views are only meaningful together with the arena they came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StringView {
    /// Start of the bytes
    pub data: ArenaPtr,
    /// Length in bytes
    pub len: usize,
}

impl StringView {
    /// Size of a view in a message blob
    pub const SIZE: usize = 16;

    /// The empty view
    pub const EMPTY: StringView = StringView {
        data: ArenaPtr::NULL,
        len: 0,
    };

    /// Copy `data` into `arena` and view it
    pub fn copy_from(arena: &Arena, data: &[u8]) -> crate::Result<StringView> {
        let ptr = arena.malloc(data.len())?;
        arena.write_bytes(ptr, data);
        Ok(StringView {
            data: ptr,
            len: data.len(),
        })
    }

    /// True for a zero-length view
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the viewed bytes out of `arena`
    pub fn to_vec(&self, arena: &Arena) -> Vec<u8> {
        arena.to_vec(self.data, self.len)
    }
}

/// A field or extension value read out of a message
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum MessageValue {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    /// String or bytes
    String(StringView),
    Message(Message),
    Array(Array),
    Map(Map),
}

impl MessageValue {
    /// Scalar value as raw bits, as stored in a blob or array
    pub fn to_bits(&self) -> Option<u64> {
        Some(match *self {
            MessageValue::Bool(b) => b as u64,
            MessageValue::Int32(v) => v as u32 as u64,
            MessageValue::Int64(v) => v as u64,
            MessageValue::UInt32(v) => v as u64,
            MessageValue::UInt64(v) => v,
            MessageValue::Float(v) => v.to_bits() as u64,
            MessageValue::Double(v) => v.to_bits(),
            _ => return None,
        })
    }
}

/// Read a scalar of representation `rep` at `at`
#[inline]
pub(crate) fn read_scalar(arena: &Arena, at: ArenaPtr, rep: FieldRep) -> u64 {
    match rep {
        FieldRep::OneByte => arena.read_u8(at) as u64,
        FieldRep::FourByte => arena.read_u32(at) as u64,
        FieldRep::EightByte | FieldRep::StringView => arena.read_u64(at),
    }
}

/// Write a scalar of representation `rep` at `at`
#[inline]
pub(crate) fn write_scalar(arena: &Arena, at: ArenaPtr, rep: FieldRep, bits: u64) {
    match rep {
        FieldRep::OneByte => arena.write_u8(at, bits as u8),
        FieldRep::FourByte => arena.write_u32(at, bits as u32),
        FieldRep::EightByte | FieldRep::StringView => arena.write_u64(at, bits),
    }
}

#[inline]
pub(crate) fn read_view(arena: &Arena, at: ArenaPtr) -> StringView {
    let raw: [u8; 16] = arena.read(at);
    let mut data = [0u8; 8];
    let mut len = [0u8; 8];
    data.copy_from_slice(&raw[..8]);
    len.copy_from_slice(&raw[8..]);
    StringView {
        data: ArenaPtr::from_raw(u64::from_le_bytes(data)),
        len: u64::from_le_bytes(len) as usize,
    }
}

#[inline]
pub(crate) fn write_view(arena: &Arena, at: ArenaPtr, view: StringView) {
    let mut raw = [0u8; 16];
    raw[..8].copy_from_slice(&view.data.to_raw().to_le_bytes());
    raw[8..].copy_from_slice(&(view.len as u64).to_le_bytes());
    arena.write_bytes(at, &raw);
}

#[inline]
pub(crate) fn read_ptr(arena: &Arena, at: ArenaPtr) -> ArenaPtr {
    ArenaPtr::from_raw(arena.read_u64(at))
}

/// Convert scalar bits to a typed value
pub(crate) fn scalar_value(ty: FieldType, bits: u64) -> MessageValue {
    match ty {
        FieldType::Bool => MessageValue::Bool(bits != 0),
        FieldType::Int32 | FieldType::SInt32 | FieldType::SFixed32 | FieldType::Enum => {
            MessageValue::Int32(bits as u32 as i32)
        }
        FieldType::UInt32 | FieldType::Fixed32 => MessageValue::UInt32(bits as u32),
        FieldType::Int64 | FieldType::SInt64 | FieldType::SFixed64 => {
            MessageValue::Int64(bits as i64)
        }
        FieldType::UInt64 | FieldType::Fixed64 => MessageValue::UInt64(bits),
        FieldType::Float => MessageValue::Float(f32::from_bits(bits as u32)),
        FieldType::Double => MessageValue::Double(f64::from_bits(bits)),
        FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group => {
            MessageValue::UInt64(bits)
        }
    }
}

/// Value stored for `field` at `at`; `None` for absent messages, arrays
/// and maps
pub(crate) fn value_at(
    arena: &Arena,
    at: ArenaPtr,
    field: &MiniTableField,
    sub: Option<&'static MiniTable>,
) -> Option<MessageValue> {
    match field.mode() {
        FieldMode::Array => {
            let ptr = read_ptr(arena, at);
            (!ptr.is_null()).then(|| MessageValue::Array(Array::from_raw(arena.clone(), ptr)))
        }
        FieldMode::Map => {
            let ptr = read_ptr(arena, at);
            (!ptr.is_null()).then(|| MessageValue::Map(Map::from_raw(arena.clone(), ptr)))
        }
        FieldMode::Scalar => match field.descriptor_type() {
            FieldType::String | FieldType::Bytes => {
                Some(MessageValue::String(read_view(arena, at)))
            }
            FieldType::Message | FieldType::Group => {
                let ptr = read_ptr(arena, at);
                if ptr.is_null() {
                    return None;
                }
                sub.map(|t| MessageValue::Message(Message::from_raw(arena.clone(), ptr, t)))
            }
            ty => Some(scalar_value(ty, read_scalar(arena, at, field.rep()))),
        },
    }
}
