//! Mini-descriptor format
//!
//! A mini-descriptor is a compact printable string describing one message,
//! enum or extension. It starts with a version character:
//!
//! ```text
//! '$' message      '%' map entry      '&' MessageSet
//! '!' enum         '#' extension
//! ```
//!
//! Message bodies are a sequence of field type characters, each optionally
//! followed by a modifier varint, with skip varints covering gaps in field
//! numbers. An optional `'^'` tail lists oneofs, members separated by `'|'`
//! and oneofs by `'~'`. Enum bodies are 5-bit presence masks interleaved
//! with skips.
//!
//! [`MtDataEncoder`] produces these strings; the builders in
//! [`crate::mini_table`] consume them.

pub mod base92;
mod encode;

pub use encode::MtDataEncoder;

/// Version character of a message descriptor
pub const VERSION_MESSAGE: u8 = b'$';
/// Version character of a map entry descriptor
pub const VERSION_MAP: u8 = b'%';
/// Version character of a MessageSet descriptor
pub const VERSION_MESSAGE_SET: u8 = b'&';
/// Version character of an enum descriptor
pub const VERSION_ENUM: u8 = b'!';
/// Version character of an extension descriptor
pub const VERSION_EXTENSION: u8 = b'#';

/// First field type character
pub const MIN_FIELD: u8 = b' ';
/// Last field type character
pub const MAX_FIELD: u8 = b'I';
/// First modifier digit
pub const MIN_MODIFIER: u8 = b'L';
/// Last modifier digit
pub const MAX_MODIFIER: u8 = b'[';
/// Ends the field list and starts the oneof list
pub const END: u8 = b'^';
/// First skip digit
pub const MIN_SKIP: u8 = b'_';
/// Last skip digit
pub const MAX_SKIP: u8 = b'~';
/// Separates oneofs
pub const ONEOF_SEPARATOR: u8 = b'~';
/// Separates fields of one oneof
pub const FIELD_SEPARATOR: u8 = b'|';
/// First oneof field-number digit
pub const MIN_ONEOF_FIELD: u8 = b' ';
/// Last oneof field-number digit
pub const MAX_ONEOF_FIELD: u8 = b'b';
/// Last enum mask character
pub const MAX_ENUM_MASK: u8 = b'A';

/// Field type as written in a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum EncodedType {
    Double = 0,
    Float = 1,
    Fixed32 = 2,
    Fixed64 = 3,
    SFixed32 = 4,
    SFixed64 = 5,
    Int32 = 6,
    UInt32 = 7,
    SInt32 = 8,
    Int64 = 9,
    UInt64 = 10,
    SInt64 = 11,
    OpenEnum = 12,
    Bool = 13,
    Bytes = 14,
    String = 15,
    Group = 16,
    Message = 17,
    ClosedEnum = 18,
}

/// Added to an [`EncodedType`] for repeated fields
pub const REPEATED_BASE: u8 = 20;

impl EncodedType {
    /// Decode a type value (without the repeated offset)
    pub const fn from_u8(v: u8) -> Option<Self> {
        use EncodedType::*;
        Some(match v {
            0 => Double,
            1 => Float,
            2 => Fixed32,
            3 => Fixed64,
            4 => SFixed32,
            5 => SFixed64,
            6 => Int32,
            7 => UInt32,
            8 => SInt32,
            9 => Int64,
            10 => UInt64,
            11 => SInt64,
            12 => OpenEnum,
            13 => Bool,
            14 => Bytes,
            15 => String,
            16 => Group,
            17 => Message,
            18 => ClosedEnum,
            _ => return None,
        })
    }
}

/// Message-level modifier bits
pub mod message_modifier {
    /// String fields validate UTF-8 unless flipped
    pub const VALIDATE_UTF8: u32 = 1;
    /// Packable repeated fields are packed unless flipped
    pub const DEFAULT_IS_PACKED: u32 = 2;
    /// Message accepts extensions
    pub const IS_EXTENDABLE: u32 = 4;
}

/// Field modifier bits as written after a field type
pub mod encoded_field_modifier {
    /// Packed-ness differs from the message default
    pub const FLIP_PACKED: u32 = 1;
    /// Field is required
    pub const IS_REQUIRED: u32 = 2;
    /// Proto3 singular field without presence
    pub const IS_PROTO3_SINGULAR: u32 = 4;
    /// UTF-8 validation differs from the message default
    pub const FLIP_VALIDATE_UTF8: u32 = 8;
}

/// Field modifier bits accepted by [`MtDataEncoder::put_field`]
pub mod field_modifier {
    /// Field is repeated
    pub const IS_REPEATED: u64 = 1;
    /// Repeated field is packed
    pub const IS_PACKED: u64 = 2;
    /// Enum field is closed
    pub const IS_CLOSED_ENUM: u64 = 4;
    /// Proto3 singular field without presence
    pub const IS_PROTO3_SINGULAR: u64 = 8;
    /// Field is required
    pub const IS_REQUIRED: u64 = 16;
    /// String field validates UTF-8
    pub const VALIDATE_UTF8: u64 = 32;
}
