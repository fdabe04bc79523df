//! Mini-descriptor writer

use super::base92::{encode_varint, to_base92};
use super::{
    encoded_field_modifier, field_modifier, message_modifier, EncodedType, END, FIELD_SEPARATOR,
    MAX_MODIFIER, MAX_ONEOF_FIELD, MAX_SKIP, MIN_MODIFIER, MIN_ONEOF_FIELD, MIN_SKIP,
    ONEOF_SEPARATOR, REPEATED_BASE, VERSION_ENUM, VERSION_EXTENSION, VERSION_MAP,
    VERSION_MESSAGE, VERSION_MESSAGE_SET,
};
use crate::error::{BuildError, Result};
use crate::mini_table::FieldType;
use alloc::string::String;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OneofState {
    NotStarted,
    Started,
    EmittedField,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    Message {
        msg_mod: u32,
        last_field: u32,
        oneof: OneofState,
    },
    Enum {
        present_mask: u32,
        last_written: u32,
    },
}

/// Incremental writer for message, enum and extension descriptors
///
/// ```
/// use minipb::mini_descriptor::{field_modifier, MtDataEncoder};
/// use minipb::mini_table::FieldType;
///
/// let mut e = MtDataEncoder::new();
/// e.start_message(0);
/// e.put_field(FieldType::Int32, 1, 0)?;
/// e.put_field(FieldType::String, 3, field_modifier::IS_REPEATED)?;
/// assert_eq!(e.finish(), "$(aE");
/// # Ok::<(), minipb::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct MtDataEncoder {
    out: Vec<u8>,
    state: State,
}

impl Default for MtDataEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn encoded_type(ty: FieldType, field_mod: u64) -> EncodedType {
    match ty {
        FieldType::Double => EncodedType::Double,
        FieldType::Float => EncodedType::Float,
        FieldType::Int64 => EncodedType::Int64,
        FieldType::UInt64 => EncodedType::UInt64,
        FieldType::Int32 => EncodedType::Int32,
        FieldType::Fixed64 => EncodedType::Fixed64,
        FieldType::Fixed32 => EncodedType::Fixed32,
        FieldType::Bool => EncodedType::Bool,
        FieldType::String => EncodedType::String,
        FieldType::Group => EncodedType::Group,
        FieldType::Message => EncodedType::Message,
        FieldType::Bytes => EncodedType::Bytes,
        FieldType::UInt32 => EncodedType::UInt32,
        FieldType::Enum if field_mod & field_modifier::IS_CLOSED_ENUM != 0 => {
            EncodedType::ClosedEnum
        }
        FieldType::Enum => EncodedType::OpenEnum,
        FieldType::SFixed32 => EncodedType::SFixed32,
        FieldType::SFixed64 => EncodedType::SFixed64,
        FieldType::SInt32 => EncodedType::SInt32,
        FieldType::SInt64 => EncodedType::SInt64,
    }
}

impl MtDataEncoder {
    /// Create an empty encoder
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            state: State::Idle,
        }
    }

    /// Descriptor written so far
    pub fn as_bytes(&self) -> &[u8] {
        &self.out
    }

    /// Consume the encoder, returning the descriptor
    pub fn finish(self) -> String {
        self.out.into_iter().map(char::from).collect()
    }

    #[inline]
    fn put_raw(&mut self, ch: u8) {
        self.out.push(ch);
    }

    fn put_modifier(&mut self, modifier: u32) {
        if modifier != 0 {
            encode_varint(&mut self.out, modifier, MIN_MODIFIER, MAX_MODIFIER);
        }
    }

    /// Begin a message descriptor with `msg_mod` bits from
    /// [`message_modifier`]
    pub fn start_message(&mut self, msg_mod: u32) {
        self.state = State::Message {
            msg_mod,
            last_field: 0,
            oneof: OneofState::NotStarted,
        };
        self.put_raw(VERSION_MESSAGE);
        self.put_modifier(msg_mod);
    }

    /// Append a field; numbers must strictly increase
    pub fn put_field(&mut self, ty: FieldType, number: u32, field_mod: u64) -> Result<()> {
        let (msg_mod, last_field) = match self.state {
            State::Message {
                msg_mod,
                last_field,
                oneof: OneofState::NotStarted,
            } => (msg_mod, last_field),
            _ => return Err(BuildError::FieldNumberRegression(number).into()),
        };
        if number <= last_field {
            return Err(BuildError::FieldNumberRegression(number).into());
        }
        if last_field + 1 != number {
            encode_varint(&mut self.out, number - last_field, MIN_SKIP, MAX_SKIP);
        }
        self.state = State::Message {
            msg_mod,
            last_field: number,
            oneof: OneofState::NotStarted,
        };

        let is_repeated = field_mod & field_modifier::IS_REPEATED != 0;
        let mut encoded = encoded_type(ty, field_mod) as u8;
        if is_repeated {
            encoded += REPEATED_BASE;
        }
        self.put_raw(to_base92(encoded));

        let mut modifiers = 0;
        if is_repeated && ty.is_packable() {
            let field_packed = field_mod & field_modifier::IS_PACKED != 0;
            let default_packed = msg_mod & message_modifier::DEFAULT_IS_PACKED != 0;
            if field_packed != default_packed {
                modifiers |= encoded_field_modifier::FLIP_PACKED;
            }
        }
        if ty == FieldType::String {
            let field_validates = field_mod & field_modifier::VALIDATE_UTF8 != 0;
            let message_validates = msg_mod & message_modifier::VALIDATE_UTF8 != 0;
            if field_validates && !message_validates {
                modifiers |= encoded_field_modifier::FLIP_VALIDATE_UTF8;
            }
        }
        if field_mod & field_modifier::IS_PROTO3_SINGULAR != 0 {
            modifiers |= encoded_field_modifier::IS_PROTO3_SINGULAR;
        }
        if field_mod & field_modifier::IS_REQUIRED != 0 {
            modifiers |= encoded_field_modifier::IS_REQUIRED;
        }
        self.put_modifier(modifiers);
        Ok(())
    }

    /// Begin a oneof; all fields must have been written already
    pub fn start_oneof(&mut self) {
        if let State::Message { oneof, .. } = &mut self.state {
            let ch = if *oneof == OneofState::NotStarted {
                END
            } else {
                ONEOF_SEPARATOR
            };
            *oneof = OneofState::Started;
            self.out.push(ch);
        }
    }

    /// Add field `number` to the current oneof
    pub fn put_oneof_field(&mut self, number: u32) {
        if let State::Message { oneof, .. } = &mut self.state {
            if *oneof == OneofState::EmittedField {
                self.out.push(FIELD_SEPARATOR);
            }
            *oneof = OneofState::EmittedField;
            encode_varint(&mut self.out, number, MIN_ONEOF_FIELD, MAX_ONEOF_FIELD);
        }
    }

    /// Begin an enum descriptor
    pub fn start_enum(&mut self) {
        self.state = State::Enum {
            present_mask: 0,
            last_written: 0,
        };
        self.put_raw(VERSION_ENUM);
    }

    /// Add a declared enum value; values must be non-decreasing
    pub fn put_enum_value(&mut self, value: u32) -> Result<()> {
        let State::Enum {
            mut present_mask,
            mut last_written,
        } = self.state
        else {
            return Err(BuildError::EnumValueRegression(value).into());
        };
        if value < last_written {
            return Err(BuildError::EnumValueRegression(value).into());
        }
        let mut delta = value - last_written;
        if delta >= 5 && present_mask != 0 {
            self.put_raw(to_base92(present_mask as u8));
            present_mask = 0;
            last_written += 5;
            delta -= 5;
        }
        if delta >= 5 {
            encode_varint(&mut self.out, delta, MIN_SKIP, MAX_SKIP);
            last_written += delta;
            delta = 0;
        }
        present_mask |= 1 << delta;
        self.state = State::Enum {
            present_mask,
            last_written,
        };
        Ok(())
    }

    /// Flush the pending enum mask
    pub fn end_enum(&mut self) {
        if let State::Enum {
            present_mask,
            last_written,
        } = self.state
        {
            if present_mask != 0 {
                self.put_raw(to_base92(present_mask as u8));
                self.state = State::Enum {
                    present_mask: 0,
                    last_written: last_written + 5,
                };
            }
        }
    }

    /// Write a complete extension descriptor
    pub fn encode_extension(&mut self, ty: FieldType, number: u32, field_mod: u64) -> Result<()> {
        self.state = State::Message {
            msg_mod: 0,
            last_field: 0,
            oneof: OneofState::NotStarted,
        };
        self.put_raw(VERSION_EXTENSION);
        self.put_field(ty, number, field_mod)
    }

    /// Write a complete map entry descriptor
    pub fn encode_map(
        &mut self,
        key_type: FieldType,
        value_type: FieldType,
        key_mod: u64,
        value_mod: u64,
    ) -> Result<()> {
        self.state = State::Message {
            msg_mod: 0,
            last_field: 0,
            oneof: OneofState::NotStarted,
        };
        self.put_raw(VERSION_MAP);
        self.put_field(key_type, 1, key_mod)?;
        self.put_field(value_type, 2, value_mod)
    }

    /// Write a complete MessageSet descriptor
    pub fn encode_message_set(&mut self) {
        self.state = State::Idle;
        self.put_raw(VERSION_MESSAGE_SET);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mini_descriptor::field_modifier::*;

    #[test]
    fn test_single_int32_field() {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::Int32, 1, 0).unwrap();
        assert_eq!(e.finish(), "$(");
    }

    #[test]
    fn test_gap_emits_skip() {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::Int32, 1, 0).unwrap();
        e.put_field(FieldType::Int32, 5, 0).unwrap();
        // skip of 4 is '_' + 4 = 'c'
        assert_eq!(e.finish(), "$(c(");
    }

    #[test]
    fn test_field_number_regression() {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::Int32, 3, 0).unwrap();
        assert_eq!(
            e.put_field(FieldType::Int32, 3, 0),
            Err(BuildError::FieldNumberRegression(3).into())
        );
    }

    #[test]
    fn test_packed_flip_against_default() {
        let mut e = MtDataEncoder::new();
        e.start_message(message_modifier::DEFAULT_IS_PACKED);
        e.put_field(FieldType::Int32, 1, IS_REPEATED | IS_PACKED).unwrap();
        e.put_field(FieldType::Int32, 2, IS_REPEATED).unwrap();
        let s = e.finish();
        // '$', modifier 'N', then "<" alone and "<" + 'M' (FlipPacked)
        assert_eq!(s, "$N<<M");
    }

    #[test]
    fn test_oneof_separators() {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        for n in 1..=4 {
            e.put_field(FieldType::Int32, n, 0).unwrap();
        }
        e.start_oneof();
        e.put_oneof_field(1);
        e.put_oneof_field(2);
        e.start_oneof();
        e.put_oneof_field(3);
        assert_eq!(e.finish(), "$((((^!|#~$");
    }

    #[test]
    fn test_enum_masks_and_skips() {
        let mut e = MtDataEncoder::new();
        e.start_enum();
        for v in [0, 1, 2, 100] {
            e.put_enum_value(v).unwrap();
        }
        e.end_enum();
        // mask 0b111, skip 95, mask 0b1
        assert_eq!(e.finish(), "!)~a!");
    }

    #[test]
    fn test_enum_value_regression() {
        let mut e = MtDataEncoder::new();
        e.start_enum();
        e.put_enum_value(7).unwrap();
        assert_eq!(
            e.put_enum_value(3),
            Err(BuildError::EnumValueRegression(3).into())
        );
    }

    #[test]
    fn test_extension_and_map_and_message_set() {
        let mut e = MtDataEncoder::new();
        e.encode_extension(FieldType::Message, 1000, 0).unwrap();
        assert!(e.finish().starts_with('#'));

        let mut e = MtDataEncoder::new();
        e.encode_map(FieldType::Int32, FieldType::String, 0, 0).unwrap();
        assert_eq!(e.finish(), "%(1");

        let mut e = MtDataEncoder::new();
        e.encode_message_set();
        assert_eq!(e.finish(), "&");
    }
}
