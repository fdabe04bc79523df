//! Wire-format decoder
//!
//! [`decode`] merges protobuf bytes into a message, driven by the
//! message's mini-table. Known fields are written into the blob, unknown
//! fields are appended verbatim to the message's unknown region and fields
//! of extendable types are resolved against an optional
//! [`ExtensionRegistry`]. Errors propagate with `?`; whatever was decoded
//! before the failure stays in the arena.

use super::reader::EpsStream;
use super::{fast, make_tag, varint, wire_type_of, DecodeOptions, WireType};
use crate::arena::{Arena, ArenaPtr};
use crate::error::{Error, Result};
use crate::extension_registry::ExtensionRegistry;
use crate::message::{
    map_sizes, read_ptr, read_scalar, read_view, write_scalar, write_view, Array, MapValue,
    Message, StringView,
};
use crate::mini_table::{
    FieldMode, FieldType, MiniTable, MiniTableEnum, MiniTableExtension, MiniTableField,
    NO_FAST_TABLE,
};
use alloc::vec::Vec;
use log::debug;

/// `end_group` of a message that is not a group
const NO_GROUP: u32 = 0;

const MSGSET_ITEM: u32 = 1;
const MSGSET_TYPE_ID: u32 = 2;
const MSGSET_MESSAGE: u32 = 3;

/// Parse `buf` into `msg`, merging with what `msg` already holds
///
/// Scalars are overwritten, repeated fields appended to and sub-messages
/// merged. `registry` resolves extensions of extendable types; without it
/// their fields are kept as unknown.
///
/// ```
/// use minipb::mini_table::{MiniTable, Platform};
/// use minipb::wire::{decode, DecodeOptions};
/// use minipb::{Arena, Message};
///
/// let table = MiniTable::build(b"$(", Platform::Bit64)?.leak();
/// let arena = Arena::new();
/// let msg = Message::new(table, &arena)?;
/// decode(&[0x08, 0x96, 0x01], &msg, None, DecodeOptions::default())?;
/// assert_eq!(msg.get_int32(table.field(0).unwrap()), 150);
/// # Ok::<(), minipb::Error>(())
/// ```
pub fn decode(
    buf: &[u8],
    msg: &Message,
    registry: Option<&ExtensionRegistry>,
    options: DecodeOptions,
) -> Result<()> {
    let mut d = Decoder::new(buf, msg.arena().clone(), registry, options);
    let result = d.decode_message(msg, NO_GROUP).and_then(|()| {
        if d.missing_required {
            Err(Error::MissingRequired)
        } else {
            Ok(())
        }
    });
    if let Err(e) = &result {
        debug!(
            "decode of {} bytes failed near byte {}: {:?}",
            buf.len(),
            d.stream.offset(),
            e
        );
    }
    result
}

/// Parse a varint length followed by that many bytes of message
///
/// Returns the number of bytes consumed, prefix included.
pub fn decode_length_prefixed(
    buf: &[u8],
    msg: &Message,
    registry: Option<&ExtensionRegistry>,
    options: DecodeOptions,
) -> Result<usize> {
    let (len, n) = varint::decode_u64(buf)?;
    if len > i32::MAX as u64 {
        return Err(Error::Malformed);
    }
    let end = n
        .checked_add(len as usize)
        .filter(|&end| end <= buf.len())
        .ok_or(Error::Malformed)?;
    decode(&buf[n..end], msg, registry, options)?;
    Ok(end)
}

/// Convert a decoded varint to the stored bits of `ty`
#[inline]
pub(super) fn varint_bits(ty: FieldType, v: u64) -> u64 {
    match ty {
        FieldType::Bool => (v != 0) as u64,
        FieldType::SInt32 => varint::zigzag_decode_32(v as u32) as u32 as u64,
        FieldType::SInt64 => varint::zigzag_decode_64(v) as u64,
        FieldType::Int64 | FieldType::UInt64 => v,
        _ => v as u32 as u64,
    }
}

/// Where a field value goes: a declared field or an extension record
#[derive(Clone, Copy)]
enum Target {
    Field(&'static MiniTableField),
    Extension(&'static MiniTableExtension),
}

impl Target {
    fn field(&self) -> &'static MiniTableField {
        match *self {
            Target::Field(f) => f,
            Target::Extension(e) => e.field(),
        }
    }

    fn sub_message(&self, table: &MiniTable) -> Option<&'static MiniTable> {
        match *self {
            Target::Field(f) => table.sub_message(f),
            Target::Extension(e) => e.sub_message(),
        }
    }

    fn sub_enum(&self, table: &MiniTable) -> Option<&'static MiniTableEnum> {
        match *self {
            Target::Field(f) => table.sub_enum(f),
            Target::Extension(e) => e.sub_enum(),
        }
    }
}

pub(super) struct Decoder<'a, 'r> {
    pub(super) stream: EpsStream<'a>,
    input: &'a [u8],
    arena: Arena,
    registry: Option<&'r ExtensionRegistry>,
    options: DecodeOptions,
    /// Remaining nesting budget
    depth: u16,
    /// Arena copy of `input` once a string has aliased it
    alias: Option<ArenaPtr>,
    missing_required: bool,
}

impl<'a, 'r> Decoder<'a, 'r> {
    fn new(
        input: &'a [u8],
        arena: Arena,
        registry: Option<&'r ExtensionRegistry>,
        options: DecodeOptions,
    ) -> Self {
        Self {
            stream: EpsStream::new(input),
            input,
            arena,
            registry,
            options,
            depth: options.max_depth,
            alias: None,
            missing_required: false,
        }
    }

    fn decode_message(&mut self, msg: &Message, end_group: u32) -> Result<()> {
        let table = msg.table();
        let use_fast = !self.options.disable_fast_table && table.table_mask() != NO_FAST_TABLE;
        loop {
            if self.stream.is_done()? {
                if end_group != NO_GROUP {
                    return Err(Error::Malformed);
                }
                break;
            }
            if use_fast && fast::dispatch(self, msg)? {
                continue;
            }
            let start = self.stream.offset();
            let (number, wire_type) = self.stream.read_tag()?;
            if wire_type == WireType::EndGroup {
                if number != end_group {
                    return Err(Error::Malformed);
                }
                break;
            }
            self.decode_field(msg, number, wire_type, start)?;
        }
        if self.options.check_required && !msg.is_initialized_shallow() {
            self.missing_required = true;
        }
        Ok(())
    }

    fn decode_field(
        &mut self,
        msg: &Message,
        number: u32,
        wire_type: WireType,
        start: usize,
    ) -> Result<()> {
        let table = msg.table();
        if table.is_message_set() {
            if number == MSGSET_ITEM && wire_type == WireType::StartGroup {
                return self.decode_msgset_item(msg, start);
            }
            return self.unknown(msg, number, wire_type, start);
        }
        let target = match table.find_field_by_number(number) {
            Some(f) => Target::Field(f),
            None => match self.find_extension(table, number) {
                Some(e) => Target::Extension(e),
                None => return self.unknown(msg, number, wire_type, start),
            },
        };
        let field = target.field();
        let ty = field.descriptor_type();
        match field.mode() {
            FieldMode::Map if wire_type == WireType::Delimited => {
                self.decode_map_entry(msg, field, number, start)
            }
            FieldMode::Array if wire_type == WireType::Delimited && ty.is_packable() => {
                self.decode_packed(msg, target, number)
            }
            FieldMode::Array | FieldMode::Scalar if wire_type == wire_type_of(ty) => {
                self.decode_value(msg, target, number, wire_type, start)
            }
            _ => self.unknown(msg, number, wire_type, start),
        }
    }

    fn find_extension(
        &self,
        table: &MiniTable,
        number: u32,
    ) -> Option<&'static MiniTableExtension> {
        if !table.is_extendable() {
            return None;
        }
        self.registry?.lookup(table, number)
    }

    /// Skip the field and keep its bytes, tag included, as unknown
    fn unknown(
        &mut self,
        msg: &Message,
        number: u32,
        wire_type: WireType,
        start: usize,
    ) -> Result<()> {
        self.stream.skip_value(number, wire_type, self.depth)?;
        msg.add_unknown(&self.input[start..self.stream.offset()])
    }

    /// Storage of `target`, claiming the oneof or creating the extension
    fn slot(&self, msg: &Message, target: Target) -> Result<ArenaPtr> {
        match target {
            Target::Field(f) => {
                msg.claim(f);
                Ok(msg.field_ptr(f))
            }
            Target::Extension(e) => msg.get_or_create_extension_payload(e),
        }
    }

    #[inline]
    fn mark(msg: &Message, target: Target) {
        if let Target::Field(f) = target {
            msg.set_presence(f);
        }
    }

    fn array_for(&self, msg: &Message, target: Target) -> Result<Array> {
        let at = self.slot(msg, target)?;
        let ptr = read_ptr(&self.arena, at);
        if !ptr.is_null() {
            return Ok(Array::from_raw(self.arena.clone(), ptr));
        }
        let array = Array::new(&self.arena, target.field().elem_size_lg2())?;
        self.arena.write_u64(at, array.ptr().to_raw());
        Ok(array)
    }

    pub(super) fn string_view(&mut self, at: usize, bytes: &[u8]) -> Result<StringView> {
        if bytes.is_empty() {
            return Ok(StringView::EMPTY);
        }
        if !self.options.alias_strings {
            return StringView::copy_from(&self.arena, bytes);
        }
        let base = match self.alias {
            Some(base) => base,
            None => {
                let base = self.arena.adopt(self.input)?;
                self.alias = Some(base);
                base
            }
        };
        Ok(StringView {
            data: base.add(at),
            len: bytes.len(),
        })
    }

    pub(super) fn read_string(&mut self, validate: bool) -> Result<StringView> {
        let size = self.stream.read_size()?;
        let (at, bytes) = self.stream.read_bytes(size)?;
        if validate && core::str::from_utf8(bytes).is_err() {
            return Err(Error::BadUtf8);
        }
        self.string_view(at, bytes)
    }

    #[inline]
    pub(super) fn read_varint(&mut self, ty: FieldType) -> Result<u64> {
        Ok(varint_bits(ty, self.stream.read_varint()?))
    }

    fn read_scalar(&mut self, ty: FieldType, wire_type: WireType) -> Result<u64> {
        match wire_type {
            WireType::Fixed32 => Ok(self.stream.read_fixed32()? as u64),
            WireType::Fixed64 => self.stream.read_fixed64(),
            _ => self.read_varint(ty),
        }
    }

    /// One non-packed value of a singular or repeated field
    fn decode_value(
        &mut self,
        msg: &Message,
        target: Target,
        number: u32,
        wire_type: WireType,
        start: usize,
    ) -> Result<()> {
        let field = target.field();
        let ty = field.descriptor_type();
        match ty {
            FieldType::Message | FieldType::Group => {
                let sub = target.sub_message(msg.table()).ok_or(Error::Unlinked)?;
                let child = self.child_message(msg, target, sub)?;
                self.decode_sub(&child, number, wire_type)
            }
            FieldType::String | FieldType::Bytes => {
                let view = self.read_string(ty == FieldType::String)?;
                if field.is_repeated() {
                    return self.array_for(msg, target)?.append_string_view(view);
                }
                let at = self.slot(msg, target)?;
                write_view(&self.arena, at, view);
                Self::mark(msg, target);
                Ok(())
            }
            _ => {
                let bits = self.read_scalar(ty, wire_type)?;
                if field.is_closed_enum() {
                    let e = target.sub_enum(msg.table()).ok_or(Error::Unlinked)?;
                    if !e.check_value(bits as u32) {
                        return msg.add_unknown(&self.input[start..self.stream.offset()]);
                    }
                }
                if field.is_repeated() {
                    return self.array_for(msg, target)?.append(bits);
                }
                let at = self.slot(msg, target)?;
                write_scalar(&self.arena, at, field.rep(), bits);
                Self::mark(msg, target);
                Ok(())
            }
        }
    }

    /// Message to merge the next occurrence of `target` into
    fn child_message(
        &self,
        msg: &Message,
        target: Target,
        sub: &'static MiniTable,
    ) -> Result<Message> {
        if target.field().is_repeated() {
            return self.array_for(msg, target)?.append_new_message(sub);
        }
        let at = self.slot(msg, target)?;
        let ptr = read_ptr(&self.arena, at);
        let child = if ptr.is_null() {
            let child = Message::new(sub, &self.arena)?;
            self.arena.write_u64(at, child.ptr().to_raw());
            child
        } else {
            Message::from_raw(self.arena.clone(), ptr, sub)
        };
        Self::mark(msg, target);
        Ok(child)
    }

    /// Decode a length-delimited or group sub-message one level deeper
    fn decode_sub(&mut self, child: &Message, number: u32, wire_type: WireType) -> Result<()> {
        if self.depth == 0 {
            return Err(Error::MaxDepthExceeded);
        }
        self.depth -= 1;
        if wire_type == WireType::StartGroup {
            self.decode_message(child, number)?;
        } else {
            let size = self.stream.read_size()?;
            let delta = self.stream.push_limit(size)?;
            self.decode_message(child, NO_GROUP)?;
            self.stream.pop_limit(delta);
        }
        self.depth += 1;
        Ok(())
    }

    fn decode_packed(&mut self, msg: &Message, target: Target, number: u32) -> Result<()> {
        let field = target.field();
        let ty = field.descriptor_type();
        let size = self.stream.read_size()?;
        let (_, data) = self.stream.read_bytes(size)?;
        if data.is_empty() {
            return Ok(());
        }
        let width = match wire_type_of(ty) {
            WireType::Fixed32 => 4,
            WireType::Fixed64 => 8,
            _ => 0,
        };
        if width != 0 {
            if data.len() % width != 0 {
                return Err(Error::Malformed);
            }
            return self.array_for(msg, target)?.append_raw(data);
        }

        let closed = if field.is_closed_enum() {
            Some(target.sub_enum(msg.table()).ok_or(Error::Unlinked)?)
        } else {
            None
        };
        let array = self.array_for(msg, target)?;
        let mut pos = 0;
        while pos < data.len() {
            let (v, n) = varint::decode_u64(&data[pos..])?;
            pos += n;
            let bits = varint_bits(ty, v);
            match closed {
                Some(e) if !e.check_value(bits as u32) => {
                    let mut raw = Vec::with_capacity(16);
                    varint::encode_u32(make_tag(number, WireType::Varint), &mut raw);
                    varint::encode_u64(v, &mut raw);
                    msg.add_unknown(&raw)?;
                }
                _ => array.append(bits)?,
            }
        }
        Ok(())
    }

    /// Parse one map entry and insert it
    ///
    /// An entry that leaves unknown fields behind (such as a closed-enum
    /// value outside its enum) is kept whole among the parent's unknown
    /// fields instead.
    fn decode_map_entry(
        &mut self,
        msg: &Message,
        field: &'static MiniTableField,
        number: u32,
        start: usize,
    ) -> Result<()> {
        let entry = msg.table().sub_message(field).ok_or(Error::Unlinked)?;
        let (key_field, val_field) = match (entry.field(0), entry.field(1)) {
            (Some(k), Some(v)) => (k, v),
            _ => return Err(Error::Malformed),
        };
        let ent = Message::new(entry, &self.arena)?;
        if val_field.is_sub_message() {
            ent.mutable_message(val_field)?;
        }
        self.decode_sub(&ent, number, WireType::Delimited)?;
        if ent.unknown_len() > 0 {
            return msg.add_unknown(&self.input[start..self.stream.offset()]);
        }

        let (key_size, val_size) = map_sizes(entry);
        let key = if key_size == 0 {
            ent.get_string(key_field)
        } else {
            self.arena
                .to_vec(ent.ptr().add(key_field.offset()), key_size as usize)
        };
        let at = ent.ptr().add(val_field.offset());
        let value = if val_size == 0 {
            MapValue::String(read_view(&self.arena, at))
        } else if val_field.is_sub_message() {
            MapValue::Raw(self.arena.read_u64(at))
        } else {
            MapValue::Raw(read_scalar(&self.arena, at, val_field.rep()))
        };
        msg.get_or_create_map(field)?.insert_raw(&key, value)?;
        Ok(())
    }

    /// Extension and its message table for a MessageSet type id
    fn msgset_extension(
        &self,
        table: &MiniTable,
        type_id: u32,
    ) -> Result<Option<(&'static MiniTableExtension, &'static MiniTable)>> {
        let Some(ext) = self.registry.and_then(|r| r.lookup(table, type_id)) else {
            return Ok(None);
        };
        let sub = ext.sub_message().ok_or(Error::Unlinked)?;
        Ok(Some((ext, sub)))
    }

    /// Parse one MessageSet item group
    ///
    /// A payload that arrives before its type id is buffered and parsed once
    /// the id is known. Only the first type id and the first payload count;
    /// repeats are skipped. Items whose type id is not registered are kept
    /// whole as unknown.
    fn decode_msgset_item(&mut self, msg: &Message, start: usize) -> Result<()> {
        if self.depth == 0 {
            return Err(Error::MaxDepthExceeded);
        }
        self.depth -= 1;
        let mut type_id: Option<u32> = None;
        let mut resolved = None;
        let mut pending: Option<(usize, usize)> = None;
        let mut have_payload = false;
        loop {
            if self.stream.is_done()? {
                return Err(Error::Malformed);
            }
            let (n, wire_type) = self.stream.read_tag()?;
            match (n, wire_type) {
                (MSGSET_ITEM, WireType::EndGroup) => break,
                (_, WireType::EndGroup) => return Err(Error::Malformed),
                (MSGSET_TYPE_ID, WireType::Varint) => {
                    let id = self.stream.read_varint()? as u32;
                    if type_id.is_some() {
                        continue;
                    }
                    type_id = Some(id);
                    resolved = self.msgset_extension(msg.table(), id)?;
                    if let (Some((ext, sub)), Some(range)) = (resolved, pending.take()) {
                        let child = self.child_message(msg, Target::Extension(ext), sub)?;
                        self.decode_buffered(&child, range)?;
                    }
                }
                (MSGSET_MESSAGE, WireType::Delimited) => {
                    let size = self.stream.read_size()?;
                    if have_payload {
                        self.stream.read_bytes(size)?;
                        continue;
                    }
                    have_payload = true;
                    match resolved {
                        Some((ext, sub)) => {
                            let child = self.child_message(msg, Target::Extension(ext), sub)?;
                            let delta = self.stream.push_limit(size)?;
                            self.decode_message(&child, NO_GROUP)?;
                            self.stream.pop_limit(delta);
                        }
                        None => {
                            let (at, _) = self.stream.read_bytes(size)?;
                            if type_id.is_none() {
                                pending = Some((at, at + size));
                            }
                        }
                    }
                }
                _ => self.stream.skip_value(n, wire_type, self.depth)?,
            }
        }
        self.depth += 1;
        if type_id.is_some() && resolved.is_none() {
            msg.add_unknown(&self.input[start..self.stream.offset()])?;
        }
        Ok(())
    }

    /// Parse `range` of the input into `child` with a separate stream
    fn decode_buffered(&mut self, child: &Message, range: (usize, usize)) -> Result<()> {
        let stream = EpsStream::new_at(&self.input[..range.1], range.0);
        let outer = core::mem::replace(&mut self.stream, stream);
        let result = self.decode_message(child, NO_GROUP);
        self.stream = outer;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mini_descriptor::{field_modifier, message_modifier, MtDataEncoder};
    use crate::mini_table::{ExtensionSub, Platform};
    use crate::message::MapKey;
    use alloc::vec;

    fn build(msg_mod: u32, fields: &[(FieldType, u32, u64)]) -> &'static MiniTable {
        let mut e = MtDataEncoder::new();
        e.start_message(msg_mod);
        for &(ty, n, m) in fields {
            e.put_field(ty, n, m).unwrap();
        }
        MiniTable::build(e.as_bytes(), Platform::Bit64).unwrap().leak()
    }

    fn parse(table: &'static MiniTable, bytes: &[u8], options: DecodeOptions) -> Result<Message> {
        let arena = Arena::new();
        let m = Message::new(table, &arena)?;
        decode(bytes, &m, None, options)?;
        Ok(m)
    }

    fn slow() -> DecodeOptions {
        DecodeOptions::default().with_disable_fast_table(true)
    }

    #[test]
    fn test_scalar_types() {
        let t = build(
            0,
            &[
                (FieldType::Int32, 1, 0),
                (FieldType::SInt64, 2, 0),
                (FieldType::Fixed32, 3, 0),
                (FieldType::Double, 4, 0),
                (FieldType::Bool, 5, 0),
            ],
        );
        let bytes = [
            0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, // -1
            0x10, 0x03, // zigzag -2
            0x1D, 0x78, 0x56, 0x34, 0x12, //
            0x21, 0, 0, 0, 0, 0, 0, 0xF8, 0x3F, // 1.5
            0x28, 0x02,
        ];
        for options in [DecodeOptions::default(), slow()] {
            let m = parse(t, &bytes, options).unwrap();
            let f = |i| t.field(i).unwrap();
            assert_eq!(m.get_int32(f(0)), -1);
            assert_eq!(m.get_int64(f(1)), -2);
            assert_eq!(m.get_uint32(f(2)), 0x1234_5678);
            assert_eq!(m.get_double(f(3)), 1.5);
            assert!(m.get_bool(f(4)));
            assert!(m.has_field(f(4)));
            assert_eq!(m.unknown_len(), 0);
        }
    }

    #[test]
    fn test_last_value_wins() {
        let t = build(0, &[(FieldType::Int32, 1, 0)]);
        let m = parse(t, &[0x08, 0x01, 0x08, 0x02], slow()).unwrap();
        assert_eq!(m.get_int32(t.field(0).unwrap()), 2);
    }

    #[test]
    fn test_strings_validate_only_when_asked() {
        let bad = [0x0A, 0x02, 0xC3, 0x28];
        let validated = build(message_modifier::VALIDATE_UTF8, &[(FieldType::String, 1, 0)]);
        assert_eq!(parse(validated, &bad, slow()).unwrap_err(), Error::BadUtf8);
        assert_eq!(parse(validated, &bad, DecodeOptions::default()).unwrap_err(), Error::BadUtf8);

        let lax = build(0, &[(FieldType::String, 1, 0)]);
        let m = parse(lax, &bad, slow()).unwrap();
        assert_eq!(m.get_string(lax.field(0).unwrap()), [0xC3, 0x28]);
    }

    #[test]
    fn test_alias_strings_share_one_copy() {
        let t = build(0, &[(FieldType::Bytes, 1, 0), (FieldType::Bytes, 2, 0)]);
        let bytes = [0x0A, 0x02, b'a', b'b', 0x12, 0x03, b'x', b'y', b'z'];
        let m = parse(t, &bytes, DecodeOptions::default().with_alias_strings(true)).unwrap();
        let a = m.get_string_view(t.field(0).unwrap());
        let b = m.get_string_view(t.field(1).unwrap());
        assert_eq!(b.data, a.data.add(4));
        assert_eq!(m.get_string(t.field(1).unwrap()), b"xyz");
    }

    #[test]
    fn test_repeated_accepts_both_encodings() {
        let t = build(0, &[(FieldType::Int32, 2, field_modifier::IS_REPEATED)]);
        let bytes = [0x10, 0x01, 0x12, 0x02, 0x02, 0x03, 0x10, 0x04];
        let m = parse(t, &bytes, slow()).unwrap();
        let a = m.get_array(t.field(0).unwrap()).unwrap();
        let got: Vec<i32> = (0..a.len()).filter_map(|i| a.get_i32(i)).collect();
        assert_eq!(got, [1, 2, 3, 4]);
    }

    #[test]
    fn test_packed_fixed_and_bad_length() {
        let t = build(
            0,
            &[(FieldType::Fixed32, 1, field_modifier::IS_REPEATED | field_modifier::IS_PACKED)],
        );
        let m = parse(t, &[0x0A, 0x08, 1, 0, 0, 0, 2, 0, 0, 0], slow()).unwrap();
        let a = m.get_array(t.field(0).unwrap()).unwrap();
        assert_eq!((a.get_u32(0), a.get_u32(1)), (Some(1), Some(2)));
        assert_eq!(
            parse(t, &[0x0A, 0x03, 1, 0, 0], slow()).unwrap_err(),
            Error::Malformed
        );
    }

    #[test]
    fn test_empty_packed_leaves_field_alone() {
        let t = build(0, &[(FieldType::Int32, 1, field_modifier::IS_REPEATED)]);
        let m = parse(t, &[0x0A, 0x00], slow()).unwrap();
        assert!(m.get_array(t.field(0).unwrap()).is_none());
    }

    #[test]
    fn test_wire_type_mismatch_is_unknown() {
        let t = build(0, &[(FieldType::Int32, 1, 0)]);
        let bytes = [0x0D, 1, 2, 3, 4];
        let m = parse(t, &bytes, slow()).unwrap();
        assert!(!m.has_field(t.field(0).unwrap()));
        assert_eq!(m.unknown(), bytes);
    }

    #[test]
    fn test_unknown_group_kept_whole() {
        let t = build(0, &[(FieldType::Int32, 1, 0)]);
        // group 3 { field 1 = 1 } then field 1 = 5
        let bytes = [0x1B, 0x08, 0x01, 0x1C, 0x08, 0x05];
        let m = parse(t, &bytes, slow()).unwrap();
        assert_eq!(m.unknown(), [0x1B, 0x08, 0x01, 0x1C]);
        assert_eq!(m.get_int32(t.field(0).unwrap()), 5);
    }

    #[test]
    fn test_stray_end_group_is_malformed() {
        let t = build(0, &[(FieldType::Int32, 1, 0)]);
        assert_eq!(parse(t, &[0x0C], slow()).unwrap_err(), Error::Malformed);
        assert_eq!(parse(t, &[0x08], slow()).unwrap_err(), Error::Malformed);
    }

    #[test]
    fn test_sub_message_merge() {
        let t = build(
            0,
            &[(FieldType::Message, 1, 0), (FieldType::Int32, 2, 0), (FieldType::Int32, 3, 0)],
        );
        let f = t.field(0).unwrap();
        assert!(t.set_sub_message(f, t));
        // {1: {2: 7}} {1: {3: 9}}
        let bytes = [0x0A, 0x02, 0x10, 0x07, 0x0A, 0x02, 0x18, 0x09];
        let m = parse(t, &bytes, slow()).unwrap();
        let child = m.get_message(f).unwrap();
        assert_eq!(child.get_int32(t.field(1).unwrap()), 7);
        assert_eq!(child.get_int32(t.field(2).unwrap()), 9);
    }

    #[test]
    fn test_unlinked_sub_message() {
        let t = build(0, &[(FieldType::Message, 1, 0)]);
        assert_eq!(parse(t, &[0x0A, 0x00], slow()).unwrap_err(), Error::Unlinked);
    }

    #[test]
    fn test_group_field() {
        let t = build(0, &[(FieldType::Group, 1, 0), (FieldType::Int32, 2, 0)]);
        let f = t.field(0).unwrap();
        assert!(t.set_sub_message(f, t));
        let m = parse(t, &[0x0B, 0x10, 0x04, 0x0C], slow()).unwrap();
        assert_eq!(m.get_message(f).unwrap().get_int32(t.field(1).unwrap()), 4);
        // wrong end group number
        assert_eq!(parse(t, &[0x0B, 0x14], slow()).unwrap_err(), Error::Malformed);
        // no end group at all
        assert_eq!(parse(t, &[0x0B, 0x10, 0x04], slow()).unwrap_err(), Error::Malformed);
    }

    #[test]
    fn test_closed_enum_miss_goes_unknown() {
        let t = build(0, &[(FieldType::Enum, 1, field_modifier::IS_CLOSED_ENUM)]);
        let f = t.field(0).unwrap();
        assert_eq!(parse(t, &[0x08, 0x01], slow()).unwrap_err(), Error::Unlinked);
        let mut e = MtDataEncoder::new();
        e.start_enum();
        e.put_enum_value(0).unwrap();
        e.put_enum_value(1).unwrap();
        e.end_enum();
        assert!(t.set_sub_enum(f, MiniTableEnum::build(e.as_bytes()).unwrap().leak()));
        let m = parse(t, &[0x08, 0x01, 0x08, 0x05], slow()).unwrap();
        assert_eq!(m.get_int32(f), 1);
        assert_eq!(m.unknown(), [0x08, 0x05]);
    }

    #[test]
    fn test_packed_closed_enum_splits_misses() {
        let t = build(
            0,
            &[(FieldType::Enum, 1, field_modifier::IS_REPEATED | field_modifier::IS_CLOSED_ENUM)],
        );
        let f = t.field(0).unwrap();
        let mut e = MtDataEncoder::new();
        e.start_enum();
        e.put_enum_value(0).unwrap();
        e.put_enum_value(1).unwrap();
        e.end_enum();
        assert!(t.set_sub_enum(f, MiniTableEnum::build(e.as_bytes()).unwrap().leak()));
        let m = parse(t, &[0x0A, 0x03, 0x01, 0x07, 0x00], slow()).unwrap();
        let a = m.get_array(f).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(m.unknown(), [0x08, 0x07]);
    }

    #[test]
    fn test_oneof_last_member_wins() {
        let mut e = MtDataEncoder::new();
        e.start_message(0);
        e.put_field(FieldType::Int32, 5, 0).unwrap();
        e.put_field(FieldType::Bytes, 6, 0).unwrap();
        e.start_oneof();
        e.put_oneof_field(5);
        e.put_oneof_field(6);
        let t = MiniTable::build(e.as_bytes(), Platform::Bit64).unwrap().leak();
        let (f5, f6) = (t.field(0).unwrap(), t.field(1).unwrap());
        let m = parse(t, &[0x28, 0x07, 0x32, 0x02, b'h', b'i'], slow()).unwrap();
        assert!(!m.has_field(f5));
        assert_eq!(m.get_string(f6), b"hi");
        let m = parse(t, &[0x32, 0x02, b'h', b'i', 0x28, 0x07], slow()).unwrap();
        assert_eq!(m.get_int32(f5), 7);
        assert_eq!(m.which_oneof(f6), 5);
    }

    #[test]
    fn test_required_check() {
        let t = build(0, &[(FieldType::Int32, 1, field_modifier::IS_REQUIRED)]);
        let options = slow().with_check_required(true);
        assert_eq!(parse(t, &[], options).unwrap_err(), Error::MissingRequired);
        assert!(parse(t, &[0x08, 0x00], options).is_ok());
        assert!(parse(t, &[], slow()).is_ok());
    }

    fn map_table(value: FieldType) -> (&'static MiniTable, &'static MiniTable) {
        let t = build(0, &[(FieldType::Message, 1, field_modifier::IS_REPEATED)]);
        let entry = MiniTable::build_map_entry(FieldType::Int32, value, false, Platform::Bit64)
            .unwrap()
            .leak();
        assert!(t.set_sub_message(t.field(0).unwrap(), entry));
        (t, entry)
    }

    #[test]
    fn test_map_entries() {
        let (t, _) = map_table(FieldType::Bytes);
        // {1: 1, 2: "a"} {1: 2, 2: "b"} {1: 1, 2: "c"}
        let bytes = [
            0x0A, 0x05, 0x08, 0x01, 0x12, 0x01, b'a', //
            0x0A, 0x05, 0x08, 0x02, 0x12, 0x01, b'b', //
            0x0A, 0x05, 0x08, 0x01, 0x12, 0x01, b'c',
        ];
        let m = parse(t, &bytes, slow()).unwrap();
        let map = m.get_map(t.field(0).unwrap()).unwrap();
        assert_eq!(map.len(), 2);
        match map.get(MapKey::I32(1)).unwrap() {
            MapValue::String(v) => assert_eq!(v.to_vec(m.arena()), b"c"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_map_message_value_defaults() {
        let (t, entry) = map_table(FieldType::Message);
        let value = build(0, &[(FieldType::Int32, 1, 0)]);
        assert!(entry.set_sub_message(entry.field(1).unwrap(), value));
        // entry with only a key
        let m = parse(t, &[0x0A, 0x02, 0x08, 0x03], slow()).unwrap();
        let map = m.get_map(t.field(0).unwrap()).unwrap();
        let v = map.get_message(MapKey::I32(3), value).unwrap();
        assert_eq!(v.get_int32(value.field(0).unwrap()), 0);
    }

    #[test]
    fn test_map_entry_with_unknown_is_kept_whole() {
        let (t, _) = map_table(FieldType::Int32);
        let bytes = [0x0A, 0x06, 0x08, 0x01, 0x10, 0x02, 0x18, 0x03];
        let m = parse(t, &bytes, slow()).unwrap();
        assert!(m.get_map(t.field(0).unwrap()).is_none());
        assert_eq!(m.unknown(), bytes);
    }

    fn message_set() -> (&'static MiniTable, &'static MiniTable, &'static MiniTableExtension) {
        let set = MiniTable::build_message_set(Platform::Bit64).leak();
        let item = build(0, &[(FieldType::Int32, 1, 0)]);
        let mut e = MtDataEncoder::new();
        e.encode_extension(FieldType::Message, 100, 0).unwrap();
        let ext = MiniTableExtension::build(
            e.as_bytes(),
            set,
            ExtensionSub::Message(item),
            Platform::Bit64,
        )
        .unwrap()
        .leak();
        (set, item, ext)
    }

    fn parse_set(
        set: &'static MiniTable,
        ext: &'static MiniTableExtension,
        bytes: &[u8],
    ) -> Message {
        let mut reg = ExtensionRegistry::new();
        reg.add(&[ext]).unwrap();
        let arena = Arena::new();
        let m = Message::new(set, &arena).unwrap();
        decode(bytes, &m, Some(&reg), DecodeOptions::default()).unwrap();
        m
    }

    #[test]
    fn test_message_set_item_in_order() {
        let (set, item, ext) = message_set();
        // item { type_id 100, message { 1: 9 } }
        let bytes = [0x0B, 0x10, 0x64, 0x1A, 0x02, 0x08, 0x09, 0x0C];
        let m = parse_set(set, ext, &bytes);
        let Some(crate::message::MessageValue::Message(v)) = m.get_extension(ext) else {
            panic!("extension missing");
        };
        assert_eq!(v.get_int32(item.field(0).unwrap()), 9);
        assert_eq!(m.unknown_len(), 0);
    }

    #[test]
    fn test_message_set_item_out_of_order() {
        let (set, item, ext) = message_set();
        let bytes = [0x0B, 0x1A, 0x02, 0x08, 0x09, 0x10, 0x64, 0x0C];
        let m = parse_set(set, ext, &bytes);
        let Some(crate::message::MessageValue::Message(v)) = m.get_extension(ext) else {
            panic!("extension missing");
        };
        assert_eq!(v.get_int32(item.field(0).unwrap()), 9);
    }

    #[test]
    fn test_message_set_unregistered_item_is_unknown() {
        let (set, _, ext) = message_set();
        let bytes = [0x0B, 0x10, 0x65, 0x1A, 0x02, 0x08, 0x09, 0x0C];
        let m = parse_set(set, ext, &bytes);
        assert!(!m.has_extension(ext));
        assert_eq!(m.unknown(), bytes);
    }

    #[test]
    fn test_message_set_repeated_type_id_is_ignored() {
        let (set, item, ext) = message_set();
        // item { type_id 100, message { 1: 9 }, type_id 101 }
        let bytes = [0x0B, 0x10, 0x64, 0x1A, 0x02, 0x08, 0x09, 0x10, 0x65, 0x0C];
        let m = parse_set(set, ext, &bytes);
        let Some(crate::message::MessageValue::Message(v)) = m.get_extension(ext) else {
            panic!("extension missing");
        };
        assert_eq!(v.get_int32(item.field(0).unwrap()), 9);
        assert_eq!(m.unknown_len(), 0);

        // an unregistered first id wins over a registered second one
        let bytes = [0x0B, 0x10, 0x65, 0x1A, 0x02, 0x08, 0x09, 0x10, 0x64, 0x0C];
        let m = parse_set(set, ext, &bytes);
        assert!(!m.has_extension(ext));
        assert_eq!(m.unknown(), bytes);
    }

    #[test]
    fn test_message_set_repeated_payload_is_ignored() {
        let (set, item, ext) = message_set();
        for bytes in [
            // type id first
            [0x0B, 0x10, 0x64, 0x1A, 0x02, 0x08, 0x09, 0x1A, 0x02, 0x08, 0x07, 0x0C],
            // type id last
            [0x0B, 0x1A, 0x02, 0x08, 0x09, 0x1A, 0x02, 0x08, 0x07, 0x10, 0x64, 0x0C],
        ] {
            let m = parse_set(set, ext, &bytes);
            let Some(crate::message::MessageValue::Message(v)) = m.get_extension(ext) else {
                panic!("extension missing");
            };
            assert_eq!(v.get_int32(item.field(0).unwrap()), 9);
            assert_eq!(m.unknown_len(), 0);
        }
    }

    #[test]
    fn test_extension_resolved_by_registry() {
        let t = build(message_modifier::IS_EXTENDABLE, &[(FieldType::Int32, 1, 0)]);
        let mut e = MtDataEncoder::new();
        e.encode_extension(FieldType::SInt32, 10, 0).unwrap();
        let ext = MiniTableExtension::build(e.as_bytes(), t, ExtensionSub::None, Platform::Bit64)
            .unwrap()
            .leak();
        let bytes = [0x50, 0x05];
        // without a registry the field stays unknown
        let m = parse(t, &bytes, slow()).unwrap();
        assert_eq!(m.unknown(), bytes);

        let mut reg = ExtensionRegistry::new();
        reg.add(&[ext]).unwrap();
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        decode(&bytes, &m, Some(&reg), slow()).unwrap();
        assert_eq!(m.get_extension_int32(ext), -3);
        assert_eq!(m.unknown_len(), 0);
    }

    #[test]
    fn test_length_prefixed() {
        let t = build(0, &[(FieldType::Int32, 1, 0)]);
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        let used = decode_length_prefixed(&[0x02, 0x08, 0x07, 0xAA], &m, None, slow()).unwrap();
        assert_eq!(used, 3);
        assert_eq!(m.get_int32(t.field(0).unwrap()), 7);
        assert_eq!(
            decode_length_prefixed(&[0x05, 0x08], &m, None, slow()),
            Err(Error::Malformed)
        );
        assert_eq!(
            decode_length_prefixed(&[0x80], &m, None, slow()),
            Err(Error::Malformed)
        );
        let huge = [0x80, 0x80, 0x80, 0x80, 0x08];
        assert_eq!(decode_length_prefixed(&huge, &m, None, slow()), Err(Error::Malformed));
    }

    #[test]
    fn test_long_input_crosses_patch_buffer() {
        let t = build(0, &[(FieldType::Bytes, 1, 0), (FieldType::Int64, 2, 0)]);
        for pad in 0..40usize {
            let mut bytes = vec![0x0A, pad as u8];
            bytes.extend(core::iter::repeat(b'x').take(pad));
            bytes.push(0x10);
            varint::encode_u64(u64::MAX, &mut bytes);
            let m = parse(t, &bytes, slow()).unwrap();
            assert_eq!(m.get_int64(t.field(1).unwrap()), -1, "pad {pad}");
            assert_eq!(m.get_string(t.field(0).unwrap()).len(), pad);
        }
    }
}
