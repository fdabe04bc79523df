//! Wire-format encoder
//!
//! Fields are written in field-number order, followed by extensions in
//! number order and then the unknown fields as they were received.
//! Sub-messages are encoded into the output buffer and then moved behind
//! their length prefix.

use super::{make_tag, varint, wire_type_of, EncodeOptions, WireType};
use crate::arena::{Arena, ArenaPtr};
use crate::error::{Error, Result};
use crate::message::{read_ptr, read_scalar, read_view, Array, Map, MapValue, Message, StringView};
use crate::mini_table::{FieldMode, FieldType, MiniTable, MiniTableExtension, MiniTableField};
use alloc::vec::Vec;
use log::debug;

/// Serialize `msg` to protobuf bytes
///
/// ```
/// use minipb::mini_table::{MiniTable, Platform};
/// use minipb::wire::{encode, EncodeOptions};
/// use minipb::{Arena, Message};
///
/// let table = MiniTable::build(b"$(", Platform::Bit64)?.leak();
/// let arena = Arena::new();
/// let msg = Message::new(table, &arena)?;
/// msg.set_int32(table.field(0).unwrap(), 150)?;
/// assert_eq!(encode(&msg, EncodeOptions::default())?, [0x08, 0x96, 0x01]);
/// # Ok::<(), minipb::Error>(())
/// ```
pub fn encode(msg: &Message, options: EncodeOptions) -> Result<Vec<u8>> {
    let mut e = Encoder {
        out: Vec::new(),
        options,
        depth: options.max_depth,
    };
    match e.encode_message(msg) {
        Ok(()) => Ok(e.out),
        Err(err) => {
            debug!("encode failed after {} bytes: {:?}", e.out.len(), err);
            Err(err)
        }
    }
}

/// Wire encoding of a scalar's stored bits
#[inline]
fn put_scalar(out: &mut Vec<u8>, ty: FieldType, bits: u64) {
    match ty {
        FieldType::Double | FieldType::Fixed64 | FieldType::SFixed64 => {
            out.extend_from_slice(&bits.to_le_bytes());
        }
        FieldType::Float | FieldType::Fixed32 | FieldType::SFixed32 => {
            out.extend_from_slice(&(bits as u32).to_le_bytes());
        }
        FieldType::Bool => out.push((bits & 0xFF != 0) as u8),
        FieldType::Int32 | FieldType::Enum => {
            varint::encode_u64(bits as u32 as i32 as i64 as u64, out);
        }
        FieldType::SInt32 => {
            varint::encode_u32(varint::zigzag_encode_32(bits as u32 as i32), out);
        }
        FieldType::SInt64 => varint::encode_u64(varint::zigzag_encode_64(bits as i64), out),
        FieldType::UInt32 => varint::encode_u32(bits as u32, out),
        _ => varint::encode_u64(bits, out),
    }
}

#[inline]
fn put_tag(out: &mut Vec<u8>, number: u32, wire_type: WireType) {
    varint::encode_u32(make_tag(number, wire_type), out);
}

fn put_bytes(out: &mut Vec<u8>, arena: &Arena, view: StringView) {
    varint::encode_u64(view.len as u64, out);
    if !view.is_empty() {
        arena.with_bytes(view.data, view.len, |b| out.extend_from_slice(b));
    }
}

/// Stored bits of a map key
fn key_bits(key: &[u8]) -> u64 {
    let mut wide = [0u8; 8];
    let n = key.len().min(8);
    wide[..n].copy_from_slice(&key[..n]);
    u64::from_le_bytes(wide)
}

struct Encoder {
    out: Vec<u8>,
    options: EncodeOptions,
    /// Remaining nesting budget
    depth: u16,
}

impl Encoder {
    fn encode_message(&mut self, msg: &Message) -> Result<()> {
        if self.options.check_required && !msg.is_initialized_shallow() {
            return Err(Error::MissingRequired);
        }
        let table = msg.table();
        for field in table.fields() {
            if !self.is_present(msg, field) {
                continue;
            }
            let sub = table.sub_message(field);
            self.encode_field(msg.arena(), msg.field_ptr(field), field, sub)?;
        }

        let mut exts = msg.extension_records();
        exts.sort_by_key(|(ext, _)| ext.number());
        for (ext, payload) in exts {
            if table.is_message_set() {
                self.encode_msgset_item(msg.arena(), ext, payload)?;
            } else {
                self.encode_field(msg.arena(), payload, ext.field(), ext.sub_message())?;
            }
        }

        if !self.options.skip_unknown {
            self.out.extend_from_slice(&msg.unknown());
        }
        Ok(())
    }

    /// Whether a declared field is written at all
    fn is_present(&self, msg: &Message, field: &MiniTableField) -> bool {
        if field.is_in_oneof() {
            return msg.which_oneof(field) == field.number();
        }
        if field.hasbit().is_some() {
            return msg.has_field(field);
        }
        let at = msg.field_ptr(field);
        let arena = msg.arena();
        match field.mode() {
            FieldMode::Scalar if field.descriptor_type().is_string_like() => {
                !read_view(arena, at).is_empty()
            }
            FieldMode::Scalar if !field.is_sub_message() => {
                read_scalar(arena, at, field.rep()) != 0
            }
            _ => !read_ptr(arena, at).is_null(),
        }
    }

    /// Write the value stored at `at` for `field`, which is known present
    fn encode_field(
        &mut self,
        arena: &Arena,
        at: ArenaPtr,
        field: &MiniTableField,
        sub: Option<&'static MiniTable>,
    ) -> Result<()> {
        let number = field.number();
        let ty = field.descriptor_type();
        match field.mode() {
            FieldMode::Scalar => match ty {
                FieldType::Message | FieldType::Group => {
                    let ptr = read_ptr(arena, at);
                    if ptr.is_null() {
                        return Ok(());
                    }
                    let sub = sub.ok_or(Error::Unlinked)?;
                    let child = Message::from_raw(arena.clone(), ptr, sub);
                    self.encode_sub(&child, number, ty)
                }
                FieldType::String | FieldType::Bytes => {
                    put_tag(&mut self.out, number, WireType::Delimited);
                    put_bytes(&mut self.out, arena, read_view(arena, at));
                    Ok(())
                }
                _ => {
                    put_tag(&mut self.out, number, wire_type_of(ty));
                    put_scalar(&mut self.out, ty, read_scalar(arena, at, field.rep()));
                    Ok(())
                }
            },
            FieldMode::Array => {
                let ptr = read_ptr(arena, at);
                if ptr.is_null() {
                    return Ok(());
                }
                let array = Array::from_raw(arena.clone(), ptr);
                self.encode_array(&array, field, sub)
            }
            FieldMode::Map => {
                let ptr = read_ptr(arena, at);
                if ptr.is_null() {
                    return Ok(());
                }
                let entry = sub.ok_or(Error::Unlinked)?;
                let map = Map::from_raw(arena.clone(), ptr);
                self.encode_map(&map, number, entry)
            }
        }
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth == 0 {
            return Err(Error::MaxDepthExceeded);
        }
        self.depth -= 1;
        Ok(())
    }

    /// Write `child` as a group or a length-delimited field
    fn encode_sub(&mut self, child: &Message, number: u32, ty: FieldType) -> Result<()> {
        self.enter()?;
        if ty == FieldType::Group {
            put_tag(&mut self.out, number, WireType::StartGroup);
            self.encode_message(child)?;
            put_tag(&mut self.out, number, WireType::EndGroup);
        } else {
            put_tag(&mut self.out, number, WireType::Delimited);
            self.delimited(|e| e.encode_message(child))?;
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `body` and move what it wrote behind a length prefix
    fn delimited(&mut self, body: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        let mark = self.out.len();
        body(self)?;
        let bytes = self.out.split_off(mark);
        varint::encode_u64(bytes.len() as u64, &mut self.out);
        self.out.extend_from_slice(&bytes);
        Ok(())
    }

    fn encode_array(
        &mut self,
        array: &Array,
        field: &MiniTableField,
        sub: Option<&'static MiniTable>,
    ) -> Result<()> {
        let number = field.number();
        let ty = field.descriptor_type();
        if array.is_empty() {
            return Ok(());
        }
        match ty {
            FieldType::Message | FieldType::Group => {
                let sub = sub.ok_or(Error::Unlinked)?;
                for i in 0..array.len() {
                    if let Some(child) = array.get_message(i, sub) {
                        self.encode_sub(&child, number, ty)?;
                    }
                }
            }
            FieldType::String | FieldType::Bytes => {
                for i in 0..array.len() {
                    let view = array.get_string_view(i).unwrap_or_default();
                    put_tag(&mut self.out, number, WireType::Delimited);
                    put_bytes(&mut self.out, array.arena(), view);
                }
            }
            _ if field.is_packed() => {
                put_tag(&mut self.out, number, WireType::Delimited);
                self.delimited(|e| {
                    for bits in (0..array.len()).filter_map(|i| array.get(i)) {
                        put_scalar(&mut e.out, ty, bits);
                    }
                    Ok(())
                })?;
            }
            _ => {
                let wire_type = wire_type_of(ty);
                for bits in (0..array.len()).filter_map(|i| array.get(i)) {
                    put_tag(&mut self.out, number, wire_type);
                    put_scalar(&mut self.out, ty, bits);
                }
            }
        }
        Ok(())
    }

    /// Write each map entry as a key (1) / value (2) message
    fn encode_map(&mut self, map: &Map, number: u32, entry: &'static MiniTable) -> Result<()> {
        let (Some(key_field), Some(val_field)) = (entry.field(0), entry.field(1)) else {
            return Err(Error::Malformed);
        };
        let key_ty = key_field.descriptor_type();
        let val_ty = val_field.descriptor_type();
        let entries = if self.options.deterministic {
            map.sorted_entries(key_ty)
        } else {
            map.entries()
        };
        let arena = map.arena();
        for (key, value) in entries {
            self.enter()?;
            put_tag(&mut self.out, number, WireType::Delimited);
            self.delimited(|e| {
                if key_ty.is_string_like() {
                    put_tag(&mut e.out, 1, WireType::Delimited);
                    varint::encode_u64(key.len() as u64, &mut e.out);
                    e.out.extend_from_slice(&key);
                } else {
                    put_tag(&mut e.out, 1, wire_type_of(key_ty));
                    put_scalar(&mut e.out, key_ty, key_bits(&key));
                }
                match value {
                    MapValue::String(view) => {
                        put_tag(&mut e.out, 2, WireType::Delimited);
                        put_bytes(&mut e.out, arena, view);
                    }
                    MapValue::Raw(raw) if val_field.is_sub_message() => {
                        let ptr = ArenaPtr::from_raw(raw);
                        if !ptr.is_null() {
                            let sub = entry.sub_message(val_field).ok_or(Error::Unlinked)?;
                            let child = Message::from_raw(arena.clone(), ptr, sub);
                            e.encode_sub(&child, 2, val_ty)?;
                        }
                    }
                    MapValue::Raw(bits) => {
                        put_tag(&mut e.out, 2, wire_type_of(val_ty));
                        put_scalar(&mut e.out, val_ty, bits);
                    }
                }
                Ok(())
            })?;
            self.depth += 1;
        }
        Ok(())
    }

    /// Write a MessageSet extension as an item group
    fn encode_msgset_item(
        &mut self,
        arena: &Arena,
        ext: &'static MiniTableExtension,
        payload: ArenaPtr,
    ) -> Result<()> {
        let ptr = read_ptr(arena, payload);
        if ptr.is_null() {
            return Ok(());
        }
        let sub = ext.sub_message().ok_or(Error::Unlinked)?;
        let child = Message::from_raw(arena.clone(), ptr, sub);
        self.enter()?;
        put_tag(&mut self.out, 1, WireType::StartGroup);
        put_tag(&mut self.out, 2, WireType::Varint);
        varint::encode_u32(ext.number(), &mut self.out);
        put_tag(&mut self.out, 3, WireType::Delimited);
        self.delimited(|e| e.encode_message(&child))?;
        put_tag(&mut self.out, 1, WireType::EndGroup);
        self.depth += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension_registry::ExtensionRegistry;
    use crate::message::MapKey;
    use crate::mini_descriptor::{field_modifier, message_modifier, MtDataEncoder};
    use crate::mini_table::{ExtensionSub, Platform};
    use crate::wire::{decode, DecodeOptions};

    fn build(msg_mod: u32, fields: &[(FieldType, u32, u64)]) -> &'static MiniTable {
        let mut e = MtDataEncoder::new();
        e.start_message(msg_mod);
        for &(ty, n, m) in fields {
            e.put_field(ty, n, m).unwrap();
        }
        MiniTable::build(e.as_bytes(), Platform::Bit64).unwrap().leak()
    }

    fn roundtrip(table: &'static MiniTable, bytes: &[u8]) -> Vec<u8> {
        let arena = Arena::new();
        let m = Message::new(table, &arena).unwrap();
        decode(bytes, &m, None, DecodeOptions::default()).unwrap();
        encode(&m, EncodeOptions::default()).unwrap()
    }

    #[test]
    fn test_negative_int32_is_ten_bytes() {
        let t = build(0, &[(FieldType::Int32, 1, 0)]);
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        m.set_int32(t.field(0).unwrap(), -1).unwrap();
        let out = encode(&m, EncodeOptions::default()).unwrap();
        assert_eq!(out.len(), 11);
        assert_eq!(out[0], 0x08);
        assert_eq!(out[10], 0x01);
    }

    #[test]
    fn test_implicit_presence_skips_zero() {
        let t = build(
            0,
            &[
                (FieldType::Int32, 1, field_modifier::IS_PROTO3_SINGULAR),
                (FieldType::Bytes, 2, field_modifier::IS_PROTO3_SINGULAR),
                (FieldType::Int32, 3, 0),
            ],
        );
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        assert!(encode(&m, EncodeOptions::default()).unwrap().is_empty());
        // explicit presence writes zero once set
        m.set_int32(t.field(2).unwrap(), 0).unwrap();
        assert_eq!(encode(&m, EncodeOptions::default()).unwrap(), [0x18, 0x00]);
        m.set_int32(t.field(0).unwrap(), 3).unwrap();
        m.set_string(t.field(1).unwrap(), b"x").unwrap();
        assert_eq!(
            encode(&m, EncodeOptions::default()).unwrap(),
            [0x08, 0x03, 0x12, 0x01, b'x', 0x18, 0x00]
        );
    }

    #[test]
    fn test_repeated_packing_follows_the_field() {
        let packed = build(
            0,
            &[(FieldType::SInt32, 1, field_modifier::IS_REPEATED | field_modifier::IS_PACKED)],
        );
        // unpacked input comes back packed
        assert_eq!(roundtrip(packed, &[0x08, 0x01, 0x08, 0x03]), [0x0A, 0x02, 0x01, 0x03]);

        let unpacked = build(0, &[(FieldType::Fixed32, 1, field_modifier::IS_REPEATED)]);
        assert_eq!(
            roundtrip(unpacked, &[0x0A, 0x04, 7, 0, 0, 0]),
            [0x0D, 7, 0, 0, 0]
        );
    }

    #[test]
    fn test_default_packed_message() {
        let t = build(
            message_modifier::DEFAULT_IS_PACKED,
            &[
                (FieldType::Int64, 1, field_modifier::IS_REPEATED | field_modifier::IS_PACKED),
                (FieldType::Int64, 2, field_modifier::IS_REPEATED),
            ],
        );
        assert_eq!(roundtrip(t, &[0x08, 0x05, 0x08, 0x06]), [0x0A, 0x02, 0x05, 0x06]);
        // the packed flag is absolute, so field 2 stays unpacked
        assert_eq!(roundtrip(t, &[0x12, 0x02, 0x05, 0x06]), [0x10, 0x05, 0x10, 0x06]);
    }

    #[test]
    fn test_unknown_fields_trail_and_can_be_skipped() {
        let t = build(0, &[(FieldType::Int32, 2, 0)]);
        let bytes = [0x08, 0x01, 0x10, 0x02, 0x18, 0x03];
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        decode(&bytes, &m, None, DecodeOptions::default()).unwrap();
        assert_eq!(
            encode(&m, EncodeOptions::default()).unwrap(),
            [0x10, 0x02, 0x08, 0x01, 0x18, 0x03]
        );
        assert_eq!(
            encode(&m, EncodeOptions::default().with_skip_unknown(true)).unwrap(),
            [0x10, 0x02]
        );
    }

    #[test]
    fn test_nested_and_group() {
        let t = build(
            0,
            &[(FieldType::Message, 1, 0), (FieldType::Group, 2, 0), (FieldType::Int32, 3, 0)],
        );
        assert!(t.set_sub_message(t.field(0).unwrap(), t));
        assert!(t.set_sub_message(t.field(1).unwrap(), t));
        let bytes = [0x0A, 0x02, 0x18, 0x01, 0x13, 0x18, 0x02, 0x14];
        assert_eq!(roundtrip(t, &bytes), bytes);
    }

    #[test]
    fn test_depth_limit() {
        let t = build(0, &[(FieldType::Message, 1, 0)]);
        assert!(t.set_sub_message(t.field(0).unwrap(), t));
        let arena = Arena::new();
        let root = Message::new(t, &arena).unwrap();
        let mut cur = root.clone();
        for _ in 0..3 {
            cur = cur.mutable_message(t.field(0).unwrap()).unwrap();
        }
        let opts = EncodeOptions::default();
        assert!(encode(&root, opts.with_max_depth(3)).is_ok());
        assert_eq!(
            encode(&root, opts.with_max_depth(2)).unwrap_err(),
            Error::MaxDepthExceeded
        );
    }

    #[test]
    fn test_required_check() {
        let t = build(0, &[(FieldType::Int32, 1, field_modifier::IS_REQUIRED)]);
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        let opts = EncodeOptions::default().with_check_required(true);
        assert_eq!(encode(&m, opts).unwrap_err(), Error::MissingRequired);
        m.set_int32(t.field(0).unwrap(), 0).unwrap();
        assert_eq!(encode(&m, opts).unwrap(), [0x08, 0x00]);
    }

    #[test]
    fn test_deterministic_map_order() {
        let t = build(0, &[(FieldType::Message, 1, field_modifier::IS_REPEATED)]);
        let entry = MiniTable::build_map_entry(
            FieldType::SInt32,
            FieldType::Int32,
            false,
            Platform::Bit64,
        )
        .unwrap()
        .leak();
        assert!(t.set_sub_message(t.field(0).unwrap(), entry));
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        let map = m.get_or_create_map(t.field(0).unwrap()).unwrap();
        for k in [3, -1, 2] {
            map.insert(MapKey::I32(k), MapValue::Raw(0)).unwrap();
        }
        let out = encode(&m, EncodeOptions::default().with_deterministic(true)).unwrap();
        // each entry: 0A 04 08 <zigzag key> 10 00
        assert_eq!(out.len(), 18);
        let keys: Vec<u8> = out.chunks(6).map(|c| c[3]).collect();
        assert_eq!(keys, [0x01, 0x04, 0x06]);
    }

    #[test]
    fn test_extensions_after_fields_in_number_order() {
        let t = build(message_modifier::IS_EXTENDABLE, &[(FieldType::Int32, 1, 0)]);
        let ext = |n| {
            let mut e = MtDataEncoder::new();
            e.encode_extension(FieldType::Int32, n, 0).unwrap();
            MiniTableExtension::build(e.as_bytes(), t, ExtensionSub::None, Platform::Bit64)
                .unwrap()
                .leak()
        };
        let (e9, e5) = (ext(9), ext(5));
        let arena = Arena::new();
        let m = Message::new(t, &arena).unwrap();
        m.set_extension_int32(e9, 0).unwrap();
        m.set_extension_int32(e5, 2).unwrap();
        m.set_int32(t.field(0).unwrap(), 1).unwrap();
        assert_eq!(
            encode(&m, EncodeOptions::default()).unwrap(),
            [0x08, 0x01, 0x28, 0x02, 0x48, 0x00]
        );
    }

    #[test]
    fn test_message_set_item_roundtrip() {
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
        let mut reg = ExtensionRegistry::new();
        reg.add(&[ext]).unwrap();
        // payload before type id comes back in canonical order
        let bytes = [0x0B, 0x1A, 0x02, 0x08, 0x09, 0x10, 0x64, 0x0C];
        let arena = Arena::new();
        let m = Message::new(set, &arena).unwrap();
        decode(&bytes, &m, Some(&reg), DecodeOptions::default()).unwrap();
        assert_eq!(
            encode(&m, EncodeOptions::default()).unwrap(),
            [0x0B, 0x10, 0x64, 0x1A, 0x02, 0x08, 0x09, 0x0C]
        );
    }
}
