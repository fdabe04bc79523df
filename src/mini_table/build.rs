//! Mini-descriptor to [`MiniTable`]

use super::field::{FLAG_ALTERNATE, FLAG_PACKED, REP_SHIFT};
use super::{
    fast, ExtMode, FieldMode, FieldRep, FieldType, MiniTable, MiniTableField, Platform, Sub,
};
use crate::error::{BuildError, Result};
use crate::mini_descriptor::base92::{decode_varint, from_base92};
use crate::mini_descriptor::{
    encoded_field_modifier, field_modifier, message_modifier, EncodedType, MtDataEncoder, END,
    FIELD_SEPARATOR, MAX_FIELD, MAX_MODIFIER, MAX_ONEOF_FIELD, MAX_SKIP, MIN_MODIFIER,
    MIN_ONEOF_FIELD, MIN_SKIP, ONEOF_SEPARATOR, REPEATED_BASE, VERSION_MAP, VERSION_MESSAGE,
    VERSION_MESSAGE_SET,
};
use alloc::vec::Vec;
use log::debug;
use once_cell::race::OnceRef;

/// Presence class held for each field until hasbits are assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Presence {
    None,
    Hasbit,
    Required,
    Oneof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ItemType {
    OneofCase = 0,
    OneofField = 1,
    Field = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct LayoutItem {
    rep: FieldRep,
    ty: ItemType,
    /// Field index, or oneof index for oneof items
    index: usize,
}

/// Which sub counter a field draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubKind {
    None,
    Message,
    Enum,
}

/// Fields parsed out of a descriptor body
pub(super) struct Parsed {
    pub fields: Vec<MiniTableField>,
    pub presence: Vec<Presence>,
    sub_kind: Vec<SubKind>,
    pub oneofs: Vec<Vec<usize>>,
    pub msg_mod: u32,
    pub dense_below: Option<usize>,
}

fn encoded_to_type(t: EncodedType) -> FieldType {
    match t {
        EncodedType::Double => FieldType::Double,
        EncodedType::Float => FieldType::Float,
        EncodedType::Fixed32 => FieldType::Fixed32,
        EncodedType::Fixed64 => FieldType::Fixed64,
        EncodedType::SFixed32 => FieldType::SFixed32,
        EncodedType::SFixed64 => FieldType::SFixed64,
        EncodedType::Int32 => FieldType::Int32,
        EncodedType::UInt32 => FieldType::UInt32,
        EncodedType::SInt32 => FieldType::SInt32,
        EncodedType::Int64 => FieldType::Int64,
        EncodedType::UInt64 => FieldType::UInt64,
        EncodedType::SInt64 => FieldType::SInt64,
        EncodedType::OpenEnum | EncodedType::ClosedEnum => FieldType::Enum,
        EncodedType::Bool => FieldType::Bool,
        EncodedType::Bytes => FieldType::Bytes,
        EncodedType::String => FieldType::String,
        EncodedType::Group => FieldType::Group,
        EncodedType::Message => FieldType::Message,
    }
}

fn encoded_to_rep(t: EncodedType, platform: Platform) -> FieldRep {
    match t {
        EncodedType::Bool => FieldRep::OneByte,
        EncodedType::Float
        | EncodedType::Fixed32
        | EncodedType::SFixed32
        | EncodedType::Int32
        | EncodedType::UInt32
        | EncodedType::SInt32
        | EncodedType::OpenEnum
        | EncodedType::ClosedEnum => FieldRep::FourByte,
        EncodedType::Double
        | EncodedType::Fixed64
        | EncodedType::SFixed64
        | EncodedType::Int64
        | EncodedType::UInt64
        | EncodedType::SInt64 => FieldRep::EightByte,
        EncodedType::Bytes | EncodedType::String => FieldRep::StringView,
        EncodedType::Group | EncodedType::Message => platform.pointer_rep(),
    }
}

#[inline]
fn set_mode(field: &mut MiniTableField, mode: u8) {
    *field.mode.get_mut() = mode;
}

#[inline]
fn mode_of(field: &mut MiniTableField) -> u8 {
    *field.mode.get_mut()
}

impl Parsed {
    fn new() -> Self {
        Self {
            fields: Vec::new(),
            presence: Vec::new(),
            sub_kind: Vec::new(),
            oneofs: Vec::new(),
            msg_mod: 0,
            dense_below: None,
        }
    }

    fn find(&self, number: u32) -> Option<usize> {
        self.fields.binary_search_by_key(&number, |f| f.number).ok()
    }

    fn is_packable(&mut self, idx: usize) -> bool {
        let field = &mut self.fields[idx];
        let is_array = mode_of(field) & 3 == FieldMode::Array as u8;
        is_array && field.descriptor_type.is_packable()
    }

    fn push_field(&mut self, ch: u8, number: u32, platform: Platform) -> Result<()> {
        let raw = from_base92(ch).ok_or(BuildError::InvalidChar(ch))?;
        let (encoded, repeated) = if raw >= REPEATED_BASE {
            (raw - REPEATED_BASE, true)
        } else {
            (raw, false)
        };
        let encoded = EncodedType::from_u8(encoded).ok_or(BuildError::InvalidFieldType(encoded))?;

        let mut ty = encoded_to_type(encoded);
        let (mut mode, presence) = if repeated {
            (
                FieldMode::Array as u8 | (platform.pointer_rep() as u8) << REP_SHIFT,
                Presence::None,
            )
        } else {
            (
                FieldMode::Scalar as u8 | (encoded_to_rep(encoded, platform) as u8) << REP_SHIFT,
                Presence::Hasbit,
            )
        };

        if encoded == EncodedType::OpenEnum {
            ty = FieldType::Int32;
            mode |= FLAG_ALTERNATE;
        }
        if ty == FieldType::String && self.msg_mod & message_modifier::VALIDATE_UTF8 == 0 {
            ty = FieldType::Bytes;
            mode |= FLAG_ALTERNATE;
        }
        let sub = match ty {
            FieldType::Message | FieldType::Group => SubKind::Message,
            FieldType::Enum => SubKind::Enum,
            _ => SubKind::None,
        };
        if repeated && ty.is_packable() && self.msg_mod & message_modifier::DEFAULT_IS_PACKED != 0
        {
            mode |= FLAG_PACKED;
        }

        self.fields.push(MiniTableField::new(number, ty, mode));
        self.presence.push(presence);
        self.sub_kind.push(sub);
        Ok(())
    }

    fn modify_field(&mut self, idx: usize, modifiers: u32) -> Result<()> {
        let number = self.fields[idx].number;
        if modifiers & encoded_field_modifier::FLIP_PACKED != 0 {
            if !self.is_packable(idx) {
                return Err(BuildError::FlipPackedUnpackable(number).into());
            }
            let field = &mut self.fields[idx];
            let mode = mode_of(field) ^ FLAG_PACKED;
            set_mode(field, mode);
        }
        if modifiers & encoded_field_modifier::FLIP_VALIDATE_UTF8 != 0 {
            let field = &mut self.fields[idx];
            let mode = mode_of(field);
            if field.descriptor_type != FieldType::Bytes || mode & FLAG_ALTERNATE == 0 {
                return Err(BuildError::FlipValidateUtf8(number).into());
            }
            field.descriptor_type = FieldType::String;
            set_mode(field, mode & !FLAG_ALTERNATE);
        }

        let singular = modifiers & encoded_field_modifier::IS_PROTO3_SINGULAR != 0;
        let required = modifiers & encoded_field_modifier::IS_REQUIRED != 0;
        if (singular || required) && self.presence[idx] != Presence::Hasbit {
            return Err(BuildError::InvalidModifiers(number).into());
        }
        if singular && required {
            return Err(BuildError::SingularAndRequired(number).into());
        }
        if singular && self.fields[idx].descriptor_type.is_sub_message() {
            return Err(BuildError::SingularSubmessage(number).into());
        }
        if singular {
            self.presence[idx] = Presence::None;
        }
        if required {
            self.presence[idx] = Presence::Required;
        }
        Ok(())
    }

    fn parse_oneofs(&mut self, data: &[u8], pos: &mut usize) -> Result<()> {
        let mut current: Vec<usize> = Vec::new();
        while let Some(&ch) = data.get(*pos) {
            *pos += 1;
            if ch == FIELD_SEPARATOR {
                continue;
            }
            if ch == ONEOF_SEPARATOR {
                if current.is_empty() {
                    return Err(BuildError::EmptyOneof.into());
                }
                self.oneofs.push(core::mem::take(&mut current));
                continue;
            }
            if !(MIN_ONEOF_FIELD..=MAX_ONEOF_FIELD).contains(&ch) {
                return Err(BuildError::InvalidChar(ch).into());
            }
            let number = decode_varint(data, pos, ch, MIN_ONEOF_FIELD, MAX_ONEOF_FIELD)?;
            let idx = self
                .find(number)
                .ok_or(BuildError::OneofNoSuchField(number))?;
            if self.presence[idx] != Presence::Hasbit {
                return Err(BuildError::OneofBadField(number).into());
            }
            self.presence[idx] = Presence::Oneof;
            current.push(idx);
        }
        if current.is_empty() {
            return Err(BuildError::EmptyOneof.into());
        }
        self.oneofs.push(current);
        Ok(())
    }

    /// Parse a field list; `extension` stops after one field and rejects
    /// message modifiers and oneofs
    pub(super) fn parse(data: &[u8], platform: Platform, extension: bool) -> Result<Self> {
        let mut p = Parsed::new();
        let mut last_number = 0u32;
        let mut pos = 0;
        while let Some(&ch) = data.get(pos) {
            pos += 1;
            if ch <= MAX_FIELD {
                if extension && !p.fields.is_empty() {
                    return Err(BuildError::ExtensionFieldCount.into());
                }
                last_number = last_number
                    .checked_add(1)
                    .ok_or(BuildError::FieldNumberRegression(last_number))?;
                p.push_field(ch, last_number, platform)?;
            } else if (MIN_MODIFIER..=MAX_MODIFIER).contains(&ch) {
                let modifiers = decode_varint(data, &mut pos, ch, MIN_MODIFIER, MAX_MODIFIER)?;
                if p.fields.is_empty() {
                    if extension {
                        return Err(BuildError::ExtensionModifiers.into());
                    }
                    p.msg_mod = modifiers;
                } else {
                    let last = p.fields.len() - 1;
                    p.modify_field(last, modifiers)?;
                }
            } else if ch == END {
                if extension {
                    return Err(BuildError::ExtensionModifiers.into());
                }
                p.parse_oneofs(data, &mut pos)?;
            } else if (MIN_SKIP..=MAX_SKIP).contains(&ch) {
                if p.dense_below.is_none() {
                    p.dense_below = Some(p.fields.len());
                }
                let skip = decode_varint(data, &mut pos, ch, MIN_SKIP, MAX_SKIP)?;
                if skip == 0 {
                    return Err(BuildError::FieldNumberRegression(last_number).into());
                }
                last_number = last_number
                    .checked_add(skip - 1)
                    .ok_or(BuildError::FieldNumberRegression(last_number))?;
            } else {
                return Err(BuildError::InvalidChar(ch).into());
            }
        }
        Ok(p)
    }

    /// Assign sub slots: messages first, then closed enums
    pub(super) fn assign_subs(&mut self) -> Vec<Sub> {
        let mut subs = Vec::new();
        for (field, kind) in self.fields.iter_mut().zip(&self.sub_kind) {
            if *kind == SubKind::Message {
                field.submsg_index = subs.len() as u16;
                subs.push(Sub::Message(OnceRef::new()));
            }
        }
        for (field, kind) in self.fields.iter_mut().zip(&self.sub_kind) {
            if *kind == SubKind::Enum {
                field.submsg_index = subs.len() as u16;
                subs.push(Sub::Enum(OnceRef::new()));
            }
        }
        subs
    }

    /// Hand out hasbits, required fields first; returns (required count,
    /// hasbit bytes)
    fn assign_hasbits(&mut self) -> Result<(u8, usize)> {
        let mut last = 0i32;
        for (field, presence) in self.fields.iter_mut().zip(&self.presence) {
            match presence {
                Presence::Required => {
                    last += 1;
                    field.presence = last;
                }
                Presence::None => field.presence = 0,
                _ => {}
            }
        }
        if last > 64 {
            return Err(BuildError::TooManyRequired.into());
        }
        let required = last as u8;
        for (field, presence) in self.fields.iter_mut().zip(&self.presence) {
            if *presence == Presence::Hasbit {
                last += 1;
                field.presence = last;
            }
        }
        let bytes = if last > 0 {
            (last as usize + 1).div_ceil(8)
        } else {
            0
        };
        Ok((required, bytes))
    }
}

fn place(size: &mut usize, rep: FieldRep, platform: Platform) -> Result<u16> {
    let align = rep.align(platform);
    let at = (*size + align - 1) & !(align - 1);
    let end = at + rep.size(platform);
    if end > u16::MAX as usize {
        return Err(BuildError::MessageSizeExceeded.into());
    }
    *size = end;
    Ok(at as u16)
}

fn layout(p: &mut Parsed, start: usize, platform: Platform) -> Result<u16> {
    let mut items = Vec::with_capacity(p.fields.len() + 2 * p.oneofs.len());
    for (i, oneof) in p.oneofs.iter().enumerate() {
        let mut rep = FieldRep::OneByte;
        for &idx in oneof {
            let r = p.fields[idx].rep();
            if r.size(platform) > rep.size(platform) {
                rep = r;
            }
        }
        items.push(LayoutItem {
            rep,
            ty: ItemType::OneofField,
            index: i,
        });
        items.push(LayoutItem {
            rep: FieldRep::FourByte,
            ty: ItemType::OneofCase,
            index: i,
        });
    }
    for (i, presence) in p.presence.iter().enumerate() {
        if *presence != Presence::Oneof {
            items.push(LayoutItem {
                rep: p.fields[i].rep(),
                ty: ItemType::Field,
                index: i,
            });
        }
    }
    items.sort_unstable();

    let mut size = start;
    for item in &items {
        let offset = place(&mut size, item.rep, platform)?;
        match item.ty {
            ItemType::Field => p.fields[item.index].offset = offset,
            ItemType::OneofField => {
                for &idx in &p.oneofs[item.index] {
                    p.fields[idx].offset = offset;
                }
            }
            ItemType::OneofCase => {
                for &idx in &p.oneofs[item.index] {
                    p.fields[idx].presence = !(offset as i32);
                }
            }
        }
    }
    let size = (size + 7) & !7;
    if size > u16::MAX as usize {
        return Err(BuildError::MessageSizeExceeded.into());
    }
    Ok(size as u16)
}

fn check_map_field(field: &MiniTableField, number: u32) -> Result<()> {
    if field.number != number || !field.is_scalar() {
        return Err(BuildError::MapBadField(field.number).into());
    }
    let bad = if number == 1 {
        matches!(
            field.field_type(),
            FieldType::Float
                | FieldType::Double
                | FieldType::Message
                | FieldType::Group
                | FieldType::Bytes
                | FieldType::Enum
        )
    } else {
        field.field_type() == FieldType::Group
    };
    if bad {
        return Err(BuildError::MapBadField(number).into());
    }
    Ok(())
}

impl MiniTable {
    /// Build a table from a message, map-entry or MessageSet descriptor
    ///
    /// The empty descriptor yields an empty table. Sub-message and enum
    /// slots start unlinked; see [`MiniTable::link`].
    ///
    /// ```
    /// use minipb::mini_table::{MiniTable, Platform};
    ///
    /// let t = MiniTable::build(b"$(", Platform::Bit64)?;
    /// assert_eq!(t.field_count(), 1);
    /// assert_eq!(t.size(), 8);
    /// # Ok::<(), minipb::Error>(())
    /// ```
    pub fn build(data: &[u8], platform: Platform) -> Result<MiniTable> {
        let result = Self::build_inner(data, platform);
        if let Err(e) = &result {
            debug!("mini-table build failed: {:?}", e);
        }
        result
    }

    fn build_inner(data: &[u8], platform: Platform) -> Result<MiniTable> {
        let Some((&version, body)) = data.split_first() else {
            return Ok(MiniTable::empty(platform));
        };
        match version {
            VERSION_MESSAGE => Self::build_message(body, platform),
            VERSION_MAP => Self::build_map(body, platform),
            VERSION_MESSAGE_SET => {
                if !body.is_empty() {
                    return Err(BuildError::MessageSetNotEmpty.into());
                }
                let mut t = MiniTable::empty(platform);
                t.ext = ExtMode::IsMessageSet;
                Ok(t)
            }
            other => Err(BuildError::InvalidVersion(other).into()),
        }
    }

    fn build_message(body: &[u8], platform: Platform) -> Result<MiniTable> {
        let mut p = Parsed::parse(body, platform, false)?;
        let subs = p.assign_subs();
        let (required_count, hasbit_bytes) = p.assign_hasbits()?;
        let size = layout(&mut p, hasbit_bytes, platform)?;

        let mut t = MiniTable::empty(platform);
        t.dense_below = p.dense_below.unwrap_or(p.fields.len());
        t.fields = p.fields;
        t.subs = subs;
        t.size = size;
        t.required_count = required_count;
        if p.msg_mod & message_modifier::IS_EXTENDABLE != 0 {
            t.ext = ExtMode::Extendable;
        }
        if platform == Platform::Bit64 {
            fast::build_fast_table(&mut t);
        }
        Ok(t)
    }

    fn build_map(body: &[u8], platform: Platform) -> Result<MiniTable> {
        let mut p = Parsed::parse(body, platform, false)?;
        if p.fields.len() != 2 {
            return Err(BuildError::MapFieldCount(p.fields.len()).into());
        }
        if !p.oneofs.is_empty() {
            return Err(BuildError::MapOneof.into());
        }
        check_map_field(&p.fields[0], 1)?;
        check_map_field(&p.fields[1], 2)?;
        let subs = p.assign_subs();

        let kv = FieldRep::StringView.size(platform);
        for (i, field) in p.fields.iter_mut().enumerate() {
            field.offset = (i * kv) as u16;
            field.presence = 0;
        }
        let mut t = MiniTable::empty(platform);
        t.dense_below = 2;
        t.fields = p.fields;
        t.subs = subs;
        t.size = (2 * kv) as u16;
        t.ext = ExtMode::IsMapEntry;
        Ok(t)
    }

    /// Build the entry table of a `map<key_type, value_type>` field
    pub fn build_map_entry(
        key_type: FieldType,
        value_type: FieldType,
        value_is_proto3_enum: bool,
        platform: Platform,
    ) -> Result<MiniTable> {
        let mut e = MtDataEncoder::new();
        let value_mod = if value_type == FieldType::Enum && !value_is_proto3_enum {
            field_modifier::IS_CLOSED_ENUM
        } else {
            0
        };
        let key_mod = if key_type == FieldType::String {
            field_modifier::VALIDATE_UTF8
        } else {
            0
        };
        let value_mod = if value_type == FieldType::String {
            value_mod | field_modifier::VALIDATE_UTF8
        } else {
            value_mod
        };
        e.encode_map(key_type, value_type, key_mod, value_mod)?;
        Self::build(e.as_bytes(), platform)
    }

    /// Build an empty MessageSet table
    pub fn build_message_set(platform: Platform) -> MiniTable {
        let mut t = MiniTable::empty(platform);
        t.ext = ExtMode::IsMessageSet;
        t
    }
}
