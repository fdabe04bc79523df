//! Map fields
//!
//! A map is an 8-byte header in the arena holding the key and value sizes,
//! plus a [`StrTable`](crate::hash::StrTable) kept beside the arena blocks
//! and keyed by the header's address. Keys are stored as bytes: scalar keys
//! as their little-endian value truncated to `key_size`, string keys as-is
//! (`key_size == 0`). Scalar values are stored inline as raw bits; string
//! values (`val_size == 0`) are stored as a pointer to a 16-byte view slot
//! in the arena, which an update overwrites in place.

use super::value::{read_view, write_view, StringView};
use super::Message;
use crate::arena::{Arena, ArenaPtr};
use crate::error::{Error, Result};
use crate::mini_table::{FieldType, MiniTable};
use alloc::vec::Vec;

/// A map key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum MapKey<'a> {
    Bool(bool),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    /// String or bytes key
    Str(&'a [u8]),
}

impl<'a> MapKey<'a> {
    /// Stored form of the key for a map with `key_size`-byte keys
    pub fn to_bytes(&self, key_size: usize) -> Vec<u8> {
        let wide = match *self {
            MapKey::Str(s) => return s.to_vec(),
            MapKey::Bool(b) => b as u64,
            MapKey::I32(v) => v as i64 as u64,
            MapKey::U32(v) => v as u64,
            MapKey::I64(v) => v as u64,
            MapKey::U64(v) => v,
        };
        wide.to_le_bytes()[..key_size.min(8)].to_vec()
    }

    /// Interpret stored key bytes as a key of type `ty`
    pub fn from_bytes(bytes: &'a [u8], ty: FieldType) -> MapKey<'a> {
        if ty.is_string_like() {
            return MapKey::Str(bytes);
        }
        let mut wide = [0u8; 8];
        let n = bytes.len().min(8);
        wide[..n].copy_from_slice(&bytes[..n]);
        let bits = u64::from_le_bytes(wide);
        match ty {
            FieldType::Bool => MapKey::Bool(bits != 0),
            FieldType::Int32 | FieldType::SInt32 | FieldType::SFixed32 | FieldType::Enum => {
                MapKey::I32(bits as u32 as i32)
            }
            FieldType::UInt32 | FieldType::Fixed32 => MapKey::U32(bits as u32),
            FieldType::Int64 | FieldType::SInt64 | FieldType::SFixed64 => MapKey::I64(bits as i64),
            _ => MapKey::U64(bits),
        }
    }
}

/// A map value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapValue {
    /// Scalar bits, or the pointer of a message value
    Raw(u64),
    /// String or bytes value
    String(StringView),
}

/// Outcome of [`Map::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapInsertStatus {
    /// The key was new
    Inserted,
    /// The key existed and its value was overwritten
    Replaced,
}

/// Handle to a map field
#[derive(Clone)]
pub struct Map {
    arena: Arena,
    ptr: ArenaPtr,
}

impl core::fmt::Debug for Map {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Map")
            .field("len", &self.len())
            .field("key_size", &self.key_size())
            .field("val_size", &self.val_size())
            .finish()
    }
}

impl Map {
    /// Create an empty map; a size of 0 means string keys or values
    pub fn new(arena: &Arena, key_size: u8, val_size: u8) -> Result<Map> {
        let ptr = arena.malloc(8)?;
        arena.write_bytes(ptr, &[key_size, val_size]);
        arena.register_map(ptr);
        Ok(Map {
            arena: arena.clone(),
            ptr,
        })
    }

    pub(crate) fn from_raw(arena: Arena, ptr: ArenaPtr) -> Map {
        Map { arena, ptr }
    }

    pub(crate) fn ptr(&self) -> ArenaPtr {
        self.ptr
    }

    /// Arena holding the map
    #[inline]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Stored key width; 0 for string keys
    #[inline]
    pub fn key_size(&self) -> usize {
        self.arena.read_u8(self.ptr) as usize
    }

    /// Stored value width; 0 for string values
    #[inline]
    pub fn val_size(&self) -> usize {
        self.arena.read_u8(self.ptr.add(1)) as usize
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.arena.with_map(self.ptr, |t| t.len()).unwrap_or(0)
    }

    /// True when the map holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup_raw(&self, key: &[u8]) -> Option<u64> {
        self.arena
            .with_map(self.ptr, |t| t.lookup(key).copied())
            .flatten()
    }

    fn value_of(&self, raw: u64) -> MapValue {
        if self.val_size() == 0 {
            MapValue::String(read_view(&self.arena, ArenaPtr::from_raw(raw)))
        } else {
            MapValue::Raw(raw)
        }
    }

    /// Value stored under `key`
    pub fn get(&self, key: MapKey<'_>) -> Option<MapValue> {
        let raw = self.lookup_raw(&key.to_bytes(self.key_size()))?;
        Some(self.value_of(raw))
    }

    /// Message value stored under `key`
    pub fn get_message(&self, key: MapKey<'_>, table: &'static MiniTable) -> Option<Message> {
        match self.get(key)? {
            MapValue::Raw(raw) if raw != 0 => Some(Message::from_raw(
                self.arena.clone(),
                ArenaPtr::from_raw(raw),
                table,
            )),
            _ => None,
        }
    }

    /// Insert or overwrite the value under `key`
    ///
    /// String-valued maps take [`MapValue::String`], all others
    /// [`MapValue::Raw`]; a mismatch is rejected with `Malformed`. A string
    /// view into an unfused arena is rejected with `ForeignArena`. Message
    /// values are raw pointers and must come from this arena or one fused
    /// with it; reading a foreign one back panics.
    pub fn insert(&self, key: MapKey<'_>, value: MapValue) -> Result<MapInsertStatus> {
        self.insert_raw(&key.to_bytes(self.key_size()), value)
    }

    pub(crate) fn insert_raw(&self, key: &[u8], value: MapValue) -> Result<MapInsertStatus> {
        match (value, self.val_size()) {
            (MapValue::String(view), 0) => {
                if !self.arena.owns(view.data, view.len) {
                    return Err(Error::ForeignArena);
                }
                if let Some(slot) = self.lookup_raw(key) {
                    write_view(&self.arena, ArenaPtr::from_raw(slot), view);
                    return Ok(MapInsertStatus::Replaced);
                }
                let slot = self.arena.malloc(StringView::SIZE)?;
                write_view(&self.arena, slot, view);
                self.put(key, slot.to_raw())
            }
            (MapValue::Raw(bits), n) if n > 0 => self.put(key, bits),
            _ => Err(Error::Malformed),
        }
    }

    fn put(&self, key: &[u8], raw: u64) -> Result<MapInsertStatus> {
        self.arena
            .with_map(self.ptr, |t| match t.get_mut(key) {
                Some(v) => {
                    *v = raw;
                    MapInsertStatus::Replaced
                }
                None => {
                    t.insert(key, raw);
                    MapInsertStatus::Inserted
                }
            })
            .ok_or(Error::OutOfMemory)
    }

    /// Remove `key`; true if it was present
    pub fn delete(&self, key: MapKey<'_>) -> bool {
        let key = key.to_bytes(self.key_size());
        self.arena
            .with_map(self.ptr, |t| t.remove(&key).is_some())
            .unwrap_or(false)
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.arena.with_map(self.ptr, |t| t.clear());
    }

    /// Stored key bytes and values, in table order
    pub fn entries(&self) -> Vec<(Vec<u8>, MapValue)> {
        let raw: Vec<(Vec<u8>, u64)> = self
            .arena
            .with_map(self.ptr, |t| t.iter().map(|(k, v)| (k.to_vec(), *v)).collect())
            .unwrap_or_default();
        raw.into_iter()
            .map(|(k, v)| (k, self.value_of(v)))
            .collect()
    }

    /// Iterate entries in table order
    pub fn iter(&self) -> impl Iterator<Item = (Vec<u8>, MapValue)> {
        self.entries().into_iter()
    }

    /// Entries ordered by key, reading keys as `key_type`
    pub fn sorted_entries(&self, key_type: FieldType) -> Vec<(Vec<u8>, MapValue)> {
        let mut entries = self.entries();
        entries.sort_by(|a, b| {
            MapKey::from_bytes(&a.0, key_type).cmp(&MapKey::from_bytes(&b.0, key_type))
        });
        entries
    }
}
