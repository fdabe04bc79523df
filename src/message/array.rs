//! Repeated-field storage
//!
//! An array is a 24-byte header in the arena:
//!
//! ```text
//! +0   data pointer | lg2(element size)   (low 3 bits)
//! +8   length
//! +16  capacity
//! ```
//!
//! Elements are `1 << lg2` bytes each: scalars hold their raw bits, string
//! elements are 16-byte views and message elements are 8-byte pointers.

use super::value::{read_ptr, read_view, write_view, StringView};
use super::Message;
use crate::arena::{Arena, ArenaPtr};
use crate::error::{Error, Result};
use crate::mini_table::MiniTable;
use alloc::vec::Vec;

const HEADER_SIZE: usize = 24;
const MIN_CAPACITY: usize = 4;

/// Handle to a repeated field
#[derive(Clone)]
pub struct Array {
    arena: Arena,
    ptr: ArenaPtr,
}

impl core::fmt::Debug for Array {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Array")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("elem_size", &self.elem_size())
            .finish()
    }
}

impl Array {
    /// Create an empty array of `1 << lg2`-byte elements
    pub fn new(arena: &Arena, lg2: u8) -> Result<Array> {
        debug_assert!(lg2 <= 4);
        let ptr = arena.malloc(HEADER_SIZE)?;
        arena.write_u64(ptr, lg2 as u64);
        Ok(Array {
            arena: arena.clone(),
            ptr,
        })
    }

    pub(crate) fn from_raw(arena: Arena, ptr: ArenaPtr) -> Array {
        Array { arena, ptr }
    }

    pub(crate) fn ptr(&self) -> ArenaPtr {
        self.ptr
    }

    /// Arena holding the elements
    #[inline]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    #[inline]
    fn tagged(&self) -> u64 {
        self.arena.read_u64(self.ptr)
    }

    #[inline]
    fn data(&self) -> ArenaPtr {
        ArenaPtr::from_raw(self.tagged() & !7)
    }

    /// log2 of the element size
    #[inline]
    pub fn lg2(&self) -> u8 {
        (self.tagged() & 7) as u8
    }

    /// Element size in bytes
    #[inline]
    pub fn elem_size(&self) -> usize {
        1 << self.lg2()
    }

    /// Number of elements
    #[inline]
    pub fn len(&self) -> usize {
        self.arena.read_u64(self.ptr.add(8)) as usize
    }

    /// True when the array holds no elements
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements that fit without reallocating
    #[inline]
    pub fn capacity(&self) -> usize {
        self.arena.read_u64(self.ptr.add(16)) as usize
    }

    #[inline]
    fn set_len(&self, len: usize) {
        self.arena.write_u64(self.ptr.add(8), len as u64);
    }

    #[inline]
    fn elem(&self, i: usize) -> ArenaPtr {
        self.data().add(i << self.lg2())
    }

    /// Ensure room for at least `min` elements, doubling as needed
    pub fn reserve(&self, min: usize) -> Result<()> {
        let cap = self.capacity();
        if min <= cap {
            return Ok(());
        }
        let mut new_cap = cap.max(MIN_CAPACITY);
        while new_cap < min {
            new_cap = new_cap.checked_mul(2).ok_or(Error::OutOfMemory)?;
        }
        let lg2 = self.lg2();
        let bytes = new_cap
            .checked_mul(1 << lg2)
            .ok_or(Error::OutOfMemory)?;
        let data = self.arena.realloc(self.data(), cap << lg2, bytes)?;
        self.arena.write_u64(self.ptr, data.to_raw() | lg2 as u64);
        self.arena.write_u64(self.ptr.add(16), new_cap as u64);
        Ok(())
    }

    /// Raw bits of element `i` (element size at most 8)
    pub fn get(&self, i: usize) -> Option<u64> {
        if i >= self.len() {
            return None;
        }
        let at = self.elem(i);
        Some(match self.lg2() {
            0 => self.arena.read_u8(at) as u64,
            1 => u16::from_le_bytes(self.arena.read(at)) as u64,
            2 => self.arena.read_u32(at) as u64,
            _ => self.arena.read_u64(at),
        })
    }

    /// Overwrite element `i` with raw bits; false if out of range
    pub fn set(&self, i: usize, bits: u64) -> bool {
        if i >= self.len() {
            return false;
        }
        let at = self.elem(i);
        match self.lg2() {
            0 => self.arena.write_u8(at, bits as u8),
            1 => self.arena.write_bytes(at, &(bits as u16).to_le_bytes()),
            2 => self.arena.write_u32(at, bits as u32),
            _ => self.arena.write_u64(at, bits),
        }
        true
    }

    /// Element `i` as bool
    pub fn get_bool(&self, i: usize) -> Option<bool> {
        self.get(i).map(|v| v != 0)
    }

    /// Element `i` as i32
    pub fn get_i32(&self, i: usize) -> Option<i32> {
        self.get(i).map(|v| v as u32 as i32)
    }

    /// Element `i` as u32
    pub fn get_u32(&self, i: usize) -> Option<u32> {
        self.get(i).map(|v| v as u32)
    }

    /// Element `i` as i64
    pub fn get_i64(&self, i: usize) -> Option<i64> {
        self.get(i).map(|v| v as i64)
    }

    /// Element `i` as u64
    pub fn get_u64(&self, i: usize) -> Option<u64> {
        self.get(i)
    }

    /// Element `i` as f32
    pub fn get_f32(&self, i: usize) -> Option<f32> {
        self.get(i).map(|v| f32::from_bits(v as u32))
    }

    /// Element `i` as f64
    pub fn get_f64(&self, i: usize) -> Option<f64> {
        self.get(i).map(f64::from_bits)
    }

    /// Append raw bits
    pub fn append(&self, bits: u64) -> Result<()> {
        let len = self.len();
        self.reserve(len + 1)?;
        self.set_len(len + 1);
        self.set(len, bits);
        Ok(())
    }

    /// Append many raw elements stored little-endian in `data`
    pub(crate) fn append_raw(&self, data: &[u8]) -> Result<()> {
        let count = data.len() >> self.lg2();
        if count == 0 {
            return Ok(());
        }
        let len = self.len();
        self.reserve(len + count)?;
        self.arena.write_bytes(self.elem(len), data);
        self.set_len(len + count);
        Ok(())
    }

    /// View element `i` of a string or bytes array
    pub fn get_string_view(&self, i: usize) -> Option<StringView> {
        (i < self.len() && self.lg2() == 4).then(|| read_view(&self.arena, self.elem(i)))
    }

    /// Copy element `i` of a string or bytes array
    pub fn get_bytes(&self, i: usize) -> Option<Vec<u8>> {
        self.get_string_view(i).map(|v| v.to_vec(&self.arena))
    }

    /// Overwrite element `i` of a string or bytes array
    ///
    /// Returns false if `i` is out of range or `view` lies outside this
    /// array's arena.
    pub fn set_string_view(&self, i: usize, view: StringView) -> bool {
        if i >= self.len() || self.lg2() != 4 || !self.arena.owns(view.data, view.len) {
            return false;
        }
        write_view(&self.arena, self.elem(i), view);
        true
    }

    /// Append a view to a string or bytes array
    ///
    /// A view into an unfused arena is rejected with `ForeignArena`.
    pub fn append_string_view(&self, view: StringView) -> Result<()> {
        if !self.arena.owns(view.data, view.len) {
            return Err(Error::ForeignArena);
        }
        let len = self.len();
        self.reserve(len + 1)?;
        self.set_len(len + 1);
        write_view(&self.arena, self.elem(len), view);
        Ok(())
    }

    /// Copy `data` into the arena and append it
    pub fn append_bytes(&self, data: &[u8]) -> Result<()> {
        let view = StringView::copy_from(&self.arena, data)?;
        self.append_string_view(view)
    }

    /// Element `i` of a message array
    pub fn get_message(&self, i: usize, table: &'static MiniTable) -> Option<Message> {
        if i >= self.len() {
            return None;
        }
        let ptr = read_ptr(&self.arena, self.elem(i));
        (!ptr.is_null()).then(|| Message::from_raw(self.arena.clone(), ptr, table))
    }

    /// Create a message of type `table` and append it
    pub fn append_new_message(&self, table: &'static MiniTable) -> Result<Message> {
        let msg = Message::new(table, &self.arena)?;
        self.append(msg.ptr().to_raw())?;
        Ok(msg)
    }

    /// Open a zeroed gap of `count` elements at `i`
    pub fn insert(&self, i: usize, count: usize) -> Result<bool> {
        let len = self.len();
        if i > len {
            return Ok(false);
        }
        self.reserve(len + count)?;
        let lg2 = self.lg2();
        self.arena
            .copy(self.elem(i), self.elem(i + count), (len - i) << lg2);
        self.arena.fill_zero(self.elem(i), count << lg2);
        self.set_len(len + count);
        Ok(true)
    }

    /// Remove `count` elements starting at `i`
    pub fn delete(&self, i: usize, count: usize) -> bool {
        let len = self.len();
        if i.checked_add(count).map_or(true, |end| end > len) {
            return false;
        }
        let lg2 = self.lg2();
        self.arena
            .copy(self.elem(i + count), self.elem(i), (len - i - count) << lg2);
        self.set_len(len - count);
        true
    }

    /// Set the length to `len`, zeroing any new elements
    pub fn resize(&self, len: usize) -> Result<()> {
        let old = self.len();
        if len > old {
            self.reserve(len)?;
            self.arena
                .fill_zero(self.elem(old), (len - old) << self.lg2());
        }
        self.set_len(len);
        Ok(())
    }
}
