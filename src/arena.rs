//! Region allocator backing every message
//!
//! An [`Arena`] hands out 8-aligned, zero-filled byte ranges from a chain of
//! blocks. Memory is never freed individually: blocks, cleanup hooks and the
//! side tables used by maps and extensions all live until the last handle to
//! the arena (or to any arena fused with it) is dropped.
//!
//! Allocations are addressed by [`ArenaPtr`], a copyable handle naming a
//! block and an offset. All reads and writes go through the arena, so a
//! message blob is plain bytes plus typed accessors. Reading or writing
//! through a pointer that neither this arena nor one fused with it handed
//! out panics; [`Arena::owns`] checks a pointer up front.

use crate::error::{Error, Result};
use crate::hash::{IntTable, StrTable};
use crate::mini_table::MiniTableExtension;
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};
use log::{debug, trace};

/// Alignment of every allocation
pub const MALLOC_ALIGN: usize = 8;

static NEXT_BLOCK_ID: AtomicU32 = AtomicU32::new(1);

/// Largest block; offsets inside an [`ArenaPtr`] are 32 bits
const MAX_BLOCK: usize = u32::MAX as usize;

#[inline]
const fn align_up(n: usize) -> usize {
    (n + MALLOC_ALIGN - 1) & !(MALLOC_ALIGN - 1)
}

#[inline]
fn checked_align_up(n: usize) -> Result<usize> {
    n.checked_add(MALLOC_ALIGN - 1)
        .map(|v| v & !(MALLOC_ALIGN - 1))
        .ok_or(Error::OutOfMemory)
}

/// Handle to a byte range inside an arena block
///
/// The high 32 bits name the block, the low 32 bits are a byte offset.
/// Block ids are unique per process and never zero, so the all-zero value
/// is a null pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ArenaPtr(u64);

impl ArenaPtr {
    /// The null pointer
    pub const NULL: ArenaPtr = ArenaPtr(0);

    #[inline]
    const fn new(block: u32, offset: u32) -> Self {
        ArenaPtr(((block as u64) << 32) | offset as u64)
    }

    /// Rebuild a pointer from [`ArenaPtr::to_raw`]
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        ArenaPtr(raw)
    }

    /// Raw representation, as stored inside message blobs
    #[inline]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// True for the null pointer
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    const fn block(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    const fn offset(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    /// Pointer `n` bytes further into the same block
    #[inline]
    pub const fn add(self, n: usize) -> Self {
        ArenaPtr(self.0 + n as u64)
    }

    /// Pointer `n` bytes earlier in the same block
    #[inline]
    pub const fn sub(self, n: usize) -> Self {
        ArenaPtr(self.0 - n as u64)
    }
}

/// Block sizing and allocation limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaOptions {
    /// Size of the first block
    pub initial_block_size: usize,
    /// Largest growth step for later blocks
    pub max_block_size: usize,
    /// Total bytes the arena may reserve; `None` means unbounded
    pub limit: Option<usize>,
}

impl Default for ArenaOptions {
    fn default() -> Self {
        Self {
            initial_block_size: 256,
            max_block_size: 1 << 20,
            limit: None,
        }
    }
}

impl ArenaOptions {
    /// Cap the total bytes the arena may reserve
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

struct Block {
    id: u32,
    data: Vec<u8>,
}

type Cleanup = Box<dyn FnOnce()>;

struct Heap {
    blocks: Vec<Block>,
    /// Block id currently bumped from, and its bump offset
    head: Option<(u32, usize)>,
    /// Most recent allocation, for in-place realloc and shrink
    last: Option<(ArenaPtr, usize)>,
    last_block_size: usize,
    allocated: usize,
    options: ArenaOptions,
    seeded: bool,
    cleanups: Vec<Cleanup>,
    extensions: IntTable<&'static MiniTableExtension>,
    maps: IntTable<StrTable<u64>>,
}

impl Heap {
    fn new(options: ArenaOptions) -> Self {
        Self {
            blocks: Vec::new(),
            head: None,
            last: None,
            last_block_size: 0,
            allocated: 0,
            options,
            seeded: false,
            cleanups: Vec::new(),
            extensions: IntTable::new(),
            maps: IntTable::new(),
        }
    }

    fn block_index(&self, id: u32) -> usize {
        match self.blocks.binary_search_by_key(&id, |b| b.id) {
            Ok(i) => i,
            Err(_) => panic!("arena pointer does not belong to this arena"),
        }
    }

    fn slice(&self, ptr: ArenaPtr, len: usize) -> &[u8] {
        let block = &self.blocks[self.block_index(ptr.block())];
        &block.data[ptr.offset()..ptr.offset() + len]
    }

    fn slice_mut(&mut self, ptr: ArenaPtr, len: usize) -> &mut [u8] {
        let idx = self.block_index(ptr.block());
        &mut self.blocks[idx].data[ptr.offset()..ptr.offset() + len]
    }

    fn reserve_block(&mut self, size: usize) -> Result<u32> {
        if size > MAX_BLOCK {
            debug!("arena block of {} bytes exceeds {}", size, MAX_BLOCK);
            return Err(Error::OutOfMemory);
        }
        if let Some(limit) = self.options.limit {
            if self.allocated.saturating_add(size) > limit {
                debug!(
                    "arena limit reached: {} + {} > {}",
                    self.allocated, size, limit
                );
                return Err(Error::OutOfMemory);
            }
        }
        let mut data = Vec::new();
        if data.try_reserve_exact(size).is_err() {
            debug!("arena block of {} bytes could not be allocated", size);
            return Err(Error::OutOfMemory);
        }
        data.resize(size, 0);
        let id = NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed);
        self.allocated += size;
        // Ids grow monotonically, so pushing keeps `blocks` sorted.
        self.blocks.push(Block { id, data });
        Ok(id)
    }

    fn new_head(&mut self, n: usize) -> Result<()> {
        let step = if self.last_block_size == 0 {
            self.options.initial_block_size
        } else {
            (self.last_block_size * 3 / 2).min(self.options.max_block_size)
        };
        let size = checked_align_up(n.max(step))?;
        let id = self.reserve_block(size)?;
        trace!("arena block {} of {} bytes", id, size);
        self.last_block_size = size;
        self.head = Some((id, 0));
        Ok(())
    }

    fn head_room(&self) -> usize {
        match self.head {
            Some((id, bump)) => self.blocks[self.block_index(id)].data.len() - bump,
            None => 0,
        }
    }

    fn malloc(&mut self, n: usize) -> Result<ArenaPtr> {
        if n == 0 {
            return Ok(ArenaPtr::NULL);
        }
        let size = checked_align_up(n)?;
        if self.head_room() < size {
            self.new_head(size)?;
        }
        let (id, bump) = self.head.ok_or(Error::OutOfMemory)?;
        let ptr = ArenaPtr::new(id, bump as u32);
        self.head = Some((id, bump + size));
        self.last = Some((ptr, n));
        Ok(ptr)
    }

    fn is_last(&self, ptr: ArenaPtr, len: usize) -> bool {
        self.last == Some((ptr, len))
    }

    fn shrink_last(&mut self, ptr: ArenaPtr, old: usize, new: usize) {
        if !self.is_last(ptr, old) || new > old {
            return;
        }
        self.slice_mut(ptr.add(new), old - new).fill(0);
        if let Some((id, _)) = self.head {
            self.head = Some((id, ptr.offset() + align_up(new)));
        }
        self.last = Some((ptr, new));
    }
}

enum State {
    Root(Heap),
    Fused(Rc<Node>),
}

struct Node {
    state: RefCell<State>,
}

impl Drop for Node {
    fn drop(&mut self) {
        if let State::Root(heap) = self.state.get_mut() {
            if !heap.cleanups.is_empty() {
                trace!("running {} arena cleanups", heap.cleanups.len());
            }
            while let Some(cleanup) = heap.cleanups.pop() {
                cleanup();
            }
        }
    }
}

/// Handle to an arena
///
/// Cloning the handle is cheap and shares the arena. Memory is released when
/// the last handle to the arena and to every arena fused with it is dropped.
///
/// Byte accessors panic when handed a pointer that was not allocated from
/// this arena (or one fused with it).
#[derive(Clone)]
pub struct Arena {
    node: Rc<Node>,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Arena {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arena")
            .field("space_allocated", &self.space_allocated())
            .finish()
    }
}

impl Arena {
    /// Create an empty arena with default block sizing
    pub fn new() -> Self {
        Self::with_options(ArenaOptions::default())
    }

    /// Create an empty arena with explicit block sizing and limits
    pub fn with_options(options: ArenaOptions) -> Self {
        Self::from_heap(Heap::new(options))
    }

    /// Create an arena whose first block is the caller-supplied buffer
    ///
    /// The buffer is cleared and used before any block is reserved. Arenas
    /// created this way cannot be fused.
    pub fn init(mut buffer: Vec<u8>, options: ArenaOptions) -> Self {
        let mut heap = Heap::new(options);
        heap.seeded = true;
        buffer.fill(0);
        let len = buffer.len().min(MAX_BLOCK) & !(MALLOC_ALIGN - 1);
        buffer.truncate(len);
        if len > 0 {
            let id = NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed);
            heap.blocks.push(Block { id, data: buffer });
            heap.head = Some((id, 0));
            heap.last_block_size = len;
        }
        Self::from_heap(heap)
    }

    fn from_heap(heap: Heap) -> Self {
        Self {
            node: Rc::new(Node {
                state: RefCell::new(State::Root(heap)),
            }),
        }
    }

    fn root(&self) -> Rc<Node> {
        let mut node = self.node.clone();
        loop {
            let parent = match &*node.state.borrow() {
                State::Fused(parent) => parent.clone(),
                State::Root(_) => return node.clone(),
            };
            node = parent;
        }
    }

    fn with_heap<R>(&self, f: impl FnOnce(&mut Heap) -> R) -> R {
        let root = self.root();
        let mut state = root.state.borrow_mut();
        match &mut *state {
            State::Root(heap) => f(heap),
            State::Fused(_) => unreachable!("root() returned a fused node"),
        }
    }

    /// Allocate `n` zeroed bytes aligned to 8
    pub fn malloc(&self, n: usize) -> Result<ArenaPtr> {
        self.with_heap(|h| h.malloc(n))
    }

    /// Grow or shrink an allocation, preserving its leading bytes
    ///
    /// The most recent allocation is resized in place when the head block
    /// has room; anything else is copied to a fresh allocation.
    pub fn realloc(&self, ptr: ArenaPtr, old: usize, new: usize) -> Result<ArenaPtr> {
        if ptr.is_null() {
            return self.malloc(new);
        }
        self.with_heap(|h| {
            if new <= old {
                h.shrink_last(ptr, old, new);
                return Ok(ptr);
            }
            if h.is_last(ptr, old) {
                if let Some((id, _)) = h.head {
                    let block_len = h.blocks[h.block_index(id)].data.len();
                    let end = ptr.offset().saturating_add(checked_align_up(new)?);
                    if id == ptr.block() && end <= block_len {
                        h.head = Some((id, end));
                        h.last = Some((ptr, new));
                        return Ok(ptr);
                    }
                }
            }
            let fresh = h.malloc(new)?;
            let bytes = h.slice(ptr, old).to_vec();
            h.slice_mut(fresh, old).copy_from_slice(&bytes);
            Ok(fresh)
        })
    }

    /// Return the tail of the most recent allocation to the arena
    pub fn shrink_last(&self, ptr: ArenaPtr, old: usize, new: usize) {
        self.with_heap(|h| h.shrink_last(ptr, old, new))
    }

    /// Copy `data` into a dedicated block and return its start
    ///
    /// Later allocations never share the block, so sub-ranges of it can be
    /// referenced for the lifetime of the arena.
    pub fn adopt(&self, data: &[u8]) -> Result<ArenaPtr> {
        if data.is_empty() {
            return Ok(ArenaPtr::NULL);
        }
        self.with_heap(|h| {
            let id = h.reserve_block(checked_align_up(data.len())?)?;
            let idx = h.block_index(id);
            h.blocks[idx].data[..data.len()].copy_from_slice(data);
            Ok(ArenaPtr::new(id, 0))
        })
    }

    /// Register a callback to run when the arena is freed
    ///
    /// Callbacks run in reverse registration order.
    pub fn add_cleanup(&self, cleanup: impl FnOnce() + 'static) {
        self.with_heap(|h| h.cleanups.push(Box::new(cleanup)))
    }

    /// Join the lifetimes of two arenas
    ///
    /// Afterwards a handle to either arena keeps the memory of both alive.
    /// Returns false if either arena was created with [`Arena::init`].
    pub fn fuse(&self, other: &Arena) -> bool {
        let a = self.root();
        let b = other.root();
        if Rc::ptr_eq(&a, &b) {
            return true;
        }

        let seeded = |n: &Rc<Node>| {
            let state = n.state.borrow();
            matches!(&*state, State::Root(h) if h.seeded)
        };
        if seeded(&a) || seeded(&b) {
            debug!("refusing to fuse an arena built on a caller buffer");
            return false;
        }

        let taken = core::mem::replace(&mut *b.state.borrow_mut(), State::Fused(a.clone()));
        let State::Root(mut child) = taken else {
            return false;
        };
        let mut state = a.state.borrow_mut();
        let State::Root(parent) = &mut *state else {
            return false;
        };

        parent.blocks.append(&mut child.blocks);
        parent.blocks.sort_unstable_by_key(|b| b.id);
        parent.allocated += child.allocated;
        parent.cleanups.append(&mut child.cleanups);
        for (key, ext) in child.extensions.drain() {
            parent.extensions.insert(key, ext);
        }
        for (key, map) in child.maps.drain() {
            parent.maps.insert(key, map);
        }
        debug!(
            "fused arenas, {} blocks now share one lifetime",
            parent.blocks.len()
        );
        true
    }

    /// True if both handles share one lifetime
    pub fn is_fused(&self, other: &Arena) -> bool {
        Rc::ptr_eq(&self.root(), &other.root())
    }

    /// Total bytes reserved for blocks
    pub fn space_allocated(&self) -> usize {
        self.with_heap(|h| h.allocated)
    }

    /// Run `f` over `len` bytes starting at `ptr`
    ///
    /// The arena is borrowed for the duration of `f`; calling back into the
    /// arena from `f` panics.
    pub fn with_bytes<R>(&self, ptr: ArenaPtr, len: usize, f: impl FnOnce(&[u8]) -> R) -> R {
        if len == 0 {
            return f(&[]);
        }
        self.with_heap(|h| f(h.slice(ptr, len)))
    }

    /// True if `len` bytes at `ptr` lie inside this arena or one fused
    /// with it
    ///
    /// The null pointer owns only the empty range.
    pub fn owns(&self, ptr: ArenaPtr, len: usize) -> bool {
        if ptr.is_null() {
            return len == 0;
        }
        self.with_heap(|h| {
            match h.blocks.binary_search_by_key(&ptr.block(), |b| b.id) {
                Ok(i) => ptr
                    .offset()
                    .checked_add(len)
                    .is_some_and(|end| end <= h.blocks[i].data.len()),
                Err(_) => false,
            }
        })
    }

    /// Copy `len` bytes starting at `ptr` out of the arena
    pub fn to_vec(&self, ptr: ArenaPtr, len: usize) -> Vec<u8> {
        self.with_bytes(ptr, len, <[u8]>::to_vec)
    }

    /// Read `N` bytes starting at `ptr`
    ///
    /// # Panics
    ///
    /// Panics if the range is not inside this arena; see [`Arena::owns`].
    #[inline]
    pub fn read<const N: usize>(&self, ptr: ArenaPtr) -> [u8; N] {
        let mut out = [0u8; N];
        self.with_heap(|h| out.copy_from_slice(h.slice(ptr, N)));
        out
    }

    /// Read one byte
    #[inline]
    pub fn read_u8(&self, ptr: ArenaPtr) -> u8 {
        self.read::<1>(ptr)[0]
    }

    /// Read a little-endian u32
    #[inline]
    pub fn read_u32(&self, ptr: ArenaPtr) -> u32 {
        u32::from_le_bytes(self.read(ptr))
    }

    /// Read a little-endian u64
    #[inline]
    pub fn read_u64(&self, ptr: ArenaPtr) -> u64 {
        u64::from_le_bytes(self.read(ptr))
    }

    /// Write `data` starting at `ptr`
    ///
    /// # Panics
    ///
    /// Panics if the range is not inside this arena; see [`Arena::owns`].
    #[inline]
    pub fn write_bytes(&self, ptr: ArenaPtr, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.with_heap(|h| h.slice_mut(ptr, data.len()).copy_from_slice(data))
    }

    /// Write one byte
    #[inline]
    pub fn write_u8(&self, ptr: ArenaPtr, v: u8) {
        self.write_bytes(ptr, &[v])
    }

    /// Write a little-endian u32
    #[inline]
    pub fn write_u32(&self, ptr: ArenaPtr, v: u32) {
        self.write_bytes(ptr, &v.to_le_bytes())
    }

    /// Write a little-endian u64
    #[inline]
    pub fn write_u64(&self, ptr: ArenaPtr, v: u64) {
        self.write_bytes(ptr, &v.to_le_bytes())
    }

    /// Zero `len` bytes starting at `ptr`
    pub fn fill_zero(&self, ptr: ArenaPtr, len: usize) {
        if len == 0 {
            return;
        }
        self.with_heap(|h| h.slice_mut(ptr, len).fill(0))
    }

    /// Copy `len` bytes from `src` to `dst`; the ranges may overlap
    pub fn copy(&self, src: ArenaPtr, dst: ArenaPtr, len: usize) {
        if len == 0 || src == dst {
            return;
        }
        self.with_heap(|h| {
            if src.block() == dst.block() {
                let idx = h.block_index(src.block());
                let (s, d) = (src.offset(), dst.offset());
                h.blocks[idx].data.copy_within(s..s + len, d);
            } else {
                let tmp = h.slice(src, len).to_vec();
                h.slice_mut(dst, len).copy_from_slice(&tmp);
            }
        })
    }

    pub(crate) fn intern_extension(&self, ext: &'static MiniTableExtension) -> u64 {
        let key = ext.addr();
        self.with_heap(|h| {
            h.extensions.insert(key, ext);
        });
        key
    }

    pub(crate) fn extension_by_addr(&self, key: u64) -> Option<&'static MiniTableExtension> {
        self.with_heap(|h| h.extensions.lookup(key).copied())
    }

    pub(crate) fn register_map(&self, header: ArenaPtr) {
        self.with_heap(|h| {
            h.maps.insert(header.to_raw(), StrTable::new());
        })
    }

    /// Run `f` over the table of the map whose header is at `header`
    pub(crate) fn with_map<R>(
        &self,
        header: ArenaPtr,
        f: impl FnOnce(&mut StrTable<u64>) -> R,
    ) -> Option<R> {
        self.with_heap(|h| h.maps.get_mut(header.to_raw()).map(f))
    }
}
