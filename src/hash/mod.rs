//! Open-addressed hash tables with chained collision lists
//!
//! Both table flavours share one bucket array. Each bucket holds a key, a
//! value and the index of the next bucket in its collision chain. Inserts use
//! Brent's variation: when the home bucket of a new key is occupied by an
//! entry whose own home is elsewhere, that entry is evicted to a free bucket
//! and the new key takes its home. Every chain therefore starts at the home
//! bucket of all of its members.

mod int_table;
mod str_table;

pub use int_table::IntTable;
pub use str_table::StrTable;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

/// Tables grow once `count` would exceed this fraction of the bucket count
const MAX_LOAD_NUM: usize = 85;
const MAX_LOAD_DEN: usize = 100;

/// Smallest non-empty hash part, as a power of two
const MIN_SIZE_LG2: u8 = 3;

static SEED_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Fresh seed for a new table
pub(crate) fn next_seed() -> u32 {
    SEED_COUNTER
        .fetch_add(1, Ordering::Relaxed)
        .wrapping_mul(0x9E37_79B9)
}

/// 32-bit MurmurHash2
pub fn murmur_hash2(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = seed ^ (data.len() as u32);
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        if tail.len() >= 3 {
            h ^= (tail[2] as u32) << 16;
        }
        if tail.len() >= 2 {
            h ^= (tail[1] as u32) << 8;
        }
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

#[derive(Debug, Clone)]
pub(crate) struct Bucket<V> {
    pub(crate) key: u64,
    pub(crate) val: V,
    next: Option<u32>,
}

/// Bucket array shared by [`IntTable`] and [`StrTable`]
///
/// Keys are opaque `u64`s; the owning table supplies the hash of a key and
/// the equality test, so string keys can live outside the buckets.
#[derive(Debug, Clone)]
pub(crate) struct Table<V> {
    entries: Vec<Option<Bucket<V>>>,
    count: usize,
    seed: u32,
}

impl<V> Table<V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
            seed: next_seed(),
        }
    }

    pub(crate) fn with_size_lg2(size_lg2: u8) -> Self {
        let mut t = Self::new();
        t.entries = empty_entries(1usize << size_lg2);
        t
    }

    #[inline]
    pub(crate) fn seed(&self) -> u32 {
        self.seed
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.entries.len().wrapping_sub(1)
    }

    #[inline]
    pub(crate) fn max_count(&self) -> usize {
        self.size() * MAX_LOAD_NUM / MAX_LOAD_DEN
    }

    /// True when one more insert must first grow the table
    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.count + 1 > self.max_count()
    }

    /// Size lg2 for the next growth step
    pub(crate) fn grown_size_lg2(&self) -> u8 {
        if self.entries.is_empty() {
            MIN_SIZE_LG2
        } else {
            self.entries.len().trailing_zeros() as u8 + 1
        }
    }

    pub(crate) fn find(&self, hash: u32, eq: impl Fn(u64) -> bool) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let mut idx = hash as usize & self.mask();
        loop {
            let bucket = self.entries[idx].as_ref()?;
            if eq(bucket.key) {
                return Some(idx);
            }
            idx = bucket.next? as usize;
        }
    }

    #[inline]
    pub(crate) fn bucket(&self, idx: usize) -> Option<&Bucket<V>> {
        self.entries.get(idx).and_then(Option::as_ref)
    }

    #[inline]
    pub(crate) fn bucket_mut(&mut self, idx: usize) -> Option<&mut Bucket<V>> {
        self.entries.get_mut(idx).and_then(Option::as_mut)
    }

    /// First free bucket after `from`, wrapping to the start once
    fn empty_after(&self, from: usize) -> usize {
        (from + 1..self.entries.len())
            .chain(0..from)
            .find(|&i| self.entries[i].is_none())
            .unwrap_or(from)
    }

    /// Insert a key known to be absent. The table must not be full.
    pub(crate) fn insert(&mut self, key: u64, val: V, hash: u32, hash_of: impl Fn(u64) -> u32) {
        debug_assert!(self.count < self.entries.len());
        let mask = self.mask();
        let main = hash as usize & mask;

        let occupant_home = match &self.entries[main] {
            None => {
                self.entries[main] = Some(Bucket {
                    key,
                    val,
                    next: None,
                });
                self.count += 1;
                return;
            }
            Some(b) => hash_of(b.key) as usize & mask,
        };

        let free = self.empty_after(main);
        if occupant_home != main {
            // Occupant belongs to another chain: relink its predecessor to the
            // free bucket and move it there.
            let mut prev = occupant_home;
            loop {
                let next = self.entries[prev].as_ref().and_then(|b| b.next);
                match next {
                    Some(n) if n as usize == main => break,
                    Some(n) => prev = n as usize,
                    None => break,
                }
            }
            if let Some(b) = self.entries[prev].as_mut() {
                b.next = Some(free as u32);
            }
            self.entries[free] = self.entries[main].take();
            self.entries[main] = Some(Bucket {
                key,
                val,
                next: None,
            });
        } else {
            let head_next = self.entries[main].as_ref().and_then(|b| b.next);
            self.entries[free] = Some(Bucket {
                key,
                val,
                next: head_next,
            });
            if let Some(b) = self.entries[main].as_mut() {
                b.next = Some(free as u32);
            }
        }
        self.count += 1;
    }

    pub(crate) fn remove(&mut self, hash: u32, eq: impl Fn(u64) -> bool) -> Option<(u64, V)> {
        if self.entries.is_empty() {
            return None;
        }
        let head = hash as usize & self.mask();
        let head_bucket = self.entries[head].as_ref()?;

        if eq(head_bucket.key) {
            let removed = self.entries[head].take()?;
            if let Some(next) = removed.next {
                self.entries[head] = self.entries[next as usize].take();
            }
            self.count -= 1;
            return Some((removed.key, removed.val));
        }

        let mut prev = head;
        while let Some(n) = self.entries[prev].as_ref().and_then(|b| b.next) {
            let n = n as usize;
            let hit = self.entries[n].as_ref().is_some_and(|b| eq(b.key));
            if hit {
                let removed = self.entries[n].take()?;
                if let Some(b) = self.entries[prev].as_mut() {
                    b.next = removed.next;
                }
                self.count -= 1;
                return Some((removed.key, removed.val));
            }
            prev = n;
        }
        None
    }

    /// Drain every bucket, leaving an empty table of `size_lg2`
    pub(crate) fn take_all(&mut self, size_lg2: u8) -> Vec<(u64, V)> {
        let old = core::mem::replace(&mut self.entries, empty_entries(1usize << size_lg2));
        self.count = 0;
        old.into_iter().flatten().map(|b| (b.key, b.val)).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
        self.count = 0;
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (u64, &V)> {
        self.entries.iter().flatten().map(|b| (b.key, &b.val))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (u64, &mut V)> {
        self.entries.iter_mut().flatten().map(|b| (b.key, &mut b.val))
    }
}

fn empty_entries<V>(n: usize) -> Vec<Option<Bucket<V>>> {
    let mut v = Vec::with_capacity(n);
    v.resize_with(n, || None);
    v
}

/// Smallest lg2 size whose load limit admits `count` entries
pub(crate) fn size_lg2_for(count: usize) -> u8 {
    let mut lg2 = MIN_SIZE_LG2;
    while (1usize << lg2) * MAX_LOAD_NUM / MAX_LOAD_DEN < count {
        lg2 += 1;
    }
    lg2
}
