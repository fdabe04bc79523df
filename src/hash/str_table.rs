//! Byte-string keyed table with inline, length-prefixed keys

use super::{murmur_hash2, size_lg2_for, Table};
use alloc::vec::Vec;

/// `[u8] -> V` table
///
/// Keys are copied into one contiguous region as `u32` length + bytes; each
/// bucket stores the key's offset into that region.
#[derive(Debug, Clone)]
pub struct StrTable<V> {
    keys: Vec<u8>,
    dead_bytes: usize,
    table: Table<V>,
}

impl<V> Default for StrTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn key_at(keys: &[u8], offset: u64) -> &[u8] {
    let at = offset as usize;
    let len = u32::from_le_bytes([keys[at], keys[at + 1], keys[at + 2], keys[at + 3]]) as usize;
    &keys[at + 4..at + 4 + len]
}

impl<V> StrTable<V> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            dead_bytes: 0,
            table: Table::new(),
        }
    }

    /// Create a table with room for `count` keys before it must grow
    pub fn with_capacity(count: usize) -> Self {
        Self {
            keys: Vec::new(),
            dead_bytes: 0,
            table: Table::with_size_lg2(size_lg2_for(count)),
        }
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when the table holds no entries
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    #[inline]
    fn hash(&self, key: &[u8]) -> u32 {
        murmur_hash2(key, self.table.seed())
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        let keys = &self.keys;
        self.table
            .find(self.hash(key), |off| key_at(keys, off) == key)
    }

    /// Insert `key`; returns false without inserting if it already exists
    pub fn insert(&mut self, key: &[u8], val: V) -> bool {
        if self.find(key).is_some() {
            return false;
        }
        if self.table.is_full() {
            self.rebuild(self.table.grown_size_lg2());
        }
        let offset = self.keys.len() as u64;
        self.keys.extend_from_slice(&(key.len() as u32).to_le_bytes());
        self.keys.extend_from_slice(key);

        let seed = self.table.seed();
        let hash = murmur_hash2(key, seed);
        let keys = &self.keys;
        self.table
            .insert(offset, val, hash, |off| murmur_hash2(key_at(keys, off), seed));
        true
    }

    /// Rehash into `size_lg2` buckets, dropping the bytes of removed keys
    fn rebuild(&mut self, size_lg2: u8) {
        let seed = self.table.seed();
        let old_keys = core::mem::take(&mut self.keys);
        self.dead_bytes = 0;
        for (off, val) in self.table.take_all(size_lg2) {
            let key = key_at(&old_keys, off);
            let offset = self.keys.len() as u64;
            self.keys.extend_from_slice(&(key.len() as u32).to_le_bytes());
            self.keys.extend_from_slice(key);
            let keys = &self.keys;
            self.table.insert(
                offset,
                val,
                murmur_hash2(key, seed),
                |o| murmur_hash2(key_at(keys, o), seed),
            );
        }
    }

    /// Look up `key`
    pub fn lookup(&self, key: &[u8]) -> Option<&V> {
        let idx = self.find(key)?;
        self.table.bucket(idx).map(|b| &b.val)
    }

    /// Mutable lookup of `key`
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let idx = self.find(key)?;
        self.table.bucket_mut(idx).map(|b| &mut b.val)
    }

    /// Remove `key`, returning its value
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let hash = self.hash(key);
        let keys = &self.keys;
        let (_, val) = self.table.remove(hash, |off| key_at(keys, off) == key)?;
        self.dead_bytes += 4 + key.len();
        if self.dead_bytes > 64 && self.dead_bytes * 2 > self.keys.len() {
            let lg2 = self.table.size().trailing_zeros() as u8;
            self.rebuild(lg2);
        }
        Some(val)
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.table.clear();
        self.keys.clear();
        self.dead_bytes = 0;
    }

    /// Iterate entries in bucket order
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &V)> {
        let keys = &self.keys;
        self.table.iter().map(move |(off, v)| (key_at(keys, off), v))
    }
}
