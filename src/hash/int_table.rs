//! Integer-keyed table with a dense array part

use super::{murmur_hash2, size_lg2_for, Table};
use alloc::vec::Vec;

/// Minimum fraction of occupied slots for [`IntTable::compact`] to keep a
/// key in the array part
const MIN_DENSITY_NUM: usize = 1;
const MIN_DENSITY_DEN: usize = 10;

/// `u64 -> V` table
///
/// Keys below `array_size` index straight into an array; larger keys go to
/// the hash part. Iteration visits the array part in key order, then the
/// hash part in bucket order.
#[derive(Debug, Clone)]
pub struct IntTable<V> {
    array: Vec<Option<V>>,
    array_count: usize,
    table: Table<V>,
}

impl<V> Default for IntTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> IntTable<V> {
    /// Create an empty table with a single-slot array part
    pub fn new() -> Self {
        Self::with_sizes(1, 0)
    }

    /// Create a table with `array_size` dense slots and room for `hash_count`
    /// hashed keys
    pub fn with_sizes(array_size: usize, hash_count: usize) -> Self {
        let mut array = Vec::with_capacity(array_size.max(1));
        array.resize_with(array_size.max(1), || None);
        let table = if hash_count == 0 {
            Table::new()
        } else {
            Table::with_size_lg2(size_lg2_for(hash_count))
        };
        Self {
            array,
            array_count: 0,
            table,
        }
    }

    #[inline]
    fn hash(seed: u32, key: u64) -> u32 {
        murmur_hash2(&key.to_le_bytes(), seed)
    }

    #[inline]
    fn in_array(&self, key: u64) -> bool {
        key < self.array.len() as u64
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.array_count + self.table.len()
    }

    /// True when the table holds no entries
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots in the dense array part
    #[inline]
    pub fn array_size(&self) -> usize {
        self.array.len()
    }

    /// Insert `key`; returns false without inserting if it already exists
    pub fn insert(&mut self, key: u64, val: V) -> bool {
        if self.in_array(key) {
            let slot = &mut self.array[key as usize];
            if slot.is_some() {
                return false;
            }
            *slot = Some(val);
            self.array_count += 1;
            return true;
        }
        if self.lookup(key).is_some() {
            return false;
        }
        if self.table.is_full() {
            self.grow();
        }
        let seed = self.table.seed();
        self.table
            .insert(key, val, Self::hash(seed, key), |k| Self::hash(seed, k));
        true
    }

    /// Insert or overwrite `key`, returning the previous value
    pub fn replace(&mut self, key: u64, val: V) -> Option<V> {
        if let Some(slot) = self.get_mut(key) {
            return Some(core::mem::replace(slot, val));
        }
        self.insert(key, val);
        None
    }

    fn grow(&mut self) {
        let lg2 = self.table.grown_size_lg2();
        let seed = self.table.seed();
        for (k, v) in self.table.take_all(lg2) {
            self.table.insert(k, v, Self::hash(seed, k), |x| Self::hash(seed, x));
        }
    }

    /// Look up `key`
    pub fn lookup(&self, key: u64) -> Option<&V> {
        if self.in_array(key) {
            return self.array[key as usize].as_ref();
        }
        let idx = self.table.find(Self::hash(self.table.seed(), key), |k| k == key)?;
        self.table.bucket(idx).map(|b| &b.val)
    }

    /// Mutable lookup of `key`
    pub fn get_mut(&mut self, key: u64) -> Option<&mut V> {
        if self.in_array(key) {
            return self.array[key as usize].as_mut();
        }
        let idx = self.table.find(Self::hash(self.table.seed(), key), |k| k == key)?;
        self.table.bucket_mut(idx).map(|b| &mut b.val)
    }

    /// Remove `key`, returning its value
    pub fn remove(&mut self, key: u64) -> Option<V> {
        if self.in_array(key) {
            let v = self.array[key as usize].take();
            if v.is_some() {
                self.array_count -= 1;
            }
            return v;
        }
        let seed = self.table.seed();
        self.table
            .remove(Self::hash(seed, key), |k| k == key)
            .map(|(_, v)| v)
    }

    /// Iterate entries: array part first, then the hash part
    pub fn iter(&self) -> impl Iterator<Item = (u64, &V)> {
        self.array
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (i as u64, v)))
            .chain(self.table.iter())
    }

    /// Mutable iteration in the same order as [`IntTable::iter`]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u64, &mut V)> {
        self.array
            .iter_mut()
            .enumerate()
            .filter_map(|(i, v)| v.as_mut().map(|v| (i as u64, v)))
            .chain(self.table.iter_mut())
    }

    /// Remove every entry and hand them back in iteration order
    pub fn drain(&mut self) -> Vec<(u64, V)> {
        let mut out: Vec<(u64, V)> = self
            .array
            .iter_mut()
            .enumerate()
            .filter_map(|(i, v)| v.take().map(|v| (i as u64, v)))
            .collect();
        self.array_count = 0;
        let lg2 = size_lg2_for(0);
        out.extend(self.table.take_all(lg2));
        out
    }

    /// Rebuild with the largest array part that stays at least 10% occupied
    pub fn compact(&mut self) {
        let entries = self.drain();
        let mut keys: Vec<u64> = entries.iter().map(|(k, _)| *k).collect();
        keys.sort_unstable();

        let mut array_size = 1usize;
        if let Some(&max_key) = keys.last() {
            let max_lg2 = 64 - max_key.leading_zeros();
            for lg2 in (0..=max_lg2.min(62)).rev() {
                let size = 1u64 << lg2;
                let below = keys.partition_point(|&k| k < size);
                if below > 0
                    && (below * MIN_DENSITY_DEN) as u64 >= size * MIN_DENSITY_NUM as u64
                {
                    array_size = (keys[below - 1] + 1) as usize;
                    break;
                }
            }
        }

        let hash_count = keys.iter().filter(|&&k| k >= array_size as u64).count();
        *self = Self::with_sizes(array_size, hash_count);
        for (k, v) in entries {
            self.insert(k, v);
        }
    }
}
