//! A concurrent hash map based on linear hashing.
//!
//! The table grows one bucket at a time: when the load factor is exceeded,
//! the bucket at the split pointer is redistributed between itself and a
//! single newly appended bucket, using one additional bit of the hash.
//! No global rehash ever happens, so the structural work done by any one
//! insert is bounded by the population of a single bucket.

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard};

use crossbeam::utils::CachePadded;

use super::Map;

const DEFAULT_NUM_BUCKETS: usize = 2;
const DEFAULT_MAX_LOAD_FACTOR: f64 = 0.75;

type Bucket<K, V> = Vec<(K, V)>;

type ProtectedBucket<K, V> = RwLock<Bucket<K, V>>;

/// The error returned when a map is constructed with an unusable shape.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Bucket addressing masks hash bits, so the initial bucket count must
    /// be a positive power of two.
    #[error("initial bucket count must be a positive power of two, got {0}")]
    NumBucketsNotPowerOfTwo(usize),
}

/// Everything guarded by the structural lock: the buckets themselves plus
/// the split cursor state that addressing depends on.
///
/// A split mutates `buckets`, `split_ptr` and `depth` as one unit under the
/// exclusive structural lock, so `bucket_index` (which runs under the shared
/// structural lock) never observes them half-updated.
struct Table<K, V> {
    buckets: Vec<ProtectedBucket<K, V>>,
    /// Index of the next bucket due to be split in the current doubling round.
    split_ptr: usize,
    /// Number of completed doubling rounds.
    depth: usize,
    init_size: usize,
}

impl<K, V> Table<K, V> {
    /// Maps a hash to a bucket index, honoring any in-progress split.
    ///
    /// Buckets below the split pointer were already redistributed this round
    /// and need one extra hash bit to disambiguate; buckets at or above it
    /// still use the coarser mask.
    fn bucket_index(&self, hash: usize) -> usize {
        let round_size = self.init_size << self.depth;
        let mask = round_size - 1;
        let index = hash & mask;
        if index < self.split_ptr {
            hash & ((mask << 1) | 1)
        } else {
            index
        }
    }
}

/// A concurrent hash map that grows incrementally via linear hashing.
///
/// Two lock tiers protect the map. A structural [`RwLock`] guards the bucket
/// vector and the split cursor: every operation holds it in shared mode,
/// while a split holds it exclusively. Each bucket carries its own
/// [`RwLock`] over its entries, so operations on distinct buckets proceed in
/// parallel. Bucket locks are only reachable through a held structural
/// guard, which makes the structural-then-bucket acquisition order a
/// compile-time fact rather than a convention.
///
/// Keys need `Hash + PartialEq`; hashing is pluggable through a
/// [`BuildHasher`] state, defaulting to [`RandomState`].
///
/// ```
/// use linear_hash::{LinearHashMap, Map};
///
/// let map = LinearHashMap::new();
/// map.put("answer", 42);
/// assert_eq!(*map.get(&"answer").unwrap(), 42);
/// assert!(map.remove(&"answer"));
/// ```
pub struct LinearHashMap<K: Hash + PartialEq, V, S = RandomState> {
    table: RwLock<Table<K, V>>,
    num_elems: CachePadded<AtomicUsize>,
    max_load_factor: f64,
    state: S,
}

impl<K: Hash + PartialEq, V> Default for LinearHashMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + PartialEq, V> LinearHashMap<K, V> {
    /// Creates a map with 2 initial buckets and a max load factor of 0.75.
    pub fn new() -> Self {
        Self::build(
            DEFAULT_NUM_BUCKETS,
            DEFAULT_MAX_LOAD_FACTOR,
            RandomState::default(),
        )
        .expect("the default bucket count is a power of two")
    }

    /// Creates a map with the given number of initial buckets, which must be
    /// a positive power of two.
    pub fn with_num_buckets(num_buckets: usize) -> Result<Self, ConfigError> {
        Self::build(num_buckets, DEFAULT_MAX_LOAD_FACTOR, RandomState::default())
    }

    /// Creates a map with the given initial bucket count and max load
    /// factor. A split is triggered whenever `len() / num_buckets()` exceeds
    /// `max_load_factor`; the factor itself is taken as given.
    pub fn with_config(num_buckets: usize, max_load_factor: f64) -> Result<Self, ConfigError> {
        Self::build(num_buckets, max_load_factor, RandomState::default())
    }
}

impl<K, V, S> LinearHashMap<K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher,
{
    /// Creates a map with default shape and the given hasher state.
    pub fn with_hasher(hasher: S) -> Self {
        Self::build(DEFAULT_NUM_BUCKETS, DEFAULT_MAX_LOAD_FACTOR, hasher)
            .expect("the default bucket count is a power of two")
    }

    /// Fully parameterized construction; see [`Self::with_config`].
    pub fn with_config_and_hasher(
        num_buckets: usize,
        max_load_factor: f64,
        hasher: S,
    ) -> Result<Self, ConfigError> {
        Self::build(num_buckets, max_load_factor, hasher)
    }

    fn build(num_buckets: usize, max_load_factor: f64, hasher: S) -> Result<Self, ConfigError> {
        if !num_buckets.is_power_of_two() {
            // covers zero as well
            return Err(ConfigError::NumBucketsNotPowerOfTwo(num_buckets));
        }

        let buckets = (0..num_buckets).map(|_| RwLock::new(vec![])).collect();
        Ok(LinearHashMap {
            table: RwLock::new(Table {
                buckets,
                split_ptr: 0,
                depth: 0,
                init_size: num_buckets,
            }),
            num_elems: CachePadded::new(AtomicUsize::new(0)),
            max_load_factor,
            state: hasher,
        })
    }

    fn hash(&self, key: &K) -> usize {
        let mut hasher = self.state.build_hasher();
        key.hash(&mut hasher);
        hasher.finish() as usize
    }

    /// Load-factor probe. Tolerates a stale counter read: every caller that
    /// acts on a `true` re-checks under the exclusive structural lock.
    fn should_split(&self, num_buckets: usize) -> bool {
        let load = self.num_elems.load(Ordering::Relaxed) as f64 / num_buckets as f64;
        load > self.max_load_factor
    }

    /// Splits the bucket at the split pointer into itself and one newly
    /// appended bucket. The caller holds the structural lock exclusively,
    /// so no bucket guard exists anywhere and `get_mut` needs no locking.
    fn split(&self, table: &mut Table<K, V>) {
        table.buckets.push(RwLock::new(vec![]));
        let round_size = table.init_size << table.depth;
        // The one hash bit that becomes significant this round.
        let bit = round_size;

        let drained = std::mem::take(table.buckets[table.split_ptr].get_mut().unwrap());
        let mut stay = Vec::with_capacity(drained.len());
        let mut moved = Vec::new();
        for entry in drained {
            if self.hash(&entry.0) & bit != 0 {
                moved.push(entry);
            } else {
                stay.push(entry);
            }
        }
        *table.buckets[table.split_ptr].get_mut().unwrap() = stay;
        *table.buckets.last_mut().unwrap().get_mut().unwrap() = moved;

        table.split_ptr += 1;
        if table.split_ptr == round_size {
            // A full doubling round is complete.
            table.split_ptr = 0;
            table.depth += 1;
        }
    }
}

impl<K: Hash + PartialEq, V, S> LinearHashMap<K, V, S> {
    /// Number of entries in the map.
    pub fn len(&self) -> usize {
        self.num_elems.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current bucket count. Monotonically non-decreasing: buckets are
    /// appended by splits and never merged or removed.
    pub fn num_buckets(&self) -> usize {
        self.table.read().unwrap().buckets.len()
    }

    /// Index of the next bucket due to be split in the current doubling round.
    pub fn split_ptr(&self) -> usize {
        self.table.read().unwrap().split_ptr
    }

    /// Number of completed doubling rounds.
    pub fn depth(&self) -> usize {
        self.table.read().unwrap().depth
    }

    /// Visits every entry, in ascending bucket order and unspecified order
    /// within a bucket.
    ///
    /// Iteration takes no locks; the exclusive borrow of the map is the
    /// required synchronization, so the compiler rules out concurrent
    /// mutation instead of this crate pessimizing readers.
    pub fn iter(&mut self) -> Iter<'_, K, V> {
        let table = self.table.get_mut().unwrap();
        Iter {
            buckets: table.buckets.iter_mut(),
            entries: Default::default(),
        }
    }
}

impl<K, V, S> Map for LinearHashMap<K, V, S>
where
    K: Hash + PartialEq,
    S: BuildHasher,
{
    type Key = K;
    type Val = V;
    type ValueRef<'a>
        = ValueGuard<'a, K, V>
    where
        Self: 'a;

    fn get(&self, key: &K) -> Option<ValueGuard<'_, K, V>> {
        let table = self.table.read().unwrap();
        let idx = table.bucket_index(self.hash(key));
        let bucket = table.buckets[idx].read().unwrap();

        // SAFETY: the guard's lifetime is rebound from `table` (a local) to
        // the borrow of `self`. This is sound because `ValueGuard` keeps the
        // structural read guard alive alongside the bucket guard, which
        // prevents any split from growing (and thus reallocating) the bucket
        // vector the guard points into; field order in `ValueGuard` releases
        // the bucket guard first.
        let bucket: RwLockReadGuard<'_, Bucket<K, V>> = unsafe { std::mem::transmute(bucket) };

        let idx = bucket.iter().position(|(k, _)| k == key)?;
        Some(ValueGuard {
            bucket,
            idx,
            _table: table,
        })
    }

    fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    fn put(&self, key: K, value: V) {
        let needs_split = {
            let table = self.table.read().unwrap();
            let idx = table.bucket_index(self.hash(&key));
            let mut bucket = table.buckets[idx].write().unwrap();

            if let Some(slot) = bucket.iter_mut().find(|(k, _)| *k == key) {
                // Updates replace the value in place and never split.
                slot.1 = value;
                return;
            }

            bucket.push((key, value));
            self.num_elems.fetch_add(1, Ordering::Relaxed);
            self.should_split(table.buckets.len())
        };

        if needs_split {
            let mut table = self.table.write().unwrap();
            // Another writer may have split while we waited for the
            // exclusive lock; only the first one through performs it.
            if self.should_split(table.buckets.len()) {
                self.split(&mut table);
            }
        }
    }

    fn remove(&self, key: &K) -> bool {
        let table = self.table.read().unwrap();
        let idx = table.bucket_index(self.hash(key));
        let mut bucket = table.buckets[idx].write().unwrap();

        for i in 0..bucket.len() {
            if bucket[i].0 == *key {
                // Entry order within a bucket is unspecified, so swapping
                // with the last entry gives O(1) removal.
                bucket.swap_remove(i);
                self.num_elems.fetch_sub(1, Ordering::Relaxed);
                return true;
            }
        }
        false
    }
}

impl<K, V, S> fmt::Debug for LinearHashMap<K, V, S>
where
    K: Hash + PartialEq + fmt::Debug,
    V: fmt::Debug,
{
    /// Snapshots the whole table under the structural read lock, then each
    /// bucket under its own read lock, one at a time.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.read().unwrap();
        let mut map = f.debug_map();
        for bucket in &table.buckets {
            let entries = bucket.read().unwrap();
            for (k, v) in entries.iter() {
                map.entry(k, v);
            }
        }
        map.finish()
    }
}

/// A read handle to a single value, returned by [`Map::get`].
///
/// Holds the bucket's read guard (and the structural read guard backing it)
/// for as long as the value is borrowed, so a concurrent `put`/`remove` on
/// the same bucket blocks until this is dropped.
pub struct ValueGuard<'a, K: PartialEq, V> {
    // Declared before `_table` so the bucket guard is released first.
    bucket: RwLockReadGuard<'a, Bucket<K, V>>,
    idx: usize,
    _table: RwLockReadGuard<'a, Table<K, V>>,
}

impl<'a, K: PartialEq, V> Deref for ValueGuard<'a, K, V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.bucket[self.idx].1
    }
}

/// Lock-free entry iterator; see [`LinearHashMap::iter`].
pub struct Iter<'a, K, V> {
    buckets: std::slice::IterMut<'a, ProtectedBucket<K, V>>,
    entries: std::slice::Iter<'a, (K, V)>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((k, v)) = self.entries.next() {
                return Some((k, v));
            }
            // Advance to the next non-empty bucket, if any. Holding the
            // exclusive borrow means `get_mut` never blocks or locks.
            let bucket = self.buckets.next()?;
            let entries: &[(K, V)] = bucket.get_mut().unwrap();
            self.entries = entries.iter();
        }
    }
}

impl<'a, K: Hash + PartialEq, V, S> IntoIterator for &'a mut LinearHashMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
