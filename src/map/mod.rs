//! Concurrent hash map implementations and the operation surface they share.

mod linear;

pub use linear::{ConfigError, Iter, LinearHashMap, ValueGuard};

use std::hash::Hash;
use std::ops::Deref;

/// The operations a concurrent map in this crate supports.
///
/// All methods take `&self`: synchronization is the implementation's
/// problem, not the caller's.
pub trait Map {
    /// The key type; looked up by hash, matched by equality.
    type Key: Hash;
    /// The stored value type.
    type Val;
    /// Handle returned by [`Map::get`]. It dereferences to the value and
    /// keeps whatever locks make that borrow sound held until dropped.
    type ValueRef<'a>: Deref<Target = Self::Val>
    where
        Self: 'a;

    /// Looks up the value stored under `key`, if any.
    fn get(&self, key: &Self::Key) -> Option<Self::ValueRef<'_>>;

    /// Returns whether an entry exists under `key`.
    fn contains(&self, key: &Self::Key) -> bool;

    /// Inserts `value` under `key`, replacing the previous value if the key
    /// was already present.
    fn put(&self, key: Self::Key, value: Self::Val);

    /// Removes the entry under `key`, returning whether one was present.
    fn remove(&self, key: &Self::Key) -> bool;
}
