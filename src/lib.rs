//! Concurrent hash maps that grow incrementally via linear hashing.
//!
//! Unlike a conventional hash map, which rehashes every entry when it
//! outgrows its table, a linear-hashing map splits exactly one bucket per
//! growth step. The cost of any single insert is therefore bounded by the
//! population of one bucket, never by the size of the whole table.

mod map;

pub use map::{ConfigError, Iter, LinearHashMap, Map, ValueGuard};
