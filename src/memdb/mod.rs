//! MemDb Module
//!
//! In-memory sorted key/value store backed by a skiplist.
//!
//! ## Responsibilities
//! - Point reads and writes with O(log n) expected cost
//! - Ordered iteration from any key
//! - Safe concurrent use: shared lock for reads, exclusive lock for writes
//!
//! ## Memory
//! Memory use only grows: overwriting a key appends the new value, and
//! deleting a key leaves a tombstone. Callers compact by copying the live
//! entries into a fresh instance (or a table) when appropriate.

mod iterator;
mod skiplist;

use std::sync::Arc;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::comparer::Comparer;
use crate::config::Options;
use crate::error::{Result, StrataError};

use skiplist::Skiplist;

pub use iterator::MemDbIter;
pub use skiplist::MAX_HEIGHT;

/// Skiplist-backed sorted map
///
/// ## Concurrency:
/// - `get`, `find` and `approximate_memory_usage` take the shared lock
/// - `set` and `delete` take the exclusive lock
/// - All methods use `&self`
pub struct MemDb {
    cmp: Arc<dyn Comparer>,
    list: RwLock<Skiplist>,
}

impl MemDb {
    /// Create an empty memdb with default options
    pub fn new() -> Self {
        Self::with_options(&Options::default())
    }

    /// Create an empty memdb ordered by `options.comparer`
    pub fn with_options(options: &Options) -> Self {
        Self::with_rng(options, StdRng::from_entropy())
    }

    /// Create an empty memdb whose node heights come from a seeded RNG
    pub fn with_seed(options: &Options, seed: u64) -> Self {
        Self::with_rng(options, StdRng::seed_from_u64(seed))
    }

    fn with_rng(options: &Options, rng: StdRng) -> Self {
        Self {
            cmp: Arc::clone(&options.comparer),
            list: RwLock::new(Skiplist::new(rng)),
        }
    }

    /// Get the value for `key`
    ///
    /// Returns `Err(KeyNotFound)` if the key is absent or deleted.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let list = self.list.read();
        let (n, exact) = list.find_node(self.cmp.as_ref(), key, None);
        if !exact {
            return Err(StrataError::KeyNotFound);
        }
        list.value(n)
            .map(<[u8]>::to_vec)
            .ok_or(StrataError::KeyNotFound)
    }

    /// Set `key` to `value`, overwriting any previous value
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut list = self.list.write();
        list.insert(self.cmp.as_ref(), key, value);
        Ok(())
    }

    /// Delete `key`
    ///
    /// Returns `Err(KeyNotFound)` if the key is absent or already deleted.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut list = self.list.write();
        if list.remove(self.cmp.as_ref(), key) {
            Ok(())
        } else {
            Err(StrataError::KeyNotFound)
        }
    }

    /// Iterate live entries starting at the first key >= `key`
    ///
    /// An empty `key` starts at the beginning of the map.
    pub fn find(&self, key: &[u8]) -> MemDbIter<'_> {
        let list = self.list.read();
        let start = if key.is_empty() {
            list.first()
        } else {
            list.find_node(self.cmp.as_ref(), key, None).0
        };
        MemDbIter::new(self, &list, start)
    }

    /// Iterate all live entries
    pub fn iter(&self) -> MemDbIter<'_> {
        self.find(&[])
    }

    /// Bytes held by the key/value arena, including overwritten and deleted data
    pub fn approximate_memory_usage(&self) -> usize {
        self.list.read().arena_len()
    }

    /// Number of nodes ever inserted, including tombstoned ones
    pub fn node_count(&self) -> usize {
        self.list.read().node_count()
    }

    /// The comparer ordering this memdb
    pub fn comparer(&self) -> &Arc<dyn Comparer> {
        &self.cmp
    }

    /// Release the memdb. Nothing is held beyond memory, so this cannot fail.
    pub fn close(self) -> Result<()> {
        Ok(())
    }
}

impl Default for MemDb {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_height_distribution() {
        let db = MemDb::with_seed(&Options::default(), 0x5eed);
        let n = 50_000;
        for i in 0..n {
            db.set(format!("{i:08}").as_bytes(), b"").unwrap();
        }
        let list = db.list.read();
        let mut at_least = [0usize; MAX_HEIGHT + 1];
        for h in list.heights() {
            assert!((1..=MAX_HEIGHT).contains(&h));
            for k in 1..=h {
                at_least[k] += 1;
            }
        }
        assert_eq!(at_least[1], n);
        // P(height >= k) = 0.25^(k-1); check the well-populated levels.
        for k in 2..=4 {
            let expected = n as f64 * 0.25f64.powi(k as i32 - 1);
            let got = at_least[k] as f64;
            assert!(
                (got - expected).abs() < expected * 0.2,
                "level {k}: got {got}, expected about {expected}"
            );
        }
        assert!(list.height() <= MAX_HEIGHT);
    }

    #[test]
    fn test_tombstone_keeps_node() {
        let db = MemDb::new();
        db.set(b"k", b"v").unwrap();
        db.delete(b"k").unwrap();
        assert_eq!(db.node_count(), 1);
        db.set(b"k", b"v2").unwrap();
        assert_eq!(db.node_count(), 1);
        assert_eq!(db.get(b"k").unwrap(), b"v2");
    }
}
