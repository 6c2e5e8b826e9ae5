//! Memdb-backed sorted store

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::config::Options;
use crate::error::{Result, StrataError};
use crate::memdb::MemDb;

use super::{bounded, check_key_size, check_sizes, Batch, KvIter, Mutation, ReadTx, SortedKv};

/// Volatile [`SortedKv`] over a [`MemDb`]
///
/// ## Concurrency:
/// - Mutations and batch commits hold the commit lock exclusively, so a
///   batch is never seen half applied
/// - Reads and read transactions hold it shared
/// - A thread holding a read transaction must not write to the same store
pub struct MemKv {
    db: MemDb,
    commit: RwLock<()>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::with_options(&Options::default())
    }

    pub fn with_options(options: &Options) -> Self {
        Self {
            db: MemDb::with_options(options),
            commit: RwLock::new(()),
        }
    }

    /// Apply mutations as one atomic step. Deleting an absent key is skipped.
    pub(crate) fn apply(&self, mutations: &[Mutation]) -> Result<()> {
        let _guard = self.commit.write();
        for mutation in mutations {
            match mutation {
                Mutation::Set { key, value } => self.db.set(key, value)?,
                Mutation::Delete { key } => ignore_not_found(self.db.delete(key))?,
            }
        }
        Ok(())
    }

    fn find_unlocked(&self, start: &[u8], end: &[u8]) -> KvIter<'_> {
        bounded(
            self.db.find(start).map(Ok),
            end,
            Arc::clone(self.db.comparer()),
        )
    }

    /// Live entries in key order, for snapshots
    pub(crate) fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let _guard = self.commit.read_recursive();
        self.db.iter().collect()
    }

    /// Bytes held by the underlying memdb
    pub fn approximate_memory_usage(&self) -> usize {
        self.db.approximate_memory_usage()
    }
}

impl Default for MemKv {
    fn default() -> Self {
        Self::new()
    }
}

fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(StrataError::KeyNotFound) => Ok(()),
        other => other,
    }
}

impl SortedKv for MemKv {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let _guard = self.commit.read_recursive();
        self.db.get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_sizes(key, value)?;
        let _guard = self.commit.write();
        self.db.set(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        check_key_size(key)?;
        let _guard = self.commit.write();
        ignore_not_found(self.db.delete(key))
    }

    /// Concurrent mutations may or may not be observed by the iterator.
    fn find(&self, start: &[u8], end: &[u8]) -> Result<KvIter<'_>> {
        Ok(self.find_unlocked(start, end))
    }

    fn commit_batch(&self, batch: Batch) -> Result<()> {
        let mutations = batch.into_mutations()?;
        self.apply(&mutations)
    }

    fn begin_read_tx(&self) -> Result<Box<dyn ReadTx + '_>> {
        Ok(Box::new(MemReadTx {
            kv: self,
            _guard: self.commit.read_recursive(),
        }))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Read transaction over a [`MemKv`]: writers wait until it is dropped
pub struct MemReadTx<'a> {
    kv: &'a MemKv,
    _guard: RwLockReadGuard<'a, ()>,
}

impl ReadTx for MemReadTx<'_> {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.kv.db.get(key)
    }

    fn find(&self, start: &[u8], end: &[u8]) -> Result<KvIter<'_>> {
        Ok(self.kv.find_unlocked(start, end))
    }
}
