//! Sorted Key/Value Module
//!
//! The generic ordered key/value interface shared by every store in the
//! crate, and its implementations.
//!
//! ## Responsibilities
//! - Point reads and writes with size limits on keys and values
//! - Range scans over `[start, end)`
//! - Atomic batches of mutations
//! - Optional read transactions isolated from concurrent writers
//!
//! ## Implementations
//! - [`MemKv`]: memdb-backed, volatile
//! - [`LogKv`]: `MemKv` made durable by a record-format mutation log
//! - [`BufferKv`]: a write buffer in front of another store, flushed in bulk
//! - [`TableReader`](crate::table::TableReader): read-only view of a table

mod buffer;
mod log;
mod mem;
mod table;

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::comparer::Comparer;
use crate::error::{Result, StrataError};

pub use buffer::BufferKv;
pub use self::log::{LogKv, RecoveryStats};
pub use mem::{MemKv, MemReadTx};

// =============================================================================
// Size Limits
// =============================================================================

/// Longest key accepted by [`SortedKv::set`] (in bytes)
pub const MAX_KEY_SIZE: usize = 767;

/// Longest value accepted by [`SortedKv::set`] (in bytes)
pub const MAX_VALUE_SIZE: usize = 63000;

/// Reject keys and values over the size limits
pub fn check_sizes(key: &[u8], value: &[u8]) -> Result<()> {
    check_key_size(key)?;
    if value.len() > MAX_VALUE_SIZE {
        return Err(StrataError::ValueTooLarge {
            len: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

fn check_key_size(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(StrataError::KeyTooLarge {
            len: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

// =============================================================================
// Mutations and Batches
// =============================================================================

/// A single change to a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Set { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl Mutation {
    pub fn key(&self) -> &[u8] {
        match self {
            Mutation::Set { key, .. } | Mutation::Delete { key } => key,
        }
    }
}

/// Mutations applied together by [`SortedKv::commit_batch`]
///
/// The first invalid mutation (an oversized key or value) is remembered and
/// fails the whole commit; nothing from the batch is applied.
#[derive(Debug, Default)]
pub struct Batch {
    mutations: Vec<Mutation>,
    err: Option<StrataError>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        if let Err(err) = check_sizes(key, value) {
            self.err.get_or_insert(err);
            return;
        }
        self.mutations.push(Mutation::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        });
    }

    /// Delete `key`. A key that is absent at commit time is skipped.
    pub fn delete(&mut self, key: &[u8]) {
        if let Err(err) = check_key_size(key) {
            self.err.get_or_insert(err);
            return;
        }
        self.mutations.push(Mutation::Delete { key: key.to_vec() });
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// The batch's mutations, or the first error recorded while building it
    pub fn into_mutations(self) -> Result<Vec<Mutation>> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(self.mutations),
        }
    }
}

// =============================================================================
// Interface
// =============================================================================

/// Boxed iterator over `(key, value)` pairs in key order
pub type KvIter<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 'a>;

/// Generic ordered key/value store
pub trait SortedKv: Send + Sync {
    /// Get the value for `key`; `Err(KeyNotFound)` if absent
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Set `key` to `value`. Fails if either is over its size limit.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete `key`. Deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Iterate keys in `[start, end)`. An empty `start` means from the
    /// beginning; an empty `end` means to the end.
    fn find(&self, start: &[u8], end: &[u8]) -> Result<KvIter<'_>>;

    fn begin_batch(&self) -> Batch {
        Batch::new()
    }

    /// Apply every mutation in `batch`, or none of them
    fn commit_batch(&self, batch: Batch) -> Result<()>;

    /// Start a read transaction that sees a consistent state until dropped
    fn begin_read_tx(&self) -> Result<Box<dyn ReadTx + '_>> {
        Err(StrataError::Unsupported("read transactions"))
    }

    fn close(&self) -> Result<()>;
}

/// Consistent read-only view of a store
pub trait ReadTx {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    fn find(&self, start: &[u8], end: &[u8]) -> Result<KvIter<'_>>;

    /// End the transaction. Dropping it has the same effect.
    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Cut `iter` off at the first key >= `end`. An empty `end` leaves it
/// unbounded. Errors pass through.
pub(crate) fn bounded<'a, I>(iter: I, end: &[u8], cmp: Arc<dyn Comparer>) -> KvIter<'a>
where
    I: Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 'a,
{
    if end.is_empty() {
        return Box::new(iter);
    }
    let end = end.to_vec();
    Box::new(iter.take_while(move |entry| match entry {
        Ok((key, _)) => cmp.compare(key, &end) == Ordering::Less,
        Err(_) => true,
    }))
}
