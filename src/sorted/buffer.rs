//! Write-buffered sorted store
//!
//! Puts one store (usually a [`MemKv`](super::MemKv)) in front of another.
//! Writes land in the buffer; [`BufferKv::flush`] moves everything buffered
//! to the backing store. Useful when the backing store only has to be
//! consistent at the end of a bulk load.
//!
//! ## Responsibilities
//! - Reads check the buffer first, then the backing store
//! - Range scans merge both stores, the buffer winning on equal keys
//! - Deletes go to both stores immediately
//! - A flush runs automatically once the buffered bytes pass a threshold

use std::cmp::Ordering;
use std::iter::Peekable;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::comparer::Comparer;
use crate::config::Options;
use crate::error::{Result, StrataError};

use super::{check_key_size, check_sizes, Batch, KvIter, Mutation, SortedKv};

/// [`SortedKv`] that buffers writes in front of a backing store
///
/// ## Concurrency:
/// - Get/Set/Delete/CommitBatch hold the flush lock shared
/// - `flush` holds it exclusively, so no write is lost between the copy to
///   the backing store and the purge of the buffer
/// - `find` takes no lock and may observe a flush in progress
pub struct BufferKv<B: SortedKv, S: SortedKv> {
    buffer: B,
    backing: S,
    /// Automatic flush threshold in key + value bytes; 0 disables it
    max_buffer_bytes: usize,
    buffered: Mutex<usize>,
    flush_lock: RwLock<()>,
    cmp: Arc<dyn Comparer>,
}

impl<B: SortedKv, S: SortedKv> BufferKv<B, S> {
    /// Buffer `backing` behind `buffer`, flushing once more than
    /// `max_buffer_bytes` have been written. 0 means flush only on demand.
    pub fn new(buffer: B, backing: S, max_buffer_bytes: usize) -> Self {
        Self::with_options(buffer, backing, max_buffer_bytes, &Options::default())
    }

    /// Like [`BufferKv::new`], merging scans in `options.comparer` order
    pub fn with_options(buffer: B, backing: S, max_buffer_bytes: usize, options: &Options) -> Self {
        Self {
            buffer,
            backing,
            max_buffer_bytes,
            buffered: Mutex::new(0),
            flush_lock: RwLock::new(()),
            cmp: Arc::clone(&options.comparer),
        }
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn backing(&self) -> &S {
        &self.backing
    }

    /// Key and value bytes written since the last flush
    pub fn buffered_bytes(&self) -> usize {
        *self.buffered.lock()
    }

    /// Move every buffered entry to the backing store
    pub fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.write();
        let mut to_backing = self.backing.begin_batch();
        let mut to_buffer = self.buffer.begin_batch();
        for entry in self.buffer.find(&[], &[])? {
            let (key, value) = entry?;
            to_backing.set(&key, &value);
            to_buffer.delete(&key);
        }
        if to_backing.is_empty() {
            return Ok(());
        }

        let count = to_backing.len();
        self.backing.commit_batch(to_backing)?;
        self.buffer.commit_batch(to_buffer)?;
        *self.buffered.lock() = 0;
        tracing::debug!("Flushed {} buffered entries", count);
        Ok(())
    }

    /// Account for `bytes` more buffered data and flush if over the threshold.
    fn note_buffered(&self, bytes: usize) -> Result<()> {
        let due = {
            let mut buffered = self.buffered.lock();
            *buffered += bytes;
            self.max_buffer_bytes > 0 && *buffered > self.max_buffer_bytes
        };
        if due {
            self.flush()?;
        }
        Ok(())
    }
}

impl<B: SortedKv, S: SortedKv> SortedKv for BufferKv<B, S> {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let _guard = self.flush_lock.read();
        match self.buffer.get(key) {
            Err(StrataError::KeyNotFound) => self.backing.get(key),
            other => other,
        }
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_sizes(key, value)?;
        {
            let _guard = self.flush_lock.read();
            self.buffer.set(key, value)?;
        }
        self.note_buffered(key.len() + value.len())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        check_key_size(key)?;
        let _guard = self.flush_lock.read();
        let from_buffer = self.buffer.delete(key);
        let from_backing = self.backing.delete(key);
        from_buffer.and(from_backing)
    }

    fn find(&self, start: &[u8], end: &[u8]) -> Result<KvIter<'_>> {
        Ok(Box::new(MergeIter {
            buffer: self.buffer.find(start, end)?.peekable(),
            backing: self.backing.find(start, end)?.peekable(),
            cmp: Arc::clone(&self.cmp),
        }))
    }

    /// Sets and deletes go to the buffer in one batch; deletes also go to
    /// the backing store in a second one.
    fn commit_batch(&self, batch: Batch) -> Result<()> {
        let mutations = batch.into_mutations()?;
        let mut bytes = 0;
        {
            let _guard = self.flush_lock.read();
            let mut to_buffer = self.buffer.begin_batch();
            let mut to_backing: Option<Batch> = None;
            for mutation in &mutations {
                match mutation {
                    Mutation::Set { key, value } => {
                        to_buffer.set(key, value);
                        bytes += key.len() + value.len();
                    }
                    Mutation::Delete { key } => {
                        to_buffer.delete(key);
                        to_backing
                            .get_or_insert_with(|| self.backing.begin_batch())
                            .delete(key);
                    }
                }
            }
            self.buffer.commit_batch(to_buffer)?;
            if let Some(to_backing) = to_backing {
                self.backing.commit_batch(to_backing)?;
            }
        }
        self.note_buffered(bytes)
    }

    /// Flush, then close both stores
    fn close(&self) -> Result<()> {
        self.flush()?;
        self.buffer.close()?;
        self.backing.close()
    }
}

/// Ordered merge of the buffer's and the backing store's scans
struct MergeIter<'a> {
    buffer: Peekable<KvIter<'a>>,
    backing: Peekable<KvIter<'a>>,
    cmp: Arc<dyn Comparer>,
}

/// Which side the next entry comes from
enum Side {
    Buffer,
    Backing,
    /// Same key on both sides: the buffer's value wins
    Both,
}

impl Iterator for MergeIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let side = match (self.buffer.peek(), self.backing.peek()) {
            (None, None) => return None,
            (Some(_), None) | (Some(Err(_)), _) => Side::Buffer,
            (None, Some(_)) | (_, Some(Err(_))) => Side::Backing,
            (Some(Ok((a, _))), Some(Ok((b, _)))) => match self.cmp.compare(a, b) {
                Ordering::Less => Side::Buffer,
                Ordering::Greater => Side::Backing,
                Ordering::Equal => Side::Both,
            },
        };
        match side {
            Side::Buffer => self.buffer.next(),
            Side::Backing => self.backing.next(),
            Side::Both => {
                self.backing.next();
                self.buffer.next()
            }
        }
    }
}
