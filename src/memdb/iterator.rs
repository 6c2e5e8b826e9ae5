//! MemDb iterator
//!
//! Buffers a batch of upcoming live entries so that the memdb's lock is
//! taken once per batch rather than once per step.

use std::collections::VecDeque;

use super::skiplist::{NodeId, Skiplist, NIL};
use super::MemDb;

/// Number of entries fetched per refill.
const BATCH: usize = 32;

/// Iterator over live entries of a [`MemDb`] in key order.
///
/// Mutations made while the iterator is alive may or may not be observed:
/// each refill sees the memdb as it is at that moment.
pub struct MemDbIter<'a> {
    db: &'a MemDb,
    /// Node to resume the next refill from.
    restart: NodeId,
    buf: VecDeque<(Vec<u8>, Vec<u8>)>,
}

impl<'a> MemDbIter<'a> {
    /// Precondition: `list` is the locked skiplist of `db`.
    pub(super) fn new(db: &'a MemDb, list: &Skiplist, start: NodeId) -> Self {
        let mut iter = Self {
            db,
            restart: start,
            buf: VecDeque::with_capacity(BATCH),
        };
        iter.fill(list);
        iter
    }

    fn fill(&mut self, list: &Skiplist) {
        let mut n = self.restart;
        while self.buf.len() < BATCH && n != NIL {
            if let Some(value) = list.value(n) {
                self.buf.push_back((list.key(n).to_vec(), value.to_vec()));
            }
            n = list.next(n, 0);
        }
        self.restart = n;
    }
}

impl Iterator for MemDbIter<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.buf.pop_front() {
            return Some(entry);
        }
        if self.restart == NIL {
            return None;
        }
        let db = self.db;
        let list = db.list.read();
        self.fill(&list);
        self.buf.pop_front()
    }
}
