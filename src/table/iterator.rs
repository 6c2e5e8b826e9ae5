//! Table Iterator
//!
//! Two-level iteration: an index block iterator picks data blocks, and one
//! data block iterator at a time yields their entries.

use std::fs::File;

use bytes::Bytes;

use crate::error::Result;

use super::block::BlockIter;
use super::reader::TableReader;
use super::RandomAccess;

/// Iterator over table entries in key order
///
/// Yields `Err` at most once; iteration ends after an error.
pub struct TableIterator<'a, F: RandomAccess = File> {
    reader: &'a TableReader<F>,
    index: BlockIter,
    /// Iterator over the current data block; `None` once exhausted
    data: Option<BlockIter>,
}

impl<'a, F: RandomAccess> TableIterator<'a, F> {
    /// Position at the first entry whose key is >= `key`
    pub(super) fn new(reader: &'a TableReader<F>, key: &[u8]) -> Result<Self> {
        let cmp = reader.comparer().as_ref();
        let mut index = reader.index_block().seek(cmp, key)?;
        let data = match index.next() {
            Some(entry) => {
                let (_, handle) = entry?;
                Some(reader.data_block(&handle)?.seek(cmp, key)?)
            }
            None => None,
        };
        Ok(Self {
            reader,
            index,
            data,
        })
    }

    /// Move to the start of the next data block. Returns false at the end
    /// of the index.
    fn next_block(&mut self) -> Result<bool> {
        let Some(entry) = self.index.next() else {
            return Ok(false);
        };
        let (_, handle) = entry?;
        self.data = Some(self.reader.data_block(&handle)?.iter());
        Ok(true)
    }
}

impl<F: RandomAccess> Iterator for TableIterator<'_, F> {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.data.as_mut()?.next() {
                Some(Ok(entry)) => return Some(Ok(entry)),
                Some(Err(err)) => {
                    self.data = None;
                    return Some(Err(err));
                }
                None => {}
            }
            match self.next_block() {
                Ok(true) => {}
                Ok(false) => {
                    self.data = None;
                    return None;
                }
                Err(err) => {
                    self.data = None;
                    return Some(Err(err));
                }
            }
        }
    }
}
