//! Read-only sorted store over a table

use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::table::{RandomAccess, TableReader};

use super::{bounded, Batch, KvIter, SortedKv};

impl<F: RandomAccess> SortedKv for TableReader<F> {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        TableReader::get(self, key).map(|value| value.to_vec())
    }

    fn set(&self, _key: &[u8], _value: &[u8]) -> Result<()> {
        Err(StrataError::ReadOnly("table"))
    }

    fn delete(&self, _key: &[u8]) -> Result<()> {
        Err(StrataError::ReadOnly("table"))
    }

    fn find(&self, start: &[u8], end: &[u8]) -> Result<KvIter<'_>> {
        let iter = TableReader::find(self, start)?
            .map(|entry| entry.map(|(key, value)| (key.to_vec(), value.to_vec())));
        Ok(bounded(iter, end, Arc::clone(self.comparer())))
    }

    fn commit_batch(&self, _batch: Batch) -> Result<()> {
        Err(StrataError::ReadOnly("table"))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
