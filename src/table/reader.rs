//! Table Reader
//!
//! Opens table files and serves point lookups and range scans through the
//! in-memory index block.

use std::cmp::Ordering;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::comparer::Comparer;
use crate::config::Options;
use crate::crc::Crc;
use crate::error::{Result, StrataError};

use super::block::Block;
use super::compress::{decompress, Compression};
use super::iterator::TableIterator;
use super::{BlockHandle, Footer, RandomAccess, BLOCK_TRAILER_LEN, FOOTER_LEN};

/// Layout of one data block, as recorded in the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// Index key: >= every key in the block, < every key in the next
    pub key: Bytes,
    pub handle: BlockHandle,
    /// Compression the block was stored with
    pub compression: Compression,
}

/// Reader for table files
///
/// ## Concurrency:
/// All methods take `&self`; one reader can serve lookups and scans from
/// many threads at once. Each iterator belongs to one thread.
pub struct TableReader<F: RandomAccess = File> {
    file: F,
    cmp: Arc<dyn Comparer>,
    verify_checksums: bool,
    /// Offset where the footer starts; no block may extend past it
    data_end: u64,
    index: Block,
}

impl TableReader<File> {
    /// Open the table file at `path`
    pub fn open_path(path: &Path, options: &Options) -> Result<Self> {
        let file = File::open(path)?;
        Self::open(file, options)
    }
}

impl<F: RandomAccess> TableReader<F> {
    /// Open a table, validating its footer and loading the index block
    ///
    /// The table must have been written with the same comparer as
    /// `options.comparer`.
    pub fn open(file: F, options: &Options) -> Result<Self> {
        let size = file.size()?;
        if size < FOOTER_LEN as u64 {
            return Err(StrataError::corruption(format!(
                "file too short for a table: {size} bytes"
            )));
        }
        let data_end = size - FOOTER_LEN as u64;
        let mut footer = [0u8; FOOTER_LEN];
        file.read_exact_at(&mut footer, data_end)?;
        let footer = Footer::decode(&footer)?;

        // The metaindex carries nothing yet, but it must be where the footer says.
        check_handle(&footer.metaindex, data_end)?;
        let index = read_block(&file, &footer.index, data_end, options.verify_checksums)?;

        tracing::debug!(
            "Opened table: {} bytes, index block {} bytes at offset {}",
            size,
            footer.index.length,
            footer.index.offset
        );

        Ok(Self {
            file,
            cmp: Arc::clone(&options.comparer),
            verify_checksums: options.verify_checksums,
            data_end,
            index,
        })
    }

    /// The comparer ordering this table
    pub fn comparer(&self) -> &Arc<dyn Comparer> {
        &self.cmp
    }

    pub(super) fn index_block(&self) -> &Block {
        &self.index
    }

    /// Read the data block an index entry points at
    pub(super) fn data_block(&self, encoded_handle: &[u8]) -> Result<Block> {
        let (handle, _) = BlockHandle::decode(encoded_handle)?;
        read_block(&self.file, &handle, self.data_end, self.verify_checksums)
    }

    /// Get the value stored for `key`
    ///
    /// Returns `Err(KeyNotFound)` if the table has no entry for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        match self.find(key)?.next() {
            Some(Ok((k, v))) if self.cmp.compare(&k, key) == Ordering::Equal => Ok(v),
            Some(Err(err)) => Err(err),
            _ => Err(StrataError::KeyNotFound),
        }
    }

    /// Iterate from the first entry whose key is >= `key` to the end of
    /// the table. An empty `key` starts at the beginning.
    pub fn find(&self, key: &[u8]) -> Result<TableIterator<'_, F>> {
        TableIterator::new(self, key)
    }

    /// Iterate the whole table
    pub fn iter(&self) -> Result<TableIterator<'_, F>> {
        self.find(&[])
    }

    /// List the data blocks in key order
    pub fn blocks(&self) -> Result<Vec<BlockInfo>> {
        let mut blocks = Vec::new();
        for entry in self.index.iter() {
            let (key, encoded) = entry?;
            let (handle, _) = BlockHandle::decode(&encoded)?;
            check_handle(&handle, self.data_end)?;
            let mut type_byte = [0u8; 1];
            self.file
                .read_exact_at(&mut type_byte, handle.offset + handle.length)?;
            blocks.push(BlockInfo {
                key,
                handle,
                compression: Compression::try_from(type_byte[0])?,
            });
        }
        Ok(blocks)
    }

    /// Size of the table in bytes
    pub fn size(&self) -> u64 {
        self.data_end + FOOTER_LEN as u64
    }

    /// Close the table. Iterators borrow the reader, so none can outlive it.
    pub fn close(self) -> Result<()> {
        tracing::debug!("Closed table of {} bytes", self.size());
        Ok(())
    }
}

/// Check that `handle` plus its trailer lies before `data_end`.
fn check_handle(handle: &BlockHandle, data_end: u64) -> Result<()> {
    let end = handle
        .offset
        .checked_add(handle.length)
        .and_then(|n| n.checked_add(BLOCK_TRAILER_LEN as u64));
    match end {
        Some(end) if end <= data_end => Ok(()),
        _ => Err(StrataError::corruption(format!(
            "block handle {}+{} out of range",
            handle.offset, handle.length
        ))),
    }
}

/// Read, verify and decompress the block at `handle`.
fn read_block<F: RandomAccess>(
    file: &F,
    handle: &BlockHandle,
    data_end: u64,
    verify_checksums: bool,
) -> Result<Block> {
    check_handle(handle, data_end)?;
    let len = handle.length as usize;
    let mut buf = vec![0u8; len + BLOCK_TRAILER_LEN];
    file.read_exact_at(&mut buf, handle.offset)?;

    if verify_checksums {
        let stored = u32::from_le_bytes([buf[len + 1], buf[len + 2], buf[len + 3], buf[len + 4]]);
        // covers the block body and the type byte
        if Crc::new(&buf[..len + 1]).value() != stored {
            return Err(StrataError::ChecksumMismatch(format!(
                "block at offset {}",
                handle.offset
            )));
        }
    }

    let compression = Compression::try_from(buf[len])?;
    buf.truncate(len);
    Block::new(decompress(Bytes::from(buf), compression)?)
}
