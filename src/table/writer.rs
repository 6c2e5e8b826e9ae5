//! Table Writer
//!
//! Streams sorted key/value entries into data blocks, then writes the
//! metaindex block, the index block and the footer on close.

use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::comparer::Comparer;
use crate::config::Options;
use crate::crc::Crc;
use crate::error::{Result, StrataError};

use super::block::BlockBuilder;
use super::compress::{compress, Compression};
use super::{BlockHandle, Footer, MAX_BLOCK_HANDLE_LEN};

/// Lifecycle of a table writer. Any failure is sticky.
#[derive(Debug)]
enum State {
    Open,
    Failed(StrataError),
    Closed,
}

/// Builds a table from entries supplied in strictly increasing key order
///
/// Not safe for concurrent use.
pub struct TableWriter<W: Write> {
    writer: BufWriter<W>,
    cmp: Arc<dyn Comparer>,
    block_size: usize,
    compression: Compression,
    state: State,

    /// Bytes handed to the sink so far; the offset of the next block
    offset: u64,
    entry_count: u64,
    data_blocks: u64,
    prev_key: Vec<u8>,

    data_block: BlockBuilder,
    index_block: BlockBuilder,
    /// Handle of the last finished data block, indexed once the next key
    /// (or close) bounds it
    pending: Option<BlockHandle>,
    /// Scratch space for index keys and handles
    scratch: Vec<u8>,
}

impl TableWriter<File> {
    /// Create (or truncate) the file at `path` and write a table to it
    pub fn create(path: &Path, options: &Options) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::new(file, options))
    }
}

impl<W: Write> TableWriter<W> {
    pub fn new(inner: W, options: &Options) -> Self {
        Self {
            writer: BufWriter::new(inner),
            cmp: Arc::clone(&options.comparer),
            block_size: options.block_size,
            compression: options.compression,
            state: State::Open,
            offset: 0,
            entry_count: 0,
            data_blocks: 0,
            prev_key: Vec::new(),
            data_block: BlockBuilder::new(options.block_restart_interval),
            // one restart point per index entry
            index_block: BlockBuilder::new(1),
            pending: None,
            scratch: Vec::with_capacity(MAX_BLOCK_HANDLE_LEN),
        }
    }

    fn check(&self) -> Result<()> {
        match &self.state {
            State::Open => Ok(()),
            State::Failed(err) => Err(err.clone()),
            State::Closed => Err(StrataError::Closed("table writer")),
        }
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.state = State::Failed(err.clone());
        }
        result
    }

    /// Add an entry. `key` must sort strictly after the previous key.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check()?;
        if self.entry_count > 0 && self.cmp.compare(&self.prev_key, key) != Ordering::Less {
            let err = StrataError::out_of_order(&self.prev_key, key);
            return self.track(Err(err));
        }

        self.index_pending(key);
        self.data_block.add(key, value);
        self.prev_key.clear();
        self.prev_key.extend_from_slice(key);
        self.entry_count += 1;

        if self.data_block.estimated_size() >= self.block_size {
            let result = self.finish_data_block();
            self.track(result)?;
        }
        Ok(())
    }

    /// Add the index entry for the pending block, keyed by a separator
    /// between its last key and `next_key` (a successor when `next_key` is
    /// empty).
    fn index_pending(&mut self, next_key: &[u8]) {
        let Some(handle) = self.pending.take() else {
            return;
        };
        self.scratch.clear();
        self.cmp
            .append_separator(&mut self.scratch, &self.prev_key, next_key);
        let sep_len = self.scratch.len();
        handle.encode_to(&mut self.scratch);
        let (sep, encoded) = self.scratch.split_at(sep_len);
        self.index_block.add(sep, encoded);
    }

    fn finish_data_block(&mut self) -> Result<()> {
        let handle = write_block(
            &mut self.writer,
            &mut self.offset,
            self.data_block.finish(),
            self.compression,
        )?;
        self.data_block.reset();
        self.data_blocks += 1;
        self.pending = Some(handle);
        Ok(())
    }

    /// Finish the table: flush the last data block, write the metaindex and
    /// index blocks and the footer, and flush the sink
    ///
    /// A table with no entries still gets one empty data block. The writer
    /// cannot be used again afterwards.
    pub fn close(&mut self) -> Result<()> {
        self.check()?;
        let result = self.write_tail();
        self.track(result)?;
        self.state = State::Closed;
        tracing::debug!(
            "Table written: {} entries in {} data blocks, {} bytes",
            self.entry_count,
            self.data_blocks,
            self.offset
        );
        Ok(())
    }

    fn write_tail(&mut self) -> Result<()> {
        // A block finished by the last `set` still needs its index entry.
        self.index_pending(&[]);
        if !self.data_block.is_empty() || self.data_blocks == 0 {
            self.finish_data_block()?;
            self.index_pending(&[]);
        }

        let mut metaindex_block = BlockBuilder::new(1);
        let metaindex = write_block(
            &mut self.writer,
            &mut self.offset,
            metaindex_block.finish(),
            self.compression,
        )?;
        let index = write_block(
            &mut self.writer,
            &mut self.offset,
            self.index_block.finish(),
            self.compression,
        )?;

        let footer = Footer { metaindex, index }.encode();
        self.writer.write_all(&footer)?;
        self.offset += footer.len() as u64;
        self.writer.flush()?;
        Ok(())
    }

    /// Number of entries added so far
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Bytes written to the sink so far (the file size once closed)
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    /// Unwrap the sink, for example to fsync it after [`TableWriter::close`]
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| StrataError::from(e.into_error()))
    }
}

/// Compress `raw`, write it with its trailer, and return its handle.
fn write_block<W: Write>(
    writer: &mut W,
    offset: &mut u64,
    raw: &[u8],
    compression: Compression,
) -> Result<BlockHandle> {
    let (kind, stored) = compress(raw, compression);
    let type_byte = u8::from(kind);
    let checksum = Crc::new(&stored).update(&[type_byte]).value();

    let mut trailer = [0u8; super::BLOCK_TRAILER_LEN];
    trailer[0] = type_byte;
    trailer[1..].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&stored)?;
    writer.write_all(&trailer)?;

    let handle = BlockHandle::new(*offset, stored.len() as u64);
    *offset = handle.end();
    Ok(handle)
}
