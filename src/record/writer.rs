//! Record Writer
//!
//! Buffers one block at a time and writes it to the sink when it fills.

use std::io::{self, Write};

use crate::crc::Crc;
use crate::error::{Result, StrataError};

use super::{ChunkType, BLOCK_SIZE, HEADER_SIZE};

/// Lifecycle of a writer. Any failure is sticky.
#[derive(Debug)]
enum State {
    Open,
    Failed(StrataError),
    Closed,
}

/// Writes records to an underlying sink
///
/// Call [`Writer::next`] to start a record and write its payload through the
/// returned handle. Starting the next record, [`Writer::flush`] or
/// [`Writer::close`] finishes the current one.
///
/// Not safe for concurrent use; wrap it in a lock if several threads append.
pub struct Writer<W: Write> {
    inner: W,
    /// `buf[i..j]` is the chunk being built, header included.
    i: usize,
    j: usize,
    /// `buf[..written]` has already been handed to `inner`.
    /// Non-zero only after a flush in the middle of a block.
    written: usize,
    /// Whether the chunk being built is the first of its record.
    first: bool,
    /// Whether a chunk is buffered whose header is not yet filled in.
    pending: bool,
    state: State,
    buf: Box<[u8; BLOCK_SIZE]>,
}

impl<W: Write> Writer<W> {
    /// Create a writer that starts at the beginning of a fresh stream
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            i: 0,
            j: 0,
            written: 0,
            first: false,
            pending: false,
            state: State::Open,
            buf: Box::new([0; BLOCK_SIZE]),
        }
    }

    fn check(&self) -> Result<()> {
        match &self.state {
            State::Open => Ok(()),
            State::Failed(err) => Err(err.clone()),
            State::Closed => Err(StrataError::Closed("record writer")),
        }
    }

    /// Record `result`'s error as the sticky state.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.state = State::Failed(err.clone());
        }
        result
    }

    /// Fill in the header of the buffered chunk.
    fn fill_header(&mut self, last: bool) {
        assert!(
            self.i + HEADER_SIZE <= self.j && self.j <= BLOCK_SIZE,
            "record writer: bad chunk bounds {}..{}",
            self.i,
            self.j
        );
        let chunk_type = match (self.first, last) {
            (true, true) => ChunkType::Full,
            (true, false) => ChunkType::First,
            (false, true) => ChunkType::Last,
            (false, false) => ChunkType::Middle,
        };
        let (i, j) = (self.i, self.j);
        self.buf[i + 6] = chunk_type as u8;
        let checksum = Crc::new(&self.buf[i + 6..j]).value();
        self.buf[i..i + 4].copy_from_slice(&checksum.to_le_bytes());
        let len = (j - i - HEADER_SIZE) as u16;
        self.buf[i + 4..i + 6].copy_from_slice(&len.to_le_bytes());
    }

    /// Write out the rest of the buffered block and reserve the next
    /// chunk's header at the start of a fresh block.
    fn write_block(&mut self) -> Result<()> {
        let result = self
            .inner
            .write_all(&self.buf[self.written..])
            .map_err(StrataError::from);
        self.i = 0;
        self.j = HEADER_SIZE;
        self.written = 0;
        self.track(result)
    }

    /// Finish the current record and hand everything buffered to `inner`.
    fn write_pending(&mut self) -> Result<()> {
        self.check()?;
        if self.pending {
            self.fill_header(true);
            self.pending = false;
        }
        let result = self
            .inner
            .write_all(&self.buf[self.written..self.j])
            .map_err(StrataError::from);
        self.written = self.j;
        self.track(result)
    }

    /// Start a new record, finishing the current one
    ///
    /// The returned handle borrows the writer, so it cannot outlive the
    /// record it writes.
    pub fn next(&mut self) -> Result<RecordWriter<'_, W>> {
        self.check()?;
        if self.pending {
            self.fill_header(true);
        }
        self.i = self.j;
        self.j += HEADER_SIZE;
        // No room for a header: zero the tail and move to a fresh block.
        if self.j > BLOCK_SIZE {
            self.buf[self.i..].fill(0);
            self.write_block()?;
        }
        self.first = true;
        self.pending = true;
        Ok(RecordWriter { w: self })
    }

    /// Write `payload` as one complete record
    pub fn append(&mut self, payload: &[u8]) -> Result<()> {
        self.next()?.write_payload(payload)
    }

    fn write_payload(&mut self, mut payload: &[u8]) -> Result<()> {
        self.check()?;
        while !payload.is_empty() {
            // The block is full: close the chunk and carry on in the next.
            if self.j == BLOCK_SIZE {
                self.fill_header(false);
                self.write_block()?;
                self.first = false;
            }
            let n = (BLOCK_SIZE - self.j).min(payload.len());
            self.buf[self.j..self.j + n].copy_from_slice(&payload[..n]);
            self.j += n;
            payload = &payload[n..];
        }
        Ok(())
    }

    /// Finish the current record and flush the sink
    ///
    /// No new record is started; call [`Writer::next`] for that.
    pub fn flush(&mut self) -> Result<()> {
        self.write_pending()?;
        let result = self.inner.flush().map_err(StrataError::from);
        self.track(result)
    }

    /// Finish the final record, flush the sink, and invalidate the writer
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.state = State::Closed;
        Ok(())
    }

    /// The underlying sink
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Unwrap the sink. Buffered data not yet flushed is discarded.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Handle for writing the payload of one record
pub struct RecordWriter<'a, W: Write> {
    w: &'a mut Writer<W>,
}

impl<W: Write> RecordWriter<'_, W> {
    /// Append bytes to this record's payload
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        self.w.write_payload(payload)
    }
}

impl<W: Write> Write for RecordWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.w.write_payload(buf)?;
        Ok(buf.len())
    }

    /// Chunks reach the sink when blocks fill or the record is finished;
    /// use [`Writer::flush`] to force them out.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
