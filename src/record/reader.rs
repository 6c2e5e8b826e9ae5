//! Record Reader
//!
//! Reads records back one block at a time, validating every chunk.
//!
//! ## Recovery
//! By default a damaged chunk (bad checksum, length running past the end of
//! its block, unknown type) costs the rest of its block: the reader counts
//! the block as skipped, logs a warning, and looks for the next `Full` or
//! `First` chunk in the following block. A record whose continuation is
//! damaged fails on its own; the next call to [`Reader::next`] carries on.
//! [`Reader::strict`] turns this off and makes the first damage fatal,
//! including continuation chunks that follow no record start.

use std::io::{self, Read};

use crate::crc::Crc;
use crate::error::{Result, StrataError};

use super::{ChunkType, BLOCK_SIZE, HEADER_SIZE};

#[derive(Debug)]
enum State {
    Reading,
    Eof,
    Failed(StrataError),
}

/// Why no chunk could be produced.
enum ChunkError {
    /// Damage confined to the current block.
    Damaged(StrataError),
    /// A record start appeared while continuing a record. The reader is
    /// rewound so that chunk begins the next record.
    Interrupted,
    /// Clean end of the stream.
    End,
    /// I/O failure or a torn final block.
    Fatal(StrataError),
}

/// Reads records from an underlying source
///
/// Not safe for concurrent use.
pub struct Reader<R: Read> {
    inner: R,
    /// `buf[i..j]` is the unread part of the current chunk's payload.
    i: usize,
    j: usize,
    /// Valid bytes in `buf`. Once reading has started only the final block
    /// can be short.
    n: usize,
    /// Whether `next` has produced a record yet.
    started: bool,
    /// Whether the current chunk ends its record.
    last: bool,
    recover: bool,
    skipped_blocks: u64,
    state: State,
    /// Error of the current record after recoverable damage.
    record_err: Option<StrataError>,
    buf: Box<[u8; BLOCK_SIZE]>,
}

impl<R: Read> Reader<R> {
    /// Create a reader that skips damaged blocks
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            i: 0,
            j: 0,
            n: 0,
            started: false,
            last: false,
            recover: true,
            skipped_blocks: 0,
            state: State::Reading,
            record_err: None,
            buf: Box::new([0; BLOCK_SIZE]),
        }
    }

    /// Fail the whole stream on the first damaged chunk instead of skipping
    pub fn strict(mut self) -> Self {
        self.recover = false;
        self
    }

    /// Number of blocks abandoned because of damage
    pub fn skipped_blocks(&self) -> u64 {
        self.skipped_blocks
    }

    fn fail(&mut self, err: StrataError) -> StrataError {
        self.state = State::Failed(err.clone());
        err
    }

    fn skip_block(&mut self, err: &StrataError) {
        tracing::warn!("record stream damaged, skipping rest of block: {}", err);
        self.skipped_blocks += 1;
        self.i = self.n;
        self.j = self.n;
    }

    /// Position `buf[i..j]` on the next chunk's payload, reading the next
    /// block when the current one is used up.
    fn next_chunk(&mut self, want_first: bool) -> std::result::Result<(), ChunkError> {
        loop {
            if self.j + HEADER_SIZE <= self.n {
                let start = self.j;
                let header = &self.buf[start..start + HEADER_SIZE];
                let checksum = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
                let length = u16::from_le_bytes([header[4], header[5]]) as usize;
                let type_byte = header[6];

                self.i = start + HEADER_SIZE;
                self.j = self.i + length;
                if self.j > self.n {
                    return Err(ChunkError::Damaged(StrataError::corruption(
                        "record chunk length overflows block",
                    )));
                }
                if checksum != Crc::new(&self.buf[self.i - 1..self.j]).value() {
                    return Err(ChunkError::Damaged(StrataError::ChecksumMismatch(
                        "record chunk".to_string(),
                    )));
                }

                let chunk_type = match (ChunkType::from_byte(type_byte), want_first) {
                    (Some(t), true) if t.starts_record() => t,
                    // Leftovers of an abandoned record.
                    (_, true) if self.recover => continue,
                    (Some(_), true) => {
                        return Err(ChunkError::Damaged(StrataError::corruption(
                            "record continuation without a start",
                        )));
                    }
                    (Some(t), false) if !t.starts_record() => t,
                    (Some(_), false) => {
                        self.i = start;
                        self.j = start;
                        return Err(ChunkError::Interrupted);
                    }
                    (None, _) => {
                        return Err(ChunkError::Damaged(StrataError::corruption(format!(
                            "unknown record chunk type {type_byte}"
                        ))));
                    }
                };
                self.last = chunk_type.ends_record();
                return Ok(());
            }

            if self.n < BLOCK_SIZE && self.started {
                if self.j != self.n {
                    return Err(ChunkError::Fatal(StrataError::UnexpectedEof));
                }
                return Err(ChunkError::End);
            }

            let n = read_full(&mut self.inner, &mut self.buf[..])
                .map_err(|e| ChunkError::Fatal(e.into()))?;
            if n == 0 {
                return Err(ChunkError::End);
            }
            self.i = 0;
            self.j = 0;
            self.n = n;
        }
    }

    /// Advance to the next record
    ///
    /// Returns `Ok(None)` at the end of the stream. Any unread part of the
    /// previous record is skipped.
    pub fn next(&mut self) -> Result<Option<RecordReader<'_, R>>> {
        match &self.state {
            State::Failed(err) => return Err(err.clone()),
            State::Eof => return Ok(None),
            State::Reading => {}
        }
        if !self.recover && self.started {
            // Walk past what the caller left unread of the previous record.
            while self.fill()? {
                self.i = self.j;
            }
        }
        self.record_err = None;
        self.i = self.j;
        loop {
            match self.next_chunk(true) {
                Ok(()) => break,
                Err(ChunkError::Damaged(err)) if self.recover => self.skip_block(&err),
                Err(ChunkError::Damaged(err)) | Err(ChunkError::Fatal(err)) => {
                    return Err(self.fail(err));
                }
                Err(ChunkError::End) => {
                    self.state = State::Eof;
                    return Ok(None);
                }
                Err(ChunkError::Interrupted) => {
                    unreachable!("only record continuations can be interrupted")
                }
            }
        }
        self.started = true;
        Ok(Some(RecordReader { r: self }))
    }

    /// Read the next record in full
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        match self.next()? {
            Some(mut record) => record.read_all().map(Some),
            None => Ok(None),
        }
    }

    /// Make sure unread payload is available, loading continuation chunks.
    /// Returns false at the end of the current record.
    fn fill(&mut self) -> Result<bool> {
        if let State::Failed(err) = &self.state {
            return Err(err.clone());
        }
        if let Some(err) = &self.record_err {
            return Err(err.clone());
        }
        while self.i == self.j {
            if self.last {
                return Ok(false);
            }
            match self.next_chunk(false) {
                Ok(()) => {}
                Err(ChunkError::Damaged(err)) if self.recover => {
                    self.skip_block(&err);
                    self.record_err = Some(err.clone());
                    return Err(err);
                }
                Err(ChunkError::Interrupted) => {
                    let err = StrataError::corruption("record interrupted by the start of another");
                    if self.recover {
                        tracing::warn!("dropping partial record: {}", err);
                        self.record_err = Some(err.clone());
                        return Err(err);
                    }
                    return Err(self.fail(err));
                }
                Err(ChunkError::End) => return Err(self.fail(StrataError::UnexpectedEof)),
                Err(ChunkError::Damaged(err)) | Err(ChunkError::Fatal(err)) => {
                    return Err(self.fail(err));
                }
            }
        }
        Ok(true)
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Read until `buf` is full or the source is exhausted.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Handle for reading the payload of one record
pub struct RecordReader<'a, R: Read> {
    r: &'a mut Reader<R>,
}

impl<R: Read> RecordReader<'_, R> {
    /// Read the rest of the record
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while self.r.fill()? {
            let r = &mut *self.r;
            out.extend_from_slice(&r.buf[r.i..r.j]);
            r.i = r.j;
        }
        Ok(out)
    }
}

impl<R: Read> Read for RecordReader<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() || !self.r.fill()? {
            return Ok(0);
        }
        let r = &mut *self.r;
        let n = out.len().min(r.j - r.i);
        out[..n].copy_from_slice(&r.buf[r.i..r.i + n]);
        r.i += n;
        Ok(n)
    }
}
