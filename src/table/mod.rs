//! Table Module
//!
//! Immutable on-disk sorted key/value files, written once in key order and
//! then read by any number of threads.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Data Block 0 .. Data Block n-1                                │
//! │   entries: [shared][unshared][value_len] (varints)            │
//! │            [key suffix][value]                                │
//! │   restarts: [offset: u32 le]* [count: u32 le]                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Metaindex Block (always empty)                                │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Index Block: separator key → varint(offset) varint(length)    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Footer (48 bytes)                                             │
//! │   metaindex handle | index handle | zero padding | magic (8)  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every block is followed by a 5 byte trailer: the compression type byte
//! and a masked CRC32 (u32 le) over the stored block bytes plus that type
//! byte. A block handle's length excludes the trailer.

mod block;
mod compress;
mod iterator;
mod reader;
mod writer;

use std::fs::File;
use std::io;

use bytes::Bytes;

use crate::coding::{get_uvarint, put_uvarint, MAX_VARINT_LEN64};
use crate::error::{Result, StrataError};

pub use compress::Compression;
pub use iterator::TableIterator;
pub use reader::{BlockInfo, TableReader};
pub use writer::TableWriter;

// =============================================================================
// Shared Constants (used by writer, reader, iterator)
// =============================================================================

/// Trailing magic bytes identifying a table file
pub const MAGIC: &[u8; 8] = b"\x57\xfb\x80\x8b\x24\x75\x47\xdb";

/// Footer size: two padded block handles + magic
pub const FOOTER_LEN: usize = 48;

/// Block trailer size: compression type (1) + checksum (4)
pub const BLOCK_TRAILER_LEN: usize = 5;

/// Longest encoding of a block handle: two varint u64s
pub(crate) const MAX_BLOCK_HANDLE_LEN: usize = 2 * MAX_VARINT_LEN64;

// =============================================================================
// Block Handle
// =============================================================================

/// Location of a block within a table file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    /// File offset of the block's first byte
    pub offset: u64,
    /// Stored block length, excluding the trailer
    pub length: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Append the varint encoding of this handle to `dst`
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_uvarint(dst, self.offset);
        put_uvarint(dst, self.length);
    }

    /// Decode a handle from the start of `src`, returning it and the number
    /// of bytes consumed
    pub fn decode(src: &[u8]) -> Result<(Self, usize)> {
        let (offset, n) = get_uvarint(src)
            .map_err(|_| StrataError::corruption("bad block handle offset"))?;
        let (length, m) = get_uvarint(&src[n..])
            .map_err(|_| StrataError::corruption("bad block handle length"))?;
        Ok((Self { offset, length }, n + m))
    }

    /// Offset one past this block's trailer
    pub(crate) fn end(&self) -> u64 {
        self.offset + self.length + BLOCK_TRAILER_LEN as u64
    }
}

// =============================================================================
// Footer
// =============================================================================

/// Fixed-size tail of a table file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Footer {
    pub metaindex: BlockHandle,
    pub index: BlockHandle,
}

impl Footer {
    pub fn encode(&self) -> [u8; FOOTER_LEN] {
        let mut handles = Vec::with_capacity(2 * MAX_BLOCK_HANDLE_LEN);
        self.metaindex.encode_to(&mut handles);
        self.index.encode_to(&mut handles);
        let mut out = [0u8; FOOTER_LEN];
        out[..handles.len()].copy_from_slice(&handles);
        out[FOOTER_LEN - MAGIC.len()..].copy_from_slice(MAGIC);
        out
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() != FOOTER_LEN {
            return Err(StrataError::corruption("bad footer length"));
        }
        if &src[FOOTER_LEN - MAGIC.len()..] != MAGIC {
            return Err(StrataError::corruption("bad magic number"));
        }
        let handles = &src[..FOOTER_LEN - MAGIC.len()];
        let (metaindex, n) = BlockHandle::decode(handles)?;
        let (index, _) = BlockHandle::decode(&handles[n..])?;
        Ok(Self { metaindex, index })
    }
}

// =============================================================================
// Random Access Sources
// =============================================================================

/// Positional reads from an immutable source
///
/// Reads take `&self` so one open table can serve many threads at once.
pub trait RandomAccess: Send + Sync {
    /// Fill `buf` with the bytes starting at `offset`
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;

    /// Total size in bytes
    fn size(&self) -> io::Result<u64>;
}

impl RandomAccess for File {
    #[cfg(unix)]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            match self.seek_read(buf, offset) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

fn read_slice_at(src: &[u8], buf: &mut [u8], offset: u64) -> io::Result<()> {
    let start = usize::try_from(offset).map_err(|_| io::ErrorKind::UnexpectedEof)?;
    let bytes = start
        .checked_add(buf.len())
        .and_then(|end| src.get(start..end))
        .ok_or(io::ErrorKind::UnexpectedEof)?;
    buf.copy_from_slice(bytes);
    Ok(())
}

impl RandomAccess for Vec<u8> {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        read_slice_at(self, buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl RandomAccess for Bytes {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        read_slice_at(self, buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}
