//! Record Module
//!
//! Frames a sequence of variable-length records into fixed-size blocks of
//! checksummed chunks, for append-only logs.
//!
//! ## Responsibilities
//! - Split records into chunks that never cross a block boundary
//! - Checksum every chunk so damage is detected per chunk
//! - Keep records in write order
//! - Skip damaged blocks while reading instead of losing the whole stream
//!
//! ## File Format
//! ```text
//! ┌──────────────────────── block (32 KiB) ─────────────────────────┐
//! │ ┌─────────┬─────────┬──────────┬─────────┐                      │
//! │ │ CRC (4) │ Len (2) │ Type (1) │ Payload │ ... more chunks ...  │
//! │ └─────────┴─────────┴──────────┴─────────┘   zero padding (<7)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The CRC covers the type byte and the payload. A record is either one
//! `Full` chunk, or a `First` chunk, any number of `Middle` chunks and a
//! `Last` chunk. The final block of a stream may be short.

mod reader;
mod writer;

pub use reader::{Reader, RecordReader};
pub use writer::{RecordWriter, Writer};

/// Size of a physical block
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Chunk header: checksum (4) + length (2) + type (1)
pub const HEADER_SIZE: usize = 7;

/// Chunk types. These values are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

impl ChunkType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(ChunkType::Full),
            2 => Some(ChunkType::First),
            3 => Some(ChunkType::Middle),
            4 => Some(ChunkType::Last),
            _ => None,
        }
    }

    /// Whether a record may begin with this chunk.
    fn starts_record(self) -> bool {
        matches!(self, ChunkType::Full | ChunkType::First)
    }

    /// Whether a record ends with this chunk.
    fn ends_record(self) -> bool {
        matches!(self, ChunkType::Full | ChunkType::Last)
    }
}
