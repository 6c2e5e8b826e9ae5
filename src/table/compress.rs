//! Block compression

use bytes::Bytes;

use crate::error::{Result, StrataError};

/// Compression applied to a table block. The discriminant is the type byte
/// stored in the block trailer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    None = 0,
    #[default]
    Lz4 = 4,
}

impl Compression {
    pub fn is_none(&self) -> bool {
        matches!(self, Compression::None)
    }
}

impl TryFrom<u8> for Compression {
    type Error = StrataError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Compression::None),
            4 => Ok(Compression::Lz4),
            _ => Err(StrataError::corruption(format!(
                "unknown block compression type {value}"
            ))),
        }
    }
}

impl From<Compression> for u8 {
    fn from(value: Compression) -> Self {
        value as u8
    }
}

/// Compress `raw`, keeping the result only if it is at least 12.5% smaller.
///
/// Returns the compression actually applied and the bytes to store.
pub(crate) fn compress(raw: &[u8], compression: Compression) -> (Compression, Vec<u8>) {
    match compression {
        Compression::None => (Compression::None, raw.to_vec()),
        Compression::Lz4 => {
            let compressed = lz4_flex::compress_prepend_size(raw);
            if compressed.len() < raw.len() - raw.len() / 8 {
                (Compression::Lz4, compressed)
            } else {
                (Compression::None, raw.to_vec())
            }
        }
    }
}

/// Undo [`compress`] on a stored block body.
pub(crate) fn decompress(stored: Bytes, compression: Compression) -> Result<Bytes> {
    match compression {
        Compression::None => Ok(stored),
        Compression::Lz4 => lz4_flex::decompress_size_prepended(&stored)
            .map(Bytes::from)
            .map_err(|e| StrataError::corruption(format!("bad lz4 block: {e}"))),
    }
}
