//! Masked CRC32 checksums
//!
//! Both the record format and the table format store checksums computed
//! here. The raw CRC32 is masked before it is stored, because computing the
//! CRC of a string that itself contains embedded CRCs is problematic.

use crc32fast::Hasher;

/// Added to the rotated CRC when masking.
const MASK_DELTA: u32 = 0xa282_ead8;

/// A running (unmasked) CRC32.
///
/// `Crc::new(a).update(b)` equals `Crc::new(ab)`, which lets a block's
/// compression-type byte be folded into the block body's checksum without
/// copying the two into one buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc(u32);

impl Crc {
    /// CRC of `bytes`.
    pub fn new(bytes: &[u8]) -> Self {
        Crc(0).update(bytes)
    }

    /// Extend the running CRC with more bytes.
    pub fn update(self, bytes: &[u8]) -> Self {
        let mut hasher = Hasher::new_with_initial(self.0);
        hasher.update(bytes);
        Crc(hasher.finalize())
    }

    /// The masked value, as stored on disk.
    pub fn value(self) -> u32 {
        self.0.rotate_right(15).wrapping_add(MASK_DELTA)
    }
}

/// Masked checksum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u32 {
    Crc::new(bytes).value()
}

/// Continue a running CRC with more bytes.
pub fn update(running: Crc, bytes: &[u8]) -> Crc {
    running.update(bytes)
}

/// Inverse of the masking step in [`Crc::value`].
pub fn unmask(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}
