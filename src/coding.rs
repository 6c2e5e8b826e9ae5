//! Varint and fixed-width integer helpers shared by the table and record formats.

use bytes::BufMut;

use crate::error::{Result, StrataError};

/// Longest LEB128 encoding of a u64.
pub(crate) const MAX_VARINT_LEN64: usize = 10;

/// Append `v` as an unsigned LEB128 varint, returning the bytes written.
pub(crate) fn put_uvarint(dst: &mut Vec<u8>, v: u64) -> usize {
    match leb128::write::unsigned(dst, v) {
        Ok(n) => n,
        Err(_) => unreachable!("writes into a Vec<u8> cannot fail"),
    }
}

/// Decode an unsigned varint from the start of `src`, returning the value and
/// the number of bytes it occupied.
pub(crate) fn get_uvarint(src: &[u8]) -> Result<(u64, usize)> {
    let mut rest = src;
    let v = leb128::read::unsigned(&mut rest)
        .map_err(|e| StrataError::corruption(format!("bad varint: {e}")))?;
    Ok((v, src.len() - rest.len()))
}

/// Decode a varint that must fit in `usize`.
pub(crate) fn get_uvarint_usize(src: &[u8]) -> Result<(usize, usize)> {
    let (v, n) = get_uvarint(src)?;
    let v = usize::try_from(v)
        .map_err(|_| StrataError::corruption(format!("varint {v} overflows usize")))?;
    Ok((v, n))
}

pub(crate) fn put_fixed32(dst: &mut Vec<u8>, v: u32) {
    dst.put_u32_le(v);
}

/// Read a little-endian u32 at `offset`.
pub(crate) fn get_fixed32(src: &[u8], offset: usize) -> Result<u32> {
    src.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| StrataError::corruption("truncated fixed32"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uvarint_lengths() {
        for (v, len) in [(0u64, 1), (127, 1), (128, 2), (300, 2), (u64::MAX, MAX_VARINT_LEN64)] {
            let mut buf = Vec::new();
            assert_eq!(put_uvarint(&mut buf, v), len);
            assert_eq!(get_uvarint(&buf).unwrap(), (v, len));
        }
    }

    #[test]
    fn test_uvarint_reads_prefix_only() {
        let buf = [0xac, 0x02, 0xff, 0xff];
        assert_eq!(get_uvarint(&buf).unwrap(), (300, 2));
    }

    #[test]
    fn test_truncated_uvarint_is_corruption() {
        let err = get_uvarint(&[0x80, 0x80]).unwrap_err();
        assert!(err.is_corruption());
        assert!(get_uvarint(&[]).unwrap_err().is_corruption());
    }

    #[test]
    fn test_fixed32() {
        let mut buf = vec![9];
        put_fixed32(&mut buf, 0x0102_0304);
        assert_eq!(buf, [9, 4, 3, 2, 1]);
        assert_eq!(get_fixed32(&buf, 1).unwrap(), 0x0102_0304);
        assert!(get_fixed32(&buf, 2).is_err());
    }
}
