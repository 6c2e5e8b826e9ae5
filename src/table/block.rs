//! Block encoding and decoding
//!
//! A block is a run of prefix-compressed entries followed by the restart
//! array. Both data blocks and the index block use this layout.

use std::cmp::Ordering;

use bytes::Bytes;

use crate::coding::{get_fixed32, get_uvarint_usize, put_fixed32, put_uvarint};
use crate::comparer::{shared_prefix_len, Comparer};
use crate::error::{Result, StrataError};

// =============================================================================
// Builder
// =============================================================================

/// Accumulates entries for one block
pub(crate) struct BlockBuilder {
    buf: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    entries: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        Self {
            buf: Vec::new(),
            restarts: Vec::new(),
            restart_interval: restart_interval.max(1),
            entries: 0,
            last_key: Vec::new(),
        }
    }

    /// Append an entry. Keys must arrive in increasing order; the caller
    /// checks that.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let shared = if self.entries % self.restart_interval == 0 {
            self.restarts.push(self.buf.len() as u32);
            0
        } else {
            shared_prefix_len(&self.last_key, key)
        };
        put_uvarint(&mut self.buf, shared as u64);
        put_uvarint(&mut self.buf, (key.len() - shared) as u64);
        put_uvarint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(&key[shared..]);
        self.buf.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        self.entries += 1;
    }

    /// Size of the block if it were finished now
    pub fn estimated_size(&self) -> usize {
        self.buf.len() + 4 * self.restarts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    /// Append the restart array and return the finished block.
    /// An empty block still gets a single restart point at offset 0.
    pub fn finish(&mut self) -> &[u8] {
        if self.restarts.is_empty() {
            self.restarts.push(0);
        }
        for &restart in &self.restarts {
            put_fixed32(&mut self.buf, restart);
        }
        put_fixed32(&mut self.buf, self.restarts.len() as u32);
        &self.buf
    }

    /// Clear for reuse
    pub fn reset(&mut self) {
        self.buf.clear();
        self.restarts.clear();
        self.entries = 0;
        self.last_key.clear();
    }
}

// =============================================================================
// Reader
// =============================================================================

/// A decoded, uncompressed block
#[derive(Debug, Clone)]
pub(crate) struct Block {
    data: Bytes,
    /// Start of the restart array; entries live in `data[..restarts_offset]`
    restarts_offset: usize,
    num_restarts: usize,
}

/// Varint header of one entry
struct EntryHeader {
    shared: usize,
    unshared: usize,
    value_len: usize,
    /// Offset of the key suffix
    key_start: usize,
}

impl EntryHeader {
    fn value_start(&self) -> usize {
        self.key_start + self.unshared
    }

    fn end(&self) -> usize {
        self.value_start() + self.value_len
    }
}

impl Block {
    pub fn new(data: Bytes) -> Result<Self> {
        let len = data.len();
        if len < 4 {
            return Err(StrataError::corruption("block too short"));
        }
        let num_restarts = get_fixed32(&data, len - 4)? as usize;
        if num_restarts == 0 {
            return Err(StrataError::corruption("block has no restart points"));
        }
        let restarts_offset = num_restarts
            .checked_mul(4)
            .and_then(|n| (len - 4).checked_sub(n))
            .ok_or_else(|| StrataError::corruption("block restart count overflows block"))?;
        Ok(Self {
            data,
            restarts_offset,
            num_restarts,
        })
    }

    fn restart_point(&self, i: usize) -> Result<usize> {
        let offset = get_fixed32(&self.data, self.restarts_offset + 4 * i)? as usize;
        if offset > self.restarts_offset {
            return Err(StrataError::corruption("block restart point out of range"));
        }
        Ok(offset)
    }

    fn entry_header(&self, offset: usize) -> Result<EntryHeader> {
        let src = &self.data[offset..self.restarts_offset];
        let (shared, a) = get_uvarint_usize(src)?;
        let (unshared, b) = get_uvarint_usize(&src[a..])?;
        let (value_len, c) = get_uvarint_usize(&src[a + b..])?;
        let header = EntryHeader {
            shared,
            unshared,
            value_len,
            key_start: offset + a + b + c,
        };
        let fits = header
            .key_start
            .checked_add(unshared)
            .and_then(|n| n.checked_add(value_len))
            .map_or(false, |end| end <= self.restarts_offset);
        if !fits {
            return Err(StrataError::corruption("block entry overflows block"));
        }
        Ok(header)
    }

    /// Full key stored at restart point `i`
    fn restart_key(&self, i: usize) -> Result<&[u8]> {
        let header = self.entry_header(self.restart_point(i)?)?;
        if header.shared != 0 {
            return Err(StrataError::corruption("restart entry shares a prefix"));
        }
        Ok(&self.data[header.key_start..header.value_start()])
    }

    /// Iterate from the first entry
    pub fn iter(&self) -> BlockIter {
        BlockIter::new(self.clone(), 0)
    }

    /// Iterate from the first entry whose key is >= `target`
    ///
    /// Binary-searches the restart points for the last one whose key is
    /// <= `target`, then scans forward. An empty `target` starts at the
    /// first entry.
    pub fn seek(&self, cmp: &dyn Comparer, target: &[u8]) -> Result<BlockIter> {
        // No entries: the single restart point has no key to compare.
        if self.restarts_offset == 0 {
            return Ok(self.iter());
        }
        let mut start = 0;
        if !target.is_empty() {
            // First restart whose key is > target.
            let (mut lo, mut hi) = (0, self.num_restarts);
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                if cmp.compare(self.restart_key(mid)?, target) == Ordering::Greater {
                    hi = mid;
                } else {
                    lo = mid + 1;
                }
            }
            if lo > 0 {
                start = self.restart_point(lo - 1)?;
            }
        }

        let mut iter = BlockIter::new(self.clone(), start);
        while iter.advance()? {
            if cmp.compare(iter.key(), target) != Ordering::Less {
                iter.primed = true;
                break;
            }
        }
        Ok(iter)
    }
}

/// Iterator over the entries of one block
pub(crate) struct BlockIter {
    block: Block,
    /// Offset of the entry after the current one
    next: usize,
    key: Vec<u8>,
    value: Bytes,
    /// The current entry was found by a seek and not yet yielded
    primed: bool,
}

impl BlockIter {
    fn new(block: Block, start: usize) -> Self {
        Self {
            block,
            next: start,
            key: Vec::new(),
            value: Bytes::new(),
            primed: false,
        }
    }

    /// Decode the next entry. Returns false once the entries run out.
    fn advance(&mut self) -> Result<bool> {
        if self.next >= self.block.restarts_offset {
            return Ok(false);
        }
        let header = match self.block.entry_header(self.next) {
            Ok(header) => header,
            Err(err) => {
                self.next = self.block.restarts_offset;
                return Err(err);
            }
        };
        if header.shared > self.key.len() {
            self.next = self.block.restarts_offset;
            return Err(StrataError::corruption("block entry shares more than the previous key"));
        }
        let data = &self.block.data;
        self.key.truncate(header.shared);
        self.key
            .extend_from_slice(&data[header.key_start..header.value_start()]);
        self.value = data.slice(header.value_start()..header.end());
        self.next = header.end();
        Ok(true)
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    fn current(&self) -> (Bytes, Bytes) {
        (Bytes::copy_from_slice(&self.key), self.value.clone())
    }
}

impl Iterator for BlockIter {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.primed {
            self.primed = false;
            return Some(Ok(self.current()));
        }
        match self.advance() {
            Ok(true) => Some(Ok(self.current())),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparer::BytewiseComparer;

    fn keys_from(block: &Block, target: &[u8]) -> Vec<Vec<u8>> {
        block
            .seek(&BytewiseComparer, target)
            .unwrap()
            .map(|e| e.unwrap().0.to_vec())
            .collect()
    }

    fn check_seeks(block: &Block) {
        let keys: [&[u8]; 3] = [b"apple", b"apricot", b"banana"];
        let cases: [(&[u8], usize); 11] = [
            (b"", 0),
            (b"a", 0),
            (b"app", 0),
            (b"apple", 0),
            (b"appliance", 1),
            (b"apricos", 1),
            (b"apricot", 1),
            (b"azzzzz", 2),
            (b"b", 2),
            (b"banan", 2),
            (b"banana", 2),
        ];
        for (target, want) in cases {
            let got = keys_from(block, target);
            let expected: Vec<Vec<u8>> = keys[want..].iter().map(|k| k.to_vec()).collect();
            assert_eq!(got, expected, "seek {:?}", String::from_utf8_lossy(target));
        }
        assert!(keys_from(block, b"banana\x00").is_empty());
        assert!(keys_from(block, b"c").is_empty());
    }

    #[test]
    fn test_seek_single_restart() {
        let raw: &[u8] =
            b"\x00\x05\x00apple\x02\x05\x00ricot\x00\x06\x00banana\x00\x00\x00\x00\x01\x00\x00\x00";
        let block = Block::new(Bytes::from_static(raw)).unwrap();
        check_seeks(&block);
    }

    #[test]
    fn test_seek_two_restarts() {
        let raw: &[u8] = b"\x00\x05\x00apple\x02\x05\x00ricot\x00\x06\x00banana\
            \x00\x00\x00\x00\x10\x00\x00\x00\x02\x00\x00\x00";
        let block = Block::new(Bytes::from_static(raw)).unwrap();
        check_seeks(&block);
    }

    #[test]
    fn test_builder_matches_raw_layout() {
        let mut builder = BlockBuilder::new(2);
        builder.add(b"apple", b"");
        builder.add(b"apricot", b"");
        builder.add(b"banana", b"");
        let expected: &[u8] = b"\x00\x05\x00apple\x02\x05\x00ricot\x00\x06\x00banana\
            \x00\x00\x00\x00\x10\x00\x00\x00\x02\x00\x00\x00";
        assert_eq!(builder.finish(), expected);
    }

    #[test]
    fn test_builder_round_trip() {
        for interval in [1, 3, 16] {
            let mut builder = BlockBuilder::new(interval);
            let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..200)
                .map(|i| (format!("key{i:05}").into_bytes(), format!("v{i}").into_bytes()))
                .collect();
            for (k, v) in &entries {
                builder.add(k, v);
            }
            let block = Block::new(Bytes::copy_from_slice(builder.finish())).unwrap();
            let all: Vec<_> = block.iter().map(|e| e.unwrap()).collect();
            assert_eq!(all.len(), entries.len());
            for ((k, v), (gk, gv)) in entries.iter().zip(&all) {
                assert_eq!(&gk[..], &k[..]);
                assert_eq!(&gv[..], &v[..]);
            }
            for (i, (k, _)) in entries.iter().enumerate().step_by(7) {
                let first = block.seek(&BytewiseComparer, k).unwrap().next().unwrap().unwrap();
                assert_eq!(&first.0[..], &entries[i].0[..]);
            }
        }
    }

    #[test]
    fn test_empty_block() {
        let mut builder = BlockBuilder::new(16);
        assert!(builder.is_empty());
        let block = Block::new(Bytes::copy_from_slice(builder.finish())).unwrap();
        assert_eq!(block.iter().count(), 0);
        assert_eq!(block.seek(&BytewiseComparer, b"x").unwrap().count(), 0);
        assert_eq!(block.seek(&BytewiseComparer, b"").unwrap().count(), 0);
    }

    #[test]
    fn test_corrupt_blocks() {
        assert!(Block::new(Bytes::from_static(b"\x01\x00")).is_err());
        // claims 9 restarts in an 8 byte block
        assert!(Block::new(Bytes::from_static(b"\x00\x00\x00\x00\x09\x00\x00\x00")).is_err());
        // entry length runs into the restart array
        let raw: &[u8] = b"\x00\x09\x00apple\x00\x00\x00\x00\x01\x00\x00\x00";
        let block = Block::new(Bytes::from_static(raw)).unwrap();
        assert!(block.iter().next().unwrap().unwrap_err().is_corruption());
    }
}
