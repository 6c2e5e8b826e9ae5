//! Tests for the table writer and reader
//!
//! These tests verify:
//! - Round-trips through files and in-memory buffers
//! - Point lookups and range scans across block boundaries
//! - Writer state machine (ordering, close)
//! - Checksum verification and footer validation
//! - The compression threshold

use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use strata::table::{BlockHandle, FOOTER_LEN, MAGIC};
use strata::{
    BytewiseComparer, Comparer, Compression, Options, StrataError, TableReader, TableWriter,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_table() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.tbl");
    (temp_dir, path)
}

fn entry(i: usize) -> (Vec<u8>, Vec<u8>) {
    (
        format!("key{:05}", i).into_bytes(),
        format!("value{}", i).into_bytes(),
    )
}

/// Small blocks so that a few hundred entries span many of them
fn small_blocks() -> Options {
    Options::builder()
        .block_size(256)
        .block_restart_interval(4)
        .build()
}

/// Build an in-memory table from entries in increasing key order
fn build(entries: &[(Vec<u8>, Vec<u8>)], options: &Options) -> Vec<u8> {
    let mut writer = TableWriter::new(Vec::new(), options);
    for (k, v) in entries {
        writer.set(k, v).unwrap();
    }
    writer.close().unwrap();
    writer.into_inner().unwrap()
}

fn numbered(count: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    (0..count).map(entry).collect()
}

/// Bytewise order whose successor keys are never empty
#[derive(Debug)]
struct PaddedSuccessor;

impl Comparer for PaddedSuccessor {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "test.PaddedSuccessor"
    }

    fn append_separator(&self, dst: &mut Vec<u8>, a: &[u8], b: &[u8]) {
        if b.is_empty() {
            return self.append_successor(dst, a);
        }
        BytewiseComparer.append_separator(dst, a, b);
    }

    fn append_successor(&self, dst: &mut Vec<u8>, a: &[u8]) {
        dst.extend_from_slice(a);
        dst.push(0xff);
    }
}

fn collect(reader: &TableReader<Vec<u8>>, start: &[u8]) -> Vec<(Bytes, Bytes)> {
    reader
        .find(start)
        .unwrap()
        .map(|e| e.unwrap())
        .collect()
}

// =============================================================================
// Round-Trip Tests
// =============================================================================

#[test]
fn test_file_round_trip() {
    let (_temp, path) = setup_temp_table();
    let options = small_blocks();
    let entries = numbered(500);

    let mut writer = TableWriter::create(&path, &options).unwrap();
    for (k, v) in &entries {
        writer.set(k, v).unwrap();
    }
    writer.close().unwrap();
    assert_eq!(writer.entry_count(), 500);
    let written = writer.bytes_written();
    writer.into_inner().unwrap().sync_all().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), written);

    let reader = TableReader::open_path(&path, &options).unwrap();
    assert_eq!(reader.size(), written);
    let all: Vec<_> = reader.iter().unwrap().map(|e| e.unwrap()).collect();
    assert_eq!(all.len(), entries.len());
    for ((k, v), (gk, gv)) in entries.iter().zip(&all) {
        assert_eq!(&gk[..], &k[..]);
        assert_eq!(&gv[..], &v[..]);
    }
    for (k, v) in &entries {
        assert_eq!(&reader.get(k).unwrap()[..], &v[..]);
    }
    reader.close().unwrap();
}

#[test]
fn test_round_trip_option_grid() {
    let entries = numbered(300);
    for interval in [1, 2, 16] {
        for compression in [Compression::None, Compression::Lz4] {
            let options = Options::builder()
                .block_size(512)
                .block_restart_interval(interval)
                .compression(compression)
                .build();
            let reader = TableReader::open(build(&entries, &options), &options).unwrap();
            let all = collect(&reader, b"");
            assert_eq!(all.len(), entries.len(), "interval {interval} {compression:?}");
            for (i, (k, v)) in all.iter().enumerate() {
                assert_eq!(&k[..], &entries[i].0[..]);
                assert_eq!(&v[..], &entries[i].1[..]);
            }
        }
    }
}

#[test]
fn test_empty_first_key() {
    let options = Options::default();
    let entries = vec![
        (b"".to_vec(), b"empty".to_vec()),
        (b"a".to_vec(), b"1".to_vec()),
    ];
    let reader = TableReader::open(build(&entries, &options), &options).unwrap();
    assert_eq!(&reader.get(b"").unwrap()[..], b"empty");
    assert_eq!(collect(&reader, b"").len(), 2);
}

#[test]
fn test_empty_table() {
    let options = Options::default();
    let reader = TableReader::open(build(&[], &options), &options).unwrap();
    assert!(collect(&reader, b"").is_empty());
    assert!(reader.get(b"anything").unwrap_err().is_not_found());
    // an empty table still has one (empty) data block
    assert_eq!(reader.blocks().unwrap().len(), 1);
}

#[test]
fn test_empty_table_with_non_empty_successor() {
    let options = Options::builder()
        .comparer(Arc::new(PaddedSuccessor))
        .build();
    let reader = TableReader::open(build(&[], &options), &options).unwrap();

    let blocks = reader.blocks().unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(&blocks[0].key[..], &[0xff]);
    for key in [&b""[..], b"a", b"\xff", b"\xff\xff"] {
        assert!(collect(&reader, key).is_empty());
        match reader.get(key) {
            Err(StrataError::KeyNotFound) => {}
            other => panic!("{:?}: expected KeyNotFound, got {other:?}", key),
        }
    }
}

#[test]
fn test_round_trip_with_custom_comparer() {
    let options = Options::builder()
        .block_size(256)
        .block_restart_interval(4)
        .comparer(Arc::new(PaddedSuccessor))
        .build();
    let entries = numbered(200);
    let reader = TableReader::open(build(&entries, &options), &options).unwrap();
    assert!(reader.blocks().unwrap().len() > 1);
    assert_eq!(collect(&reader, b"").len(), 200);
    for (k, v) in &entries {
        assert_eq!(&reader.get(k).unwrap()[..], &v[..]);
    }
    assert!(reader.get(b"key00200").unwrap_err().is_not_found());
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_get_not_found() {
    let options = small_blocks();
    let entries = numbered(200);
    let reader = TableReader::open(build(&entries, &options), &options).unwrap();

    for missing in [&b"a"[..], b"key", b"key00010x", b"key00199\x00", b"zzz"] {
        match reader.get(missing) {
            Err(StrataError::KeyNotFound) => {}
            other => panic!("{:?}: expected KeyNotFound, got {other:?}", missing),
        }
    }
}

#[test]
fn test_find_positions_at_first_key_at_or_after() {
    let options = small_blocks();
    let entries = numbered(200);
    let reader = TableReader::open(build(&entries, &options), &options).unwrap();

    let from = collect(&reader, b"key00050");
    assert_eq!(from.len(), 150);
    assert_eq!(&from[0].0[..], b"key00050");

    // between two keys
    let from = collect(&reader, b"key00050x");
    assert_eq!(&from[0].0[..], b"key00051");

    // past the end
    assert!(collect(&reader, b"key00200").is_empty());
}

#[test]
fn test_find_every_key_crosses_blocks() {
    let options = small_blocks();
    let entries = numbered(120);
    let reader = TableReader::open(build(&entries, &options), &options).unwrap();
    assert!(reader.blocks().unwrap().len() > 5);

    for (i, (k, _)) in entries.iter().enumerate() {
        let rest = collect(&reader, k);
        assert_eq!(rest.len(), entries.len() - i);
        assert_eq!(&rest[0].0[..], &k[..]);
    }
}

#[test]
fn test_index_keys_separate_blocks() {
    let options = small_blocks();
    let entries = numbered(300);
    let reader = TableReader::open(build(&entries, &options), &options).unwrap();
    let blocks = reader.blocks().unwrap();

    // walk the entries block by block through the index keys
    let mut next = 0;
    for (b, block) in blocks.iter().enumerate() {
        let first_in_block = next;
        while next < entries.len() && entries[next].0[..] <= block.key[..] {
            next += 1;
        }
        assert!(next > first_in_block, "block {b} holds no entries");
    }
    assert_eq!(next, entries.len());

    let mut offset = 0;
    for block in &blocks {
        assert_eq!(block.handle.offset, offset);
        offset = block.handle.offset + block.handle.length + 5;
    }
}

#[test]
fn test_concurrent_readers() {
    let options = small_blocks();
    let entries = Arc::new(numbered(400));
    let reader = Arc::new(TableReader::open(build(&entries, &options), &options).unwrap());

    std::thread::scope(|s| {
        for t in 0..4 {
            let reader = Arc::clone(&reader);
            let entries = Arc::clone(&entries);
            s.spawn(move || {
                for (k, v) in entries.iter().skip(t).step_by(4) {
                    assert_eq!(&reader.get(k).unwrap()[..], &v[..]);
                }
                assert_eq!(reader.iter().unwrap().count(), entries.len());
            });
        }
    });
}

// =============================================================================
// Writer State Tests
// =============================================================================

#[test]
fn test_set_out_of_order_is_sticky() {
    let mut writer = TableWriter::new(Vec::new(), &Options::default());
    writer.set(b"b", b"1").unwrap();

    match writer.set(b"a", b"2") {
        Err(StrataError::OutOfOrder { prev, key }) => {
            assert_eq!(prev, "b");
            assert_eq!(key, "a");
        }
        other => panic!("expected OutOfOrder, got {other:?}"),
    }
    // later valid calls keep failing
    assert!(matches!(writer.set(b"c", b"3"), Err(StrataError::OutOfOrder { .. })));
    assert!(matches!(writer.close(), Err(StrataError::OutOfOrder { .. })));
}

#[test]
fn test_set_duplicate_key_fails() {
    let mut writer = TableWriter::new(Vec::new(), &Options::default());
    writer.set(b"k", b"1").unwrap();
    assert!(matches!(writer.set(b"k", b"2"), Err(StrataError::OutOfOrder { .. })));
}

#[test]
fn test_use_after_close() {
    let mut writer = TableWriter::new(Vec::new(), &Options::default());
    writer.set(b"k", b"v").unwrap();
    writer.close().unwrap();

    assert!(matches!(writer.set(b"z", b"v"), Err(StrataError::Closed(_))));
    assert!(matches!(writer.close(), Err(StrataError::Closed(_))));
}

#[test]
fn test_last_block_finished_by_set_is_indexed() {
    // block_size 1 finishes a block after every entry, including the last
    let options = Options::builder().block_size(1).build();
    let entries = numbered(3);
    let reader = TableReader::open(build(&entries, &options), &options).unwrap();
    assert_eq!(reader.blocks().unwrap().len(), 3);
    assert_eq!(collect(&reader, b"").len(), 3);
    assert_eq!(&reader.get(b"key00002").unwrap()[..], b"value2");
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_bit_flip_fails_checksum() {
    let options = Options::builder()
        .compression(Compression::None)
        .build();
    let entries = numbered(50);
    let clean = build(&entries, &options);
    let first_block = TableReader::open(clean.clone(), &options)
        .unwrap()
        .blocks()
        .unwrap()[0]
        .handle;

    for bit in [0u8, 3, 7] {
        let mut data = clean.clone();
        data[(first_block.offset + first_block.length / 2) as usize] ^= 1 << bit;
        let reader = TableReader::open(data, &options).unwrap();

        match reader.get(b"key00000") {
            Err(StrataError::ChecksumMismatch(_)) => {}
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
        let err = reader.find(b"").err().unwrap();
        assert!(err.is_corruption());
    }
}

#[test]
fn test_reads_without_checksum_verification() {
    let options = Options::builder()
        .compression(Compression::None)
        .build();
    let entries = numbered(50);
    let mut data = build(&entries, &options);
    // damage a value byte, leaving the block structure intact
    let at = data.windows(7).position(|w| w == b"value25").unwrap();
    data[at] ^= 0x01;

    let verified = TableReader::open(data.clone(), &options).unwrap();
    assert!(matches!(
        verified.get(b"key00025"),
        Err(StrataError::ChecksumMismatch(_))
    ));

    let unverified_options = Options::builder()
        .compression(Compression::None)
        .verify_checksums(false)
        .build();
    let reader = TableReader::open(data, &unverified_options).unwrap();
    assert_eq!(&reader.get(b"key00025").unwrap()[..], b"walue25");
    assert_eq!(&reader.get(b"key00024").unwrap()[..], b"value24");
    assert_eq!(collect(&reader, b"").len(), 50);
}

#[test]
fn test_bad_magic() {
    let options = Options::default();
    let mut data = build(&numbered(10), &options);
    let last = data.len() - 1;
    data[last] ^= 0xff;
    assert!(TableReader::open(data, &options).err().unwrap().is_corruption());
}

#[test]
fn test_short_file() {
    let options = Options::default();
    let data = MAGIC.to_vec();
    assert!(TableReader::open(data, &options).err().unwrap().is_corruption());
}

#[test]
fn test_footer_handle_out_of_range() {
    let options = Options::default();
    let mut data = vec![0u8; 100];
    let mut handles = Vec::new();
    BlockHandle::new(0, 8).encode_to(&mut handles);
    BlockHandle::new(90, 500).encode_to(&mut handles);
    let footer_start = data.len() - FOOTER_LEN;
    data[footer_start..footer_start + handles.len()].copy_from_slice(&handles);
    data[100 - MAGIC.len()..].copy_from_slice(MAGIC);

    assert!(TableReader::open(data, &options).err().unwrap().is_corruption());
}

// =============================================================================
// Compression Tests
// =============================================================================

#[test]
fn test_compressible_blocks_stored_lz4() {
    let options = Options::default();
    let entries: Vec<_> = (0..200)
        .map(|i| (format!("key{:05}", i).into_bytes(), vec![b'a'; 100]))
        .collect();
    let reader = TableReader::open(build(&entries, &options), &options).unwrap();
    let blocks = reader.blocks().unwrap();
    assert!(blocks.len() > 1);
    assert!(blocks.iter().all(|b| b.compression == Compression::Lz4));
    assert_eq!(collect(&reader, b"").len(), 200);
}

#[test]
fn test_incompressible_blocks_stored_raw() {
    let options = Options::default();
    let mut rng = StdRng::seed_from_u64(7);
    let entries: Vec<_> = (0..200)
        .map(|i| {
            let mut value = vec![0u8; 100];
            rng.fill_bytes(&mut value);
            (format!("key{:05}", i).into_bytes(), value)
        })
        .collect();
    let reader = TableReader::open(build(&entries, &options), &options).unwrap();
    let blocks = reader.blocks().unwrap();
    assert!(blocks.len() > 1);
    assert!(blocks.iter().all(|b| b.compression == Compression::None));
    for (k, v) in &entries {
        assert_eq!(&reader.get(k).unwrap()[..], &v[..]);
    }
}

#[test]
fn test_compression_disabled() {
    let options = Options::builder()
        .compression(Compression::None)
        .build();
    let entries: Vec<_> = (0..50)
        .map(|i| (format!("key{:05}", i).into_bytes(), vec![b'a'; 100]))
        .collect();
    let reader = TableReader::open(build(&entries, &options), &options).unwrap();
    assert!(reader
        .blocks()
        .unwrap()
        .iter()
        .all(|b| b.compression == Compression::None));
}
