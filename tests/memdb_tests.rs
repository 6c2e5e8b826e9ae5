//! Tests for the skiplist memdb
//!
//! These tests verify:
//! - Get/Set/Delete semantics, including tombstones
//! - Ordered iteration from any key
//! - Memory accounting
//! - Concurrent readers and writers

use std::sync::Arc;

use strata::{MemDb, StrataError};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_memdb(count: usize) -> MemDb {
    let db = MemDb::new();
    // insert out of order; the memdb sorts
    for i in (0..count).rev() {
        db.set(format!("key{:04}", i).as_bytes(), format!("value{}", i).as_bytes())
            .unwrap();
    }
    db
}

fn keys(iter: impl Iterator<Item = (Vec<u8>, Vec<u8>)>) -> Vec<String> {
    iter.map(|(k, _)| String::from_utf8(k).unwrap()).collect()
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_set_and_get() {
    let db = MemDb::new();
    db.set(b"name", b"strata").unwrap();
    assert_eq!(db.get(b"name").unwrap(), b"strata");
}

#[test]
fn test_get_missing() {
    let db = setup_memdb(10);
    assert!(matches!(db.get(b"nope"), Err(StrataError::KeyNotFound)));
    assert!(db.get(b"key0010").unwrap_err().is_not_found());
}

#[test]
fn test_overwrite() {
    let db = MemDb::new();
    db.set(b"k", b"v1").unwrap();
    db.set(b"k", b"v2").unwrap();
    assert_eq!(db.get(b"k").unwrap(), b"v2");
    assert_eq!(db.iter().count(), 1);
}

#[test]
fn test_empty_key_and_value() {
    let db = MemDb::new();
    db.set(b"", b"").unwrap();
    db.set(b"a", b"").unwrap();
    assert_eq!(db.get(b"").unwrap(), b"");
    assert_eq!(db.iter().count(), 2);
}

#[test]
fn test_delete() {
    let db = setup_memdb(5);
    db.delete(b"key0002").unwrap();
    assert!(db.get(b"key0002").unwrap_err().is_not_found());
    assert_eq!(
        keys(db.iter()),
        vec!["key0000", "key0001", "key0003", "key0004"]
    );
}

#[test]
fn test_delete_twice_reports_not_found() {
    let db = setup_memdb(3);
    db.delete(b"key0001").unwrap();
    assert!(matches!(db.delete(b"key0001"), Err(StrataError::KeyNotFound)));
    assert!(matches!(db.delete(b"absent"), Err(StrataError::KeyNotFound)));
}

#[test]
fn test_set_after_delete() {
    let db = MemDb::new();
    db.set(b"k", b"v").unwrap();
    db.delete(b"k").unwrap();
    db.set(b"k", b"again").unwrap();
    assert_eq!(db.get(b"k").unwrap(), b"again");
}

// =============================================================================
// Iteration
// =============================================================================

#[test]
fn test_iter_is_sorted() {
    let db = setup_memdb(500);
    let got = keys(db.iter());
    assert_eq!(got.len(), 500);
    assert!(got.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_find_starts_at_first_key_at_or_after() {
    let db = setup_memdb(100);
    assert_eq!(keys(db.find(b"key0050")).first().unwrap(), "key0050");
    assert_eq!(keys(db.find(b"key0050a")).first().unwrap(), "key0051");
    assert_eq!(db.find(b"key0050").count(), 50);
    assert_eq!(db.find(b"").count(), 100);
    assert_eq!(db.find(b"zzz").count(), 0);
}

#[test]
fn test_find_skips_tombstones_across_batches() {
    let db = setup_memdb(200);
    for i in (0..200).filter(|i| i % 3 != 0) {
        db.delete(format!("key{:04}", i).as_bytes()).unwrap();
    }
    let got = keys(db.iter());
    let expected: Vec<String> = (0..200)
        .filter(|i| i % 3 == 0)
        .map(|i| format!("key{:04}", i))
        .collect();
    assert_eq!(got, expected);
}

#[test]
fn test_end_to_end_scenario() {
    let db = MemDb::new();
    db.set(b"a", b"av").unwrap();
    db.set(b"b", b"bv").unwrap();
    db.set(b"c", b"cv").unwrap();

    let values: Vec<Vec<u8>> = db
        .find(b"a")
        .take_while(|(k, _)| k.as_slice() < b"c".as_slice())
        .map(|(_, v)| v)
        .collect();
    assert_eq!(values, vec![b"av".to_vec(), b"bv".to_vec()]);

    db.delete(b"a").unwrap();
    let values: Vec<Vec<u8>> = db.iter().map(|(_, v)| v).collect();
    assert_eq!(values, vec![b"bv".to_vec(), b"cv".to_vec()]);
}

// =============================================================================
// Memory Accounting
// =============================================================================

#[test]
fn test_memory_only_grows() {
    let db = MemDb::new();
    assert_eq!(db.approximate_memory_usage(), 0);
    db.set(b"key", b"value").unwrap();
    let after_set = db.approximate_memory_usage();
    assert!(after_set >= 8);

    db.set(b"key", b"value2").unwrap();
    let after_overwrite = db.approximate_memory_usage();
    assert!(after_overwrite > after_set);

    db.delete(b"key").unwrap();
    assert!(db.approximate_memory_usage() >= after_overwrite);
    assert_eq!(db.node_count(), 1);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_writers_and_readers() {
    let db = Arc::new(MemDb::new());

    std::thread::scope(|s| {
        for t in 0..4 {
            let db = Arc::clone(&db);
            s.spawn(move || {
                for i in 0..500 {
                    let key = format!("t{}-{:04}", t, i);
                    db.set(key.as_bytes(), key.as_bytes()).unwrap();
                }
            });
        }
        for _ in 0..2 {
            let db = Arc::clone(&db);
            s.spawn(move || {
                for _ in 0..20 {
                    let got = keys(db.iter());
                    assert!(got.windows(2).all(|w| w[0] < w[1]));
                }
            });
        }
    });

    assert_eq!(db.iter().count(), 2000);
    for t in 0..4 {
        let key = format!("t{}-0499", t);
        assert_eq!(db.get(key.as_bytes()).unwrap(), key.as_bytes());
    }
}

#[test]
fn test_close() {
    let db = setup_memdb(3);
    db.close().unwrap();
}
