//! Key ordering
//!
//! A [`Comparer`] defines the total order of keys in a table or a memdb,
//! and knows how to shorten index keys between adjacent data blocks.

use std::cmp::Ordering;
use std::fmt;

/// Total order over byte-string keys.
pub trait Comparer: Send + Sync + fmt::Debug {
    /// Compare two keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Name of the ordering, used in diagnostics.
    fn name(&self) -> &str;

    /// Append to `dst` a key `k` with `a <= k < b`, as short as cheaply
    /// possible. Requires `a < b`. An empty `b` means "no upper bound" and
    /// behaves like [`Comparer::append_successor`].
    fn append_separator(&self, dst: &mut Vec<u8>, a: &[u8], b: &[u8]);

    /// Append to `dst` a short key `k` with `a <= k`.
    fn append_successor(&self, dst: &mut Vec<u8>, a: &[u8]);
}

/// Lexicographic order over unsigned bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparer;

impl Comparer for BytewiseComparer {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        "strata.BytewiseComparator"
    }

    fn append_separator(&self, dst: &mut Vec<u8>, a: &[u8], b: &[u8]) {
        if b.is_empty() {
            return self.append_successor(dst, a);
        }
        let shared = shared_prefix_len(a, b);
        let start = dst.len();
        dst.extend_from_slice(a);
        // `a` is a prefix of `b`, or `b` is a prefix of `a` (which breaks the
        // `a < b` precondition): no shorter key exists.
        if shared == a.len() || shared == b.len() {
            debug_assert!(shared == a.len(), "separator requires a < b");
            return;
        }
        // Only shorten when bumping the first differing byte keeps us below b.
        if a[shared] == 0xff || a[shared] + 1 >= b[shared] {
            return;
        }
        dst[start + shared] += 1;
        dst.truncate(start + shared + 1);
    }

    fn append_successor(&self, dst: &mut Vec<u8>, a: &[u8]) {
        let start = dst.len();
        dst.extend_from_slice(a);
        if let Some(i) = a.iter().position(|&b| b != 0xff) {
            dst[start + i] += 1;
            dst.truncate(start + i + 1);
        }
    }
}

/// Length of the common prefix of `a` and `b`.
pub fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
