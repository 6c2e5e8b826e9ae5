//! Configuration for Strata
//!
//! Centralized configuration with sensible defaults.

use std::sync::Arc;

use crate::comparer::{BytewiseComparer, Comparer};
use crate::table::Compression;

/// Tuning knobs shared by table writers, table readers and memdbs
#[derive(Debug, Clone)]
pub struct Options {
    // -------------------------------------------------------------------------
    // Table Layout
    // -------------------------------------------------------------------------
    /// Uncompressed size at which a data block is finished (in bytes)
    pub block_size: usize,

    /// Number of entries between restart points within a data block.
    /// 1 makes every entry a restart point (no key prefix sharing).
    pub block_restart_interval: usize,

    /// Compression applied to each block when it saves at least 12.5%
    pub compression: Compression,

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------
    /// Verify block checksums when reading a table
    pub verify_checksums: bool,

    // -------------------------------------------------------------------------
    // Ordering
    // -------------------------------------------------------------------------
    /// Key order for tables and memdbs
    pub comparer: Arc<dyn Comparer>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            block_size: 4096,
            block_restart_interval: 16,
            compression: Compression::Lz4,
            verify_checksums: true,
            comparer: Arc::new(BytewiseComparer),
        }
    }
}

impl Options {
    /// Create a new options builder
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }
}

/// Builder for Options
#[derive(Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Set the target block size (in bytes)
    pub fn block_size(mut self, size: usize) -> Self {
        self.options.block_size = size;
        self
    }

    /// Set the restart interval; values below 1 are raised to 1
    pub fn block_restart_interval(mut self, interval: usize) -> Self {
        self.options.block_restart_interval = interval.max(1);
        self
    }

    /// Set the block compression
    pub fn compression(mut self, compression: Compression) -> Self {
        self.options.compression = compression;
        self
    }

    /// Enable or disable checksum verification on reads
    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.options.verify_checksums = verify;
        self
    }

    /// Set the key order
    pub fn comparer(mut self, comparer: Arc<dyn Comparer>) -> Self {
        self.options.comparer = comparer;
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}

/// Mutation log sync policy: how often to fsync after a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync after every commit (safest, slowest)
    EveryCommit,

    /// fsync after N commits (balanced durability/performance)
    EveryNCommits { count: usize },
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::EveryNCommits { count: 100 }
    }
}
