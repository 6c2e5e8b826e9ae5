//! # Strata
//!
//! An embedded ordered key/value storage toolkit with:
//! - Immutable sorted tables with prefix-compressed, checksummed blocks
//! - A corruption-tolerant record format for append-only logs
//! - A concurrent skiplist memdb
//! - A generic sorted key/value interface over all three
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 SortedKv (get/set/find/batch)               │
//! └──────────┬──────────────────────┬───────────────────┬───────┘
//!            │                      │                   │
//!            ▼                      ▼                   ▼
//!     ┌─────────────┐        ┌─────────────┐     ┌─────────────┐
//!     │    MemKv    │◄───────│    LogKv    │     │ TableReader │
//!     │   (MemDb)   │        │  (record)   │     │ (read-only) │
//!     └─────────────┘        └─────────────┘     └──────┬──────┘
//!                                                       │
//!                                                ┌──────▼──────┐
//!                                                │ TableWriter │
//!                                                │  (builds)   │
//!                                                └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod crc;
pub mod comparer;
mod coding;

pub mod memdb;
pub mod record;
pub mod table;
pub mod sorted;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StrataError};
pub use config::{Options, SyncPolicy};
pub use comparer::{BytewiseComparer, Comparer};
pub use memdb::MemDb;
pub use table::{Compression, TableReader, TableWriter};
pub use sorted::{Batch, BufferKv, LogKv, MemKv, SortedKv};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Strata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
