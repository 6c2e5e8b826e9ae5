//! Error types for Strata
//!
//! Provides a unified error type for all operations.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for Strata operations
///
/// Errors are `Clone` so that a writer or reader that has entered a failed
/// state can hand the same error back on every later call.
#[derive(Debug, Clone, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    #[error("unexpected end of stream")]
    UnexpectedEof,

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Input Validation Errors
    // -------------------------------------------------------------------------
    #[error("key too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },

    #[error("value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },

    #[error("keys must be strictly increasing: {prev:?} then {key:?}")]
    OutOfOrder { prev: String, key: String },

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    #[error("corruption: {0}")]
    Corruption(String),

    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("{0} is read-only")]
    ReadOnly(&'static str),

    #[error("{0} is not supported")]
    Unsupported(&'static str),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StrataError {
    /// Build an out-of-order error, rendering both keys for the message.
    pub(crate) fn out_of_order(prev: &[u8], key: &[u8]) -> Self {
        StrataError::OutOfOrder {
            prev: String::from_utf8_lossy(prev).into_owned(),
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        StrataError::Corruption(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StrataError::KeyNotFound)
    }

    /// True for damaged data: bad checksums and malformed structures.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StrataError::Corruption(_) | StrataError::ChecksumMismatch(_)
        )
    }
}

impl From<io::Error> for StrataError {
    fn from(err: io::Error) -> Self {
        // Errors that crossed an io::Read/io::Write boundary come back intact.
        if let Some(inner) = err
            .get_ref()
            .and_then(|e| e.downcast_ref::<StrataError>())
        {
            return inner.clone();
        }
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return StrataError::UnexpectedEof;
        }
        StrataError::Io(Arc::new(err))
    }
}

impl From<StrataError> for io::Error {
    fn from(err: StrataError) -> Self {
        let kind = match &err {
            StrataError::Io(inner) => inner.kind(),
            StrataError::UnexpectedEof => io::ErrorKind::UnexpectedEof,
            StrataError::KeyNotFound => io::ErrorKind::NotFound,
            StrataError::KeyTooLarge { .. }
            | StrataError::ValueTooLarge { .. }
            | StrataError::OutOfOrder { .. } => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::InvalidData,
        };
        io::Error::new(kind, err)
    }
}
