//! Error taxonomy shared by every layer of the engine, from block storage
//! up through the typed table.
//!
//! Lower layers (block storage, the byte-level paged table) only ever
//! produce [`PickleError::Io`], [`PickleError::IndexOutOfRange`],
//! [`PickleError::NotFound`], [`PickleError::AlreadyExists`],
//! [`PickleError::InvalidArgument`], [`PickleError::Corrupted`], and
//! [`PickleError::Closed`]. [`PickleError::Decode`] is produced only by
//! the encoding/schema layer.

use thiserror::Error;

/// The crate-wide error type.
#[derive(Error, Debug)]
pub enum PickleError {
    /// A read or write addressed a position outside the valid range for
    /// the operation (`[0, len)` for reads, `[0, len]` for writes).
    #[error("index {index} out of range (bound {bound})")]
    IndexOutOfRange { index: u64, bound: u64 },

    /// A non-positive block size, a fixed-size array write with the
    /// wrong length, a double close, or similar caller error.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A container was opened or deleted that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A container was created that already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// On-disk content did not match the expected structure: a header
    /// shorter than expected, a missing or mismatched structural
    /// indicator, or similar.
    #[error("corrupted: {0}")]
    Corrupted(String),

    /// The underlying filesystem failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A codec expected a digit, indicator, or quote and found something
    /// else.
    #[error("decode error: {0}")]
    Decode(String),

    /// The operation was attempted on a handle or table that has already
    /// been closed.
    #[error("closed: {0}")]
    Closed(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PickleError>;

impl From<tokio::task::JoinError> for PickleError {
    fn from(e: tokio::task::JoinError) -> Self {
        PickleError::Io(std::io::Error::other(e))
    }
}
