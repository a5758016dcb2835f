//! Error types.
//!
//! Only conditions caused by the caller surface here. Broken internal
//! invariants (a partition released twice, a partition whose shape does not
//! match its window, weight intervals that do not cover their window) are
//! bugs in the calling code path and panic instead.

use thiserror::Error;

/// Result type for fallible array operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A positional argument fell outside the valid bounds.
    #[error("index {index} out of range for length {len}")]
    OutOfRange { index: usize, len: usize },
    /// The operation needs at least one element.
    #[error("operation requires a non-empty array")]
    Empty,
    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
