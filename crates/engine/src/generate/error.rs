//! Error types for the [`generate`](super) module.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A generation error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for generation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Free space could not be queried to size the file.
    #[display("free space unavailable")]
    FreeSpace,
    /// The volume refused to create or stat the file.
    #[display("storage operation failed")]
    Storage,
    /// Writing the content failed part way; the partial file is left in place.
    #[display("write failed: {}", _0.display())]
    Write(#[error(not(source))] PathBuf),
    /// The blocking write task panicked or was cancelled.
    #[display("write task did not complete")]
    Join,
    /// The filesystem reports a different size than was written.
    #[display("{}: wrote {expected} bytes but found {actual}", path.display())]
    SizeMismatch { path: PathBuf, expected: u64, actual: u64 },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FreeSpace | Self::Storage | Self::Write(_))
    }
}
