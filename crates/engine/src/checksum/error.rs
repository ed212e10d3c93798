//! Error types for the [`checksum`](super) module.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A checksum error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for checksum operations.
pub type Result<T> = std::result::Result<T, Error>;

/// ### Operational Errors
/// - [`ErrorKind::Read`]
/// - [`ErrorKind::Tag`]
///
/// ### Dependency Errors
/// - [`ErrorKind::Storage`]
/// - [`ErrorKind::Join`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Opening or stat'ing the file failed.
    #[display("storage operation failed")]
    Storage,
    /// Reading the content failed part way through.
    #[display("read failed: {}", _0.display())]
    Read(#[error(not(source))] PathBuf),
    /// The digest could not be written into the file name.
    #[display("could not tag file with its checksum")]
    Tag,
    /// The blocking hash task panicked or was cancelled.
    #[display("hash task did not complete")]
    Join,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Read(_) | Self::Tag)
    }
}
