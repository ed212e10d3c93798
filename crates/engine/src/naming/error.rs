//! Error types for the [`naming`](super) module.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A naming error with automatic location tracking via [`exn::Exn`].
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for naming operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Keys are word characters only; values may not contain the delimiters.
    #[display("invalid tag {_0}")]
    InvalidTag(#[error(not(source))] String),
    /// Only file names that are valid UTF-8 can carry tags.
    #[display("file name cannot carry tags: {}", _0.display())]
    InvalidName(#[error(not(source))] PathBuf),
    /// The file could not be renamed to its new name.
    #[display("could not rename file to apply tag")]
    Rename,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rename)
    }
}
