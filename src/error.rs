//! Command Error Types
//!
//! Anything that reaches here ends the process with exit status 1.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A command error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for commands.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("cannot use test directory {}", _0.display())]
    Volume(#[error(not(source))] PathBuf),
    #[display("cannot list files in the test directory")]
    Scan,
    #[display("cannot query free space")]
    FreeSpace,
    #[display("cannot delete empty directories")]
    Reclaim,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Scan | Self::FreeSpace | Self::Reclaim)
    }
}
