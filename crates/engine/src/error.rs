//! Engine Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Each module raises its own kind and
//! the public entry points wrap it in the kind below.

use derive_more::{Display, Error};

/// An engine error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not list files on the volume")]
    Scan,
    #[display("could not generate file")]
    Generate,
    #[display("could not record checksum")]
    Checksum,
    #[display("could not reclaim space")]
    Reclaim,
    #[display("could not query free space")]
    FreeSpace,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FreeSpace | Self::Reclaim)
    }
}
