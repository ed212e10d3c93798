//! Storage models.

use std::path::PathBuf;
use time::OffsetDateTime;

/// File metadata returned by volumes, from a walk or a single stat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Relative path from the volume root
    pub path: PathBuf,
    /// File size in bytes, as reported by the filesystem
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: OffsetDateTime) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
        }
    }
}
