//! Volume trait and implementations.
//!
//! A [`Volume`] is the directory tree under test. The engine never touches
//! `std::fs` directly: everything it needs from the filesystem (free space,
//! streaming reads and writes, stat, rename, delete, walking the tree) goes
//! through this trait so the same code runs against a real disk or the
//! in-memory [`MockVolume`] used by tests.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalVolume;
#[cfg(feature = "mock")]
pub use self::mock::MockVolume;
use crate::error::Result;
use crate::models::FileInfo;
use async_trait::async_trait;
use futures::Stream;
use std::io::{Read, Write};
use std::path::Path;
use std::pin::Pin;

pub type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;
pub type BoxSyncRead = Box<dyn Read + Send + 'static>;
pub type BoxSyncWrite = Box<dyn Write + Send + 'static>;

/// Unified interface over the volume being tested.
///
/// # Path Handling
/// All paths are relative to the volume root and are validated with
/// [`validate_path`](crate::validate_path) by implementations.
///
/// # Streaming
/// [`reader()`](Self::reader) and [`writer()`](Self::writer) hand back
/// `'static` sync handles meant to be driven inside
/// [`spawn_blocking`](tokio::task::spawn_blocking), so bulk I/O never blocks
/// the async runtime:
///
/// ```
/// use std::path::Path;
/// use drivetest_storage::Volume;
/// use drivetest_storage::error::{ErrorKind, Result};
///
/// async fn copy_out(volume: &dyn Volume, path: &Path) -> Result<Vec<u8>> {
///     let mut reader = volume.reader(path).await?;
///     tokio::task::spawn_blocking(move || {
///         let mut buf = Vec::new();
///         std::io::Read::read_to_end(&mut reader, &mut buf).map(|_| buf)
///     })
///     .await
///     .map_err(|e| ErrorKind::Volume(e.to_string()))?
///     .map_err(|e| ErrorKind::Io(e).into())
/// }
/// ```
#[async_trait]
pub trait Volume: Send + Sync {
    /// Name of the volume, used for logging only.
    fn name(&self) -> &str;

    /// Bytes available to an unprivileged user on the underlying filesystem.
    ///
    /// This deliberately excludes blocks reserved for the superuser.
    async fn free_bytes(&self) -> Result<u64>;

    /// Stream metadata for every regular file below the root.
    ///
    /// Unreadable entries are yielded as errors without ending the stream.
    fn list_stream(&self) -> FileInfoStream<'_>;

    /// Open a file for streaming reads.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn reader(&self, path: &Path) -> Result<BoxSyncRead>;

    /// Create a new file for streaming writes.
    ///
    /// # Notes
    /// - Parent directories are created as needed.
    /// - Never truncates: returns
    ///   [`AlreadyExists`](crate::error::ErrorKind::AlreadyExists) if the
    ///   path is taken.
    /// - Callers should `flush()` before dropping so errors surface.
    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Rename a file in a single filesystem operation.
    ///
    /// # Notes
    /// - Never overwrites: returns
    ///   [`AlreadyExists`](crate::error::ErrorKind::AlreadyExists) if `to` is
    ///   taken.
    /// - Returns [`NotFound`](crate::error::ErrorKind::NotFound) if `from`
    ///   does not exist.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Get file metadata without reading contents.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Remove every directory below the root left without entries, deepest
    /// first, and return how many were removed. The root itself is kept.
    async fn prune_empty_dirs(&self) -> Result<u64>;
}
