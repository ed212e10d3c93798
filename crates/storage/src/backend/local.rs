//! Local filesystem volume.
//!
//! Metadata operations go through `tokio::fs`; bulk reads and writes are
//! handed out as std file handles for use in blocking tasks.

use crate::backend::{BoxSyncRead, BoxSyncWrite, FileInfoStream};
use crate::error::ErrorKind;
use crate::{FileInfo, Volume, error::Result, path::validate as validate_path};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

/// Volume backed by a directory on a local (or network-mounted) filesystem.
///
/// # Examples
///
/// ```no_run
/// use drivetest_storage::backend::LocalVolume;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let volume = LocalVolume::new("nas", "/mnt/nas/drivetest")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalVolume {
    name: String,
    /// Directory all test files live under
    root: PathBuf,
}
impl LocalVolume {
    /// Create a local volume rooted at `root`, creating the directory if it
    /// doesn't exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, exists but is not a
    /// directory, or cannot be created.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Only happens once at startup, not worth an async constructor.
            sync_create_dir(&root).map_err(|e| ErrorKind::from_io(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    fn relative_path(&self, absolute: impl AsRef<Path>) -> Result<PathBuf> {
        let absolute = absolute.as_ref();
        let relative = absolute.strip_prefix(&self.root).or_raise(|| {
            ErrorKind::Volume(format!("path `{}` is not within root `{}`", absolute.display(), self.root.display()))
        })?;
        validate_path(relative)
    }

    fn metadata(path: &Path, metadata: Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?.into();
        Ok(FileInfo::new(path, metadata.len(), modified))
    }

    async fn process_entry(&self, entry: DirEntry) -> Result<WalkEntry> {
        let path = entry.path();
        let metadata = entry.metadata().await.map_err(|e| ErrorKind::from_io(e, &path))?;
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        if metadata.is_file() {
            let relative = self.relative_path(&path)?;
            return Ok(WalkEntry::File(Self::metadata(&relative, metadata)?));
        }
        // Sockets, fifos and broken symlinks are not ours.
        Ok(WalkEntry::Skip)
    }

    /// Every directory below the root, parents before children.
    async fn directories(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(current) = stack.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => exn::bail!(ErrorKind::from_io(err, &current)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| ErrorKind::from_io(e, &current))? {
                if entry.file_type().await.map_err(|e| ErrorKind::from_io(e, entry.path()))?.is_dir() {
                    found.push(entry.path());
                    stack.push(entry.path());
                }
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl Volume for LocalVolume {
    fn name(&self) -> &str {
        &self.name
    }

    async fn free_bytes(&self) -> Result<u64> {
        // A single statvfs/GetDiskFreeSpaceExW call, cheap enough to make inline.
        Ok(fs2::available_space(&self.root).or_raise(|| ErrorKind::FreeSpace(self.root.clone()))?)
    }

    fn list_stream(&self) -> FileInfoStream<'_> {
        let mut stack = vec![self.root.clone()];
        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // Deleted between discovery and descent: nothing to list.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(ErrorKind::from_io(err, &current)));
                        continue 'dirs;
                    }
                };
                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => {
                            yield Err(exn::Exn::from(ErrorKind::from_io(e, &current)));
                            break 'entries;
                        },
                    };
                    match self.process_entry(entry).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        let abs_path = self.absolute_path(path)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| ErrorKind::from_io(e, path))?;
        Ok(Box::new(file.into_std().await))
    }

    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite> {
        let abs_path = self.absolute_path(path)?;
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| ErrorKind::from_io(e, path))?;
        }
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&abs_path)
            .await
            .map_err(|e| ErrorKind::from_io(e, path))?;
        Ok(Box::new(file.into_std().await))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::remove_file(&abs_path).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.absolute_path(from)?;
        let to_path = self.absolute_path(to)?;
        // rename(2) silently replaces the target on Unix. The check is racy,
        // but the only writer of tagged names is the engine itself.
        if fs::try_exists(&to_path).await.map_err(ErrorKind::Io)? {
            exn::bail!(ErrorKind::AlreadyExists(to.to_path_buf()));
        }
        Ok(fs::rename(&from_path, &to_path).await.map_err(|e| ErrorKind::from_io(e, from))?)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| ErrorKind::from_io(e, path))?;
        Self::metadata(path, metadata)
    }

    async fn prune_empty_dirs(&self) -> Result<u64> {
        let mut removed = 0;
        // Reversed pre-order visits children before their parents, so a
        // directory emptied by this pass is removed in the same pass.
        for dir in self.directories().await?.into_iter().rev() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => exn::bail!(ErrorKind::from_io(err, &dir)),
            };
            if entries.next_entry().await.map_err(|e| ErrorKind::from_io(e, &dir))?.is_some() {
                continue;
            }
            match fs::remove_dir(&dir).await {
                Ok(()) => {
                    tracing::debug!(volume = %self.name, path = %dir.display(), "Removed empty directory");
                    removed += 1;
                },
                // Something was written into it since we looked.
                Err(err) => {
                    tracing::warn!(volume = %self.name, path = %dir.display(), error = %err, "Could not remove directory")
                },
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::{Read, Write};

    async fn write(volume: &LocalVolume, path: &str, data: &[u8]) {
        let mut writer = volume.writer(Path::new(path)).await.unwrap();
        writer.write_all(data).unwrap();
        writer.flush().unwrap();
    }

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalVolume::new("name", temp_dir.path()).is_ok());
        assert!(LocalVolume::new("name", "relative/path").is_err());
    }

    #[test]
    fn test_new_creates_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("drivetest");
        LocalVolume::new("name", &root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_relative_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let volume = LocalVolume::new("name", temp_dir.path()).unwrap();
        let abs = temp_dir.path().join("0/a/kq2v9x0c");
        assert_eq!(volume.relative_path(&abs).unwrap(), Path::new("0/a/kq2v9x0c"));
        assert!(volume.relative_path("/other/file").is_err());
        assert!(volume.absolute_path("../escape").is_err());
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let volume = LocalVolume::new("name", temp_dir.path()).unwrap();
        write(&volume, "a/b/file", b"Hello, world!").await;
        let mut data = Vec::new();
        volume.reader(Path::new("a/b/file")).await.unwrap().read_to_end(&mut data).unwrap();
        assert_eq!(data, b"Hello, world!");
    }

    #[tokio::test]
    async fn test_writer_never_truncates() {
        let temp_dir = tempfile::tempdir().unwrap();
        let volume = LocalVolume::new("name", temp_dir.path()).unwrap();
        write(&volume, "file", b"data").await;
        let err = volume.writer(Path::new("file")).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        assert_eq!(volume.stat(Path::new("file")).await.unwrap().size, 4);
    }

    #[tokio::test]
    async fn test_rename() {
        let temp_dir = tempfile::tempdir().unwrap();
        let volume = LocalVolume::new("name", temp_dir.path()).unwrap();
        write(&volume, "old", b"data").await;
        volume.rename(Path::new("old"), Path::new("old--cs-ab")).await.unwrap();
        assert!(!temp_dir.path().join("old").exists());
        assert_eq!(volume.stat(Path::new("old--cs-ab")).await.unwrap().size, 4);
    }

    #[tokio::test]
    async fn test_rename_refuses_to_overwrite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let volume = LocalVolume::new("name", temp_dir.path()).unwrap();
        write(&volume, "one", b"1").await;
        write(&volume, "two", b"22").await;
        let err = volume.rename(Path::new("one"), Path::new("two")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
        assert_eq!(volume.stat(Path::new("two")).await.unwrap().size, 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let volume = LocalVolume::new("name", temp_dir.path()).unwrap();
        write(&volume, "file", b"data").await;
        volume.delete(Path::new("file")).await.unwrap();
        assert!(!temp_dir.path().join("file").exists());
        let err = volume.delete(Path::new("file")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stat() {
        let temp_dir = tempfile::tempdir().unwrap();
        let volume = LocalVolume::new("name", temp_dir.path()).unwrap();
        write(&volume, "file", b"Hello, world!").await;
        let info = volume.stat(Path::new("file")).await.unwrap();
        assert_eq!(info.path, PathBuf::from("file"));
        assert_eq!(info.size, 13);
    }

    #[tokio::test]
    async fn test_list_walks_nested_directories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let volume = LocalVolume::new("name", temp_dir.path()).unwrap();
        write(&volume, "top", b"1").await;
        write(&volume, "0/mid", b"2").await;
        write(&volume, "0/1/2/deep--cs-ff", b"3").await;
        let files: Vec<_> = volume.list_stream().try_collect().await.unwrap();
        let mut paths: Vec<_> = files.into_iter().map(|f| f.path).collect();
        paths.sort();
        assert_eq!(paths, vec![PathBuf::from("0/1/2/deep--cs-ff"), PathBuf::from("0/mid"), PathBuf::from("top")]);
    }

    #[tokio::test]
    async fn test_free_bytes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let volume = LocalVolume::new("name", temp_dir.path()).unwrap();
        assert!(volume.free_bytes().await.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_prune_empty_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let volume = LocalVolume::new("name", temp_dir.path()).unwrap();
        write(&volume, "0/1/2/file", b"1").await;
        write(&volume, "a/keep", b"2").await;
        std::fs::create_dir_all(temp_dir.path().join("x/y/z")).unwrap();
        volume.delete(Path::new("0/1/2/file")).await.unwrap();
        // 0/1/2, 0/1, 0, x/y/z, x/y, x
        assert_eq!(volume.prune_empty_dirs().await.unwrap(), 6);
        assert!(temp_dir.path().join("a").is_dir());
        assert!(!temp_dir.path().join("0").exists());
        assert!(temp_dir.path().is_dir());
    }
}
