//! In-memory volume for testing.

use super::{BoxSyncRead, BoxSyncWrite, FileInfoStream};
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use crate::path::validate as validate_path;
use crate::Volume;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;
use time::{Duration, OffsetDateTime};

const DEFAULT_CAPACITY: u64 = 1 << 40;

struct Entry {
    modified: OffsetDateTime,
    data: Vec<u8>,
}

struct State {
    files: HashMap<PathBuf, Entry>,
    dirs: BTreeSet<PathBuf>,
    capacity: u64,
    forced_free: Option<u64>,
    /// Logical clock, so every mutation observably moves the mtime forward
    /// regardless of wall-clock resolution.
    clock: OffsetDateTime,
    reads: usize,
    renames: usize,
    /// Paths whose readers fail with an I/O error.
    unreadable: BTreeSet<PathBuf>,
    stat_delay: StdDuration,
}
impl State {
    fn tick(&mut self) -> OffsetDateTime {
        self.clock += Duration::seconds(1);
        self.clock
    }

    fn used(&self) -> u64 {
        self.files.values().map(|e| e.data.len() as u64).sum()
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(dir) = parent.filter(|p| !p.as_os_str().is_empty()) {
            self.dirs.insert(dir.to_path_buf());
            parent = dir.parent();
        }
    }
}

/// In-memory volume for tests.
///
/// Files live in a `HashMap` behind a shared lock, so writers handed out by
/// [`writer()`](Volume::writer) keep working from blocking tasks. Free space
/// is `capacity - bytes stored` unless forced with
/// [`set_free_bytes()`](Self::set_free_bytes), and every mutation advances a
/// logical clock so modification times always change.
///
/// # Examples
///
/// ```
/// use drivetest_storage::{Volume, backend::MockVolume};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let volume = MockVolume::with_files([("0/kq2v9x0c", b"random bytes")]).with_capacity(100);
/// assert_eq!(volume.stat(Path::new("0/kq2v9x0c")).await?.size, 12);
/// assert_eq!(volume.free_bytes().await?, 88);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MockVolume {
    name: String,
    state: Arc<Mutex<State>>,
}

impl MockVolume {
    /// Create a mock volume pre-populated with files.
    ///
    /// Panics if any path fails validation. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut state = State {
            files: HashMap::new(),
            dirs: BTreeSet::new(),
            capacity: DEFAULT_CAPACITY,
            forced_free: None,
            clock: OffsetDateTime::UNIX_EPOCH,
            reads: 0,
            renames: 0,
            unreadable: BTreeSet::new(),
            stat_delay: StdDuration::ZERO,
        };
        for (path, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                // Deliberate: MockVolume only exists for tests.
                panic!("MockVolume::with_files: invalid path {}", path.display());
            };
            let modified = state.tick();
            state.add_parents(&validated);
            state.files.insert(validated, Entry { modified, data: data.into() });
        }
        Self {
            name: "mock".to_string(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Total size of the volume; free space is whatever the files don't use.
    pub fn with_capacity(self, capacity: u64) -> Self {
        self.state().capacity = capacity;
        self
    }

    /// Force the value reported by [`free_bytes()`](Volume::free_bytes), or
    /// go back to deriving it from capacity with `None`.
    pub fn set_free_bytes(&self, free: Option<u64>) {
        self.state().forced_free = free;
    }

    /// Bump a file's modification time as if something wrote to it.
    pub fn touch(&self, path: impl AsRef<Path>) {
        let mut state = self.state();
        let modified = state.tick();
        if let Some(entry) = state.files.get_mut(path.as_ref()) {
            entry.modified = modified;
        }
    }

    /// Flip every bit of the byte at `offset`.
    pub fn corrupt(&self, path: impl AsRef<Path>, offset: usize) {
        let mut state = self.state();
        let modified = state.tick();
        if let Some(entry) = state.files.get_mut(path.as_ref())
            && let Some(byte) = entry.data.get_mut(offset)
        {
            *byte = !*byte;
            entry.modified = modified;
        }
    }

    /// Cut a file down to `len` bytes.
    pub fn truncate(&self, path: impl AsRef<Path>, len: usize) {
        let mut state = self.state();
        let modified = state.tick();
        if let Some(entry) = state.files.get_mut(path.as_ref()) {
            entry.data.truncate(len);
            entry.modified = modified;
        }
    }

    /// Make every [`reader()`](Volume::reader) for `path` fail with an I/O
    /// error, as a bad sector would.
    pub fn set_unreadable(&self, path: impl Into<PathBuf>) {
        self.state().unreadable.insert(path.into());
    }

    /// Make every [`stat()`](Volume::stat) take `delay` (tokio time).
    pub fn set_stat_delay(&self, delay: StdDuration) {
        self.state().stat_delay = delay;
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.state().files.get(path.as_ref()).map(|e| e.data.clone())
    }

    /// Every file path currently stored, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.state().files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Every directory currently known, sorted.
    pub fn dirs(&self) -> Vec<PathBuf> {
        self.state().dirs.iter().cloned().collect()
    }

    /// How many readers have been opened.
    pub fn reads(&self) -> usize {
        self.state().reads
    }

    /// How many renames have succeeded.
    pub fn renames(&self) -> usize {
        self.state().renames
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread shouldn't cascade into every other test.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
impl Default for MockVolume {
    fn default() -> Self {
        let files: [(&str, &[u8]); 0] = [];
        Self::with_files(files)
    }
}

struct MockWriter {
    state: Arc<Mutex<State>>,
    path: PathBuf,
}
impl Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let free = state.capacity.saturating_sub(state.used());
        if (buf.len() as u64) > free {
            return Err(io::Error::new(io::ErrorKind::StorageFull, "mock volume is full"));
        }
        let modified = state.tick();
        match state.files.get_mut(&self.path) {
            Some(entry) => {
                entry.data.extend_from_slice(buf);
                entry.modified = modified;
                Ok(buf.len())
            },
            None => Err(io::Error::new(io::ErrorKind::NotFound, "file removed while writing")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Volume for MockVolume {
    fn name(&self) -> &str {
        &self.name
    }

    async fn free_bytes(&self) -> Result<u64> {
        let state = self.state();
        Ok(state.forced_free.unwrap_or_else(|| state.capacity.saturating_sub(state.used())))
    }

    fn list_stream(&self) -> FileInfoStream<'_> {
        Box::pin(stream! {
            // Snapshot under the lock, then drop it before yielding.
            let entries: Vec<FileInfo> = {
                let state = self.state();
                state
                    .files
                    .iter()
                    .map(|(path, e)| FileInfo::new(path.clone(), e.data.len() as u64, e.modified))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        let path = validate_path(path)?;
        let mut state = self.state();
        if state.unreadable.contains(&path) {
            exn::bail!(ErrorKind::Io(io::Error::other(format!("unreadable: {}", path.display()))));
        }
        let data = state.files.get(&path).map(|e| e.data.clone()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        state.reads += 1;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn writer(&self, path: &Path) -> Result<BoxSyncWrite> {
        let path = validate_path(path)?;
        let mut state = self.state();
        if state.files.contains_key(&path) {
            exn::bail!(ErrorKind::AlreadyExists(path));
        }
        let modified = state.tick();
        state.add_parents(&path);
        state.files.insert(path.clone(), Entry { modified, data: Vec::new() });
        Ok(Box::new(MockWriter {
            state: Arc::clone(&self.state),
            path,
        }))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.state().files.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        let mut state = self.state();
        if state.files.contains_key(&to) {
            exn::bail!(ErrorKind::AlreadyExists(to));
        }
        let entry = state.files.remove(&from).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(from)))?;
        state.add_parents(&to);
        state.files.insert(to, entry);
        state.renames += 1;
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let delay = self.state().stat_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let state = self.state();
        let entry = state.files.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(FileInfo::new(path, entry.data.len() as u64, entry.modified))
    }

    async fn prune_empty_dirs(&self) -> Result<u64> {
        let mut state = self.state();
        let mut removed = 0;
        // Deepest first, so parents emptied by this pass go too.
        let mut dirs: Vec<PathBuf> = state.dirs.iter().cloned().collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            let occupied = state.files.keys().any(|f| f.starts_with(&dir))
                || state.dirs.iter().any(|d| d != &dir && d.starts_with(&dir));
            if !occupied {
                state.dirs.remove(&dir);
                removed += 1;
            }
        }
        Ok(removed)
    }
}
