//! What the engine knows about each test file.

use crate::error::{ErrorKind, Result};
use crate::naming::{CHECKSUM_TAG, NamingScheme, Tags};
use drivetest_storage::{FileInfo, Volume};
use exn::ResultExt;
use futures::StreamExt;
use std::collections::HashMap;
use std::collections::hash_map::Values;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;

/// One test file.
///
/// `path` changes when the file is tagged; `logical_id` never does and is
/// the key used everywhere else.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub logical_id: PathBuf,
    pub tags: Tags,
    pub size: Option<u64>,
    pub modified: Option<OffsetDateTime>,
    /// When this process wrote the file; `None` for files found on disk.
    pub created_at: Option<OffsetDateTime>,
    pub checksummed_at: Option<OffsetDateTime>,
    pub verified_at: Option<OffsetDateTime>,
    pub write_elapsed: Option<Duration>,
    pub checksum_elapsed: Option<Duration>,
}

impl FileRecord {
    pub fn new(naming: &dyn NamingScheme, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            logical_id: naming.logical_id(&path),
            tags: naming.decode_tags(&path),
            path,
            size: None,
            modified: None,
            created_at: None,
            checksummed_at: None,
            verified_at: None,
            write_elapsed: None,
            checksum_elapsed: None,
        }
    }

    pub fn from_info(naming: &dyn NamingScheme, info: FileInfo) -> Self {
        let mut record = Self::new(naming, info.path);
        record.size = Some(info.size);
        record.modified = Some(info.modified);
        record
    }

    /// The digest recorded in the file name, if any.
    pub fn checksum(&self) -> Option<&str> {
        self.tags.get(CHECKSUM_TAG).map(String::as_str)
    }

    pub fn is_checksummed(&self) -> bool {
        self.checksum().is_some()
    }

    /// Point the record at the file's new name after a rename.
    pub fn retag(&mut self, naming: &dyn NamingScheme, path: PathBuf) {
        self.tags = naming.decode_tags(&path);
        self.path = path;
    }

    /// Creation time when known, otherwise the last modification.
    pub fn age_key(&self) -> Option<OffsetDateTime> {
        self.created_at.or(self.modified)
    }

    /// Bytes per second achieved writing this file.
    pub fn write_throughput(&self) -> Option<f64> {
        throughput(self.size?, self.write_elapsed?)
    }

    /// Bytes per second achieved reading this file for its checksum.
    pub fn checksum_throughput(&self) -> Option<f64> {
        throughput(self.size?, self.checksum_elapsed?)
    }
}

#[allow(clippy::cast_precision_loss)]
fn throughput(bytes: u64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    (secs > 0.0).then(|| bytes as f64 / secs)
}

/// Every known [`FileRecord`], keyed by logical ID.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    records: HashMap<PathBuf, FileRecord>,
}

impl Registry {
    /// Rebuild the registry from the files on the volume.
    ///
    /// Entries that cannot be read are logged and skipped; only failing to
    /// start the walk is an error.
    pub async fn find_files(volume: &dyn Volume, naming: &dyn NamingScheme) -> Result<Self> {
        let mut registry = Self::default();
        let mut files = volume.list_stream();
        let mut failures = 0u64;
        while let Some(file) = files.next().await {
            match file {
                Ok(info) => {
                    let record = FileRecord::from_info(naming, info);
                    if let Some(previous) = registry.insert(record) {
                        tracing::warn!(path = %previous.path.display(), "Two files share a logical id; keeping one");
                    }
                },
                Err(e) => {
                    failures += 1;
                    tracing::warn!(volume = volume.name(), "Skipping unreadable entry: {e}");
                },
            }
        }
        if registry.is_empty() && failures > 0 {
            // Nothing listed at all: the volume itself is the problem.
            exn::bail!(ErrorKind::Scan);
        }
        tracing::info!(volume = volume.name(), files = registry.len(), "Found files");
        Ok(registry)
    }

    pub fn insert(&mut self, record: FileRecord) -> Option<FileRecord> {
        self.records.insert(record.logical_id.clone(), record)
    }

    pub fn remove(&mut self, logical_id: &Path) -> Option<FileRecord> {
        self.records.remove(logical_id)
    }

    pub fn get(&self, logical_id: &Path) -> Option<&FileRecord> {
        self.records.get(logical_id)
    }

    pub fn get_mut(&mut self, logical_id: &Path) -> Option<&mut FileRecord> {
        self.records.get_mut(logical_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> Values<'_, PathBuf, FileRecord> {
        self.records.values()
    }

    pub fn into_records(self) -> Vec<FileRecord> {
        self.records.into_values().collect()
    }

    /// Mean write throughput over every record written by this process.
    #[allow(clippy::cast_precision_loss)]
    pub fn average_write_throughput(&self) -> Option<f64> {
        let speeds: Vec<f64> = self.iter().filter_map(FileRecord::write_throughput).collect();
        (!speeds.is_empty()).then(|| speeds.iter().sum::<f64>() / speeds.len() as f64)
    }
}

impl FromIterator<FileRecord> for Registry {
    fn from_iter<I: IntoIterator<Item = FileRecord>>(iter: I) -> Self {
        let mut registry = Self::default();
        for record in iter {
            registry.insert(record);
        }
        registry
    }
}
