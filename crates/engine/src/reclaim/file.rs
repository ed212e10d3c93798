use crate::error::{ErrorKind, Result};
use crate::record::FileRecord;
use crate::{Context, HumanBytes};
use drivetest_storage::error::ErrorKind as StorageErrorKind;
use exn::ResultExt;

/// The record at the middle of `records` ordered oldest first.
///
/// Ties are broken by path so the choice is deterministic.
pub fn select_mid_aged<'a>(records: impl IntoIterator<Item = &'a FileRecord>) -> Option<&'a FileRecord> {
    let mut records: Vec<&FileRecord> = records.into_iter().collect();
    records.sort_by(|a, b| a.age_key().cmp(&b.age_key()).then_with(|| a.path.cmp(&b.path)));
    records.get(records.len() / 2).copied()
}

#[derive(Debug)]
pub enum Reclaimed {
    Deleted(FileRecord),
    /// Already gone; nothing was freed but the record is stale either way.
    Vanished(FileRecord),
}

impl Reclaimed {
    pub fn record(&self) -> &FileRecord {
        match self {
            Self::Deleted(record) | Self::Vanished(record) => record,
        }
    }
}

/// Delete one file to free space.
pub async fn reclaim_one(ctx: &Context, record: FileRecord) -> Result<Reclaimed> {
    match ctx.volume.delete(&record.path).await {
        Ok(()) => {
            let size = record.size.map(HumanBytes::from);
            match size {
                Some(size) => tracing::info!(path = %record.path.display(), "Deleted file ({size}) to reclaim space"),
                None => tracing::info!(path = %record.path.display(), "Deleted file to reclaim space"),
            }
            Ok(Reclaimed::Deleted(record))
        },
        Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => {
            tracing::debug!(path = %record.path.display(), "File to reclaim was already gone");
            Ok(Reclaimed::Vanished(record))
        },
        Err(e) => Err(e).or_raise(|| ErrorKind::Reclaim),
    }
}

/// Remove every empty directory below the test root, deepest first.
pub async fn delete_empty_dirs(ctx: &Context) -> Result<u64> {
    let removed = ctx.volume.prune_empty_dirs().await.or_raise(|| ErrorKind::Reclaim)?;
    tracing::info!(volume = ctx.volume.name(), removed, "Deleted empty directories");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::FilenameTags;
    use drivetest_config::Settings;
    use drivetest_storage::backend::MockVolume;
    use rstest::rstest;
    use std::path::PathBuf;
    use std::sync::Arc;
    use time::{Duration, OffsetDateTime};

    fn aged(path: &str, age_secs: i64) -> FileRecord {
        let mut record = FileRecord::new(&FilenameTags, path);
        record.created_at = Some(OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_000_000 - age_secs));
        record
    }

    #[rstest]
    #[case::single(&[10], "f0")]
    #[case::two(&[10, 20], "f0")]
    #[case::three(&[30, 10, 20], "f2")]
    #[case::five(&[50, 40, 30, 20, 10], "f2")]
    #[case::six(&[60, 50, 40, 30, 20, 10], "f3")]
    fn picks_the_median(#[case] ages: &[i64], #[case] expected: &str) {
        let records: Vec<_> = ages.iter().enumerate().map(|(i, age)| aged(&format!("f{i}"), *age)).collect();
        let chosen = select_mid_aged(&records).unwrap();
        assert_eq!(chosen.path, PathBuf::from(expected));
    }

    #[test]
    fn never_oldest_or_newest_with_three_or_more() {
        let records: Vec<_> = (0..9).map(|i| aged(&format!("f{i}"), i * 7 % 9)).collect();
        let chosen = select_mid_aged(&records).unwrap();
        let oldest = records.iter().min_by_key(|r| r.age_key()).unwrap();
        let newest = records.iter().max_by_key(|r| r.age_key()).unwrap();
        assert_ne!(chosen.path, oldest.path);
        assert_ne!(chosen.path, newest.path);
    }

    #[test]
    fn empty_has_no_candidate() {
        assert!(select_mid_aged(&Vec::<FileRecord>::new()).is_none());
    }

    #[tokio::test]
    async fn reclaim_deletes_the_file() {
        let volume = MockVolume::with_files([("a/Xk2m", b"data".as_slice()), ("b/Pq8R", b"more".as_slice())]);
        let ctx = Context::new(Arc::new(volume.clone()), &Settings::default());
        let outcome = reclaim_one(&ctx, FileRecord::new(&FilenameTags, "a/Xk2m")).await.unwrap();
        assert!(matches!(outcome, Reclaimed::Deleted(_)));
        assert_eq!(volume.paths(), vec![PathBuf::from("b/Pq8R")]);
        let outcome = reclaim_one(&ctx, FileRecord::new(&FilenameTags, "a/Xk2m")).await.unwrap();
        assert!(matches!(outcome, Reclaimed::Vanished(_)));
    }

    #[tokio::test]
    async fn empty_dirs_are_pruned() {
        let volume = MockVolume::with_files([("a/b/c/Xk2m", b"data".as_slice()), ("d/Pq8R", b"more".as_slice())]);
        let ctx = Context::new(Arc::new(volume.clone()), &Settings::default());
        reclaim_one(&ctx, FileRecord::new(&FilenameTags, "a/b/c/Xk2m")).await.unwrap();
        assert_eq!(delete_empty_dirs(&ctx).await.unwrap(), 3);
        assert_eq!(volume.dirs(), vec![PathBuf::from("d")]);
        assert_eq!(delete_empty_dirs(&ctx).await.unwrap(), 0);
    }
}
