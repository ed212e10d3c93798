use crate::checksum::error::{ErrorKind, Result as ChecksumResult};
use crate::error::{ErrorKind as LibraryErrorKind, Result as LibraryResult};
use crate::naming::CHECKSUM_TAG;
use crate::record::FileRecord;
use crate::{Context, HumanBytes};
use drivetest_storage::Volume;
use drivetest_storage::error::ErrorKind as StorageErrorKind;
use exn::ResultExt;
use std::io::{ErrorKind as IoErrorKind, Read};
use std::path::Path;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// A computed content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    /// Lowercase hex BLAKE3.
    pub hex: String,
    /// Bytes actually read.
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Outcome of [`checksum_file`].
#[derive(Debug)]
pub enum Checksummed {
    /// The digest is now in the file name.
    Recorded(FileRecord),
    /// The file already carried a digest; nothing was read.
    AlreadyTagged(FileRecord),
    /// The modification time moved during the settle wait.
    InFlux(FileRecord),
    /// The file disappeared before it could be read.
    Vanished(FileRecord),
    /// Cancelled during the settle wait; the file is untouched.
    Cancelled(FileRecord),
}

/// Hash a file's full contents, reading `read_chunk` bytes at a time.
pub async fn digest_file(volume: &dyn Volume, path: &Path, read_chunk: usize) -> LibraryResult<Digest> {
    digest_file_inner(volume, path, read_chunk).await.or_raise(|| LibraryErrorKind::Checksum)
}

pub(crate) async fn digest_file_inner(volume: &dyn Volume, path: &Path, read_chunk: usize) -> ChecksumResult<Digest> {
    let mut reader = volume.reader(path).await.or_raise(|| ErrorKind::Storage)?;
    let started = Instant::now();
    let chunk = read_chunk.max(1);
    let hashed = tokio::task::spawn_blocking(move || -> std::io::Result<(String, u64)> {
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; chunk];
        let mut total = 0u64;
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    hasher.update(&buf[..n]);
                    total += n as u64;
                },
                Err(e) if e.kind() == IoErrorKind::Interrupted => {},
                Err(e) => return Err(e),
            }
        }
        Ok((hasher.finalize().to_hex().to_string(), total))
    })
    .await
    .or_raise(|| ErrorKind::Join)?;
    let (hex, bytes) = hashed.or_raise(|| ErrorKind::Read(path.to_path_buf()))?;
    Ok(Digest {
        hex,
        bytes,
        elapsed: started.elapsed(),
    })
}

/// Current modification time, or `None` if the file is gone.
pub(crate) async fn sample_mtime(volume: &dyn Volume, path: &Path) -> ChecksumResult<Option<OffsetDateTime>> {
    match volume.stat(path).await {
        Ok(info) => Ok(Some(info.modified)),
        Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => Ok(None),
        Err(e) => Err(e).or_raise(|| ErrorKind::Storage),
    }
}

/// Checksum one file if it holds still for the settle interval.
pub async fn checksum_file(ctx: &Context, record: FileRecord, cancel: &CancellationToken) -> LibraryResult<Checksummed> {
    checksum_file_inner(ctx, record, cancel).await.or_raise(|| LibraryErrorKind::Checksum)
}

pub(crate) async fn checksum_file_inner(
    ctx: &Context,
    record: FileRecord,
    cancel: &CancellationToken,
) -> ChecksumResult<Checksummed> {
    if record.is_checksummed() {
        return Ok(Checksummed::AlreadyTagged(record));
    }
    let volume = ctx.volume.as_ref();
    let Some(before) = sample_mtime(volume, &record.path).await? else {
        return Ok(Checksummed::Vanished(record));
    };
    tokio::select! {
        () = tokio::time::sleep(ctx.settle) => {},
        () = cancel.cancelled() => return Ok(Checksummed::Cancelled(record)),
    }
    match sample_mtime(volume, &record.path).await? {
        None => Ok(Checksummed::Vanished(record)),
        Some(after) if after != before => {
            tracing::info!(path = %record.path.display(), "File is still changing; skipping");
            Ok(Checksummed::InFlux(record))
        },
        Some(_) => record_checksum(ctx, record).await.map(Checksummed::Recorded),
    }
}

/// Hash a file already known to be stable and tag it with the digest.
pub(crate) async fn record_checksum(ctx: &Context, mut record: FileRecord) -> ChecksumResult<FileRecord> {
    let digest = digest_file_inner(ctx.volume.as_ref(), &record.path, ctx.read_chunk).await?;
    let tagged = ctx
        .naming
        .with_tag(ctx.volume.as_ref(), &record.path, CHECKSUM_TAG, &digest.hex)
        .await
        .or_raise(|| ErrorKind::Tag)?;
    let now = OffsetDateTime::now_utc();
    record.retag(ctx.naming.as_ref(), tagged);
    record.size = Some(digest.bytes);
    record.checksummed_at = Some(now);
    // The digest was just read from disk, so the content is verified as of now.
    record.verified_at = Some(now);
    record.checksum_elapsed = Some(digest.elapsed);
    match record.checksum_throughput() {
        Some(speed) => tracing::info!(path = %record.path.display(), "Checksummed {} at {}/s", HumanBytes::from(digest.bytes), HumanBytes(speed)),
        None => tracing::info!(path = %record.path.display(), "Checksummed {}", HumanBytes::from(digest.bytes)),
    }
    Ok(record)
}
