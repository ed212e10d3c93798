use crate::blocks::RandomBlockPool;
use crate::error::{ErrorKind as LibraryErrorKind, Result as LibraryResult};
use crate::generate::error::{Error as GenerateError, ErrorKind, Result as GenerateResult};
use crate::record::FileRecord;
use crate::{Context, HumanBytes};
use drivetest_storage::backend::BoxSyncWrite;
use drivetest_storage::error::ErrorKind as StorageErrorKind;
use exn::ResultExt;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;

const NAME_LEN: usize = 16;
const CREATE_ATTEMPTS: usize = 3;

/// Outcome of [`generate_file`].
#[derive(Debug)]
pub enum Generated {
    Created(FileRecord),
    /// Not even the smallest file fits above the free-space floor.
    SpaceExhausted,
}

/// Size a file from the current free space and write it.
pub async fn generate_file<R: Rng + Send>(
    ctx: &Context,
    pool: &Arc<RandomBlockPool>,
    rng: &mut R,
) -> LibraryResult<Generated> {
    generate_file_inner(ctx, pool, rng).await.or_raise(|| LibraryErrorKind::Generate)
}

pub(crate) async fn generate_file_inner<R: Rng + Send>(
    ctx: &Context,
    pool: &Arc<RandomBlockPool>,
    rng: &mut R,
) -> GenerateResult<Generated> {
    let Some(size) = ctx.budget.planned_size(rng).await.or_raise(|| ErrorKind::FreeSpace)? else {
        return Ok(Generated::SpaceExhausted);
    };
    write_file_inner(ctx, pool, size, rng).await.map(Generated::Created)
}

/// Write a file of exactly `size` bytes at a fresh random location.
pub async fn write_file<R: Rng + Send>(
    ctx: &Context,
    pool: &Arc<RandomBlockPool>,
    size: u64,
    rng: &mut R,
) -> LibraryResult<FileRecord> {
    write_file_inner(ctx, pool, size, rng).await.or_raise(|| LibraryErrorKind::Generate)
}

pub(crate) async fn write_file_inner<R: Rng + Send>(
    ctx: &Context,
    pool: &Arc<RandomBlockPool>,
    size: u64,
    rng: &mut R,
) -> GenerateResult<FileRecord> {
    let plan = pool.plan(size, rng);
    let (path, mut writer) = create(ctx, rng).await?;
    let created_at = OffsetDateTime::now_utc();
    let started = Instant::now();

    let blocks = Arc::clone(pool);
    let written = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        for chunk in plan {
            writer.write_all(blocks.bytes(chunk))?;
        }
        writer.flush()
    })
    .await
    .or_raise(|| ErrorKind::Join)?;
    if let Err(e) = written {
        return Err(e).or_raise(|| ErrorKind::Write(path));
    }
    let elapsed = started.elapsed();

    let info = ctx.volume.stat(&path).await.or_raise(|| ErrorKind::Storage)?;
    if info.size != size {
        exn::bail!(ErrorKind::SizeMismatch {
            path,
            expected: size,
            actual: info.size,
        });
    }

    let mut record = FileRecord::from_info(ctx.naming.as_ref(), info);
    record.created_at = Some(created_at);
    record.write_elapsed = Some(elapsed);
    match record.write_throughput() {
        Some(speed) => tracing::info!(path = %path.display(), "Wrote {} at {}/s", HumanBytes::from(size), HumanBytes(speed)),
        None => tracing::info!(path = %path.display(), "Wrote {}", HumanBytes::from(size)),
    }
    Ok(record)
}

/// The file a failed write left on disk, if it is still there.
pub(crate) async fn left_behind(ctx: &Context, error: &GenerateError) -> Option<FileRecord> {
    let path = match &**error {
        ErrorKind::Write(path) | ErrorKind::SizeMismatch { path, .. } => path,
        _ => return None,
    };
    match ctx.volume.stat(path).await {
        Ok(info) => Some(FileRecord::from_info(ctx.naming.as_ref(), info)),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Could not stat partial file: {e}");
            None
        },
    }
}

/// Open a new file, picking another name if the first is somehow taken.
async fn create<R: Rng + Send>(ctx: &Context, rng: &mut R) -> GenerateResult<(PathBuf, BoxSyncWrite)> {
    let mut attempt = 1;
    loop {
        let path = random_location(ctx.max_depth, rng);
        match ctx.volume.writer(&path).await {
            Ok(writer) => return Ok((path, writer)),
            Err(e) if attempt < CREATE_ATTEMPTS && matches!(&*e, StorageErrorKind::AlreadyExists(_)) => {
                tracing::debug!(path = %path.display(), "Name collision, picking another");
                attempt += 1;
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Storage),
        }
    }
}

/// A random relative path: zero to `max_depth` two-hex-digit directories and
/// an alphanumeric file name.
pub fn random_location<R: Rng>(max_depth: u32, rng: &mut R) -> PathBuf {
    let depth = rng.gen_range(0..=max_depth);
    let mut path: PathBuf = (0..depth).map(|_| format!("{:02x}", rng.r#gen::<u8>())).collect();
    let name: String = (0..NAME_LEN).map(|_| char::from(rng.sample(Alphanumeric))).collect();
    path.push(name);
    path
}
