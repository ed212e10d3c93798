use crate::checksum::{Checksummed, checksum_file};
use crate::error::{Error as LibraryError, ErrorKind as LibraryErrorKind};
use crate::generate::{left_behind, write_file_inner};
use crate::record::FileRecord;
use crate::verify::{Verification, verify_file};
use crate::{Context, RandomBlockPool};
use rand::rngs::StdRng;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One unit of work handed to a worker.
#[derive(Debug)]
pub(crate) enum Job {
    Generate { size: u64 },
    Checksum(FileRecord),
    Verify(FileRecord),
}

impl Job {
    /// The record this job owns while it runs.
    pub(crate) fn logical_id(&self) -> Option<PathBuf> {
        match self {
            Self::Generate { .. } => None,
            Self::Checksum(record) | Self::Verify(record) => Some(record.logical_id.clone()),
        }
    }
}

impl Display for Job {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generate { size } => write!(f, "generate {size} bytes"),
            Self::Checksum(record) => write!(f, "checksum {}", record.path.display()),
            Self::Verify(record) => write!(f, "verify {}", record.path.display()),
        }
    }
}

/// What a worker reports back to the loop.
#[derive(Debug)]
pub(crate) enum Outcome {
    Created(FileRecord),
    Checksummed(Checksummed),
    Verified(Option<Verification>),
    /// A write failed part way and left this file behind.
    Partial { job: String, record: FileRecord, error: LibraryError },
    Failed { job: String, error: LibraryError },
}

pub(crate) async fn run_job(
    ctx: Arc<Context>,
    pool: Arc<RandomBlockPool>,
    job: Job,
    mut rng: StdRng,
    cancel: CancellationToken,
) -> Outcome {
    let description = job.to_string();
    let result = match job {
        Job::Generate { size } => return generate(&ctx, &pool, size, &mut rng, description).await,
        Job::Checksum(record) => checksum_file(&ctx, record, &cancel).await.map(Outcome::Checksummed),
        Job::Verify(record) => Ok(Outcome::Verified(verify_file(&ctx, record).await)),
    };
    result.unwrap_or_else(|error| Outcome::Failed {
        job: description,
        error,
    })
}

async fn generate(ctx: &Context, pool: &Arc<RandomBlockPool>, size: u64, rng: &mut StdRng, job: String) -> Outcome {
    let error = match write_file_inner(ctx, pool, size, rng).await {
        Ok(record) => return Outcome::Created(record),
        Err(error) => error,
    };
    let partial = left_behind(ctx, &error).await;
    let error = error.raise(LibraryErrorKind::Generate);
    match partial {
        Some(record) => Outcome::Partial { job, record, error },
        None => Outcome::Failed { job, error },
    }
}
