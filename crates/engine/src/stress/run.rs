use crate::checksum::Checksummed;
use crate::reclaim::{Reclaimed, reclaim_one, select_mid_aged};
use crate::record::{FileRecord, Registry};
use crate::stress::worker::{Job, Outcome, run_job};
use crate::verify::{Verdict, VerifySummary};
use crate::{Context, HumanBytes, RandomBlockPool};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Volume-level failures (writes, free-space queries, deletions) in a row,
/// with no success in between, after which the loop gives up on the volume.
/// A failure tied to one existing file only backs that file off.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Generate, checksum, verify and reclaim until cancelled.
    Stress,
    /// Generate until the free-space floor is reached.
    CreateFiles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    Idle,
    Running,
    /// No new workers start; running ones finish their current file.
    Draining,
    Stopped,
}

/// Aggregate statistics reported when a run stops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StressSummary {
    pub files_created: u64,
    pub bytes_written: u64,
    pub checksums_recorded: u64,
    pub in_flux: u64,
    pub verify: VerifySummary,
    pub files_reclaimed: u64,
    pub failures: u64,
    /// Mean write throughput, in bytes per second, over the registry.
    pub average_write_throughput: Option<f64>,
    pub space_exhausted: bool,
    pub cancelled: bool,
}

impl Display for StressSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created {} files ({}), recorded {} checksums, {}, reclaimed {} files, {} failures",
            self.files_created,
            HumanBytes::from(self.bytes_written),
            self.checksums_recorded,
            self.verify,
            self.files_reclaimed,
            self.failures,
        )?;
        if let Some(speed) = self.average_write_throughput {
            write!(f, ", average speed {}/s", HumanBytes(speed))?;
        }
        Ok(())
    }
}

/// The worker pool and the loop that feeds it.
pub struct StressLoop {
    ctx: Arc<Context>,
    pool: Arc<RandomBlockPool>,
    mode: Mode,
    state: RunState,
    registry: Registry,
    /// Logical IDs owned by a running worker.
    busy: HashSet<PathBuf>,
    tasks: HashMap<Id, Option<PathBuf>>,
    workers: JoinSet<Outcome>,
    /// Records not to hand out again before the given instant.
    backoff: HashMap<PathBuf, Instant>,
    consecutive_failures: u32,
    rng: StdRng,
    summary: StressSummary,
}

impl StressLoop {
    pub fn new(ctx: Arc<Context>, pool: Arc<RandomBlockPool>, registry: Registry, mode: Mode, rng: StdRng) -> Self {
        Self {
            ctx,
            pool,
            mode,
            state: RunState::Idle,
            registry,
            busy: HashSet::new(),
            tasks: HashMap::new(),
            workers: JoinSet::new(),
            backoff: HashMap::new(),
            consecutive_failures: 0,
            rng,
            summary: StressSummary::default(),
        }
    }

    /// Run until cancelled or, for [`Mode::CreateFiles`], until the volume
    /// reaches its free-space floor. Always drains before returning.
    pub async fn run(mut self, cancel: CancellationToken) -> StressSummary {
        self.state = RunState::Running;
        tracing::info!(mode = ?self.mode, threads = self.ctx.threads, files = self.registry.len(), "Starting");
        while self.state == RunState::Running {
            self.step(&cancel).await;
        }
        self.drain().await;
        self.summary.average_write_throughput = self.registry.average_write_throughput();
        tracing::info!("Stopped: {}", self.summary);
        self.summary
    }

    /// One loop iteration: collect finished workers, then reclaim, start a
    /// worker, or wait.
    pub(crate) async fn step(&mut self, cancel: &CancellationToken) {
        while let Some(joined) = self.workers.try_join_next_with_id() {
            self.apply(joined);
        }
        if cancel.is_cancelled() {
            tracing::info!("Cancelled; waiting for running workers to finish");
            self.summary.cancelled = true;
            self.state = RunState::Draining;
            return;
        }
        if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            tracing::error!(failures = self.consecutive_failures, "Too many consecutive failures; stopping");
            self.state = RunState::Draining;
            return;
        }

        let free = match self.ctx.budget.free_bytes().await {
            Ok(free) => free,
            Err(e) => {
                tracing::warn!("Could not query free space: {e}");
                self.failed();
                self.idle(cancel).await;
                return;
            },
        };

        if self.mode == Mode::Stress && self.ctx.budget.needs_reclaim(free) {
            tracing::info!(free = %HumanBytes::from(free), "Crossed space limit; deleting a file");
            if !self.reclaim().await {
                self.idle(cancel).await;
            }
            return;
        }

        if self.workers.len() >= self.ctx.threads {
            self.idle(cancel).await;
            return;
        }
        match self.next_job(free) {
            Some(job) => self.spawn(job, cancel),
            None => self.idle(cancel).await,
        }
    }

    /// Pick the next job: pending checksums first, then due verifications,
    /// then a new file.
    fn next_job(&mut self, free: u64) -> Option<Job> {
        if self.mode == Mode::Stress {
            let now = Instant::now();
            let wall = OffsetDateTime::now_utc();
            let available = |r: &&FileRecord| {
                !self.busy.contains(&r.logical_id) && self.backoff.get(&r.logical_id).is_none_or(|until| *until <= now)
            };
            let checksum = self.registry.iter().filter(|r| !r.is_checksummed()).filter(available).min_by_key(|r| r.age_key());
            if let Some(record) = checksum {
                return Some(Job::Checksum(record.clone()));
            }
            let verify = self
                .registry
                .iter()
                .filter(|r| r.is_checksummed())
                .filter(|r| r.verified_at.is_none_or(|at| wall - at >= self.ctx.reverify))
                .filter(available)
                .min_by_key(|r| r.verified_at);
            if let Some(record) = verify {
                return Some(Job::Verify(record.clone()));
            }
        }

        match self.ctx.budget.plan(free, &mut self.rng) {
            Some(size) => Some(Job::Generate { size }),
            None => {
                if self.mode == Mode::CreateFiles {
                    tracing::info!(free = %HumanBytes::from(free), "Stopped at free space limit");
                    self.summary.space_exhausted = true;
                    self.state = RunState::Draining;
                }
                None
            },
        }
    }

    fn spawn(&mut self, job: Job, cancel: &CancellationToken) {
        let owned = job.logical_id();
        if let Some(logical_id) = &owned {
            self.busy.insert(logical_id.clone());
        }
        tracing::debug!(workers = self.workers.len() + 1, "Starting worker: {job}");
        let rng = StdRng::seed_from_u64(self.rng.next_u64());
        let handle = self.workers.spawn(run_job(
            Arc::clone(&self.ctx),
            Arc::clone(&self.pool),
            job,
            rng,
            cancel.clone(),
        ));
        self.tasks.insert(handle.id(), owned);
    }

    /// Delete one idle record from the middle of the age distribution.
    /// Returns `false` when there was nothing to delete.
    async fn reclaim(&mut self) -> bool {
        let candidate = select_mid_aged(self.registry.iter().filter(|r| !self.busy.contains(&r.logical_id))).cloned();
        let Some(record) = candidate else {
            tracing::warn!("Below space limit but no idle file to delete");
            return false;
        };
        match reclaim_one(&self.ctx, record).await {
            Ok(outcome) => {
                let logical_id = outcome.record().logical_id.clone();
                self.registry.remove(&logical_id);
                self.backoff.remove(&logical_id);
                if let Reclaimed::Deleted(_) = outcome {
                    self.summary.files_reclaimed += 1;
                }
                true
            },
            Err(e) => {
                tracing::error!("Could not delete file: {e:?}");
                self.failed();
                false
            },
        }
    }

    /// Wait for a worker to finish, cancellation, or the poll interval.
    async fn idle(&mut self, cancel: &CancellationToken) {
        if self.workers.is_empty() {
            tokio::select! {
                () = tokio::time::sleep(self.ctx.poll) => {},
                () = cancel.cancelled() => {},
            }
            return;
        }
        let joined = tokio::select! {
            joined = self.workers.join_next_with_id() => joined,
            () = tokio::time::sleep(self.ctx.poll) => None,
            () = cancel.cancelled() => None,
        };
        if let Some(joined) = joined {
            self.apply(joined);
        }
    }

    async fn drain(&mut self) {
        self.state = RunState::Draining;
        while let Some(joined) = self.workers.join_next_with_id().await {
            self.apply(joined);
        }
        self.state = RunState::Stopped;
    }

    fn apply(&mut self, joined: Result<(Id, Outcome), JoinError>) {
        let (id, outcome) = match joined {
            Ok(joined) => joined,
            Err(e) => {
                tracing::error!("Worker did not complete: {e}");
                if let Some(Some(logical_id)) = self.tasks.remove(&e.id()) {
                    self.busy.remove(&logical_id);
                }
                self.failed();
                return;
            },
        };
        let owned = self.tasks.remove(&id).flatten();
        if let Some(logical_id) = &owned {
            self.busy.remove(logical_id);
        }

        match outcome {
            Outcome::Created(record) => {
                self.summary.files_created += 1;
                self.summary.bytes_written += record.size.unwrap_or(0);
                self.registry.insert(record);
                self.consecutive_failures = 0;
            },
            Outcome::Checksummed(checksummed) => {
                self.consecutive_failures = 0;
                match checksummed {
                    Checksummed::Recorded(record) => {
                        self.summary.checksums_recorded += 1;
                        self.registry.insert(record);
                    },
                    Checksummed::InFlux(record) => {
                        self.summary.in_flux += 1;
                        self.back_off(&record.logical_id, self.ctx.settle.max(self.ctx.poll));
                    },
                    Checksummed::Vanished(record) => {
                        tracing::warn!(path = %record.path.display(), "File disappeared");
                        self.registry.remove(&record.logical_id);
                    },
                    Checksummed::AlreadyTagged(record) | Checksummed::Cancelled(record) => {
                        self.registry.insert(record);
                    },
                }
            },
            Outcome::Verified(Some(verification)) => {
                self.consecutive_failures = 0;
                self.summary.verify.record(&verification.verdict);
                if verification.verdict != Verdict::Match {
                    // Keep the evidence on disk but stop re-reading it every iteration.
                    self.back_off(&verification.record.logical_id, self.ctx.reverify);
                }
                self.registry.insert(verification.record);
            },
            Outcome::Verified(None) => {},
            Outcome::Partial { job, record, error } => {
                tracing::error!(path = %record.path.display(), "{job} failed, partial file left in place: {error:?}");
                self.registry.insert(record);
                self.failed();
            },
            Outcome::Failed { job, error } => {
                tracing::error!("{job} failed: {error:?}");
                match owned {
                    // Tied to one file: back off that file, not the whole run.
                    Some(logical_id) => {
                        self.summary.failures += 1;
                        self.back_off(&logical_id, self.ctx.reverify);
                    },
                    None => self.failed(),
                }
            },
        }
    }

    fn back_off(&mut self, logical_id: &Path, wait: std::time::Duration) {
        self.backoff.insert(logical_id.to_path_buf(), Instant::now() + wait);
    }

    fn failed(&mut self) {
        self.summary.failures += 1;
        self.consecutive_failures += 1;
    }
}
