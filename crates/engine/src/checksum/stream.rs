use crate::Context;
use crate::checksum::error::Result as ChecksumResult;
use crate::checksum::file::{record_checksum, sample_mtime};
use crate::error::{ErrorKind as LibraryErrorKind, Result as LibraryResult};
use crate::record::FileRecord;
use async_stream::stream;
use exn::ResultExt;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use rand::Rng;
use rand::seq::SliceRandom;
use std::path::PathBuf;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Progress events emitted by [`checksum`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) exactly once.
/// 2. [`DiscoveryComplete`](Self::DiscoveryComplete) exactly once, with the
///    number of files that still need a checksum.
/// 3. [`InFlux`](Self::InFlux), [`Vanished`](Self::Vanished) and
///    [`Checksummed`](Self::Checksummed) zero or more times.
/// 4. [`Complete`](Self::Complete) exactly once.
///
/// Cancellation ends the stream without [`Complete`](Self::Complete).
#[derive(Debug)]
pub enum ChecksumEvent {
    Started,
    DiscoveryComplete(u64),
    /// Modification time moved during the settle wait; try again later.
    InFlux(PathBuf),
    Vanished(PathBuf),
    Checksummed(Box<FileRecord>),
    Complete,
}

/// Checksum every untagged file in `records`, in random order.
///
/// All files are sampled up front and share one settle wait, so a pass over
/// thousands of files waits once rather than once per file. Stable files are
/// then hashed `ctx.threads` at a time. Individual failures are yielded as
/// `Err` items without ending the stream.
pub fn checksum<'a, R: Rng + Send>(
    ctx: &'a Context,
    records: Vec<FileRecord>,
    rng: &'a mut R,
    cancel: &'a CancellationToken,
) -> impl Stream<Item = LibraryResult<ChecksumEvent>> + 'a {
    stream! {
        for await event in checksum_inner(ctx, records, rng, cancel) {
            yield event.or_raise(|| LibraryErrorKind::Checksum);
        }
    }
}

fn checksum_inner<'a, R: Rng + Send>(
    ctx: &'a Context,
    records: Vec<FileRecord>,
    rng: &'a mut R,
    cancel: &'a CancellationToken,
) -> impl Stream<Item = ChecksumResult<ChecksumEvent>> + 'a {
    stream!({
        yield Ok(ChecksumEvent::Started);

        let mut pending: Vec<FileRecord> = records.into_iter().filter(|r| !r.is_checksummed()).collect();
        pending.shuffle(rng);
        // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
        yield Ok(ChecksumEvent::DiscoveryComplete(u64::try_from(pending.len()).unwrap_or(0)));

        let started = Instant::now();
        let mut sampled = Vec::with_capacity(pending.len());
        for record in pending {
            if cancel.is_cancelled() {
                return;
            }
            match sample_mtime(ctx.volume.as_ref(), &record.path).await {
                Ok(Some(mtime)) => sampled.push((record, mtime)),
                Ok(None) => yield Ok(ChecksumEvent::Vanished(record.path)),
                Err(e) => yield Err(e),
            }
        }

        tokio::select! {
            () = tokio::time::sleep_until(started + ctx.settle) => {},
            () = cancel.cancelled() => return,
        }

        let mut stable = Vec::with_capacity(sampled.len());
        for (record, before) in sampled {
            match sample_mtime(ctx.volume.as_ref(), &record.path).await {
                Ok(Some(after)) if after == before => stable.push(record),
                Ok(Some(_)) => {
                    tracing::info!(path = %record.path.display(), "File is still changing; skipping");
                    yield Ok(ChecksumEvent::InFlux(record.path));
                },
                Ok(None) => yield Ok(ChecksumEvent::Vanished(record.path)),
                Err(e) => yield Err(e),
            }
        }

        let mut queue = stable.into_iter();
        let mut processing = FuturesUnordered::new();
        processing.extend(queue.by_ref().take(ctx.threads).map(|record| record_checksum(ctx, record)));
        while let Some(result) = processing.next().await {
            yield result.map(|record| ChecksumEvent::Checksummed(Box::new(record)));
            if cancel.is_cancelled() {
                continue;
            }
            if let Some(record) = queue.next() {
                processing.push(record_checksum(ctx, record));
            }
        }
        if cancel.is_cancelled() {
            return;
        }

        yield Ok(ChecksumEvent::Complete);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::NamingScheme;
    use drivetest_config::Settings;
    use drivetest_storage::backend::MockVolume;
    use futures::TryStreamExt;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup(volume: &MockVolume) -> (Context, Vec<FileRecord>) {
        let settings = Settings {
            settle_secs: 10,
            threads: 2,
            ..Settings::default()
        };
        let ctx = Context::new(Arc::new(volume.clone()), &settings);
        let records = volume.paths().into_iter().map(|p| FileRecord::new(ctx.naming.as_ref(), p)).collect();
        (ctx, records)
    }

    #[tokio::test(start_paused = true)]
    async fn pass_tags_stable_files_and_skips_tagged() {
        let volume = MockVolume::with_files([
            ("a/one", b"1".as_slice()),
            ("b/two", b"22".as_slice()),
            ("c/three", b"333".as_slice()),
            ("done--cs-abc", b"4444".as_slice()),
        ]);
        let (ctx, records) = setup(&volume);
        let mut rng = StdRng::seed_from_u64(1);
        let cancel = CancellationToken::new();
        let events: Vec<_> = checksum(&ctx, records, &mut rng, &cancel).try_collect().await.unwrap();

        assert!(matches!(events.first(), Some(ChecksumEvent::Started)));
        assert!(matches!(events.get(1), Some(ChecksumEvent::DiscoveryComplete(3))));
        assert!(matches!(events.last(), Some(ChecksumEvent::Complete)));
        let tagged: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ChecksumEvent::Checksummed(record) => Some(record.logical_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tagged.len(), 3);
        assert!(!tagged.contains(&PathBuf::from("done")));
        for path in volume.paths() {
            assert!(ctx.naming.tag(&path, "cs").is_some(), "{} untagged", path.display());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn touched_file_is_in_flux() {
        let volume = MockVolume::with_files([("a/one", b"1".as_slice()), ("b/two", b"22".as_slice())]);
        let (ctx, records) = setup(&volume);
        let toucher = {
            let volume = volume.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                volume.touch("b/two");
            })
        };
        let mut rng = StdRng::seed_from_u64(2);
        let cancel = CancellationToken::new();
        let events: Vec<_> = checksum(&ctx, records, &mut rng, &cancel).try_collect().await.unwrap();
        toucher.await.unwrap();

        assert!(events.iter().any(|e| matches!(e, ChecksumEvent::InFlux(p) if p == &PathBuf::from("b/two"))));
        assert_eq!(volume.reads(), 1);
        assert!(volume.paths().contains(&PathBuf::from("b/two")));
    }

    /// Run a pass over two files whose every stat takes `stat_delay`.
    async fn timed_pass(stat_delay: Duration) -> (Duration, usize) {
        let volume = MockVolume::with_files([("a/one", b"1".as_slice()), ("b/two", b"22".as_slice())]);
        volume.set_stat_delay(stat_delay);
        let (ctx, records) = setup(&volume);
        let mut rng = StdRng::seed_from_u64(4);
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let events: Vec<_> = checksum(&ctx, records, &mut rng, &cancel).try_collect().await.unwrap();
        let checksummed = events.iter().filter(|e| matches!(e, ChecksumEvent::Checksummed(_))).count();
        (started.elapsed(), checksummed)
    }

    #[tokio::test(start_paused = true)]
    async fn settle_wait_is_shortened_by_sampling() {
        // 2 x 3s sampling, the remaining 4s of settle, 2 x 3s re-sampling.
        let (elapsed, checksummed) = timed_pass(Duration::from_secs(3)).await;
        assert_eq!(elapsed, Duration::from_secs(16));
        assert_eq!(checksummed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sampling_skips_settle_wait() {
        // Sampling alone takes 12s, longer than the 10s settle.
        let (elapsed, checksummed) = timed_pass(Duration::from_secs(6)).await;
        assert_eq!(elapsed, Duration::from_secs(24));
        assert_eq!(checksummed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_pass_tags_nothing() {
        let volume = MockVolume::with_files([("a/one", b"1".as_slice())]);
        let (ctx, records) = setup(&volume);
        let mut rng = StdRng::seed_from_u64(3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let events: Vec<_> = checksum(&ctx, records, &mut rng, &cancel).try_collect().await.unwrap();
        assert!(!events.iter().any(|e| matches!(e, ChecksumEvent::Complete)));
        assert_eq!(volume.renames(), 0);
    }
}
