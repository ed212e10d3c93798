use crate::Context;
use crate::record::FileRecord;
use crate::verify::file::{Verdict, Verification, verify_file};
use async_stream::stream;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use rand::Rng;
use rand::seq::SliceRandom;
use std::fmt::{self, Display, Formatter};
use tokio_util::sync::CancellationToken;

/// Progress events emitted by [`verify`].
///
/// Same ordering as [`ChecksumEvent`](crate::checksum::ChecksumEvent):
/// `Started`, `DiscoveryComplete` with the number of tagged files, one
/// `Verified` per file, then `Complete` unless cancelled.
#[derive(Debug)]
pub enum VerifyEvent {
    Started,
    DiscoveryComplete(u64),
    Verified(Box<Verification>),
    Complete,
}

/// Tally of a verification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifySummary {
    pub checked: u64,
    pub matched: u64,
    pub mismatched: u64,
    pub unreadable: u64,
}

impl VerifySummary {
    pub fn record(&mut self, verdict: &Verdict) {
        self.checked += 1;
        match verdict {
            Verdict::Match => self.matched += 1,
            Verdict::Mismatch { .. } => self.mismatched += 1,
            Verdict::Unreadable(_) => self.unreadable += 1,
        }
    }

    /// Every checked file matched.
    pub fn is_clean(&self) -> bool {
        self.mismatched == 0 && self.unreadable == 0
    }
}

impl Display for VerifySummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked {} checksums: {} ok, {} mismatched, {} unreadable",
            self.checked, self.matched, self.mismatched, self.unreadable
        )
    }
}

/// Verify every tagged file in `records`, in random order, `ctx.threads` at
/// a time. Untagged files are ignored.
pub fn verify<'a, R: Rng + Send>(
    ctx: &'a Context,
    records: Vec<FileRecord>,
    rng: &'a mut R,
    cancel: &'a CancellationToken,
) -> impl Stream<Item = VerifyEvent> + 'a {
    stream!({
        yield VerifyEvent::Started;

        let mut tagged: Vec<FileRecord> = records.into_iter().filter(FileRecord::is_checksummed).collect();
        tagged.shuffle(rng);
        // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
        yield VerifyEvent::DiscoveryComplete(u64::try_from(tagged.len()).unwrap_or(0));

        let mut queue = tagged.into_iter();
        let mut processing = FuturesUnordered::new();
        processing.extend(queue.by_ref().take(ctx.threads).map(|record| verify_file(ctx, record)));
        while let Some(result) = processing.next().await {
            if let Some(verification) = result {
                yield VerifyEvent::Verified(Box::new(verification));
            }
            if cancel.is_cancelled() {
                continue;
            }
            if let Some(record) = queue.next() {
                processing.push(verify_file(ctx, record));
            }
        }
        if cancel.is_cancelled() {
            return;
        }

        yield VerifyEvent::Complete;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivetest_config::Settings;
    use drivetest_storage::backend::MockVolume;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Arc;

    fn tagged(name: &str, content: &[u8]) -> (String, Vec<u8>) {
        (format!("{name}--cs-{}", blake3::hash(content).to_hex()), content.to_vec())
    }

    #[tokio::test]
    async fn pass_counts_every_verdict() {
        let files = [tagged("a", b"alpha"), tagged("b", b"bravo"), tagged("c", b"charlie")];
        let corrupted = files[1].0.clone();
        let mut all = files.to_vec();
        all.push(("untagged".to_string(), b"delta".to_vec()));
        let volume = MockVolume::with_files(all);
        volume.truncate(&corrupted, 2);
        let settings = Settings { threads: 2, ..Settings::default() };
        let ctx = Context::new(Arc::new(volume.clone()), &settings);
        let records: Vec<_> = volume.paths().into_iter().map(|p| FileRecord::new(ctx.naming.as_ref(), p)).collect();

        let mut rng = StdRng::seed_from_u64(1);
        let cancel = CancellationToken::new();
        let events: Vec<_> = verify(&ctx, records, &mut rng, &cancel).collect().await;

        assert!(matches!(events.get(1), Some(VerifyEvent::DiscoveryComplete(3))));
        assert!(matches!(events.last(), Some(VerifyEvent::Complete)));
        let mut summary = VerifySummary::default();
        for event in &events {
            if let VerifyEvent::Verified(v) = event {
                summary.record(&v.verdict);
                if v.record.path == std::path::Path::new(&corrupted) {
                    assert!(matches!(v.verdict, Verdict::Mismatch { .. }));
                }
            }
        }
        assert_eq!(summary, VerifySummary { checked: 3, matched: 2, mismatched: 1, unreadable: 0 });
        assert!(!summary.is_clean());
        assert_eq!(summary.to_string(), "checked 3 checksums: 2 ok, 1 mismatched, 0 unreadable");
    }

    #[tokio::test]
    async fn empty_pass() {
        let ctx = Context::new(Arc::new(MockVolume::default()), &Settings::default());
        let mut rng = StdRng::seed_from_u64(1);
        let cancel = CancellationToken::new();
        let events: Vec<_> = verify(&ctx, Vec::new(), &mut rng, &cancel).collect().await;
        assert_eq!(events.len(), 3);
        assert!(VerifySummary::default().is_clean());
    }
}
