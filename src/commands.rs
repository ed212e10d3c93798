use crate::cli::Command;
use crate::error::{ErrorKind, Result};
use drivetest_config::Settings;
use drivetest_engine::checksum::{ChecksumEvent, checksum};
use drivetest_engine::reclaim::delete_empty_dirs;
use drivetest_engine::stress::{Mode, StressLoop, StressSummary};
use drivetest_engine::verify::{Verdict, VerifyEvent, VerifySummary, verify};
use drivetest_engine::{Context, HumanBytes, RandomBlockPool, Registry};
use drivetest_storage::backend::LocalVolume;
use exn::ResultExt;
use futures::StreamExt;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::pin::pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn run(command: Command, settings: &Settings, cancel: CancellationToken) -> Result<()> {
    let ctx = open(settings)?;
    let mut rng = match settings.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    match command {
        Command::Stress => stress(ctx, settings, rng, cancel).await,
        Command::CreateFiles => create_files(ctx, settings, rng, cancel).await,
        Command::CreateChecksums => create_checksums(&ctx, &mut rng, &cancel).await,
        Command::CheckChecksums => check_checksums(&ctx, &mut rng, &cancel).await,
        Command::DeleteEmptyDirs => {
            let removed = delete_empty_dirs(&ctx).await.or_raise(|| ErrorKind::Reclaim)?;
            tracing::info!("Deleted {removed} directories");
            Ok(())
        },
    }
}

fn open(settings: &Settings) -> Result<Context> {
    let root = settings.test_root().or_raise(|| ErrorKind::Config)?;
    let volume = LocalVolume::new("local", &root).or_raise(|| ErrorKind::Volume(root.clone()))?;
    tracing::debug!(root = %root.display(), "Opened test directory");
    Ok(Context::new(Arc::new(volume), settings))
}

fn block_pool(settings: &Settings, rng: &mut StdRng) -> Arc<RandomBlockPool> {
    // Validated to fit when the settings were loaded.
    let block_size = usize::try_from(settings.block_size.get()).unwrap_or(usize::MAX);
    Arc::new(RandomBlockPool::generate(settings.block_count, block_size, rng))
}

async fn find_files(ctx: &Context) -> Result<Registry> {
    Registry::find_files(ctx.volume.as_ref(), ctx.naming.as_ref()).await.or_raise(|| ErrorKind::Scan)
}

async fn stress(ctx: Context, settings: &Settings, mut rng: StdRng, cancel: CancellationToken) -> Result<()> {
    let registry = find_files(&ctx).await?;
    let pool = block_pool(settings, &mut rng);
    let summary = StressLoop::new(Arc::new(ctx), pool, registry, Mode::Stress, rng).run(cancel).await;
    report(&summary);
    Ok(())
}

async fn create_files(ctx: Context, settings: &Settings, mut rng: StdRng, cancel: CancellationToken) -> Result<()> {
    let free = ctx.budget.free_bytes().await.or_raise(|| ErrorKind::FreeSpace)?;
    if free < ctx.budget.min_free_bytes() {
        tracing::info!(
            "Not starting: {} free is already below the {} limit",
            HumanBytes::from(free),
            HumanBytes::from(ctx.budget.min_free_bytes())
        );
        return Ok(());
    }
    let pool = block_pool(settings, &mut rng);
    let summary = StressLoop::new(Arc::new(ctx), pool, Registry::default(), Mode::CreateFiles, rng)
        .run(cancel)
        .await;
    report(&summary);
    Ok(())
}

async fn create_checksums(ctx: &Context, rng: &mut StdRng, cancel: &CancellationToken) -> Result<()> {
    let registry = find_files(ctx).await?;
    let (mut recorded, mut total, mut in_flux, mut failures) = (0u64, 0u64, 0u64, 0u64);
    let mut events = pin!(checksum(ctx, registry.into_records(), rng, cancel));
    while let Some(event) = events.next().await {
        match event {
            Ok(ChecksumEvent::DiscoveryComplete(n)) => {
                total = n;
                tracing::info!("{n} files need a checksum");
            },
            Ok(ChecksumEvent::Checksummed(record)) => {
                recorded += 1;
                tracing::debug!("{recorded}/{total}: {}", record.path.display());
            },
            Ok(ChecksumEvent::InFlux(_)) => in_flux += 1,
            Ok(ChecksumEvent::Vanished(path)) => tracing::warn!(path = %path.display(), "File disappeared"),
            Ok(ChecksumEvent::Started | ChecksumEvent::Complete) => {},
            Err(e) => {
                failures += 1;
                tracing::error!("{e:?}");
            },
        }
    }
    tracing::info!("Calculated {recorded} of {total} checksums ({in_flux} still changing, {failures} failed)");
    Ok(())
}

async fn check_checksums(ctx: &Context, rng: &mut StdRng, cancel: &CancellationToken) -> Result<()> {
    let registry = find_files(ctx).await?;
    let mut summary = VerifySummary::default();
    let mut total = 0;
    let mut events = pin!(verify(ctx, registry.into_records(), rng, cancel));
    while let Some(event) = events.next().await {
        match event {
            VerifyEvent::DiscoveryComplete(n) => {
                total = n;
                tracing::info!("{n} files have a checksum");
            },
            VerifyEvent::Verified(verification) => {
                summary.record(&verification.verdict);
                if verification.verdict == Verdict::Match {
                    tracing::debug!("{}/{total}: {}", summary.checked, verification.record.path.display());
                }
            },
            VerifyEvent::Started | VerifyEvent::Complete => {},
        }
    }
    if summary.is_clean() {
        tracing::info!("{summary}");
    } else {
        tracing::error!("{summary}");
    }
    Ok(())
}

fn report(summary: &StressSummary) {
    if summary.verify.mismatched > 0 {
        tracing::error!(mismatches = summary.verify.mismatched, "Integrity failures detected");
    }
    println!("{summary}");
}
