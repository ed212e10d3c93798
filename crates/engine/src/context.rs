use crate::budget::SpaceBudget;
use crate::naming::{FilenameTags, NamingHandle};
use drivetest_config::Settings;
use drivetest_storage::VolumeHandle;
use std::sync::Arc;
use std::time::Duration;

/// Everything a pass or worker needs besides its own inputs.
///
/// Cheap to clone: the volume and naming scheme are shared handles.
#[derive(Clone)]
pub struct Context {
    pub volume: VolumeHandle,
    pub naming: NamingHandle,
    pub budget: SpaceBudget,
    pub max_depth: u32,
    pub threads: usize,
    pub settle: Duration,
    pub read_chunk: usize,
    pub reverify: Duration,
    pub poll: Duration,
}

impl Context {
    /// Build a context from validated [`Settings`].
    pub fn new(volume: VolumeHandle, settings: &Settings) -> Self {
        let budget = SpaceBudget::new(volume.clone(), settings.max_size.get(), settings.min_free.get());
        Self {
            volume,
            naming: Arc::new(FilenameTags),
            budget,
            max_depth: settings.max_depth,
            threads: settings.threads.max(1),
            settle: settings.settle_interval(),
            // Validated to fit; fall back to the largest buffer we can hold.
            read_chunk: usize::try_from(settings.read_chunk.get()).unwrap_or(usize::MAX).max(1),
            reverify: settings.reverify_interval(),
            poll: settings.poll_interval(),
        }
    }
}
