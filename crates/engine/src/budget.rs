//! Free-space accounting.
//!
//! Two thresholds drive everything:
//! - generation stops when a new file could push free space below
//!   `min_free`, and
//! - reclamation starts once free space drops below
//!   `min_free - 2 * max_file`.

use drivetest_config::MIN_FILE_SIZE;
use drivetest_storage::VolumeHandle;
use drivetest_storage::error::Result as StorageResult;
use rand::Rng;

#[derive(Clone)]
pub struct SpaceBudget {
    volume: VolumeHandle,
    max_file_bytes: u64,
    min_free_bytes: u64,
}

impl SpaceBudget {
    pub fn new(volume: VolumeHandle, max_file_bytes: u64, min_free_bytes: u64) -> Self {
        Self {
            volume,
            max_file_bytes: max_file_bytes.max(MIN_FILE_SIZE),
            min_free_bytes,
        }
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    pub fn min_free_bytes(&self) -> u64 {
        self.min_free_bytes
    }

    /// Bytes available to an unprivileged user on the volume.
    pub async fn free_bytes(&self) -> StorageResult<u64> {
        self.volume.free_bytes().await
    }

    /// Bytes that may still be written while keeping `min_free`.
    pub fn headroom(&self, free: u64) -> u64 {
        free.saturating_sub(self.min_free_bytes)
    }

    /// Free space below which stress mode deletes files.
    pub fn reclaim_threshold(&self) -> u64 {
        self.min_free_bytes.saturating_sub(self.max_file_bytes.saturating_mul(2))
    }

    pub fn needs_reclaim(&self, free: u64) -> bool {
        free < self.reclaim_threshold()
    }

    /// Size of the next file given `free` bytes, or `None` when there is no
    /// room for even the smallest file.
    ///
    /// Uniform in `[MIN_FILE_SIZE, max_file)`, with the upper bound lowered to
    /// the headroom so a file never eats into `min_free`. A `max_file` of
    /// exactly `MIN_FILE_SIZE` always yields that size.
    pub fn plan<R: Rng>(&self, free: u64, rng: &mut R) -> Option<u64> {
        if free <= self.min_free_bytes {
            return None;
        }
        let upper = self.max_file_bytes.min(self.headroom(free));
        match upper {
            u if u < MIN_FILE_SIZE => None,
            MIN_FILE_SIZE => Some(MIN_FILE_SIZE),
            u => Some(rng.gen_range(MIN_FILE_SIZE..u)),
        }
    }

    /// Query the volume and [`plan()`](Self::plan) the next file size.
    pub async fn planned_size<R: Rng>(&self, rng: &mut R) -> StorageResult<Option<u64>> {
        let free = self.free_bytes().await?;
        Ok(self.plan(free, rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivetest_storage::backend::MockVolume;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rstest::rstest;
    use std::sync::Arc;

    fn budget(max_file: u64, min_free: u64) -> SpaceBudget {
        SpaceBudget::new(Arc::new(MockVolume::default()), max_file, min_free)
    }

    #[rstest]
    #[case::at_floor(10_000, 10_000)]
    #[case::below_floor(10_000, 5_000)]
    #[case::less_than_smallest_file(10_000, 10_500)]
    fn no_room(#[case] min_free: u64, #[case] free: u64) {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(budget(4096, min_free).plan(free, &mut rng), None);
    }

    #[test]
    fn sizes_stay_in_range() {
        let budget = budget(4096, 1_000_000);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            let size = budget.plan(10_000_000, &mut rng).unwrap();
            assert!((MIN_FILE_SIZE..4096).contains(&size));
        }
    }

    #[test]
    fn sizes_never_exceed_headroom() {
        let budget = budget(1 << 20, 1_000_000);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            let size = budget.plan(1_002_000, &mut rng).unwrap();
            assert!(size >= MIN_FILE_SIZE);
            assert!(size < 2_000);
        }
    }

    #[test]
    fn minimum_max_size_is_fixed() {
        let budget = budget(MIN_FILE_SIZE, 0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(budget.plan(1 << 30, &mut rng), Some(MIN_FILE_SIZE));
    }

    #[test]
    fn reclaim_threshold() {
        let budget = budget(2048, 10_000);
        assert_eq!(budget.reclaim_threshold(), 10_000 - 4096);
        assert!(budget.needs_reclaim(5_000));
        assert!(!budget.needs_reclaim(5_904));
        // A floor smaller than two files never reclaims.
        assert!(!self::budget(2048, 1000).needs_reclaim(0));
    }

    #[tokio::test]
    async fn planned_size_queries_volume() {
        let volume = MockVolume::default().with_capacity(3_000);
        let budget = SpaceBudget::new(Arc::new(volume.clone()), 2048, 1_000);
        let mut rng = StdRng::seed_from_u64(5);
        let size = budget.planned_size(&mut rng).await.unwrap().unwrap();
        assert!((MIN_FILE_SIZE..2000).contains(&size));
        volume.set_free_bytes(Some(1_000));
        assert_eq!(budget.planned_size(&mut rng).await.unwrap(), None);
    }
}
