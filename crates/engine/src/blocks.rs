//! Random content source.
//!
//! Generating fresh random bytes for every file is far slower than the disk
//! being tested, so a fixed set of blocks is generated once and files are
//! assembled from randomly chosen blocks.

use rand::{Rng, RngCore};

/// A fixed set of equally sized random buffers.
///
/// Read-only after construction; share it between workers behind an `Arc`.
pub struct RandomBlockPool {
    blocks: Vec<Box<[u8]>>,
    block_size: usize,
}

/// One write: `len` bytes from the start of block `block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub block: usize,
    pub len: usize,
}

impl RandomBlockPool {
    /// Fill `count` blocks of `block_size` bytes from `rng`.
    ///
    /// Zero values are raised to one so the pool is never empty.
    pub fn generate<R: RngCore + ?Sized>(count: usize, block_size: usize, rng: &mut R) -> Self {
        let count = count.max(1);
        let block_size = block_size.max(1);
        tracing::info!(count, block_size, "Generating random blocks");
        let blocks = (0..count)
            .map(|_| {
                let mut block = vec![0u8; block_size].into_boxed_slice();
                rng.fill_bytes(&mut block);
                block
            })
            .collect();
        Self { blocks, block_size }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Contents of one write from a [`plan()`](Self::plan).
    ///
    /// Out-of-range chunks are clamped rather than panicking.
    pub fn bytes(&self, chunk: Chunk) -> &[u8] {
        let block = &self.blocks[chunk.block % self.blocks.len()];
        &block[..chunk.len.min(block.len())]
    }

    /// Choose the blocks for a file of exactly `size` bytes.
    ///
    /// Every chunk but the last is a whole block; the last is a prefix of a
    /// random block covering the remainder.
    pub fn plan<R: Rng>(&self, size: u64, rng: &mut R) -> Vec<Chunk> {
        let block_size = self.block_size as u64;
        let whole = size / block_size;
        let remainder = size % block_size;
        let mut plan: Vec<Chunk> = (0..whole)
            .map(|_| Chunk {
                block: rng.gen_range(0..self.blocks.len()),
                len: self.block_size,
            })
            .collect();
        if remainder > 0 {
            plan.push(Chunk {
                block: rng.gen_range(0..self.blocks.len()),
                // Less than block_size, which is a usize.
                len: usize::try_from(remainder).unwrap_or(self.block_size),
            });
        }
        plan
    }
}
