//! Thread-block sizing and launch geometry.
//!
//! Block sizes come from a fixed ladder of warp multiples; a reduction over
//! `n` elements uses the smallest rung that covers `n`, saturating at
//! [`MAX_BLOCK_SIZE`]. Threads stride over anything beyond the block size.

use syncbn_common::{NcsShape, Result, invalid_launch};

/// Largest block any syncbn kernel launches.
pub const MAX_BLOCK_SIZE: u32 = 512;

/// Candidate block sizes, smallest first.
pub const THREAD_LADDER: [u32; 5] = [32, 64, 128, 256, MAX_BLOCK_SIZE];

/// Device limit on `gridDim.x`.
pub const MAX_GRID_DIM_X: u64 = (1 << 31) - 1;

/// Smallest ladder rung `>= n_elem`, capped at [`MAX_BLOCK_SIZE`].
pub fn threads_for(n_elem: usize) -> u32 {
    THREAD_LADDER.iter().copied().find(|&t| n_elem <= t as usize).unwrap_or(MAX_BLOCK_SIZE)
}

/// Grid and block dimensions for one kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid_dim: (u32, u32, u32),
    pub block_dim: (u32, u32, u32),
    /// Dynamic shared memory; the kernels only use static shared arrays.
    pub shared_mem_bytes: u32,
}

impl LaunchConfig {
    /// One block per channel, sized for the channel's `N * S` elements.
    ///
    /// Used by the statistics, backward-reduce and backward kernels.
    pub fn per_channel(shape: &NcsShape) -> Result<Self> {
        shape.numel()?;
        let m = shape.per_channel()?;
        if shape.c == 0 {
            return Err(invalid_launch(format!("empty grid: shape {shape} has no channels")));
        }
        let grid = Self::checked_grid(shape.c as u64, shape)?;
        let threads = threads_for(m.min(MAX_BLOCK_SIZE as usize));
        Ok(Self { grid_dim: (grid, 1, 1), block_dim: (threads, 1, 1), shared_mem_bytes: 0 })
    }

    /// Enough blocks to give every one of the `N * C * S` elements a thread.
    pub fn elementwise(shape: &NcsShape) -> Result<Self> {
        let total = shape.numel()?;
        if total == 0 {
            return Err(invalid_launch(format!("empty grid: shape {shape} has no elements")));
        }
        let threads = threads_for(total);
        let blocks = total.div_ceil(threads as usize) as u64;
        let grid = Self::checked_grid(blocks, shape)?;
        Ok(Self { grid_dim: (grid, 1, 1), block_dim: (threads, 1, 1), shared_mem_bytes: 0 })
    }

    fn checked_grid(blocks: u64, shape: &NcsShape) -> Result<u32> {
        if blocks > MAX_GRID_DIM_X {
            return Err(invalid_launch(format!(
                "grid of {blocks} blocks for shape {shape} exceeds device limit {MAX_GRID_DIM_X}"
            )));
        }
        Ok(blocks as u32)
    }

    /// Threads per block.
    pub fn threads(&self) -> usize {
        self.block_dim.0 as usize
    }

    /// Blocks in the grid.
    pub fn blocks(&self) -> usize {
        self.grid_dim.0 as usize
    }
}
