//! Block-wide sum built from warp reductions.
//!
//! Phase 1: every warp reduces its lanes and lane 0 writes the warp total
//! into a shared array with one slot per warp. Barrier. Phase 2: the first
//! warp loads the shared array (lanes past the warp count read zero) and
//! reduces again. The result is valid in thread 0.

use syncbn_common::{Result, invalid_launch};

use crate::warp::{LaneValue, WARP_SIZE, Warp};

/// Largest block [`block_sum`] can combine: one shared slot per lane of the
/// first warp.
pub const MAX_THREADS_PER_BLOCK: usize = WARP_SIZE * WARP_SIZE;

/// Block-wide sum of one value per thread.
///
/// `thread_values.len()` is the block size; it need not be a multiple of
/// [`WARP_SIZE`]. Lanes of a trailing partial warp contribute zero.
///
/// # Errors
///
/// `InvalidLaunch` for an empty block or one larger than
/// [`MAX_THREADS_PER_BLOCK`].
pub fn block_sum<T: LaneValue>(thread_values: &[T]) -> Result<T> {
    let block_dim = thread_values.len();
    if block_dim == 0 || block_dim > MAX_THREADS_PER_BLOCK {
        return Err(invalid_launch(format!(
            "block size must be in 1..={MAX_THREADS_PER_BLOCK}, got {block_dim}"
        )));
    }
    let num_warps = block_dim.div_ceil(WARP_SIZE);

    // __shared__ T shared[WARP_SIZE]
    let mut shared = [T::default(); WARP_SIZE];
    for (warp_id, lanes) in thread_values.chunks(WARP_SIZE).enumerate() {
        let reduced = Warp::load(lanes)?.reduce_sum(WARP_SIZE)?;
        shared[warp_id] = reduced.lane(0);
    }

    // __syncthreads(): every warp total is visible from here on.

    let first = Warp::load(&shared[..num_warps])?.reduce_sum(WARP_SIZE)?;
    Ok(first.lane(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warp::Float2;

    #[test]
    fn single_thread_block() {
        assert_eq!(block_sum(&[7.5f32]).unwrap(), 7.5);
    }

    #[test]
    fn ladder_sizes_sum_exactly() {
        for threads in [32usize, 64, 128, 256, 512] {
            let values: Vec<f32> = (0..threads).map(|i| (i % 7) as f32).collect();
            let expected: f32 = values.iter().sum();
            assert_eq!(block_sum(&values).unwrap(), expected, "threads={threads}");
        }
    }

    #[test]
    fn non_multiple_of_warp_size() {
        for threads in [1usize, 5, 31, 33, 47, 100, 1000] {
            let values = vec![1.0f32; threads];
            assert_eq!(block_sum(&values).unwrap(), threads as f32, "threads={threads}");
        }
    }

    #[test]
    fn maximum_block() {
        let values = vec![2.0f32; MAX_THREADS_PER_BLOCK];
        assert_eq!(block_sum(&values).unwrap(), 2048.0);
    }

    #[test]
    fn rejects_empty_and_oversized_blocks() {
        assert!(block_sum::<f32>(&[]).is_err());
        assert!(block_sum(&vec![0.0f32; MAX_THREADS_PER_BLOCK + 1]).is_err());
    }

    #[test]
    fn pairs_reduce_independently() {
        let values: Vec<Float2> = (0..300).map(|i| Float2::new(1.0, i as f32)).collect();
        let total = block_sum(&values).unwrap();
        assert_eq!(total.v1, 300.0);
        assert_eq!(total.v2, (0..300).sum::<i32>() as f32);
    }
}
