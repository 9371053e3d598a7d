//! Per-channel sum and sum of squares.

use syncbn_common::{NcsShape, Result};

use super::reduce_per_channel;
use crate::contract::check_stats;
use crate::warp::Float2;

/// Reduce `x` into `sum[c] = Σ x[n,c,s]` and `sqsum[c] = Σ x[n,c,s]²`.
///
/// One block per channel. A channel with no elements (`N * S == 0`) is written
/// as exactly zero.
pub fn sum_sqsum(shape: &NcsShape, x: &[f32], sum: &mut [f32], sqsum: &mut [f32]) -> Result<()> {
    check_stats(shape, x, sum, sqsum)?;
    reduce_per_channel(shape, sum, sqsum, |_c| {
        move |offset: usize| {
            let v = x[offset];
            Float2::new(v, v * v)
        }
    })
}
