//! SIMT emulation of the syncbn kernels on the host.
//!
//! Each kernel runs the device algorithm as written: the same launch
//! geometry, per-thread strided accumulation, warp butterfly and
//! shared-memory block combine. One block maps to one `rayon` task; blocks
//! own disjoint output slots, so the single-writer rule of the device code
//! is enforced by the borrow checker instead of by convention.

mod backward;
mod forward;
mod stats;

pub use backward::{backward, backward_reduce};
pub use forward::forward;
pub use stats::sum_sqsum;

use rayon::prelude::*;
use syncbn_common::{GradOutputs, NcsShape, NormParams, Result};

use crate::SyncBnKernel;
use crate::block::block_sum;
use crate::launch::{LaunchConfig, MAX_BLOCK_SIZE};
use crate::warp::Float2;

/// Always-available provider running the kernels on host threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimtKernel;

impl SyncBnKernel for SimtKernel {
    fn name(&self) -> &'static str {
        "simt"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn stats(&self, shape: &NcsShape, x: &[f32], sum: &mut [f32], sqsum: &mut [f32]) -> Result<()> {
        sum_sqsum(shape, x, sum, sqsum)
    }

    fn forward(
        &self,
        shape: &NcsShape,
        x: &[f32],
        params: NormParams<'_>,
        eps: f32,
        z: &mut [f32],
    ) -> Result<()> {
        forward(shape, x, params, eps, z)
    }

    fn backward_reduce(
        &self,
        shape: &NcsShape,
        dz: &[f32],
        x: &[f32],
        mean: &[f32],
        var: &[f32],
        eps: f32,
        sum_dz: &mut [f32],
        sum_dz_xhat: &mut [f32],
    ) -> Result<()> {
        backward_reduce(shape, dz, x, mean, var, eps, sum_dz, sum_dz_xhat)
    }

    fn backward(
        &self,
        shape: &NcsShape,
        dz: &[f32],
        x: &[f32],
        params: NormParams<'_>,
        sum_dz: &[f32],
        sum_dz_xhat: &[f32],
        eps: f32,
        grads: GradOutputs<'_>,
    ) -> Result<()> {
        backward(shape, dz, x, params, sum_dz, sum_dz_xhat, eps, grads)
    }
}

/// Launch a block-per-channel reduction of two accumulators.
///
/// `prologue(c)` runs once per block and returns the per-element map for
/// channel `c`, taking a flat element offset to the pair folded into the
/// thread's partial. Thread 0 of block `c` writes `out_a[c]` and `out_b[c]`.
pub(crate) fn reduce_per_channel<P, E>(
    shape: &NcsShape,
    out_a: &mut [f32],
    out_b: &mut [f32],
    prologue: P,
) -> Result<()>
where
    P: Fn(usize) -> E + Sync,
    E: Fn(usize) -> Float2,
{
    let cfg = LaunchConfig::per_channel(shape)?;
    let m = shape.per_channel()?;
    let threads = cfg.threads();
    log::debug!(
        "per-channel reduction: shape={shape}, grid={:?}, block={:?}, m={m}",
        cfg.grid_dim,
        cfg.block_dim,
    );

    out_a.par_iter_mut().zip(out_b.par_iter_mut()).enumerate().try_for_each(
        |(c, (a, b))| -> Result<()> {
            let element = prologue(c);
            let total = channel_block(shape, c, m, threads, &element)?;
            *a = total.v1;
            *b = total.v2;
            Ok(())
        },
    )
}

/// One block: every thread strides over the channel's `m` elements, then the
/// block combines the partials.
fn channel_block<E>(
    shape: &NcsShape,
    c: usize,
    m: usize,
    threads: usize,
    element: &E,
) -> Result<Float2>
where
    E: Fn(usize) -> Float2,
{
    let mut partials = [Float2::default(); MAX_BLOCK_SIZE as usize];
    for (tid, partial) in partials[..threads].iter_mut().enumerate() {
        let mut acc = Float2::default();
        for i in (tid..m).step_by(threads) {
            acc = acc + element(shape.channel_offset(c, i));
        }
        *partial = acc;
    }
    block_sum(&partials[..threads])
}
