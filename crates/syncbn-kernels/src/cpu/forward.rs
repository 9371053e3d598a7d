//! Elementwise affine normalization.

use rayon::prelude::*;
use syncbn_common::{NcsShape, NormParams, Result};

use crate::contract::check_forward;
use crate::launch::LaunchConfig;

/// `z = gamma[c] * (x - mean[c]) / sqrt(var[c] + eps) + beta[c]` for every
/// element.
///
/// The grid is sized by `N * C * S` alone; each emulated thread derives its
/// channel from its flat index. `eps` is not validated here.
pub fn forward(
    shape: &NcsShape,
    x: &[f32],
    params: NormParams<'_>,
    eps: f32,
    z: &mut [f32],
) -> Result<()> {
    check_forward(shape, x, &params, z)?;
    let cfg = LaunchConfig::elementwise(shape)?;
    let threads = cfg.threads();
    log::debug!("forward: shape={shape}, grid={:?}, block={:?}", cfg.grid_dim, cfg.block_dim);

    let NormParams { gamma, beta, mean, var } = params;
    z.par_chunks_mut(threads).enumerate().for_each(|(block, out)| {
        let base = block * threads;
        for (tid, zi) in out.iter_mut().enumerate() {
            let idx = base + tid;
            let c = shape.channel_of(idx);
            *zi = gamma[c] * (x[idx] - mean[c]) / (var[c] + eps).sqrt() + beta[c];
        }
    });
    Ok(())
}
