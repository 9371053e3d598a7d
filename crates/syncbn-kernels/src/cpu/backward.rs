//! Two-phase backward pass: a per-channel reduction of `dz` and `dz * x̂`,
//! then an elementwise input-gradient pass that consumes the (possibly
//! cross-device merged) sums.

use rayon::prelude::*;
use syncbn_common::{GradOutputs, NcsShape, NormParams, Result};

use super::reduce_per_channel;
use crate::contract::{check_backward, check_backward_reduce};
use crate::launch::LaunchConfig;
use crate::warp::Float2;

#[inline]
fn invstd(var: f32, eps: f32) -> f32 {
    1.0 / (var + eps).sqrt()
}

/// Reduce `sum_dz[c] = Σ dz` and `sum_dz_xhat[c] = Σ dz * x̂` per channel,
/// with `x̂ = (x - mean[c]) / sqrt(var[c] + eps)`.
#[allow(clippy::too_many_arguments)]
pub fn backward_reduce(
    shape: &NcsShape,
    dz: &[f32],
    x: &[f32],
    mean: &[f32],
    var: &[f32],
    eps: f32,
    sum_dz: &mut [f32],
    sum_dz_xhat: &mut [f32],
) -> Result<()> {
    check_backward_reduce(shape, dz, x, mean, var, sum_dz, sum_dz_xhat)?;
    reduce_per_channel(shape, sum_dz, sum_dz_xhat, |c| {
        let mu = mean[c];
        let inv = invstd(var[c], eps);
        move |offset: usize| {
            let g = dz[offset];
            Float2::new(g, g * (x[offset] - mu) * inv)
        }
    })
}

/// Input, scale and shift gradients.
///
/// `dweight = sum_dz_xhat` and `dbias = sum_dz` are copied from the reduced
/// sums. Per element,
/// `dx = gamma[c] * invstd[c] * (dz - sum_dz[c] / M - x̂ * sum_dz_xhat[c] / M)`
/// with `M = N * S`. `beta` is checked for length but otherwise unused.
#[allow(clippy::too_many_arguments)]
pub fn backward(
    shape: &NcsShape,
    dz: &[f32],
    x: &[f32],
    params: NormParams<'_>,
    sum_dz: &[f32],
    sum_dz_xhat: &[f32],
    eps: f32,
    grads: GradOutputs<'_>,
) -> Result<()> {
    check_backward(shape, dz, x, &params, sum_dz, sum_dz_xhat, &grads)?;
    let cfg = LaunchConfig::per_channel(shape)?;
    let m = shape.per_channel()?;
    let GradOutputs { dx, dweight, dbias } = grads;

    dweight.copy_from_slice(sum_dz_xhat);
    dbias.copy_from_slice(sum_dz);

    if m == 0 {
        log::debug!("backward: shape={shape} has no elements per channel, dx skipped");
        return Ok(());
    }

    let NormParams { gamma, mean, var, .. } = params;
    let inv_m = 1.0 / m as f32;
    log::debug!(
        "backward: shape={shape}, grid={:?}, block={:?}, m={m}",
        cfg.grid_dim,
        cfg.block_dim
    );

    // One row is the S contiguous elements of a single (n, c) pair.
    dx.par_chunks_mut(shape.s).enumerate().for_each(|(row, dx_row)| {
        let c = row % shape.c;
        let inv = invstd(var[c], eps);
        let scale = gamma[c] * inv;
        let mean_dz = sum_dz[c] * inv_m;
        let mean_dz_xhat = sum_dz_xhat[c] * inv_m;
        let base = row * shape.s;
        for (s, out) in dx_row.iter_mut().enumerate() {
            let idx = base + s;
            let xhat = (x[idx] - mean[c]) * inv;
            *out = scale * (dz[idx] - mean_dz - xhat * mean_dz_xhat);
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_with_unit_statistics() {
        // mean 0, var 1, eps 0: x̂ == x.
        let shape = NcsShape::new(1, 1, 4);
        let x = [1.0, 2.0, 3.0, 4.0];
        let dz = [1.0, 1.0, 2.0, -1.0];
        let (mut sum_dz, mut sum_dz_xhat) = ([0.0], [0.0]);
        backward_reduce(&shape, &dz, &x, &[0.0], &[1.0], 0.0, &mut sum_dz, &mut sum_dz_xhat)
            .unwrap();
        assert_eq!(sum_dz, [3.0]);
        assert_eq!(sum_dz_xhat, [5.0]);
    }

    #[test]
    fn reduce_normalizes_per_channel() {
        // C=2: channel 1 has mean 10 and var 4.
        let shape = NcsShape::new(1, 2, 2);
        let x = [1.0, -1.0, 12.0, 8.0];
        let dz = [1.0, 1.0, 3.0, 1.0];
        let (mut sum_dz, mut sum_dz_xhat) = ([0.0; 2], [0.0; 2]);
        backward_reduce(
            &shape,
            &dz,
            &x,
            &[0.0, 10.0],
            &[1.0, 4.0],
            0.0,
            &mut sum_dz,
            &mut sum_dz_xhat,
        )
        .unwrap();
        assert_eq!(sum_dz, [2.0, 4.0]);
        assert_eq!(sum_dz_xhat, [0.0, 2.0]);
    }

    #[test]
    fn reduce_zeroes_empty_channels() {
        let shape = NcsShape::new(0, 2, 3);
        let (mut sum_dz, mut sum_dz_xhat) = ([f32::NAN; 2], [f32::NAN; 2]);
        backward_reduce(&shape, &[], &[], &[0.0; 2], &[1.0; 2], 1e-5, &mut sum_dz, &mut sum_dz_xhat)
            .unwrap();
        assert_eq!(sum_dz, [0.0; 2]);
        assert_eq!(sum_dz_xhat, [0.0; 2]);
    }

    #[test]
    fn parameter_gradients_are_copied_sums() {
        let shape = NcsShape::new(1, 2, 1);
        let params = NormParams::new(&[1.0; 2], &[0.0; 2], &[0.0; 2], &[1.0; 2]);
        let (mut dx, mut dweight, mut dbias) = ([0.0; 2], [0.0; 2], [0.0; 2]);
        backward(
            &shape,
            &[0.5, -0.5],
            &[1.0, 2.0],
            params,
            &[3.0, -4.0],
            &[0.25, 8.0],
            0.0,
            GradOutputs::new(&mut dx, &mut dweight, &mut dbias),
        )
        .unwrap();
        assert_eq!(dweight, [0.25, 8.0]);
        assert_eq!(dbias, [3.0, -4.0]);
    }

    #[test]
    fn constant_upstream_gradient_yields_zero_dx() {
        // dz constant => sum_dz/M == dz and Σ x̂ == 0 => sum_dz_xhat == 0.
        let shape = NcsShape::new(2, 1, 2);
        let x = [-3.0, -1.0, 1.0, 3.0];
        let dz = [0.5; 4];
        let params = NormParams::new(&[2.0], &[0.0], &[0.0], &[5.0]);
        let (mut dx, mut dweight, mut dbias) = ([f32::NAN; 4], [0.0], [0.0]);
        backward(
            &shape,
            &dz,
            &x,
            params,
            &[2.0],
            &[0.0],
            0.0,
            GradOutputs::new(&mut dx, &mut dweight, &mut dbias),
        )
        .unwrap();
        assert_eq!(dx, [0.0; 4]);
    }

    #[test]
    fn empty_channels_still_write_parameter_gradients() {
        let shape = NcsShape::new(3, 2, 0);
        let params = NormParams::new(&[1.0; 2], &[0.0; 2], &[0.0; 2], &[1.0; 2]);
        let (mut dweight, mut dbias) = ([f32::NAN; 2], [f32::NAN; 2]);
        backward(
            &shape,
            &[],
            &[],
            params,
            &[1.0, 2.0],
            &[3.0, 4.0],
            1e-5,
            GradOutputs::new(&mut [], &mut dweight, &mut dbias),
        )
        .unwrap();
        assert_eq!(dweight, [3.0, 4.0]);
        assert_eq!(dbias, [1.0, 2.0]);
    }

    #[test]
    fn zero_channels_is_a_launch_error() {
        let shape = NcsShape::new(2, 0, 2);
        let params = NormParams::new(&[], &[], &[], &[]);
        let err = backward(
            &shape,
            &[],
            &[],
            params,
            &[],
            &[],
            1e-5,
            GradOutputs::new(&mut [], &mut [], &mut []),
        )
        .unwrap_err();
        assert_eq!(err.status_code(), syncbn_common::KernelError::INVALID_LAUNCH);
    }
}
