//! Integer-status entry points.
//!
//! Each function takes the shape as signed 32-bit scalars plus flat buffers,
//! runs one kernel on the process-wide provider and returns
//! [`KernelError::SUCCESS`] or the nonzero status of the failure. Nothing is
//! retried. The provider is chosen once, from `SYNCBN_*` environment
//! variables, on first use.

use std::sync::OnceLock;

use syncbn_common::{GradOutputs, KernelError, NcsShape, NormParams, Result, SyncBnConfig};

use crate::{KernelManager, SyncBnKernel};

static MANAGER: OnceLock<KernelManager> = OnceLock::new();

fn manager() -> &'static KernelManager {
    MANAGER.get_or_init(|| {
        let config = SyncBnConfig::from_env().unwrap_or_else(|e| {
            log::warn!("ignoring invalid syncbn environment configuration: {e}");
            SyncBnConfig::default()
        });
        KernelManager::from_config(&config)
    })
}

fn run<F>(op: &str, n: i32, c: i32, s: i32, launch: F) -> i32
where
    F: FnOnce(&dyn SyncBnKernel, &NcsShape) -> Result<()>,
{
    let result = NcsShape::from_i32(n, c, s)
        .and_then(|shape| launch(manager().select_best()?, &shape));
    match result {
        Ok(()) => KernelError::SUCCESS,
        Err(e) => {
            log::error!("{op}({n}, {c}, {s}) failed: {e}");
            e.status_code()
        }
    }
}

/// Per-channel `sum` and `sqsum` of `x`.
pub fn syncbn_sum_sqsum(
    n: i32,
    c: i32,
    s: i32,
    x: &[f32],
    sum: &mut [f32],
    sqsum: &mut [f32],
) -> i32 {
    run("syncbn_sum_sqsum", n, c, s, |kernel, shape| kernel.stats(shape, x, sum, sqsum))
}

/// Normalized output `z`. `eps` is passed through unchecked.
#[allow(clippy::too_many_arguments)]
pub fn syncbn_forward(
    n: i32,
    c: i32,
    s: i32,
    x: &[f32],
    gamma: &[f32],
    beta: &[f32],
    mean: &[f32],
    var: &[f32],
    eps: f32,
    z: &mut [f32],
) -> i32 {
    run("syncbn_forward", n, c, s, |kernel, shape| {
        kernel.forward(shape, x, NormParams::new(gamma, beta, mean, var), eps, z)
    })
}

/// Per-channel `sum_dz` and `sum_dz_xhat`.
#[allow(clippy::too_many_arguments)]
pub fn syncbn_backward_xhat(
    n: i32,
    c: i32,
    s: i32,
    dz: &[f32],
    x: &[f32],
    mean: &[f32],
    var: &[f32],
    eps: f32,
    sum_dz: &mut [f32],
    sum_dz_xhat: &mut [f32],
) -> i32 {
    run("syncbn_backward_xhat", n, c, s, |kernel, shape| {
        kernel.backward_reduce(shape, dz, x, mean, var, eps, sum_dz, sum_dz_xhat)
    })
}

/// `dx`, `dweight` and `dbias`.
#[allow(clippy::too_many_arguments)]
pub fn syncbn_backward(
    n: i32,
    c: i32,
    s: i32,
    dz: &[f32],
    x: &[f32],
    gamma: &[f32],
    beta: &[f32],
    mean: &[f32],
    var: &[f32],
    sum_dz: &[f32],
    sum_dz_xhat: &[f32],
    eps: f32,
    dx: &mut [f32],
    dweight: &mut [f32],
    dbias: &mut [f32],
) -> i32 {
    run("syncbn_backward", n, c, s, |kernel, shape| {
        kernel.backward(
            shape,
            dz,
            x,
            NormParams::new(gamma, beta, mean, var),
            sum_dz,
            sum_dz_xhat,
            eps,
            GradOutputs::new(dx, dweight, dbias),
        )
    })
}
