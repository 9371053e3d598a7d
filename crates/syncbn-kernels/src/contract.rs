//! Buffer-length checks shared by every provider.
//!
//! Run before any launch so no kernel can index past a caller's buffer.

use syncbn_common::{GradOutputs, NcsShape, NormParams, Result};

pub(crate) fn check_stats(
    shape: &NcsShape,
    x: &[f32],
    sum: &[f32],
    sqsum: &[f32],
) -> Result<()> {
    shape.check_tensor("x", x.len())?;
    shape.check_channel("sum", sum.len())?;
    shape.check_channel("sqsum", sqsum.len())
}

pub(crate) fn check_forward(
    shape: &NcsShape,
    x: &[f32],
    params: &NormParams<'_>,
    z: &[f32],
) -> Result<()> {
    shape.check_tensor("x", x.len())?;
    shape.check_tensor("z", z.len())?;
    params.check(shape)
}

pub(crate) fn check_backward_reduce(
    shape: &NcsShape,
    dz: &[f32],
    x: &[f32],
    mean: &[f32],
    var: &[f32],
    sum_dz: &[f32],
    sum_dz_xhat: &[f32],
) -> Result<()> {
    shape.check_tensor("dz", dz.len())?;
    shape.check_tensor("x", x.len())?;
    shape.check_channel("mean", mean.len())?;
    shape.check_channel("var", var.len())?;
    shape.check_channel("sum_dz", sum_dz.len())?;
    shape.check_channel("sum_dz_xhat", sum_dz_xhat.len())
}

pub(crate) fn check_backward(
    shape: &NcsShape,
    dz: &[f32],
    x: &[f32],
    params: &NormParams<'_>,
    sum_dz: &[f32],
    sum_dz_xhat: &[f32],
    grads: &GradOutputs<'_>,
) -> Result<()> {
    shape.check_tensor("dz", dz.len())?;
    shape.check_tensor("x", x.len())?;
    params.check(shape)?;
    shape.check_channel("sum_dz", sum_dz.len())?;
    shape.check_channel("sum_dz_xhat", sum_dz_xhat.len())?;
    grads.check(shape)
}
