//! Per-channel data contracts exchanged between kernels and their callers.
//!
//! The kernels read and write borrowed slices ([`NormParams`],
//! [`GradOutputs`]). The owned types ([`ChannelStats`], [`AuxStats`]) are the
//! per-device partials that cross the device boundary: whoever runs the
//! cross-device merge combines them with [`ChannelStats::merge`] and
//! [`AuxStats::mean_of`] before the next kernel runs.

use serde::{Deserialize, Serialize};

use crate::error::{Result, invalid_args};
use crate::shape::NcsShape;

/// Borrowed per-channel normalization parameters, each of length `C`.
#[derive(Debug, Clone, Copy)]
pub struct NormParams<'a> {
    /// Scale.
    pub gamma: &'a [f32],
    /// Shift.
    pub beta: &'a [f32],
    /// Globally merged mean.
    pub mean: &'a [f32],
    /// Globally merged (biased) variance.
    pub var: &'a [f32],
}

impl<'a> NormParams<'a> {
    pub fn new(gamma: &'a [f32], beta: &'a [f32], mean: &'a [f32], var: &'a [f32]) -> Self {
        Self { gamma, beta, mean, var }
    }

    /// Check every buffer has exactly `C` entries.
    pub fn check(&self, shape: &NcsShape) -> Result<()> {
        shape.check_channel("gamma", self.gamma.len())?;
        shape.check_channel("beta", self.beta.len())?;
        shape.check_channel("mean", self.mean.len())?;
        shape.check_channel("var", self.var.len())
    }
}

/// Borrowed outputs of the backward elementwise kernel.
#[derive(Debug)]
pub struct GradOutputs<'a> {
    /// Input gradient, `(N, C, S)`.
    pub dx: &'a mut [f32],
    /// Scale gradient, `C`.
    pub dweight: &'a mut [f32],
    /// Shift gradient, `C`.
    pub dbias: &'a mut [f32],
}

impl<'a> GradOutputs<'a> {
    pub fn new(dx: &'a mut [f32], dweight: &'a mut [f32], dbias: &'a mut [f32]) -> Self {
        Self { dx, dweight, dbias }
    }

    pub fn check(&self, shape: &NcsShape) -> Result<()> {
        shape.check_tensor("dx", self.dx.len())?;
        shape.check_channel("dweight", self.dweight.len())?;
        shape.check_channel("dbias", self.dbias.len())
    }
}

/// Per-channel sum and sum of squares over `count` elements per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub sum: Vec<f32>,
    pub sqsum: Vec<f32>,
    /// Elements reduced into each channel slot.
    pub count: usize,
}

/// Mean and variances finalized from [`ChannelStats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMoments {
    pub mean: Vec<f32>,
    /// Biased variance, used for normalization.
    pub var: Vec<f32>,
    /// Bessel-corrected variance, used for running statistics.
    pub unbiased_var: Vec<f32>,
    pub count: usize,
}

impl ChannelStats {
    /// Zeroed statistics for `channels` channels.
    pub fn zeros(channels: usize) -> Self {
        Self { sum: vec![0.0; channels], sqsum: vec![0.0; channels], count: 0 }
    }

    pub fn channels(&self) -> usize {
        self.sum.len()
    }

    /// Fold another device's partial into this one.
    pub fn merge(&mut self, other: &ChannelStats) -> Result<()> {
        if other.channels() != self.channels() || other.sqsum.len() != self.sqsum.len() {
            return Err(invalid_args(format!(
                "cannot merge channel stats with {} channels into {}",
                other.channels(),
                self.channels()
            )));
        }
        for (a, b) in self.sum.iter_mut().zip(&other.sum) {
            *a += b;
        }
        for (a, b) in self.sqsum.iter_mut().zip(&other.sqsum) {
            *a += b;
        }
        self.count += other.count;
        Ok(())
    }

    /// Finalize into mean and variances.
    ///
    /// `var = sqsum / count - mean²`; `unbiased_var = var * count / (count - 1)`,
    /// or `var` itself when `count == 1`.
    pub fn finalize(&self) -> Result<BatchMoments> {
        if self.count == 0 {
            return Err(invalid_args("cannot finalize channel stats over zero elements"));
        }
        let count = self.count as f64;
        let correction = if self.count > 1 { count / (count - 1.0) } else { 1.0 };

        let mut mean = Vec::with_capacity(self.channels());
        let mut var = Vec::with_capacity(self.channels());
        let mut unbiased_var = Vec::with_capacity(self.channels());
        for (&sum, &sqsum) in self.sum.iter().zip(&self.sqsum) {
            let m = sum as f64 / count;
            let v = sqsum as f64 / count - m * m;
            mean.push(m as f32);
            var.push(v as f32);
            unbiased_var.push((v * correction) as f32);
        }
        Ok(BatchMoments { mean, var, unbiased_var, count: self.count })
    }
}

/// Per-channel `sum_dz` and `sum_dz_xhat` handed from the backward reduction
/// to the backward elementwise kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxStats {
    pub sum_dz: Vec<f32>,
    pub sum_dz_xhat: Vec<f32>,
}

impl AuxStats {
    pub fn zeros(channels: usize) -> Self {
        Self { sum_dz: vec![0.0; channels], sum_dz_xhat: vec![0.0; channels] }
    }

    pub fn channels(&self) -> usize {
        self.sum_dz.len()
    }

    /// Element-wise mean of per-device partials.
    ///
    /// The backward kernel divides by the local `M = N * S`, so averaging
    /// across equally sized devices yields the global per-element means.
    pub fn mean_of(parts: &[AuxStats]) -> Result<AuxStats> {
        let Some(first) = parts.first() else {
            return Err(invalid_args("cannot average an empty set of aux stats"));
        };
        let channels = first.channels();
        let mut acc = AuxStats::zeros(channels);
        for part in parts {
            if part.channels() != channels || part.sum_dz_xhat.len() != channels {
                return Err(invalid_args(format!(
                    "aux stats channel mismatch: {} vs {channels}",
                    part.channels()
                )));
            }
            for (a, b) in acc.sum_dz.iter_mut().zip(&part.sum_dz) {
                *a += b;
            }
            for (a, b) in acc.sum_dz_xhat.iter_mut().zip(&part.sum_dz_xhat) {
                *a += b;
            }
        }
        let scale = 1.0 / parts.len() as f32;
        acc.sum_dz.iter_mut().chain(acc.sum_dz_xhat.iter_mut()).for_each(|v| *v *= scale);
        Ok(acc)
    }
}
