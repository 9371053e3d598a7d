//! Running (inference-time) statistics.
//!
//! After each training step the merged batch moments are folded into an
//! exponential moving average:
//! `running = (1 - momentum) * running + momentum * batch`.
//! The running variance tracks the unbiased batch variance.

use syncbn_common::{BatchMoments, Result, invalid_args};

#[derive(Debug, Clone, PartialEq)]
pub struct RunningStats {
    pub mean: Vec<f32>,
    pub var: Vec<f32>,
    pub num_batches_tracked: u64,
}

impl RunningStats {
    /// Mean 0 and variance 1 for every channel.
    pub fn new(channels: usize) -> Self {
        Self { mean: vec![0.0; channels], var: vec![1.0; channels], num_batches_tracked: 0 }
    }

    pub fn channels(&self) -> usize {
        self.mean.len()
    }

    /// Fold one batch into the moving averages.
    ///
    /// # Errors
    ///
    /// `InvalidArguments` if `momentum` is outside `[0, 1]` or the batch has a
    /// different channel count.
    pub fn update(&mut self, batch: &BatchMoments, momentum: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&momentum) {
            return Err(invalid_args(format!("momentum must be in [0, 1], got {momentum}")));
        }
        let channels = self.channels();
        if batch.mean.len() != channels || batch.unbiased_var.len() != channels {
            return Err(invalid_args(format!(
                "batch moments have {} channels, running stats have {channels}",
                batch.mean.len()
            )));
        }

        let keep = 1.0 - momentum;
        for (running, &m) in self.mean.iter_mut().zip(&batch.mean) {
            *running = keep * *running + momentum * m;
        }
        for (running, &v) in self.var.iter_mut().zip(&batch.unbiased_var) {
            *running = keep * *running + momentum * v;
        }
        self.num_batches_tracked += 1;
        Ok(())
    }
}
