//! Compute kernels for synchronized batch normalization.
//!
//! Four kernels cover one training step of a batch-norm layer whose
//! statistics are merged across devices:
//!
//! 1. [`SyncBnKernel::stats`] reduces per-channel `sum` and `sqsum`.
//! 2. (external) the per-device sums are all-reduced into a global mean/var.
//! 3. [`SyncBnKernel::forward`] applies the affine normalization.
//! 4. [`SyncBnKernel::backward_reduce`] reduces `sum_dz` and `sum_dz_xhat`.
//! 5. (external) those sums are merged across devices.
//! 6. [`SyncBnKernel::backward`] produces `dx`, `dweight` and `dbias`.
//!
//! Providers are chosen by a [`KernelManager`]: CUDA (feature `cuda`) when a
//! device is usable, otherwise the [`SimtKernel`] emulation, which runs the
//! same warp/block algorithm on host threads. [`status`] exposes the kernels
//! behind the integer-status contract.

use std::sync::OnceLock;

use syncbn_common::{
    AuxStats, BackendPreference, ChannelStats, GradOutputs, KernelError, NcsShape, NormParams,
    Result, SyncBnConfig,
};

pub mod block;
mod contract;
pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod launch;
pub mod running;
pub mod status;
pub mod warp;

/// A backend able to run the four syncbn kernels.
///
/// Every method validates buffer lengths against `shape` before launching and
/// writes only its output buffers. Kernels are independent, single-pass
/// launches; ordering between them is the caller's business.
pub trait SyncBnKernel: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_available(&self) -> bool;

    /// Per-channel `sum` and `sqsum` of `x`.
    fn stats(&self, shape: &NcsShape, x: &[f32], sum: &mut [f32], sqsum: &mut [f32]) -> Result<()>;

    /// `z = gamma * (x - mean) / sqrt(var + eps) + beta`.
    fn forward(
        &self,
        shape: &NcsShape,
        x: &[f32],
        params: NormParams<'_>,
        eps: f32,
        z: &mut [f32],
    ) -> Result<()>;

    /// Per-channel `sum_dz` and `sum_dz_xhat`.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<()>;

    /// `dx`, `dweight` and `dbias` from the merged backward sums.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<()>;

    /// Run [`stats`](Self::stats) into a freshly allocated [`ChannelStats`]
    /// ready for the cross-device merge.
    fn channel_stats(&self, shape: &NcsShape, x: &[f32]) -> Result<ChannelStats> {
        let mut out = ChannelStats::zeros(shape.c);
        self.stats(shape, x, &mut out.sum, &mut out.sqsum)?;
        out.count = shape.per_channel()?;
        Ok(out)
    }

    /// Run [`backward_reduce`](Self::backward_reduce) into a freshly
    /// allocated [`AuxStats`].
    fn aux_stats(
        &self,
        shape: &NcsShape,
        dz: &[f32],
        x: &[f32],
        mean: &[f32],
        var: &[f32],
        eps: f32,
    ) -> Result<AuxStats> {
        let mut out = AuxStats::zeros(shape.c);
        self.backward_reduce(shape, dz, x, mean, var, eps, &mut out.sum_dz, &mut out.sum_dz_xhat)?;
        Ok(out)
    }
}

/// Kernel manager for selecting a provider, with cached selection.
pub struct KernelManager {
    providers: Vec<Box<dyn SyncBnKernel>>,
    selected: OnceLock<usize>,
}

impl KernelManager {
    /// Providers for the default configuration (`backend = auto`, device 0).
    pub fn new() -> Self {
        Self::from_config(&SyncBnConfig::default())
    }

    /// Providers allowed by `config.backend`, best first.
    pub fn from_config(config: &SyncBnConfig) -> Self {
        let mut providers: Vec<Box<dyn SyncBnKernel>> = Vec::new();
        if config.backend != BackendPreference::Cuda {
            providers.push(Box::new(cpu::SimtKernel));
        }

        // CUDA goes first when compiled in and permitted.
        #[cfg(feature = "cuda")]
        {
            if config.backend != BackendPreference::Simt {
                match cuda::CudaKernel::new_with_device(config.device_index) {
                    Ok(kernel) if kernel.is_available() => {
                        log::info!("CUDA provider available on device {}", config.device_index);
                        providers.insert(0, Box::new(kernel));
                    }
                    Ok(_) => log::debug!("CUDA provider not available"),
                    Err(e) => log::warn!("CUDA provider failed to initialize: {e}"),
                }
            }
        }

        Self { providers, selected: OnceLock::new() }
    }

    /// Select the first available provider and cache the choice.
    pub fn select_best(&self) -> Result<&dyn SyncBnKernel> {
        let selected_idx = self.selected.get_or_init(|| {
            match self.providers.iter().position(|provider| provider.is_available()) {
                Some(i) => {
                    log::info!("Selected syncbn provider: {}", self.providers[i].name());
                    i
                }
                None => {
                    log::error!("No available syncbn provider found");
                    usize::MAX
                }
            }
        });
        self.providers
            .get(*selected_idx)
            .map(|provider| provider.as_ref())
            .ok_or_else(|| KernelError::NoProvider.into())
    }

    /// Name of the provider chosen by [`select_best`](Self::select_best), if any.
    pub fn selected_provider_name(&self) -> Option<&'static str> {
        self.selected.get().and_then(|&idx| self.providers.get(idx)).map(|provider| provider.name())
    }

    pub fn list_available_providers(&self) -> Vec<&'static str> {
        self.providers
            .iter()
            .filter(|provider| provider.is_available())
            .map(|provider| provider.name())
            .collect()
    }
}

impl Default for KernelManager {
    fn default() -> Self {
        Self::new()
    }
}

pub use block::block_sum;
pub use cpu::SimtKernel;
#[cfg(feature = "cuda")]
pub use cuda::CudaKernel;
pub use launch::{LaunchConfig, MAX_BLOCK_SIZE, THREAD_LADDER, threads_for};
pub use running::RunningStats;
pub use warp::{FULL_MASK, Float2, WARP_SIZE, Warp, warp_sum};
