//! CUDA provider using cudarc 0.17.
//!
//! The kernel source is compiled once per provider. Each call copies its
//! inputs to the device, launches one kernel on the default stream,
//! synchronizes, and copies the outputs back, so device failures surface as
//! `GpuError` from the call that caused them.

mod source;

pub use source::{
    BACKWARD_KERNEL, BACKWARD_REDUCE_KERNEL, FORWARD_KERNEL, STATS_KERNEL, SYNCBN_KERNEL_SRC,
};

use std::sync::Arc;

use cudarc::driver::{
    CudaContext, CudaFunction, CudaModule, CudaSlice, CudaStream, LaunchArgs, PushKernelArg,
};
use cudarc::nvrtc::compile_ptx;
use syncbn_common::{GradOutputs, KernelError, NcsShape, NormParams, Result, SyncBnError};

use crate::SyncBnKernel;
use crate::contract::{check_backward, check_backward_reduce, check_forward, check_stats};
use crate::launch::LaunchConfig;

fn gpu_error<E: std::fmt::Debug>(what: &'static str) -> impl FnOnce(E) -> SyncBnError {
    move |e| KernelError::GpuError { reason: format!("{what}: {e:?}") }.into()
}

fn device_launch(cfg: &LaunchConfig) -> cudarc::driver::LaunchConfig {
    cudarc::driver::LaunchConfig {
        grid_dim: cfg.grid_dim,
        block_dim: cfg.block_dim,
        shared_mem_bytes: cfg.shared_mem_bytes,
    }
}

/// Shape scalars as the `int` kernel arguments. Only called after
/// `numel()` has bounded the product by `i32::MAX`.
fn dims(shape: &NcsShape) -> (i32, i32, i32) {
    (shape.n as i32, shape.c as i32, shape.s as i32)
}

/// CUDA provider bound to one device.
pub struct CudaKernel {
    _ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    _module: Arc<CudaModule>,
    stats_fn: CudaFunction,
    forward_fn: CudaFunction,
    backward_reduce_fn: CudaFunction,
    backward_fn: CudaFunction,
    device_id: usize,
}

impl CudaKernel {
    pub fn new() -> Result<Self> {
        Self::new_with_device(0)
    }

    pub fn new_with_device(device_id: usize) -> Result<Self> {
        log::info!("Initializing CUDA syncbn provider on device {device_id}");

        let ctx = CudaContext::new(device_id)
            .map_err(gpu_error("failed to create CUDA context"))?;
        let stream = ctx.default_stream();

        let ptx = compile_ptx(SYNCBN_KERNEL_SRC).map_err(gpu_error("NVRTC compilation failed"))?;
        let module = ctx.load_module(ptx).map_err(gpu_error("failed to load PTX module"))?;

        let load = |name: &'static str| {
            module.load_function(name).map_err(|e| -> SyncBnError {
                KernelError::GpuError { reason: format!("{name} function not found: {e:?}") }.into()
            })
        };
        let stats_fn = load(STATS_KERNEL)?;
        let forward_fn = load(FORWARD_KERNEL)?;
        let backward_reduce_fn = load(BACKWARD_REDUCE_KERNEL)?;
        let backward_fn = load(BACKWARD_KERNEL)?;

        Ok(Self {
            _ctx: ctx,
            stream,
            _module: module,
            stats_fn,
            forward_fn,
            backward_reduce_fn,
            backward_fn,
            device_id,
        })
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    fn upload(&self, name: &'static str, host: &[f32]) -> Result<CudaSlice<f32>> {
        self.stream.memcpy_stod(host).map_err(|e| {
            KernelError::GpuError { reason: format!("failed to copy {name} to device: {e:?}") }
                .into()
        })
    }

    fn alloc(&self, name: &'static str, len: usize) -> Result<CudaSlice<f32>> {
        self.stream.alloc_zeros(len).map_err(|e| {
            KernelError::GpuError { reason: format!("failed to allocate {name} on device: {e:?}") }
                .into()
        })
    }

    fn download(&self, name: &'static str, dev: &CudaSlice<f32>, host: &mut [f32]) -> Result<()> {
        let out: Vec<f32> = self.stream.memcpy_dtov(dev).map_err(|e| -> SyncBnError {
            KernelError::GpuError { reason: format!("failed to copy {name} from device: {e:?}") }
                .into()
        })?;
        host.copy_from_slice(&out);
        Ok(())
    }

    fn launch(&self, mut builder: LaunchArgs<'_>, cfg: &LaunchConfig) -> Result<()> {
        // Safety: every builder pushes the exact argument list of its kernel in
        // `SYNCBN_KERNEL_SRC`, and buffer lengths were checked against the shape.
        unsafe { builder.launch(device_launch(cfg)) }
            .map_err(gpu_error("CUDA kernel launch failed"))?;
        self.stream.synchronize().map_err(gpu_error("stream synchronize failed"))?;
        Ok(())
    }
}

impl SyncBnKernel for CudaKernel {
    fn name(&self) -> &'static str {
        "cuda"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn stats(&self, shape: &NcsShape, x: &[f32], sum: &mut [f32], sqsum: &mut [f32]) -> Result<()> {
        check_stats(shape, x, sum, sqsum)?;
        let cfg = LaunchConfig::per_channel(shape)?;
        if x.is_empty() {
            sum.fill(0.0);
            sqsum.fill(0.0);
            return Ok(());
        }
        log::debug!(
            "CUDA stats: shape={shape}, grid={:?}, block={:?}",
            cfg.grid_dim,
            cfg.block_dim
        );

        let x_dev = self.upload("x", x)?;
        let mut sum_dev = self.alloc("sum", shape.c)?;
        let mut sqsum_dev = self.alloc("sqsum", shape.c)?;
        let (n, c, s) = dims(shape);

        let mut builder = self.stream.launch_builder(&self.stats_fn);
        builder.arg(&x_dev);
        builder.arg(&mut sum_dev);
        builder.arg(&mut sqsum_dev);
        builder.arg(&n);
        builder.arg(&c);
        builder.arg(&s);
        self.launch(builder, &cfg)?;

        self.download("sum", &sum_dev, sum)?;
        self.download("sqsum", &sqsum_dev, sqsum)
    }

    fn forward(
        &self,
        shape: &NcsShape,
        x: &[f32],
        params: NormParams<'_>,
        eps: f32,
        z: &mut [f32],
    ) -> Result<()> {
        check_forward(shape, x, &params, z)?;
        let cfg = LaunchConfig::elementwise(shape)?;
        log::debug!(
            "CUDA forward: shape={shape}, grid={:?}, block={:?}",
            cfg.grid_dim,
            cfg.block_dim
        );

        let x_dev = self.upload("x", x)?;
        let gamma_dev = self.upload("gamma", params.gamma)?;
        let beta_dev = self.upload("beta", params.beta)?;
        let mean_dev = self.upload("mean", params.mean)?;
        let var_dev = self.upload("var", params.var)?;
        let mut z_dev = self.alloc("z", z.len())?;
        let (n, c, s) = dims(shape);

        let mut builder = self.stream.launch_builder(&self.forward_fn);
        builder.arg(&x_dev);
        builder.arg(&gamma_dev);
        builder.arg(&beta_dev);
        builder.arg(&mean_dev);
        builder.arg(&var_dev);
        builder.arg(&eps);
        builder.arg(&mut z_dev);
        builder.arg(&n);
        builder.arg(&c);
        builder.arg(&s);
        self.launch(builder, &cfg)?;

        self.download("z", &z_dev, z)
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
        check_backward_reduce(shape, dz, x, mean, var, sum_dz, sum_dz_xhat)?;
        let cfg = LaunchConfig::per_channel(shape)?;
        if x.is_empty() {
            sum_dz.fill(0.0);
            sum_dz_xhat.fill(0.0);
            return Ok(());
        }
        log::debug!(
            "CUDA backward_reduce: shape={shape}, grid={:?}, block={:?}",
            cfg.grid_dim,
            cfg.block_dim
        );

        let dz_dev = self.upload("dz", dz)?;
        let x_dev = self.upload("x", x)?;
        let mean_dev = self.upload("mean", mean)?;
        let var_dev = self.upload("var", var)?;
        let mut sum_dz_dev = self.alloc("sum_dz", shape.c)?;
        let mut sum_dz_xhat_dev = self.alloc("sum_dz_xhat", shape.c)?;
        let (n, c, s) = dims(shape);

        let mut builder = self.stream.launch_builder(&self.backward_reduce_fn);
        builder.arg(&dz_dev);
        builder.arg(&x_dev);
        builder.arg(&mean_dev);
        builder.arg(&var_dev);
        builder.arg(&eps);
        builder.arg(&mut sum_dz_dev);
        builder.arg(&mut sum_dz_xhat_dev);
        builder.arg(&n);
        builder.arg(&c);
        builder.arg(&s);
        self.launch(builder, &cfg)?;

        self.download("sum_dz", &sum_dz_dev, sum_dz)?;
        self.download("sum_dz_xhat", &sum_dz_xhat_dev, sum_dz_xhat)
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
        check_backward(shape, dz, x, &params, sum_dz, sum_dz_xhat, &grads)?;
        let cfg = LaunchConfig::per_channel(shape)?;
        let GradOutputs { dx, dweight, dbias } = grads;
        if x.is_empty() {
            dweight.copy_from_slice(sum_dz_xhat);
            dbias.copy_from_slice(sum_dz);
            return Ok(());
        }
        log::debug!(
            "CUDA backward: shape={shape}, grid={:?}, block={:?}",
            cfg.grid_dim,
            cfg.block_dim
        );

        let dz_dev = self.upload("dz", dz)?;
        let x_dev = self.upload("x", x)?;
        let gamma_dev = self.upload("gamma", params.gamma)?;
        let mean_dev = self.upload("mean", params.mean)?;
        let var_dev = self.upload("var", params.var)?;
        let sum_dz_dev = self.upload("sum_dz", sum_dz)?;
        let sum_dz_xhat_dev = self.upload("sum_dz_xhat", sum_dz_xhat)?;
        let mut dx_dev = self.alloc("dx", dx.len())?;
        let mut dweight_dev = self.alloc("dweight", shape.c)?;
        let mut dbias_dev = self.alloc("dbias", shape.c)?;
        let (n, c, s) = dims(shape);

        let mut builder = self.stream.launch_builder(&self.backward_fn);
        builder.arg(&dz_dev);
        builder.arg(&x_dev);
        builder.arg(&gamma_dev);
        builder.arg(&mean_dev);
        builder.arg(&var_dev);
        builder.arg(&sum_dz_dev);
        builder.arg(&sum_dz_xhat_dev);
        builder.arg(&eps);
        builder.arg(&mut dx_dev);
        builder.arg(&mut dweight_dev);
        builder.arg(&mut dbias_dev);
        builder.arg(&n);
        builder.arg(&c);
        builder.arg(&s);
        self.launch(builder, &cfg)?;

        self.download("dx", &dx_dev, dx)?;
        self.download("dweight", &dweight_dev, dweight)?;
        self.download("dbias", &dbias_dev, dbias)
    }
}
