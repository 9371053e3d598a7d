//! Error types shared by every syncbn crate.
//!
//! Kernels never retry: every failure is reported once and the caller decides
//! what to do next. [`KernelError::status_code`] maps each failure class onto
//! the integer status returned by the raw entry points.

use thiserror::Error;

use crate::config::ConfigError;

/// Top-level error for the syncbn workspace.
#[derive(Error, Debug)]
pub enum SyncBnError {
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncBnError {
    /// Integer status for this error (never `0`).
    pub fn status_code(&self) -> i32 {
        match self {
            Self::Kernel(e) => e.status_code(),
            Self::Config(_) => KernelError::INVALID_ARGUMENTS,
        }
    }
}

/// Failures raised while validating, launching or executing a kernel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Grid/block geometry the device cannot run (empty grid, limits exceeded).
    #[error("invalid launch configuration: {reason}")]
    InvalidLaunch { reason: String },

    /// `N * C * S` does not fit the 32-bit index range used by device code.
    #[error("shape ({n}, {c}, {s}) overflows the addressable element range")]
    ShapeOverflow { n: usize, c: usize, s: usize },

    /// Buffer lengths or shape scalars that do not match the kernel contract.
    #[error("invalid arguments: {reason}")]
    InvalidArguments { reason: String },

    /// Device-reported failure (compile, load, allocation, launch, sync).
    #[error("GPU error: {reason}")]
    GpuError { reason: String },

    #[error("no kernel provider available")]
    NoProvider,
}

impl KernelError {
    pub const SUCCESS: i32 = 0;
    pub const INVALID_LAUNCH: i32 = 1;
    pub const SHAPE_OVERFLOW: i32 = 2;
    pub const INVALID_ARGUMENTS: i32 = 3;
    pub const GPU_ERROR: i32 = 4;
    pub const NO_PROVIDER: i32 = 5;

    /// Nonzero status code reported by the raw entry points.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::InvalidLaunch { .. } => Self::INVALID_LAUNCH,
            Self::ShapeOverflow { .. } => Self::SHAPE_OVERFLOW,
            Self::InvalidArguments { .. } => Self::INVALID_ARGUMENTS,
            Self::GpuError { .. } => Self::GPU_ERROR,
            Self::NoProvider => Self::NO_PROVIDER,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, SyncBnError>;

/// Build an [`KernelError::InvalidArguments`] wrapped as a [`SyncBnError`].
pub fn invalid_args(reason: impl Into<String>) -> SyncBnError {
    SyncBnError::Kernel(KernelError::InvalidArguments { reason: reason.into() })
}

/// Build an [`KernelError::InvalidLaunch`] wrapped as a [`SyncBnError`].
pub fn invalid_launch(reason: impl Into<String>) -> SyncBnError {
    SyncBnError::Kernel(KernelError::InvalidLaunch { reason: reason.into() })
}
