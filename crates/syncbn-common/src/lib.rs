//! Common types for synchronized batch-normalization kernels.
//!
//! This crate provides the foundation shared by the kernel crate: the error
//! taxonomy and integer status codes, runtime configuration, the `(N, C, S)`
//! shape, and the per-channel data contracts passed between kernels.

pub mod config;
pub mod error;
pub mod shape;
pub mod types;

pub use config::{BackendPreference, ConfigError, SyncBnConfig};
pub use error::{KernelError, Result, SyncBnError, invalid_args, invalid_launch};
pub use shape::{MAX_ELEMENTS, NcsShape};
pub use types::{AuxStats, BatchMoments, ChannelStats, GradOutputs, NormParams};
