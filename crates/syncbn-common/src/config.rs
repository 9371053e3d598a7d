//! Runtime configuration for synchronized batch normalization.
//!
//! Loads [`SyncBnConfig`] from a TOML file (`syncbn.toml`) with environment
//! variable overrides via `SYNCBN_*` prefixed variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which kernel backend the manager may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// CUDA when compiled in and a device answers, otherwise SIMT emulation.
    Auto,
    /// Always use the CPU SIMT emulation.
    Simt,
    /// Require CUDA; selection fails if no device is usable.
    Cuda,
}

impl std::fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Simt => write!(f, "simt"),
            Self::Cuda => write!(f, "cuda"),
        }
    }
}

impl std::str::FromStr for BackendPreference {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "simt" | "cpu" => Ok(Self::Simt),
            "cuda" => Ok(Self::Cuda),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// Batch-norm configuration loaded from TOML with environment overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncBnConfig {
    /// Added to the variance before the square root.
    /// Override: `SYNCBN_EPS`
    pub eps: f32,

    /// Weight of the current batch in the running-statistics EMA.
    /// Override: `SYNCBN_MOMENTUM`
    pub momentum: f32,

    /// Kernel backend preference.
    /// Override: `SYNCBN_BACKEND`
    pub backend: BackendPreference,

    /// Zero-based CUDA device index.
    /// Override: `SYNCBN_DEVICE_INDEX`
    pub device_index: usize,
}

impl Default for SyncBnConfig {
    fn default() -> Self {
        Self { eps: 1e-5, momentum: 0.1, backend: BackendPreference::Auto, device_index: 0 }
    }
}

/// Errors that can occur when loading or validating a [`SyncBnConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

impl SyncBnConfig {
    /// Render the default configuration as TOML.
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load from a TOML string. Missing fields take their defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: SyncBnConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load only from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "eps must be positive and finite, got {}",
                self.eps
            )));
        }
        if !self.momentum.is_finite() || !(0.0..=1.0).contains(&self.momentum) {
            return Err(ConfigError::Validation(format!(
                "momentum must be in [0, 1], got {}",
                self.momentum
            )));
        }
        Ok(())
    }

    /// Apply `SYNCBN_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("SYNCBN_EPS") {
            self.eps = val.parse::<f32>().map_err(|e| ConfigError::EnvOverride {
                key: "SYNCBN_EPS".into(),
                value: val.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Ok(val) = std::env::var("SYNCBN_MOMENTUM") {
            self.momentum = val.parse::<f32>().map_err(|e| ConfigError::EnvOverride {
                key: "SYNCBN_MOMENTUM".into(),
                value: val.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Ok(val) = std::env::var("SYNCBN_BACKEND") {
            self.backend = val.parse::<BackendPreference>().map_err(|reason| {
                ConfigError::EnvOverride {
                    key: "SYNCBN_BACKEND".into(),
                    value: val.clone(),
                    reason,
                }
            })?;
        }

        if let Ok(val) = std::env::var("SYNCBN_DEVICE_INDEX") {
            self.device_index = val.parse::<usize>().map_err(|e| ConfigError::EnvOverride {
                key: "SYNCBN_DEVICE_INDEX".into(),
                value: val.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }
}
