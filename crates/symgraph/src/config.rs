//! Explicit engine configuration: target device, default float width, and how
//! much optimization `compile` performs.
//!
//! A [`Config`] is passed to [`Graph::new`](crate::Graph::new) and to
//! [`compile`](crate::compile::compile); nothing reads process-global state
//! except [`Config::from_env`], which is called only when asked.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::env;
use crate::error::ConfigError;
use crate::types::{DType, Location};

/// Default fixed-point budget for the optimizer pipeline.
pub const DEFAULT_MAX_PASSES: usize = 8;

/// Compilation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Device {
    #[default]
    Cpu,
    Gpu(u32),
}

impl Device {
    pub fn location(self) -> Location {
        match self {
            Device::Cpu => Location::Host,
            Device::Gpu(n) => Location::Device(n),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Gpu(n) => write!(f, "gpu{n}"),
        }
    }
}

impl FromStr for Device {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized == "cpu" {
            return Ok(Device::Cpu);
        }
        if normalized == "gpu" {
            return Ok(Device::Gpu(0));
        }
        normalized
            .strip_prefix("gpu")
            .and_then(|ordinal| ordinal.parse::<u32>().ok())
            .map(Device::Gpu)
            .ok_or_else(|| ConfigError::UnknownDevice(s.to_string()))
    }
}

/// Default float dtype used by helpers that create float tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FloatX {
    Float32,
    #[default]
    Float64,
}

impl FloatX {
    pub fn dtype(self) -> DType {
        match self {
            FloatX::Float32 => DType::Float32,
            FloatX::Float64 => DType::Float64,
        }
    }
}

impl FromStr for FloatX {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float32" => Ok(FloatX::Float32),
            "float64" => Ok(FloatX::Float64),
            _ => Err(ConfigError::UnknownFloatX(s.to_string())),
        }
    }
}

/// How much of the optimizer pipeline `compile` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OptimizerMode {
    /// Canonicalization, merging, device specialization, and dead-code removal.
    #[default]
    FastRun,
    /// Merging and dead-code removal only.
    FastCompile,
    /// Dead-code removal only.
    None,
}

impl FromStr for OptimizerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fast_run" => Ok(OptimizerMode::FastRun),
            "fast_compile" => Ok(OptimizerMode::FastCompile),
            "none" | "none_opt" => Ok(OptimizerMode::None),
            _ => Err(ConfigError::UnknownOptimizer(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub device: Device,
    pub float_x: FloatX,
    pub optimizer: OptimizerMode,
    /// Iteration budget for every fixed-point step of the pipeline.
    pub max_passes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            float_x: FloatX::Float64,
            optimizer: OptimizerMode::FastRun,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

impl Config {
    pub fn cpu() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_float_x(mut self, float_x: FloatX) -> Self {
        self.float_x = float_x;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerMode) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes;
        self
    }

    /// Builds a configuration from `SYMGRAPH_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = env::var(env::DEVICE) {
            config.device = value.parse()?;
        }
        if let Some(value) = env::var(env::FLOATX) {
            config.float_x = value.parse()?;
        }
        if let Some(value) = env::var(env::OPTIMIZER) {
            config.optimizer = value.parse()?;
        }
        if let Some(value) = env::var(env::MAX_PASSES) {
            config.max_passes = env::parse_usize(env::MAX_PASSES, &value)?;
        }
        Ok(config)
    }
}
